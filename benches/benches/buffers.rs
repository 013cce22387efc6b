use std::time::Duration;

use audio_buf::{BufferManager, DeviceSetup, IoFlags, RateRatio};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use engine_rt::{InputPacket, OutputPacket};

const CHANNELS: usize = 2;
const CYCLE: usize = 256;
const BLOCK: usize = 64;

fn duplex(ratio: RateRatio) -> BufferManager {
    let mut manager = BufferManager::new(1, 100);
    let setup = DeviceSetup::default()
        .with_input(CHANNELS, CYCLE)
        .with_output(CHANNELS, CYCLE)
        .with_block(BLOCK, 3)
        .with_ratio(ratio);
    manager.setup(0, &setup).expect("setup");
    manager
}

/// One device callback followed by every block the engine can run.
fn device_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffers");
    group.measurement_time(Duration::from_secs(5));

    for ratio in [RateRatio::Unity, RateRatio::Interpolate(2), RateRatio::Decimate(2)] {
        group.bench_with_input(
            BenchmarkId::new("duplex_cycle_2x256", ratio.signed()),
            &ratio,
            |b, &ratio| {
                let manager = duplex(ratio);
                let input: Vec<f32> = (0..CHANNELS * CYCLE).map(|i| (i as f32 * 0.01).sin()).collect();
                let mut output = vec![0.0f32; CHANNELS * CYCLE];
                let mut ins = [std::ptr::null(); CHANNELS];
                let mut outs = [std::ptr::null_mut(); CHANNELS];
                b.iter(|| {
                    let packet = InputPacket::interleaved_f32(0, 0, CHANNELS, &input);
                    let out = OutputPacket::interleaved_f32(0, 0, CHANNELS, &mut output);
                    manager.update(&[packet], &mut [out]);
                    while manager.get_io(Some(0), Some(0), &mut ins, &mut outs).is_ok() {
                        manager.advance(0, IoFlags::IN | IoFlags::OUT);
                    }
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, device_cycle);
criterion_main!(benches);
