use std::sync::Arc;
use std::time::{Duration, Instant};

use engine_rt::{InputPacket, OutputPacket};
use io_backends::{AudioDeviceBackend, FileBackedBackend, Pacing, StreamConfig};
use parking_lot::Mutex;

fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn input_file_plays_through_then_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("in.wav");
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 8_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for frame in 0..100i16 {
        writer.write_sample(frame * 64).unwrap();
        writer.write_sample(-frame * 64).unwrap();
    }
    writer.finalize().unwrap();

    let mut backend = FileBackedBackend::new()
        .with_pacing(Pacing::Unpaced)
        .with_cycle_frames(32);
    let device = backend.add_input(&path, false).unwrap();
    let info = backend.device(device).unwrap();
    assert_eq!((info.input_channels, info.output_channels), (2, 0));

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let handler = move |inputs: &[InputPacket<'_>], _: &mut [OutputPacket<'_>]| {
        let mut sink = sink.lock();
        for packet in inputs {
            sink.extend(packet.channel(0));
        }
    };
    let config = StreamConfig {
        sample_rate: 8_000.0,
        cycle_frames: 32,
        input_channels: 2,
        output_channels: 0,
    };
    backend.open(device, &config, Arc::new(handler)).unwrap();
    backend.start(device).unwrap();
    wait_until(|| backend.is_finished(device));
    assert!(backend.is_finished(device));
    backend.close(device);

    let received = received.lock();
    // Four cycles of 32 frames, the last padded with silence.
    assert_eq!(received.len(), 128);
    for (frame, sample) in received.iter().take(100).enumerate() {
        assert_eq!(*sample, (frame as f32 * 64.0) / 32_768.0);
    }
    assert!(received[100..].iter().all(|&s| s == 0.0));
}

#[test]
fn output_file_records_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.wav");
    let mut backend = FileBackedBackend::new()
        .with_pacing(Pacing::Unpaced)
        .with_cycle_frames(16);
    let device = backend.add_output(&path, 1, 8_000);

    let handler = |_: &[InputPacket<'_>], outputs: &mut [OutputPacket<'_>]| {
        for packet in outputs.iter_mut() {
            for frame in 0..packet.frames {
                packet.set(0, frame, 0.5);
            }
        }
    };
    let config = StreamConfig {
        sample_rate: 8_000.0,
        cycle_frames: 16,
        input_channels: 0,
        output_channels: 1,
    };
    backend.open(device, &config, Arc::new(handler)).unwrap();
    backend.start(device).unwrap();
    std::thread::sleep(Duration::from_millis(20));
    backend.stop(device).unwrap();
    backend.close(device);

    let mut reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.spec().sample_format, hound::SampleFormat::Float);
    let samples: Vec<f32> = reader.samples::<f32>().map(Result::unwrap).collect();
    assert!(!samples.is_empty());
    assert_eq!(samples.len() % 16, 0);
    assert!(samples.iter().all(|&s| s == 0.5));
}
