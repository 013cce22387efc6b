use audio_buf::{
    BufferError, BufferManager, DeviceSetup, Dir, InputPacket, IoFlags, OutputPacket, RateRatio,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

const BLOCK: usize = 10;
const CYCLES: usize = 3;
const FRAMES: usize = 25;
const CHANNELS: usize = 2;

fn setup() -> DeviceSetup {
    DeviceSetup::default().with_block(BLOCK, CYCLES)
}

fn ramp(channels: usize, start: usize, frames: usize) -> Vec<f32> {
    (start..start + frames)
        .flat_map(|n| (0..channels).map(move |c| (n + c * 10_000) as f32))
        .collect()
}

/// Device 0 captures, device 1 plays; every output channel passes its input
/// channel through. Returns the interleaved output stream.
fn run_pass_through(manager: &BufferManager, cycles: usize, input: impl Fn(usize) -> Vec<f32>) -> Vec<f32> {
    let mut played = Vec::new();
    let mut inputs = [std::ptr::null(); CHANNELS];
    let mut outputs = [std::ptr::null_mut(); CHANNELS];
    for cycle in 0..cycles {
        let data = input(cycle);
        manager.update(&[InputPacket::interleaved_f32(0, 0, CHANNELS, &data)], &mut []);

        while manager.is_device_ready(0, Dir::In) && manager.is_device_ready(1, Dir::Out) {
            manager
                .get_io(Some(0), Some(1), &mut inputs, &mut outputs)
                .expect("both sides ready");
            assert!(outputs.iter().all(|p| p.is_null()), "pass-through nulls output pointers");
            assert!(manager.advance(0, IoFlags::IN));
            assert!(manager.advance(1, IoFlags::OUT));
        }

        // A primed device only pulls once a full callback is buffered.
        if manager.fill_count(1, Dir::Out, 0).unwrap_or(0) >= FRAMES {
            let mut out = vec![f32::NAN; FRAMES * CHANNELS];
            manager.update(&[], &mut [OutputPacket::interleaved_f32(1, 0, CHANNELS, &mut out)]);
            played.extend_from_slice(&out);
        }
    }
    played
}

fn two_device_manager(ratio: RateRatio) -> BufferManager {
    let mut manager = BufferManager::new(2, 100);
    let base = setup().with_ratio(ratio);
    manager.setup(0, &base.with_input(CHANNELS, FRAMES)).unwrap();
    manager.setup(1, &base.with_output(CHANNELS, FRAMES)).unwrap();
    manager.enable_pass(1, Dir::Out, None, true).unwrap();
    manager
}

#[test]
fn ramp_passes_through_sample_identical() {
    let manager = two_device_manager(RateRatio::Unity);
    let played = run_pass_through(&manager, 40, |cycle| ramp(CHANNELS, cycle * FRAMES, FRAMES));

    assert!(played.len() >= 30 * FRAMES * CHANNELS);
    let expected = ramp(CHANNELS, 0, played.len() / CHANNELS);
    assert_eq!(played, expected);
    assert_eq!(manager.fault_count(0, Dir::In), 0);
    assert_eq!(manager.fault_count(1, Dir::Out), 0);
}

#[test]
fn random_packets_pass_through_sample_identical() {
    let mut rng = StdRng::seed_from_u64(7);
    let source: Vec<f32> = (0..40 * FRAMES * CHANNELS)
        .map(|_| rng.gen_range(-1.0f32..1.0))
        .collect();
    let manager = two_device_manager(RateRatio::Unity);
    let span = FRAMES * CHANNELS;
    let played = run_pass_through(&manager, 40, |cycle| source[cycle * span..(cycle + 1) * span].to_vec());
    assert!(!played.is_empty());
    assert_eq!(played, source[..played.len()]);
}

#[test]
fn interpolated_processing_rate_round_trips_exactly() {
    let manager = two_device_manager(RateRatio::Interpolate(2));
    assert_eq!(manager.direction(0, Dir::In).map(|d| d.len()), Some(150));

    let mut played = Vec::new();
    let mut inputs = [std::ptr::null(); CHANNELS];
    let mut outputs = [std::ptr::null_mut(); CHANNELS];
    for cycle in 0..30 {
        let data = ramp(CHANNELS, cycle * FRAMES, FRAMES);
        manager.update(&[InputPacket::interleaved_f32(0, 0, CHANNELS, &data)], &mut []);
        while manager.is_device_ready(0, Dir::In) && manager.is_device_ready(1, Dir::Out) {
            manager.get_io(Some(0), Some(1), &mut inputs, &mut outputs).unwrap();
            assert!(manager.advance(0, IoFlags::IN));
            assert!(manager.advance(1, IoFlags::OUT));
        }
        if manager.fill_count(1, Dir::Out, 0).unwrap_or(0) > 2 * FRAMES {
            let mut out = vec![f32::NAN; FRAMES * CHANNELS];
            manager.update(&[], &mut [OutputPacket::interleaved_f32(1, 0, CHANNELS, &mut out)]);
            played.extend_from_slice(&out);
        }
    }
    assert!(played.len() >= 20 * FRAMES * CHANNELS);
    assert_eq!(played, ramp(CHANNELS, 0, played.len() / CHANNELS));
    assert_eq!(manager.fault_count(1, Dir::Out), 0);
}

#[test]
fn oversized_input_packet_is_dropped_whole() {
    let mut manager = BufferManager::new(1, 100);
    manager.setup(0, &setup().with_input(2, FRAMES)).unwrap();
    let len = manager.direction(0, Dir::In).unwrap().len();
    assert_eq!(len, 80);

    let data = vec![0.5f32; (len + 1) * 2];
    manager.update(&[InputPacket::interleaved_f32(0, 0, 2, &data)], &mut []);
    assert_eq!(manager.fault_count(0, Dir::In), 1);
    assert_eq!(manager.fill_count(0, Dir::In, 0), Some(0));
    assert_eq!(manager.fill_count(0, Dir::In, 1), Some(0));

    let data = vec![0.5f32; len * 2];
    manager.update(&[InputPacket::interleaved_f32(0, 0, 2, &data)], &mut []);
    assert_eq!(manager.fill_count(0, Dir::In, 0), Some(len));
    let data = [0.5f32; 2];
    manager.update(&[InputPacket::interleaved_f32(0, 0, 2, &data)], &mut []);
    assert_eq!(manager.fault_count(0, Dir::In), 2);
    assert_eq!(manager.fill_count(0, Dir::In, 0), Some(len));
}

#[test]
fn output_underflow_zero_fills_and_counts_once() {
    let mut manager = BufferManager::new(1, 100);
    manager.setup(0, &setup().with_output(2, FRAMES)).unwrap();

    let mut ptrs = [std::ptr::null_mut(); 2];
    manager.get(0, Dir::Out, &mut ptrs).unwrap();
    for (ch, ptr) in ptrs.iter().enumerate() {
        let block = unsafe { std::slice::from_raw_parts_mut(*ptr, BLOCK) };
        block.fill(ch as f32 + 1.0);
    }
    assert!(manager.advance(0, IoFlags::OUT));

    let mut out = vec![f32::NAN; FRAMES * 2];
    manager.update(&[], &mut [OutputPacket::interleaved_f32(0, 0, 2, &mut out)]);
    for frame in 0..FRAMES {
        let expected = if frame < BLOCK { [1.0, 2.0] } else { [0.0, 0.0] };
        assert_eq!(&out[frame * 2..frame * 2 + 2], &expected);
    }
    assert_eq!(manager.fault_count(0, Dir::Out), 1);
    assert_eq!(manager.fill_count(0, Dir::Out, 0), Some(0));
}

#[test]
fn readiness_boundary_is_one_block() {
    let mut manager = BufferManager::new(1, 100);
    manager.setup(0, &setup().with_input(1, FRAMES).with_output(1, FRAMES)).unwrap();

    let data = [0.0f32; BLOCK - 1];
    manager.update(&[InputPacket::interleaved_f32(0, 0, 1, &data)], &mut []);
    assert!(!manager.is_device_ready(0, Dir::In));
    let data = [0.0f32; 1];
    manager.update(&[InputPacket::interleaved_f32(0, 0, 1, &data)], &mut []);
    assert!(manager.is_device_ready(0, Dir::In));

    // 80 slots: seven blocks leave exactly one block of headroom.
    for _ in 0..7 {
        assert!(manager.zero_output(0).unwrap());
    }
    assert!(manager.is_device_ready(0, Dir::Out));
    let mut out = [0.0f32; 1];
    manager.update(&[], &mut [OutputPacket::interleaved_f32(0, 0, 1, &mut out)]);
    assert!(manager.zero_output(0).unwrap());
    assert_eq!(manager.fill_count(0, Dir::Out, 0), Some(79));
    assert!(!manager.is_device_ready(0, Dir::Out));
    assert!(!manager.zero_output(0).unwrap());
}

#[test]
fn disabled_channel_is_null_and_receives_zeros() {
    let mut manager = BufferManager::new(1, 100);
    manager.setup(0, &setup().with_input(2, FRAMES)).unwrap();
    manager.enable_channel(0, Dir::In, Some(1), false).unwrap();
    assert!(!manager.is_channel_enabled(0, Dir::In, 1).unwrap());

    let data = ramp(2, 1, BLOCK);
    manager.update(&[InputPacket::interleaved_f32(0, 0, 2, &data)], &mut []);
    assert_eq!(manager.fill_count(0, Dir::In, 1), Some(BLOCK));
    assert!(manager.is_device_ready(0, Dir::In));

    let mut ptrs = [std::ptr::null_mut(); 3];
    assert_eq!(manager.get(0, Dir::In, &mut ptrs).unwrap(), 2);
    assert!(!ptrs[0].is_null());
    assert!(ptrs[1].is_null());
    assert!(ptrs[2].is_null());

    manager.enable_channel(0, Dir::In, Some(1), true).unwrap();
    manager.get(0, Dir::In, &mut ptrs).unwrap();
    let block = unsafe { std::slice::from_raw_parts(ptrs[1], BLOCK) };
    assert!(block.iter().all(|&s| s == 0.0));
}

#[test]
fn all_channels_disabled_is_never_ready() {
    let mut manager = BufferManager::new(1, 100);
    manager.setup(0, &setup().with_input(2, FRAMES)).unwrap();
    manager.enable_channel(0, Dir::In, None, false).unwrap();
    let data = vec![0.0f32; 2 * 20];
    manager.update(&[InputPacket::interleaved_f32(0, 0, 2, &data)], &mut []);
    assert!(!manager.is_device_ready(0, Dir::In));
}

#[test]
fn gain_and_meter_follow_the_channel() {
    let mut manager = BufferManager::new(1, 10);
    manager.setup(0, &setup().with_input(2, FRAMES)).unwrap();
    manager.set_gain(0, Dir::In, Some(0), 0.5).unwrap();
    assert_eq!(manager.gain(0, Dir::In, 0).unwrap(), 0.5);
    assert_eq!(manager.gain(0, Dir::In, 1).unwrap(), 1.0);

    let data = vec![1.0f32; 2 * 20];
    manager.update(&[InputPacket::interleaved_f32(0, 0, 2, &data)], &mut []);
    let mut meters = [0.0f32; 4];
    assert_eq!(manager.meters(0, Dir::In, &mut meters), 2);
    assert!(meters[0] > 0.0 && meters[0] < meters[1]);

    manager.enable_meter(0, Dir::In, None, false).unwrap();
    assert_eq!(manager.meter(0, Dir::In, 0).unwrap(), 0.0);
}

#[test]
fn input_to_output_copies_one_block() {
    let mut manager = BufferManager::new(2, 100);
    manager.setup(0, &setup().with_input(2, FRAMES)).unwrap();
    manager.setup(1, &setup().with_output(1, FRAMES)).unwrap();
    assert!(!manager.input_to_output(0, 1).unwrap());

    let data = ramp(2, 0, BLOCK);
    manager.update(&[InputPacket::interleaved_f32(0, 0, 2, &data)], &mut []);
    assert!(manager.input_to_output(0, 1).unwrap());
    assert_eq!(manager.fill_count(0, Dir::In, 0), Some(0));

    let mut out = [f32::NAN; BLOCK];
    manager.update(&[], &mut [OutputPacket::interleaved_f32(1, 0, 1, &mut out)]);
    assert_eq!(out.to_vec(), (0..BLOCK).map(|n| n as f32).collect::<Vec<_>>());
}

#[test]
fn channel_addressing_errors() {
    let mut manager = BufferManager::new(1, 100);
    manager.setup(0, &setup().with_input(2, FRAMES)).unwrap();
    assert_eq!(
        manager.set_gain(0, Dir::In, Some(2), 1.0),
        Err(BufferError::ChannelOutOfRange {
            device: 0,
            dir: Dir::In,
            channel: 2,
            count: 2
        })
    );
    assert_eq!(
        manager.enable_mute(0, Dir::Out, None, true),
        Err(BufferError::NotConfigured { device: 0, dir: Dir::Out })
    );
    assert_eq!(
        manager.setup(3, &setup()),
        Err(BufferError::DeviceOutOfRange { device: 3, count: 1 })
    );
    assert_eq!(manager.setup(0, &setup().with_block(0, 3)), Err(BufferError::ZeroBlock));
    assert!(matches!(
        manager.setup(0, &setup().with_input(1, 25).with_ratio(RateRatio::Decimate(2))),
        Err(BufferError::Rate(_))
    ));
}

#[test]
fn finalize_is_idempotent() {
    let mut manager = BufferManager::default();
    manager.finalize();
    manager.initialize(2, 5);
    assert_eq!(manager.meter_ms(), 10);
    assert!(manager.is_initialized());
    manager.finalize();
    manager.finalize();
    assert_eq!(manager.device_count(), 0);
    assert!(!manager.is_device_ready(0, Dir::In));
}

#[test]
fn decimated_device_round_trips_after_first_cycle() {
    let manager = two_device_manager(RateRatio::Decimate(5));
    assert_eq!(manager.direction(0, Dir::In).map(|d| d.len()), Some(20));

    let mut played = Vec::new();
    let mut inputs = [std::ptr::null(); CHANNELS];
    let mut outputs = [std::ptr::null_mut(); CHANNELS];
    for cycle in 0..30 {
        let data = ramp(CHANNELS, cycle * FRAMES, FRAMES);
        manager.update(&[InputPacket::interleaved_f32(0, 0, CHANNELS, &data)], &mut []);
        while manager.is_device_ready(0, Dir::In) && manager.is_device_ready(1, Dir::Out) {
            manager.get_io(Some(0), Some(1), &mut inputs, &mut outputs).unwrap();
            assert!(manager.advance(0, IoFlags::IN));
            assert!(manager.advance(1, IoFlags::OUT));
        }
        if manager.fill_count(1, Dir::Out, 0).unwrap_or(0) >= FRAMES / 5 {
            let mut out = vec![f32::NAN; FRAMES * CHANNELS];
            manager.update(&[], &mut [OutputPacket::interleaved_f32(1, 0, CHANNELS, &mut out)]);
            played.extend_from_slice(&out);
        }
    }

    assert!(played.len() >= 25 * FRAMES * CHANNELS);
    // Capture keeps every fifth frame; playback interpolates a unit ramp back
    // once the first retained sample has replaced the initial silence.
    let skip = 5 * CHANNELS;
    let expected = ramp(CHANNELS, 5, played.len() / CHANNELS - 5);
    for (got, want) in played[skip..].iter().zip(&expected) {
        assert!((got - want).abs() < 1e-2, "{got} != {want}");
    }
    assert_eq!(manager.fault_count(0, Dir::In), 0);
    assert_eq!(manager.fault_count(1, Dir::Out), 0);
}

#[test]
fn disabled_interpolated_channel_writes_silence() {
    let mut manager = BufferManager::new(1, 100);
    manager
        .setup(
            0,
            &DeviceSetup::default()
                .with_block(4, 3)
                .with_input(1, 4)
                .with_ratio(RateRatio::Interpolate(4)),
        )
        .unwrap();
    let mut ptrs = [std::ptr::null_mut(); 1];

    manager.update(&[InputPacket::interleaved_f32(0, 0, 1, &[1.0; 4])], &mut []);
    manager.enable_channel(0, Dir::In, Some(0), false).unwrap();
    manager.update(&[InputPacket::interleaved_f32(0, 0, 1, &[0.9; 4])], &mut []);
    for _ in 0..4 {
        assert!(manager.advance(0, IoFlags::IN));
    }
    manager.enable_channel(0, Dir::In, Some(0), true).unwrap();
    for _ in 0..4 {
        manager.get(0, Dir::In, &mut ptrs).unwrap();
        let block = unsafe { std::slice::from_raw_parts(ptrs[0], 4) };
        assert_eq!(block, &[0.0; 4]);
        assert!(manager.advance(0, IoFlags::IN));
    }

    // Re-enabled capture ramps up from silence, not from the last live sample.
    manager.update(&[InputPacket::interleaved_f32(0, 0, 1, &[1.0; 4])], &mut []);
    manager.get(0, Dir::In, &mut ptrs).unwrap();
    let block = unsafe { std::slice::from_raw_parts(ptrs[0], 4) };
    assert_eq!(block, &[0.25, 0.5, 0.75, 1.0]);
    assert_eq!(manager.fault_count(0, Dir::In), 0);
}

#[test]
fn decimated_playback_of_exact_fill_is_not_an_underflow() {
    let mut manager = BufferManager::new(1, 100);
    manager
        .setup(0, &setup().with_output(1, FRAMES).with_ratio(RateRatio::Interpolate(2)))
        .unwrap();
    for _ in 0..5 {
        assert!(manager.zero_output(0).unwrap());
    }
    assert_eq!(manager.fill_count(0, Dir::Out, 0), Some(2 * FRAMES));

    let mut out = [f32::NAN; FRAMES];
    manager.update(&[], &mut [OutputPacket::interleaved_f32(0, 0, 1, &mut out)]);
    assert!(out.iter().all(|&s| s == 0.0));
    assert_eq!(manager.fill_count(0, Dir::Out, 0), Some(0));
    assert_eq!(manager.fault_count(0, Dir::Out), 0);

    manager.update(&[], &mut [OutputPacket::interleaved_f32(0, 0, 1, &mut out)]);
    assert_eq!(manager.fault_count(0, Dir::Out), 1);
}

fn queue_output_blocks(manager: &BufferManager, blocks: usize, value: f32) {
    let mut ptrs = [std::ptr::null_mut(); 1];
    for _ in 0..blocks {
        manager.get(0, Dir::Out, &mut ptrs).unwrap();
        unsafe { std::slice::from_raw_parts_mut(ptrs[0], BLOCK) }.fill(value);
        assert!(manager.advance(0, IoFlags::OUT));
    }
}

#[test]
fn output_tone_and_mute_replace_buffered_signal() {
    let mut manager = BufferManager::new(1, 100);
    manager
        .setup(0, &setup().with_sample_rate(48_000.0).with_output(1, FRAMES))
        .unwrap();

    queue_output_blocks(&manager, 3, 0.5);
    manager.enable_tone(0, Dir::Out, Some(0), true).unwrap();
    manager.set_tone_hz(0, Dir::Out, Some(0), 12_000.0).unwrap();
    let mut out = [f32::NAN; FRAMES];
    manager.update(&[], &mut [OutputPacket::interleaved_f32(0, 0, 1, &mut out)]);
    // quarter-rate sine: 0, 1, 0, -1
    for (frame, s) in out.iter().enumerate() {
        let want = [0.0, 1.0, 0.0, -1.0][frame % 4];
        assert!((s - want).abs() < 1e-5, "frame {frame}: {s}");
    }
    assert_eq!(manager.fill_count(0, Dir::Out, 0), Some(3 * BLOCK - FRAMES));
    assert_eq!(manager.fault_count(0, Dir::Out), 0);

    manager.enable_tone(0, Dir::Out, Some(0), false).unwrap();
    manager.enable_mute(0, Dir::Out, Some(0), true).unwrap();
    queue_output_blocks(&manager, 2, 0.5);
    let mut out = [f32::NAN; FRAMES];
    manager.update(&[], &mut [OutputPacket::interleaved_f32(0, 0, 1, &mut out)]);
    assert_eq!(out, [0.0; FRAMES]);
    assert_eq!(manager.fill_count(0, Dir::Out, 0), Some(0));
    assert_eq!(manager.fault_count(0, Dir::Out), 0);
    assert!(manager.meter(0, Dir::Out, 0).unwrap() > 0.0);
}
