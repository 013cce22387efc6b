use std::time::{Duration, Instant};

use audio_buf::ChannelFlags;
use engine_core::{
    AudioSystem, ControlMessage, Dir, DspContext, DspProcessor, EngineConfig, EngineError, HostMessage, HostSender,
    PassThrough, RateRatio, Selector, SubsystemConfig,
};
use io_backends::{NonRealTimeBackend, OutputCapture, Pacing, SignalSource, VirtualDevice};

fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    done()
}

fn system_with(device: VirtualDevice) -> (AudioSystem, OutputCapture) {
    let backend = NonRealTimeBackend::new(vec![device]);
    let capture = backend.capture(0).unwrap();
    (AudioSystem::new(Box::new(backend)), capture)
}

fn ramp_device() -> VirtualDevice {
    VirtualDevice::new("duplex")
        .with_channels(2, 2)
        .with_cycle(48_000.0, 256)
        .with_pacing(Pacing::Realtime)
        .with_source(SignalSource::Ramp)
}

fn assert_ramp_round_trip(ratio: RateRatio) {
    let (mut system, capture) = system_with(ramp_device());
    let config = EngineConfig::default().with_subsystem(
        SubsystemConfig::duplex(0)
            .with_cycle(256, 4)
            .with_block(64)
            .with_rate_ratio(ratio),
    );
    system.configure(config, |_| Box::new(PassThrough)).unwrap();
    system.enable(0).unwrap();
    assert!(wait_until(|| capture.frames() >= 256 * 24));
    system.finalize();

    let left = capture.channel(0);
    let right = capture.channel(1);
    let onset = left
        .iter()
        .position(|&s| s == 1.0)
        .expect("ramp never reached the output");
    let start = onset - 1;
    assert!(left[..start].iter().all(|&s| s == 0.0));
    let checked = (left.len() - start).min(2048);
    assert!(checked >= 1024);
    for frame in 0..checked {
        assert_eq!(left[start + frame], frame as f32, "left frame {frame}");
        assert_eq!(right[start + frame], 10_000.0 + frame as f32, "right frame {frame}");
    }
}

#[test]
fn duplex_pass_through_is_sample_identical() {
    assert_ramp_round_trip(RateRatio::Unity);
}

#[test]
fn interpolated_processing_rate_round_trips_exactly() {
    assert_ramp_round_trip(RateRatio::Interpolate(2));
}

struct Echo;

impl DspProcessor for Echo {
    fn process(&mut self, _ctx: &mut DspContext<'_>) {}

    fn on_message(&mut self, payload: &[u8], host: &HostSender) {
        let mut reply = payload.to_vec();
        reply.reverse();
        host.send(reply).unwrap();
    }
}

#[test]
fn user_messages_reach_the_processor_without_audio() {
    let (mut system, _) = system_with(VirtualDevice::new("idle").with_pacing(Pacing::Realtime));
    system
        .configure(
            EngineConfig::default().with_subsystem(SubsystemConfig::duplex(0)),
            |_| Box::new(Echo),
        )
        .unwrap();
    system.send(ControlMessage::user(0, b"ping".to_vec())).unwrap();

    let mut reply = None;
    assert!(wait_until(|| {
        reply = system.try_recv();
        reply.is_some()
    }));
    assert_eq!(
        reply,
        Some(HostMessage::Dsp {
            subsystem: 0,
            payload: b"gnip".to_vec()
        })
    );
    assert!(wait_until(|| system.stats(0).unwrap().message_callbacks == 1));
    assert_eq!(system.stats(0).unwrap().audio_callbacks, 0);
}

#[test]
fn channel_controls_are_applied_by_the_subsystem() {
    let (mut system, _) = system_with(VirtualDevice::new("idle"));
    system
        .configure(
            EngineConfig::default().with_subsystem(SubsystemConfig::duplex(0)),
            |_| Box::new(PassThrough),
        )
        .unwrap();
    system
        .send(ControlMessage::new(
            0,
            Selector::SetGain {
                dir: Dir::In,
                channel: None,
                gain: 0.5,
            },
        ))
        .unwrap();
    system
        .send(ControlMessage::new(
            0,
            Selector::Pass {
                channel: Some(1),
                enable: true,
            },
        ))
        .unwrap();

    let manager = system.manager().unwrap().clone();
    assert!(wait_until(|| {
        manager.gain(0, Dir::In, 1).unwrap() == 0.5
            && manager.flags(0, Dir::Out, 1).unwrap().contains(ChannelFlags::PASS)
    }));
    assert_eq!(manager.gain(0, Dir::In, 0).unwrap(), 0.5);
    assert!(!manager.flags(0, Dir::Out, 0).unwrap().contains(ChannelFlags::PASS));
}

#[test]
fn status_reports_meters_and_counters() {
    let device = VirtualDevice::new("sine")
        .with_channels(2, 2)
        .with_pacing(Pacing::Scaled(4.0))
        .with_source(SignalSource::Sine {
            hz: 1_000.0,
            amplitude: 0.5,
        });
    let (mut system, _) = system_with(device);
    system
        .configure(
            EngineConfig::default()
                .with_meter_ms(20)
                .with_subsystem(SubsystemConfig::duplex(0).with_cycle(256, 6)),
            |_| Box::new(PassThrough),
        )
        .unwrap();
    system.enable(0).unwrap();

    let mut status = None;
    assert!(wait_until(|| {
        system.drain(|message| {
            if let HostMessage::Status(report) = message {
                if report.audio_callbacks >= 20 {
                    status = Some(report);
                }
            }
        });
        status.is_some()
    }));
    system.finalize();

    let status = status.unwrap();
    assert_eq!(status.subsystem, 0);
    assert_eq!(status.input_meters.len(), 2);
    assert_eq!(status.output_meters.len(), 2);
    // A full-scale sine at amplitude 0.5 has an RMS of about 0.354.
    assert!((status.input_meters[0] - 0.354).abs() < 0.05, "{:?}", status.input_meters);
    assert!(status.wakeups > 0);
    assert_eq!(status.frames, status.audio_callbacks * 64);
    assert!(status.timestamp.is_some());
}

#[test]
fn output_only_subsystem_plays_processor_output() {
    let device = VirtualDevice::new("out")
        .with_channels(0, 2)
        .with_pacing(Pacing::Scaled(4.0));
    let (mut system, capture) = system_with(device);
    let constant = |ctx: &mut DspContext<'_>| {
        for index in 0..ctx.output.channels() {
            if let Some(plane) = ctx.output.plane_mut(index) {
                plane.fill(0.5);
            }
        }
    };
    system
        .configure(
            EngineConfig::default().with_subsystem(SubsystemConfig::default().with_output(0)),
            move |_| Box::new(constant),
        )
        .unwrap();
    system.enable(0).unwrap();
    assert!(wait_until(|| capture.frames() >= 256 * 16));
    system.finalize();

    let samples = capture.samples();
    assert!(samples.iter().all(|&s| s == 0.0 || s == 0.5));
    assert!(samples.iter().filter(|&&s| s == 0.5).count() > samples.len() / 2);
}

#[test]
fn disable_stops_dsp_callbacks() {
    let device = VirtualDevice::new("duplex").with_pacing(Pacing::Scaled(4.0));
    let (mut system, _) = system_with(device);
    system
        .configure(
            EngineConfig::default().with_subsystem(SubsystemConfig::duplex(0)),
            |_| Box::new(PassThrough),
        )
        .unwrap();
    system.enable(0).unwrap();
    assert!(system.is_enabled(0));
    assert!(wait_until(|| system.stats(0).unwrap().audio_callbacks > 8));

    assert!(system.disable(0).unwrap());
    assert!(!system.is_enabled(0));
    assert!(!system.backend().is_running(0));
    let stopped = system.stats(0).unwrap().audio_callbacks;
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(system.stats(0).unwrap().audio_callbacks, stopped);

    system.enable(0).unwrap();
    assert!(wait_until(|| system.stats(0).unwrap().audio_callbacks > stopped));
}

#[test]
fn configuration_errors_leave_the_system_unconfigured() {
    let (mut system, _) = system_with(VirtualDevice::new("stereo").with_channels(2, 2));

    let unknown = EngineConfig::default().with_subsystem(SubsystemConfig::duplex(3));
    assert!(matches!(
        system.configure(unknown, |_| Box::new(PassThrough)),
        Err(EngineError::UnknownDevice { device: 3, .. })
    ));
    assert!(!system.is_configured());

    let too_wide = EngineConfig::default()
        .with_subsystem(SubsystemConfig::duplex(0).with_channels(Some(4), None));
    assert!(matches!(
        system.configure(too_wide, |_| Box::new(PassThrough)),
        Err(EngineError::Backend(_))
    ));
    assert!(!system.is_configured());

    assert!(matches!(
        system.send(ControlMessage::user(0, Vec::new())),
        Err(EngineError::NotConfigured)
    ));

    let good = EngineConfig::default().with_subsystem(SubsystemConfig::duplex(0));
    system.configure(good, |_| Box::new(PassThrough)).unwrap();
    assert!(matches!(
        system.send(ControlMessage::user(1, Vec::new())),
        Err(EngineError::UnknownSubsystem(1))
    ));
    system.finalize();
    system.finalize();
    assert!(!system.is_configured());
}
