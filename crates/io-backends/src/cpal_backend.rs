//! CoreAudio and ALSA devices through cpal.

use std::sync::Arc;
use std::time::Instant;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use engine_rt::{InputPacket, OutputPacket};

use crate::{AudioDeviceBackend, BackendError, BackendKind, DeviceInfo, PacketHandler, Result, StreamConfig};

const FALLBACK_CYCLE_FRAMES: usize = 256;

#[cfg(target_os = "macos")]
fn host_id(kind: BackendKind) -> std::result::Result<cpal::HostId, &'static str> {
    match kind {
        BackendKind::CoreAudio => Ok(cpal::HostId::CoreAudio),
        _ => Err("only CoreAudio is available on macOS"),
    }
}

#[cfg(any(target_os = "linux", target_os = "dragonfly", target_os = "freebsd", target_os = "netbsd"))]
fn host_id(kind: BackendKind) -> std::result::Result<cpal::HostId, &'static str> {
    match kind {
        BackendKind::Alsa => Ok(cpal::HostId::Alsa),
        _ => Err("CoreAudio requires macOS"),
    }
}

#[cfg(not(any(
    target_os = "macos",
    target_os = "linux",
    target_os = "dragonfly",
    target_os = "freebsd",
    target_os = "netbsd"
)))]
fn host_id(_kind: BackendKind) -> std::result::Result<cpal::HostId, &'static str> {
    Err("no CoreAudio or ALSA host on this platform")
}

#[derive(Default)]
struct OpenStreams {
    input: Option<cpal::Stream>,
    output: Option<cpal::Stream>,
    running: bool,
}

pub struct CpalBackend {
    kind: BackendKind,
    devices: Vec<cpal::Device>,
    open: Vec<Option<OpenStreams>>,
}

impl CpalBackend {
    pub fn for_kind(kind: BackendKind) -> std::result::Result<Self, &'static str> {
        let host = cpal::host_from_id(host_id(kind)?).map_err(|_| "audio host unavailable")?;
        let devices: Vec<cpal::Device> = host
            .devices()
            .map_err(|_| "failed to enumerate audio devices")?
            .collect();
        tracing::debug!(host = kind.label(), devices = devices.len(), "audio host opened");
        let open = devices.iter().map(|_| None).collect();
        Ok(Self { kind, devices, open })
    }

    fn info(index: usize, device: &cpal::Device) -> DeviceInfo {
        let input = device.default_input_config().ok();
        let output = device.default_output_config().ok();
        let sample_rate = output
            .as_ref()
            .or(input.as_ref())
            .map_or(48_000.0, |config| f64::from(config.sample_rate().0));
        let cycle_frames = output
            .as_ref()
            .or(input.as_ref())
            .and_then(|config| match config.buffer_size() {
                cpal::SupportedBufferSize::Range { min, max } => {
                    Some((FALLBACK_CYCLE_FRAMES as u32).clamp(*min, *max) as usize)
                }
                cpal::SupportedBufferSize::Unknown => None,
            })
            .unwrap_or(FALLBACK_CYCLE_FRAMES);
        DeviceInfo {
            index,
            name: device.name().unwrap_or_else(|_| "Unknown".to_string()),
            input_channels: input.map_or(0, |c| usize::from(c.channels())),
            output_channels: output.map_or(0, |c| usize::from(c.channels())),
            sample_rate,
            cycle_frames,
        }
    }

    fn cpal_device(&self, device: usize) -> Result<&cpal::Device> {
        self.devices
            .get(device)
            .ok_or(BackendError::DeviceNotFound(device))
    }

    fn streams(&mut self, device: usize) -> Result<&mut OpenStreams> {
        self.open
            .get_mut(device)
            .ok_or(BackendError::DeviceNotFound(device))?
            .as_mut()
            .ok_or(BackendError::NotOpen(device))
    }
}

fn stream_config(channels: usize, config: &StreamConfig) -> Result<cpal::StreamConfig> {
    Ok(cpal::StreamConfig {
        channels: u16::try_from(channels).map_err(|_| BackendError::UnsupportedConfiguration)?,
        sample_rate: cpal::SampleRate(config.sample_rate as u32),
        buffer_size: cpal::BufferSize::Fixed(
            u32::try_from(config.cycle_frames).map_err(|_| BackendError::UnsupportedConfiguration)?,
        ),
    })
}

impl AudioDeviceBackend for CpalBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn name(&self) -> &str {
        self.kind.label()
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self
            .devices
            .iter()
            .enumerate()
            .map(|(index, device)| Self::info(index, device))
            .collect())
    }

    fn open(&mut self, index: usize, config: &StreamConfig, handler: Arc<dyn PacketHandler>) -> Result<()> {
        let device = self.cpal_device(index)?;
        if self.open[index].is_some() {
            return Err(BackendError::AlreadyOpen(index));
        }
        config.check_against(&Self::info(index, device))?;
        let opened = Instant::now();
        let mut streams = OpenStreams::default();

        if config.input_channels > 0 {
            let channels = config.input_channels;
            let handler = handler.clone();
            let stream = device
                .build_input_stream(
                    &stream_config(channels, config)?,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let packet = InputPacket::interleaved_f32(index, 0, channels, data)
                            .with_timestamp(opened.elapsed());
                        handler.process(&[packet], &mut []);
                    },
                    move |err| tracing::error!(device = index, %err, "input stream error"),
                    None,
                )
                .map_err(|err| BackendError::Backend(err.to_string()))?;
            streams.input = Some(stream);
        }
        if config.output_channels > 0 {
            let channels = config.output_channels;
            let stream = device
                .build_output_stream(
                    &stream_config(channels, config)?,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let packet = OutputPacket::interleaved_f32(index, 0, channels, data)
                            .with_timestamp(opened.elapsed());
                        handler.process(&[], &mut [packet]);
                    },
                    move |err| tracing::error!(device = index, %err, "output stream error"),
                    None,
                )
                .map_err(|err| BackendError::Backend(err.to_string()))?;
            streams.output = Some(stream);
        }
        tracing::info!(device = index, host = self.kind.label(), "device opened");
        self.open[index] = Some(streams);
        Ok(())
    }

    fn start(&mut self, device: usize) -> Result<()> {
        let streams = self.streams(device)?;
        for stream in [streams.input.as_ref(), streams.output.as_ref()].into_iter().flatten() {
            stream
                .play()
                .map_err(|err| BackendError::Backend(err.to_string()))?;
        }
        streams.running = true;
        Ok(())
    }

    fn stop(&mut self, device: usize) -> Result<()> {
        let streams = self.streams(device)?;
        for stream in [streams.input.as_ref(), streams.output.as_ref()].into_iter().flatten() {
            stream
                .pause()
                .map_err(|err| BackendError::Backend(err.to_string()))?;
        }
        streams.running = false;
        Ok(())
    }

    fn close(&mut self, device: usize) {
        if let Some(slot) = self.open.get_mut(device) {
            *slot = None;
        }
    }

    fn is_running(&self, device: usize) -> bool {
        self.open
            .get(device)
            .and_then(Option::as_ref)
            .is_some_and(|streams| streams.running)
    }
}
