//! Device backends deliver hardware (or simulated) callbacks as packets.
//!
//! A backend enumerates devices by index and, once a device is opened, calls
//! its [`PacketHandler`] from the device's callback thread with one input
//! packet per captured callback and one output packet to fill. The engine
//! depends only on [`AudioDeviceBackend`]; [`make`] picks an implementation.

use std::sync::Arc;

use engine_rt::{InputPacket, OutputPacket};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod aggregate;
mod driver;
pub mod file;
pub mod nrt;
pub mod signal;

#[cfg(feature = "cpal")]
pub mod cpal_backend;

pub use aggregate::AggregatedBackend;
pub use file::FileBackedBackend;
pub use nrt::{NonRealTimeBackend, OutputCapture, Pacing, VirtualDevice};
pub use signal::SignalSource;

pub type Result<T> = std::result::Result<T, BackendError>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("device {0} not found")]
    DeviceNotFound(usize),
    #[error("device {0} is not open")]
    NotOpen(usize),
    #[error("device {0} is already open")]
    AlreadyOpen(usize),
    #[error("device {device} cannot provide {requested} {dir} channels (has {available})")]
    ChannelCount {
        device: usize,
        dir: &'static str,
        requested: usize,
        available: usize,
    },
    #[error("stream configuration unsupported")]
    UnsupportedConfiguration,
    #[error("{0}")]
    Unavailable(&'static str),
    #[error("wav file error: {0}")]
    Wav(#[from] hound::Error),
    #[error("failed to spawn device thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("backend error: {0}")]
    Backend(String),
}

/// Device families an engine can be built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    CoreAudio,
    Alsa,
    FileBacked,
    Aggregated,
    NonRealTime,
}

impl BackendKind {
    pub fn label(self) -> &'static str {
        match self {
            BackendKind::CoreAudio => "coreaudio",
            BackendKind::Alsa => "alsa",
            BackendKind::FileBacked => "file",
            BackendKind::Aggregated => "aggregated",
            BackendKind::NonRealTime => "nrt",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub input_channels: usize,
    pub output_channels: usize,
    pub sample_rate: f64,
    /// Frames per callback the device prefers.
    pub cycle_frames: usize,
}

/// Stream parameters requested when a device is opened.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub sample_rate: f64,
    pub cycle_frames: usize,
    pub input_channels: usize,
    pub output_channels: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            cycle_frames: 256,
            input_channels: 0,
            output_channels: 2,
        }
    }
}

impl StreamConfig {
    pub(crate) fn check_against(&self, info: &DeviceInfo) -> Result<()> {
        for (dir, requested, available) in [
            ("input", self.input_channels, info.input_channels),
            ("output", self.output_channels, info.output_channels),
        ] {
            if requested > available {
                return Err(BackendError::ChannelCount {
                    device: info.index,
                    dir,
                    requested,
                    available,
                });
            }
        }
        if self.cycle_frames == 0 || !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(BackendError::UnsupportedConfiguration);
        }
        Ok(())
    }
}

/// Receives device callbacks. Called on the device's callback thread, so
/// implementations must not block.
pub trait PacketHandler: Send + Sync {
    fn process(&self, inputs: &[InputPacket<'_>], outputs: &mut [OutputPacket<'_>]);
}

impl<F> PacketHandler for F
where
    F: Fn(&[InputPacket<'_>], &mut [OutputPacket<'_>]) + Send + Sync,
{
    fn process(&self, inputs: &[InputPacket<'_>], outputs: &mut [OutputPacket<'_>]) {
        self(inputs, outputs)
    }
}

pub trait AudioDeviceBackend {
    fn kind(&self) -> BackendKind;
    fn name(&self) -> &str;
    fn devices(&self) -> Result<Vec<DeviceInfo>>;
    fn open(&mut self, device: usize, config: &StreamConfig, handler: Arc<dyn PacketHandler>) -> Result<()>;
    fn start(&mut self, device: usize) -> Result<()>;
    fn stop(&mut self, device: usize) -> Result<()>;
    fn close(&mut self, device: usize);
    fn is_running(&self, device: usize) -> bool;

    fn device(&self, device: usize) -> Result<DeviceInfo> {
        self.devices()?
            .into_iter()
            .find(|info| info.index == device)
            .ok_or(BackendError::DeviceNotFound(device))
    }
}

/// Builds the backend for `kind`. Hardware families fall back to a backend
/// that reports why it is unavailable; the simulated families start empty.
pub fn make(kind: BackendKind) -> Box<dyn AudioDeviceBackend> {
    match kind {
        BackendKind::CoreAudio => hardware(kind),
        BackendKind::Alsa => hardware(kind),
        BackendKind::FileBacked => Box::new(FileBackedBackend::new()),
        BackendKind::Aggregated => Box::new(AggregatedBackend::new()),
        BackendKind::NonRealTime => Box::new(NonRealTimeBackend::with_default_device()),
    }
}

#[cfg(feature = "cpal")]
fn hardware(kind: BackendKind) -> Box<dyn AudioDeviceBackend> {
    match cpal_backend::CpalBackend::for_kind(kind) {
        Ok(backend) => Box::new(backend),
        Err(reason) => Box::new(StubBackend::new(kind, reason)),
    }
}

#[cfg(not(feature = "cpal"))]
fn hardware(kind: BackendKind) -> Box<dyn AudioDeviceBackend> {
    Box::new(StubBackend::new(
        kind,
        "hardware backends require the `cpal` feature",
    ))
}

/// Backend with no devices that refuses to open anything.
#[derive(Debug)]
pub struct StubBackend {
    kind: BackendKind,
    reason: &'static str,
}

impl StubBackend {
    pub const fn new(kind: BackendKind, reason: &'static str) -> Self {
        Self { kind, reason }
    }
}

impl AudioDeviceBackend for StubBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn name(&self) -> &str {
        self.reason
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(Vec::new())
    }

    fn open(&mut self, _device: usize, _config: &StreamConfig, _handler: Arc<dyn PacketHandler>) -> Result<()> {
        Err(BackendError::Unavailable(self.reason))
    }

    fn start(&mut self, _device: usize) -> Result<()> {
        Err(BackendError::Unavailable(self.reason))
    }

    fn stop(&mut self, _device: usize) -> Result<()> {
        Ok(())
    }

    fn close(&mut self, _device: usize) {}

    fn is_running(&self, _device: usize) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_refuses_to_open() {
        let mut backend = StubBackend::new(BackendKind::Alsa, "no alsa here");
        assert!(backend.devices().unwrap().is_empty());
        let handler: Arc<dyn PacketHandler> = Arc::new(|_: &[InputPacket<'_>], _: &mut [OutputPacket<'_>]| {});
        let err = backend
            .open(0, &StreamConfig::default(), handler)
            .unwrap_err();
        assert!(matches!(err, BackendError::Unavailable("no alsa here")));
        assert!(backend.stop(0).is_ok());
    }

    #[test]
    fn kind_serializes_kebab_case() {
        let text = serde_json::to_string(&BackendKind::NonRealTime).unwrap();
        assert_eq!(text, "\"non-real-time\"");
        let kind: BackendKind = serde_json::from_str("\"file-backed\"").unwrap();
        assert_eq!(kind, BackendKind::FileBacked);
    }

    #[test]
    fn stream_config_checks_channels() {
        let info = DeviceInfo {
            index: 3,
            name: "dev".into(),
            input_channels: 2,
            output_channels: 2,
            sample_rate: 48_000.0,
            cycle_frames: 64,
        };
        let config = StreamConfig {
            input_channels: 4,
            ..StreamConfig::default()
        };
        assert!(matches!(
            config.check_against(&info),
            Err(BackendError::ChannelCount { requested: 4, .. })
        ));
        assert!(StreamConfig::default().check_against(&info).is_ok());
    }
}
