use resample::RateError;
use thiserror::Error;

use crate::Dir;

pub type Result<T> = std::result::Result<T, BufferError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BufferError {
    #[error("device index {device} is out of range (manager holds {count} devices)")]
    DeviceOutOfRange { device: usize, count: usize },
    #[error("device {device} has no {} buffers", dir.label())]
    NotConfigured { device: usize, dir: Dir },
    #[error("device {device} {} has {count} channels, channel {channel} requested", dir.label())]
    ChannelOutOfRange {
        device: usize,
        dir: Dir,
        channel: usize,
        count: usize,
    },
    #[error("device {device} {} buffers are not ready for a block", dir.label())]
    NotReady { device: usize, dir: Dir },
    #[error("processing block size must be non-zero")]
    ZeroBlock,
    #[error("cycle count must be non-zero")]
    ZeroCycleCount,
    #[error("device {device} {} direction has channels but zero frames per cycle", dir.label())]
    ZeroCycleFrames { device: usize, dir: Dir },
    #[error("sample rate must be positive, got {0}")]
    InvalidSampleRate(f64),
    #[error(transparent)]
    Rate(#[from] RateError),
}
