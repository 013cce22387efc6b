use audio_buf::{BufferError, Dir};
use engine_rt::QueueError;
use io_backends::BackendError;
use resample::RateError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("sub-system {subsystem} binds no device")]
    NoDevice { subsystem: usize },
    #[error("sub-system {subsystem}: {field} must be non-zero")]
    ZeroParameter { subsystem: usize, field: &'static str },
    #[error("sub-system {subsystem}: invalid sample rate {rate}")]
    InvalidSampleRate { subsystem: usize, rate: f64 },
    #[error("device {device} is bound as {} by sub-systems {first} and {second}", .dir.label())]
    DeviceReused {
        device: usize,
        dir: Dir,
        first: usize,
        second: usize,
    },
    #[error("device {device} is shared by sub-systems {first} and {second} with different {field}")]
    SharedMismatch {
        device: usize,
        first: usize,
        second: usize,
        field: &'static str,
    },
    #[error("sub-system {subsystem} references device {device}, but the backend has {count}")]
    UnknownDevice {
        subsystem: usize,
        device: usize,
        count: usize,
    },
    #[error("sub-system {0} does not exist")]
    UnknownSubsystem(usize),
    #[error("audio system is not configured")]
    NotConfigured,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error(transparent)]
    Rate(#[from] RateError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("message queue: {0}")]
    Queue(#[from] QueueError),
}
