//! Circular per-channel sample buffers between device callbacks and the DSP
//! thread.
//!
//! A [`BufferManager`] holds one [`DeviceSlot`] per device, each with an
//! optional input and output [`DirectionBuffers`]. Device callbacks push and
//! pull samples through [`BufferManager::update`], converting sample rate and
//! applying gain, mute, test tone and metering on the way. The DSP thread
//! polls readiness, takes block pointers and advances the cursors.

mod channel;
mod direction;
mod error;
mod flags;
mod manager;
mod meter;

pub use channel::ChannelBuffer;
pub use direction::{DirectionBuffers, DirectionLayout};
pub use error::{BufferError, Result};
pub use flags::{ChannelFlags, Dir, IoFlags};
pub use manager::{BufferManager, DeviceSetup, DeviceSlot, DEFAULT_METER_MS, MAX_METER_MS, MIN_METER_MS};

pub use engine_rt::{InputPacket, OutputPacket};
pub use resample::RateRatio;
