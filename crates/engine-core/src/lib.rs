//! Sub-system threads and orchestration for the rtio engine.
//!
//! An [`AudioSystem`] owns a device backend, the shared buffer manager and
//! one engine thread per configured sub-system. Device callbacks feed the
//! buffers and wake the sub-system bound to them; the sub-system thread runs
//! its [`DspProcessor`] once per ready block and reports status to the host.

mod config;
mod dsp;
mod error;
mod message;
mod subsystem;
mod system;

pub use config::{EngineConfig, SubsystemConfig};
pub use dsp::{DspContext, DspProcessor, HostSender, PassThrough, Silence};
pub use error::{EngineError, Result};
pub use message::{ControlMessage, HostMessage, Selector, StatusMessage};
pub use subsystem::SubsystemStats;
pub use system::AudioSystem;

pub use audio_buf::{Dir, RateRatio};
