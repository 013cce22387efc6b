//! Messages exchanged between the host and sub-system threads.

use std::time::Duration;

use audio_buf::Dir;
use serde::Serialize;

/// Control request for one sub-system. `channel: None` addresses every
/// channel of the direction.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlMessage {
    pub subsystem: usize,
    pub selector: Selector,
}

impl ControlMessage {
    pub fn new(subsystem: usize, selector: Selector) -> Self {
        Self { subsystem, selector }
    }

    /// Opaque payload for the sub-system's DSP processor.
    pub fn user(subsystem: usize, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(subsystem, Selector::User(payload.into()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    SetGain { dir: Dir, channel: Option<usize>, gain: f32 },
    EnableChannel { dir: Dir, channel: Option<usize>, enable: bool },
    Mute { dir: Dir, channel: Option<usize>, enable: bool },
    Tone { dir: Dir, channel: Option<usize>, enable: bool },
    ToneHz { dir: Dir, channel: Option<usize>, hz: f32 },
    Meter { dir: Dir, channel: Option<usize>, enable: bool },
    /// Output channels only.
    Pass { channel: Option<usize>, enable: bool },
    User(Vec<u8>),
}

/// Periodic report composed on a sub-system thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusMessage {
    pub subsystem: usize,
    pub input_meters: Vec<f32>,
    pub output_meters: Vec<f32>,
    pub overflows: u64,
    pub underflows: u64,
    pub wakeups: u64,
    pub audio_callbacks: u64,
    pub message_callbacks: u64,
    /// Processing frames run since the sub-system was configured.
    pub frames: u64,
    pub timestamp: Option<Duration>,
}

/// Traffic from sub-system threads to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    Status(StatusMessage),
    Dsp { subsystem: usize, payload: Vec<u8> },
}

impl HostMessage {
    pub fn subsystem(&self) -> usize {
        match self {
            HostMessage::Status(status) => status.subsystem,
            HostMessage::Dsp { subsystem, .. } => *subsystem,
        }
    }
}
