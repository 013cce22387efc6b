use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use engine_rt::{AudioView, AudioViewMut, MessageQueue, QueueError};

use crate::message::HostMessage;

/// Client processing run on a sub-system thread once per ready block.
///
/// Absent planes are disabled channels; absent output planes may also be
/// channels already filled by pass-through. Present output planes arrive
/// zeroed.
pub trait DspProcessor: Send {
    fn process(&mut self, ctx: &mut DspContext<'_>);

    /// Receives a user payload sent to this sub-system. Runs on the
    /// sub-system thread before the next block.
    fn on_message(&mut self, _payload: &[u8], _host: &HostSender) {}
}

impl<F> DspProcessor for F
where
    F: FnMut(&mut DspContext<'_>) + Send,
{
    fn process(&mut self, ctx: &mut DspContext<'_>) {
        self(ctx)
    }
}

pub struct DspContext<'a> {
    pub input: AudioView<'a>,
    pub output: AudioViewMut<'a>,
    /// Processing-rate time of the first frame of this block.
    pub timestamp: Option<Duration>,
    pub sample_rate: f64,
    host: &'a HostSender,
}

impl<'a> DspContext<'a> {
    pub(crate) fn new(
        input: AudioView<'a>,
        output: AudioViewMut<'a>,
        timestamp: Option<Duration>,
        sample_rate: f64,
        host: &'a HostSender,
    ) -> Self {
        Self {
            input,
            output,
            timestamp,
            sample_rate,
            host,
        }
    }

    pub fn frames(&self) -> usize {
        self.input.frames().max(self.output.frames())
    }

    pub fn subsystem(&self) -> usize {
        self.host.subsystem
    }

    pub fn send_to_host(&self, payload: Vec<u8>) -> Result<(), QueueError> {
        self.host.send(payload)
    }
}

/// Sending half of the DSP-to-host queue for one sub-system.
#[derive(Debug, Clone)]
pub struct HostSender {
    subsystem: usize,
    queue: MessageQueue<HostMessage>,
    dropped: Arc<AtomicU64>,
}

impl HostSender {
    pub(crate) fn new(subsystem: usize, queue: MessageQueue<HostMessage>) -> Self {
        Self {
            subsystem,
            queue,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn send(&self, payload: Vec<u8>) -> Result<(), QueueError> {
        self.push(HostMessage::Dsp {
            subsystem: self.subsystem,
            payload,
        })
    }

    pub(crate) fn push(&self, message: HostMessage) -> Result<(), QueueError> {
        self.queue.try_push(message).inspect_err(|_| {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        })
    }

    /// Messages refused because the host queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Copies input channel `n` to output channel `n`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThrough;

impl DspProcessor for PassThrough {
    fn process(&mut self, ctx: &mut DspContext<'_>) {
        let input = ctx.input;
        for index in 0..ctx.output.channels() {
            let (Some(source), Some(dest)) = (input.plane(index), ctx.output.plane_mut(index)) else {
                continue;
            };
            let n = source.len().min(dest.len());
            dest[..n].copy_from_slice(&source[..n]);
        }
    }
}

/// Writes silence; outputs are already zeroed, so this only drains inputs.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silence;

impl DspProcessor for Silence {
    fn process(&mut self, _ctx: &mut DspContext<'_>) {}
}
