//! The per-sub-system engine thread.
//!
//! Device callbacks raise a pending flag and signal the condition variable;
//! the thread wakes with the state mutex held, services control messages,
//! then runs the DSP processor once per block for as long as both directions
//! are ready. A timed wait bounds the delay of a wakeup lost between the
//! pending check and the wait.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use audio_buf::{BufferManager, Dir, IoFlags};
use engine_rt::{AudioView, AudioViewMut, MessageQueue};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::config::SubsystemConfig;
use crate::dsp::{DspContext, DspProcessor, HostSender};
use crate::error::{EngineError, Result};
use crate::message::{ControlMessage, HostMessage, Selector, StatusMessage};

/// Counters a sub-system thread publishes.
#[derive(Debug, Default)]
struct Counters {
    wakeups: AtomicU64,
    audio_callbacks: AtomicU64,
    message_callbacks: AtomicU64,
    frames: AtomicU64,
}

/// Snapshot of a sub-system's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubsystemStats {
    pub wakeups: u64,
    pub audio_callbacks: u64,
    pub message_callbacks: u64,
    pub frames: u64,
    pub dropped_host_messages: u64,
}

/// State shared between the sub-system thread, device callbacks and the host.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    state: Mutex<()>,
    wake: Condvar,
    pending: AtomicBool,
    stop: AtomicBool,
    enabled: AtomicBool,
    /// True while the thread is inside a run of DSP callbacks.
    busy: Mutex<bool>,
    idle: Condvar,
    counters: Counters,
}

impl Shared {
    /// Called from device callbacks; never blocks.
    pub(crate) fn notify(&self) {
        self.pending.store(true, Ordering::Release);
        self.wake.notify_one();
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub(crate) fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
        self.notify();
    }

    /// Clears the enabled flag and waits up to `timeout` for an in-flight DSP
    /// run to finish. Returns false on timeout.
    pub(crate) fn disable(&self, timeout: Duration) -> bool {
        let mut busy = self.busy.lock();
        self.enabled.store(false, Ordering::Release);
        !self.idle.wait_while_for(&mut busy, |busy| *busy, timeout).timed_out()
    }
}

/// What the thread needs to know about its devices.
#[derive(Debug, Clone, Copy)]
struct Plan {
    input: Option<usize>,
    output: Option<usize>,
    input_channels: usize,
    output_channels: usize,
    block_frames: usize,
    processing_rate: f64,
    status_frames: u64,
    max_wait: Duration,
}

pub(crate) struct Subsystem {
    index: usize,
    config: SubsystemConfig,
    shared: Arc<Shared>,
    control: MessageQueue<ControlMessage>,
    host: HostSender,
    thread: Option<JoinHandle<()>>,
}

impl Subsystem {
    /// Spawns the thread for sub-system `index`. The manager must already
    /// hold buffers for every device the sub-system binds.
    pub(crate) fn spawn(
        index: usize,
        config: &SubsystemConfig,
        manager: Arc<BufferManager>,
        processor: Box<dyn DspProcessor>,
        host: MessageQueue<HostMessage>,
        realtime_priority: Option<i32>,
    ) -> Result<Self> {
        let processing_rate = config.processing_rate();
        let block_frames = config.dsp_block_frames;
        let status_frames = (f64::from(manager.meter_ms()) * processing_rate / 1000.0).ceil() as u64;
        let plan = Plan {
            input: config.input_device,
            output: config.output_device,
            input_channels: config
                .input_device
                .map_or(0, |device| manager.channel_count(device, Dir::In)),
            output_channels: config
                .output_device
                .map_or(0, |device| manager.channel_count(device, Dir::Out)),
            block_frames,
            processing_rate,
            status_frames: status_frames.max(block_frames as u64),
            max_wait: config.cycle_duration().max(Duration::from_millis(1)),
        };
        let shared = Arc::new(Shared::default());
        let control = MessageQueue::with_byte_capacity(config.msg_queue_bytes);
        let host = HostSender::new(index, host);
        let worker = Worker {
            index,
            plan,
            manager,
            processor,
            shared: shared.clone(),
            control: control.clone(),
            host: host.clone(),
            since_status: 0,
        };
        let thread = std::thread::Builder::new()
            .name(format!("rtio-subsystem-{index}"))
            .spawn(move || worker.run(realtime_priority))
            .map_err(EngineError::Spawn)?;
        tracing::debug!(
            subsystem = index,
            input = ?plan.input,
            output = ?plan.output,
            block = block_frames,
            processing_rate,
            "sub-system thread spawned"
        );
        Ok(Self {
            index,
            config: config.clone(),
            shared,
            control,
            host,
            thread: Some(thread),
        })
    }

    pub(crate) fn config(&self) -> &SubsystemConfig {
        &self.config
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub(crate) fn send(&self, message: ControlMessage) -> Result<()> {
        self.control.try_push(message)?;
        self.shared.notify();
        Ok(())
    }

    pub(crate) fn stats(&self) -> SubsystemStats {
        let counters = &self.shared.counters;
        SubsystemStats {
            wakeups: counters.wakeups.load(Ordering::Relaxed),
            audio_callbacks: counters.audio_callbacks.load(Ordering::Relaxed),
            message_callbacks: counters.message_callbacks.load(Ordering::Relaxed),
            frames: counters.frames.load(Ordering::Relaxed),
            dropped_host_messages: self.host.dropped(),
        }
    }

    /// Stops and joins the thread.
    pub(crate) fn join(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.shared.stop.store(true, Ordering::Release);
        {
            // Taking the state lock orders the stop flag before the thread's
            // next wait.
            let _state = self.shared.state.lock();
            self.shared.wake.notify_all();
        }
        if thread.join().is_err() {
            tracing::error!(subsystem = self.index, "sub-system thread panicked");
        } else {
            tracing::debug!(subsystem = self.index, "sub-system thread joined");
        }
    }
}

impl Drop for Subsystem {
    fn drop(&mut self) {
        self.join();
    }
}

struct Worker {
    index: usize,
    plan: Plan,
    manager: Arc<BufferManager>,
    processor: Box<dyn DspProcessor>,
    shared: Arc<Shared>,
    control: MessageQueue<ControlMessage>,
    host: HostSender,
    since_status: u64,
}

impl Worker {
    fn run(mut self, realtime_priority: Option<i32>) {
        engine_rt::thread::enable_ftz_daz();
        if let Some(priority) = realtime_priority {
            if let Err(err) = engine_rt::thread::promote_current_thread(priority) {
                tracing::warn!(subsystem = self.index, %err, "could not raise thread priority");
            }
        }
        let mut inputs = vec![std::ptr::null::<f32>(); self.plan.input_channels];
        let mut outputs = vec![std::ptr::null_mut::<f32>(); self.plan.output_channels];

        let shared = self.shared.clone();
        let mut state = shared.state.lock();
        loop {
            if shared.stop.load(Ordering::Acquire) {
                break;
            }
            if !shared.pending.swap(false, Ordering::AcqRel) {
                shared.wake.wait_for(&mut state, self.plan.max_wait);
                if shared.stop.load(Ordering::Acquire) {
                    break;
                }
                shared.pending.store(false, Ordering::Release);
            }
            shared.counters.wakeups.fetch_add(1, Ordering::Relaxed);
            self.drain_control();
            self.run_ready(&mut inputs, &mut outputs);
        }
        tracing::debug!(subsystem = self.index, "sub-system thread exiting");
    }

    fn drain_control(&mut self) {
        while let Ok(message) = self.control.try_pop() {
            self.apply(message.selector);
        }
    }

    fn apply(&mut self, selector: Selector) {
        let manager = &*self.manager;
        let result = match selector {
            Selector::User(payload) => {
                self.processor.on_message(&payload, &self.host);
                self.shared.counters.message_callbacks.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Selector::SetGain { dir, channel, gain } => {
                self.device(dir).map(|device| manager.set_gain(device, dir, channel, gain))
            }
            Selector::EnableChannel { dir, channel, enable } => self
                .device(dir)
                .map(|device| manager.enable_channel(device, dir, channel, enable)),
            Selector::Mute { dir, channel, enable } => self
                .device(dir)
                .map(|device| manager.enable_mute(device, dir, channel, enable)),
            Selector::Tone { dir, channel, enable } => self
                .device(dir)
                .map(|device| manager.enable_tone(device, dir, channel, enable)),
            Selector::ToneHz { dir, channel, hz } => {
                self.device(dir).map(|device| manager.set_tone_hz(device, dir, channel, hz))
            }
            Selector::Meter { dir, channel, enable } => self
                .device(dir)
                .map(|device| manager.enable_meter(device, dir, channel, enable)),
            Selector::Pass { channel, enable } => self
                .device(Dir::Out)
                .map(|device| manager.enable_pass(device, Dir::Out, channel, enable)),
        };
        match result {
            Some(Ok(())) => {}
            Some(Err(err)) => tracing::warn!(subsystem = self.index, %err, "control message rejected"),
            None => tracing::warn!(subsystem = self.index, "control message for an unbound direction"),
        }
    }

    fn device(&self, dir: Dir) -> Option<usize> {
        match dir {
            Dir::In => self.plan.input,
            Dir::Out => self.plan.output,
        }
    }

    fn run_ready(&mut self, inputs: &mut [*const f32], outputs: &mut [*mut f32]) {
        {
            let mut busy = self.shared.busy.lock();
            if !self.shared.is_enabled() {
                return;
            }
            *busy = true;
        }
        while self.shared.is_enabled() && self.run_block(inputs, outputs) {}
        *self.shared.busy.lock() = false;
        self.shared.idle.notify_all();
    }

    /// Runs the processor over one block. Returns false when a direction is
    /// not ready.
    fn run_block(&mut self, inputs: &mut [*const f32], outputs: &mut [*mut f32]) -> bool {
        let plan = self.plan;
        if self
            .manager
            .get_io(plan.input, plan.output, inputs, outputs)
            .is_err()
        {
            return false;
        }
        let timestamp = plan
            .input
            .and_then(|device| self.manager.timestamp(device, Dir::In))
            .or_else(|| plan.output.and_then(|device| self.manager.timestamp(device, Dir::Out)));
        {
            // SAFETY: `get_io` succeeded, so every non-null input pointer
            // addresses a readable block and every non-null output pointer a
            // writable block of `block_frames` samples, distinct per channel
            // and owned by this thread until the cursors advance below.
            let input = unsafe { AudioView::from_planes(inputs, plan.block_frames) };
            let output = unsafe { AudioViewMut::from_planes(outputs, plan.block_frames) };
            let mut ctx = DspContext::new(input, output, timestamp, plan.processing_rate, &self.host);
            self.processor.process(&mut ctx);
        }
        match (plan.input, plan.output) {
            (Some(input), Some(output)) if input == output => {
                self.manager.advance(input, IoFlags::IN | IoFlags::OUT);
            }
            (input, output) => {
                if let Some(device) = input {
                    self.manager.advance(device, IoFlags::IN);
                }
                if let Some(device) = output {
                    self.manager.advance(device, IoFlags::OUT);
                }
            }
        }

        let counters = &self.shared.counters;
        counters.audio_callbacks.fetch_add(1, Ordering::Relaxed);
        counters.frames.fetch_add(plan.block_frames as u64, Ordering::Relaxed);
        self.since_status += plan.block_frames as u64;
        if self.since_status >= plan.status_frames {
            self.since_status = 0;
            self.emit_status(timestamp);
        }
        true
    }

    fn emit_status(&self, timestamp: Option<Duration>) {
        let plan = self.plan;
        let meters = |device: Option<usize>, dir: Dir, channels: usize| {
            let mut values = vec![0.0; channels];
            if let Some(device) = device {
                self.manager.meters(device, dir, &mut values);
            }
            values
        };
        let counters = &self.shared.counters;
        let status = StatusMessage {
            subsystem: self.index,
            input_meters: meters(plan.input, Dir::In, plan.input_channels),
            output_meters: meters(plan.output, Dir::Out, plan.output_channels),
            overflows: plan
                .input
                .map_or(0, |device| self.manager.fault_count(device, Dir::In)),
            underflows: plan
                .output
                .map_or(0, |device| self.manager.fault_count(device, Dir::Out)),
            wakeups: counters.wakeups.load(Ordering::Relaxed),
            audio_callbacks: counters.audio_callbacks.load(Ordering::Relaxed),
            message_callbacks: counters.message_callbacks.load(Ordering::Relaxed),
            frames: counters.frames.load(Ordering::Relaxed),
            timestamp,
        };
        // A full host queue drops the report; HostSender counts it.
        let _ = self.host.push(HostMessage::Status(status));
    }
}
