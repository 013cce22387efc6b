//! Virtual devices driven by ordinary threads.
//!
//! Each device plays a [`SignalSource`] into its inputs and records what the
//! engine writes to its outputs into an [`OutputCapture`]. Cycles run on a
//! background thread paced by [`Pacing`], or one at a time through
//! [`NonRealTimeBackend::step`] for deterministic tests.

use std::sync::Arc;
use std::time::Duration;

use engine_rt::{InputPacket, OutputPacket};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::driver::DriverThread;
use crate::signal::{SignalGen, SignalSource};
use crate::{
    AudioDeviceBackend, BackendError, BackendKind, DeviceInfo, PacketHandler, Result, StreamConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pacing {
    /// One cycle per cycle duration of wall-clock time.
    Realtime,
    /// Wall-clock pacing sped up by the given factor.
    Scaled(f64),
    /// Cycles back to back.
    Unpaced,
}

impl Pacing {
    pub(crate) fn period(self, cycle_frames: usize, sample_rate: f64) -> Option<Duration> {
        let cycle = Duration::from_secs_f64(cycle_frames as f64 / sample_rate);
        match self {
            Pacing::Realtime => Some(cycle),
            Pacing::Scaled(factor) if factor > 0.0 => Some(cycle.div_f64(factor)),
            Pacing::Scaled(_) | Pacing::Unpaced => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualDevice {
    pub name: String,
    pub input_channels: usize,
    pub output_channels: usize,
    pub sample_rate: f64,
    pub cycle_frames: usize,
    pub pacing: Pacing,
    pub source: SignalSource,
    /// Output frames kept by the capture before it stops recording.
    pub capture_frames: usize,
}

impl Default for VirtualDevice {
    fn default() -> Self {
        Self {
            name: "virtual".into(),
            input_channels: 2,
            output_channels: 2,
            sample_rate: 48_000.0,
            cycle_frames: 256,
            pacing: Pacing::Realtime,
            source: SignalSource::default(),
            capture_frames: 48_000 * 10,
        }
    }
}

impl VirtualDevice {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_channels(mut self, inputs: usize, outputs: usize) -> Self {
        self.input_channels = inputs;
        self.output_channels = outputs;
        self
    }

    pub fn with_cycle(mut self, sample_rate: f64, cycle_frames: usize) -> Self {
        self.sample_rate = sample_rate;
        self.cycle_frames = cycle_frames;
        self
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_source(mut self, source: SignalSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_capture_frames(mut self, frames: usize) -> Self {
        self.capture_frames = frames;
        self
    }

    fn info(&self, index: usize) -> DeviceInfo {
        DeviceInfo {
            index,
            name: self.name.clone(),
            input_channels: self.input_channels,
            output_channels: self.output_channels,
            sample_rate: self.sample_rate,
            cycle_frames: self.cycle_frames,
        }
    }
}

#[derive(Debug, Default)]
struct CaptureBuf {
    channels: usize,
    limit: usize,
    samples: Vec<f32>,
    dropped_frames: u64,
}

/// Interleaved record of everything a virtual device played.
#[derive(Debug, Clone, Default)]
pub struct OutputCapture {
    inner: Arc<Mutex<CaptureBuf>>,
}

impl OutputCapture {
    fn reset(&self, channels: usize, limit_frames: usize) {
        let mut buf = self.inner.lock();
        buf.channels = channels;
        buf.limit = limit_frames * channels;
        buf.samples.clear();
        let limit = buf.limit;
        buf.samples.reserve(limit);
        buf.dropped_frames = 0;
    }

    fn record(&self, interleaved: &[f32]) {
        let mut buf = self.inner.lock();
        let room = buf.limit.saturating_sub(buf.samples.len());
        let take = room.min(interleaved.len());
        buf.samples.extend_from_slice(&interleaved[..take]);
        if take < interleaved.len() && buf.channels > 0 {
            buf.dropped_frames += ((interleaved.len() - take) / buf.channels) as u64;
        }
    }

    pub fn channels(&self) -> usize {
        self.inner.lock().channels
    }

    pub fn frames(&self) -> usize {
        let buf = self.inner.lock();
        buf.samples.len() / buf.channels.max(1)
    }

    pub fn samples(&self) -> Vec<f32> {
        self.inner.lock().samples.clone()
    }

    /// Samples of one channel.
    pub fn channel(&self, channel: usize) -> Vec<f32> {
        let buf = self.inner.lock();
        let channels = buf.channels.max(1);
        buf.samples
            .iter()
            .skip(channel)
            .step_by(channels)
            .copied()
            .collect()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.inner.lock().dropped_frames
    }

    pub fn clear(&self) {
        let mut buf = self.inner.lock();
        buf.samples.clear();
        buf.dropped_frames = 0;
    }
}

/// Per-device state touched once per cycle.
struct DeviceCycle {
    index: usize,
    config: StreamConfig,
    handler: Arc<dyn PacketHandler>,
    signal: SignalGen,
    input: Vec<f32>,
    output: Vec<f32>,
    capture: OutputCapture,
    frames: u64,
}

impl DeviceCycle {
    fn run(&mut self) {
        let frames = self.config.cycle_frames;
        let timestamp = Duration::from_secs_f64(self.frames as f64 / self.config.sample_rate);
        let in_channels = self.config.input_channels;
        let out_channels = self.config.output_channels;

        if in_channels > 0 {
            self.signal.fill(&mut self.input, in_channels, self.config.sample_rate);
        }
        self.output.fill(0.0);

        let input = InputPacket::interleaved_f32(self.index, 0, in_channels, &self.input)
            .with_timestamp(timestamp);
        let output = OutputPacket::interleaved_f32(self.index, 0, out_channels, &mut self.output)
            .with_timestamp(timestamp);
        match (in_channels > 0, out_channels > 0) {
            (true, true) => self.handler.process(&[input], &mut [output]),
            (true, false) => self.handler.process(&[input], &mut []),
            (false, true) => self.handler.process(&[], &mut [output]),
            (false, false) => {}
        }
        if out_channels > 0 {
            self.capture.record(&self.output);
        }
        self.frames += frames as u64;
    }
}

struct OpenDevice {
    cycle: Arc<Mutex<DeviceCycle>>,
    thread: Option<DriverThread>,
    period: Option<Duration>,
}

struct Slot {
    spec: VirtualDevice,
    capture: OutputCapture,
    open: Option<OpenDevice>,
}

/// Backend of thread-driven virtual devices.
pub struct NonRealTimeBackend {
    slots: Vec<Slot>,
}

impl std::fmt::Debug for NonRealTimeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonRealTimeBackend")
            .field("devices", &self.slots.len())
            .finish()
    }
}

impl NonRealTimeBackend {
    pub fn new(devices: Vec<VirtualDevice>) -> Self {
        let mut backend = Self { slots: Vec::new() };
        for device in devices {
            backend.add_device(device);
        }
        backend
    }

    /// One stereo duplex device playing a 440 Hz sine.
    pub fn with_default_device() -> Self {
        Self::new(vec![VirtualDevice::default()])
    }

    pub fn add_device(&mut self, device: VirtualDevice) -> usize {
        self.slots.push(Slot {
            spec: device,
            capture: OutputCapture::default(),
            open: None,
        });
        self.slots.len() - 1
    }

    /// Handle to the output record of `device`; it stays valid across
    /// open/close cycles.
    pub fn capture(&self, device: usize) -> Option<OutputCapture> {
        self.slots.get(device).map(|slot| slot.capture.clone())
    }

    /// Runs one cycle of a device that is open but not started.
    pub fn step(&mut self, device: usize) -> Result<()> {
        let open = self.open_device(device)?;
        if open.thread.is_some() {
            return Err(BackendError::Backend(format!(
                "device {device} is running on its own thread"
            )));
        }
        open.cycle.lock().run();
        Ok(())
    }

    fn slot(&self, device: usize) -> Result<&Slot> {
        self.slots
            .get(device)
            .ok_or(BackendError::DeviceNotFound(device))
    }

    fn open_device(&mut self, device: usize) -> Result<&mut OpenDevice> {
        self.slots
            .get_mut(device)
            .ok_or(BackendError::DeviceNotFound(device))?
            .open
            .as_mut()
            .ok_or(BackendError::NotOpen(device))
    }
}

impl AudioDeviceBackend for NonRealTimeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::NonRealTime
    }

    fn name(&self) -> &str {
        "non-real-time"
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self
            .slots
            .iter()
            .enumerate()
            .map(|(index, slot)| slot.spec.info(index))
            .collect())
    }

    fn open(&mut self, device: usize, config: &StreamConfig, handler: Arc<dyn PacketHandler>) -> Result<()> {
        let slot = self.slot(device)?;
        if slot.open.is_some() {
            return Err(BackendError::AlreadyOpen(device));
        }
        config.check_against(&slot.spec.info(device))?;

        slot.capture
            .reset(config.output_channels, slot.spec.capture_frames);
        let cycle = DeviceCycle {
            index: device,
            config: *config,
            handler,
            signal: SignalGen::new(slot.spec.source),
            input: vec![0.0; config.cycle_frames * config.input_channels],
            output: vec![0.0; config.cycle_frames * config.output_channels],
            capture: slot.capture.clone(),
            frames: 0,
        };
        let period = slot.spec.pacing.period(config.cycle_frames, config.sample_rate);
        tracing::debug!(
            device,
            name = %slot.spec.name,
            inputs = config.input_channels,
            outputs = config.output_channels,
            frames = config.cycle_frames,
            "virtual device opened"
        );
        self.slots[device].open = Some(OpenDevice {
            cycle: Arc::new(Mutex::new(cycle)),
            thread: None,
            period,
        });
        Ok(())
    }

    fn start(&mut self, device: usize) -> Result<()> {
        let open = self.open_device(device)?;
        if open.thread.as_ref().is_some_and(|t| !t.is_finished()) {
            return Ok(());
        }
        let cycle = open.cycle.clone();
        open.thread = Some(DriverThread::spawn(
            format!("rtio-nrt-{device}"),
            open.period,
            move || {
                cycle.lock().run();
                true
            },
        )?);
        tracing::debug!(device, "virtual device started");
        Ok(())
    }

    fn stop(&mut self, device: usize) -> Result<()> {
        let open = self.open_device(device)?;
        if let Some(mut thread) = open.thread.take() {
            thread.stop();
            tracing::debug!(device, "virtual device stopped");
        }
        Ok(())
    }

    fn close(&mut self, device: usize) {
        if let Some(slot) = self.slots.get_mut(device) {
            // Dropping the driver thread joins it.
            slot.open = None;
        }
    }

    fn is_running(&self, device: usize) -> bool {
        self.slots
            .get(device)
            .and_then(|slot| slot.open.as_ref())
            .and_then(|open| open.thread.as_ref())
            .is_some_and(|thread| !thread.is_finished())
    }
}
