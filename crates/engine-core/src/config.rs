use std::collections::HashMap;
use std::time::Duration;

use audio_buf::{Dir, DEFAULT_METER_MS};
use resample::RateRatio;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// One bound pairing of an input and/or output device, driven by its own
/// engine thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubsystemConfig {
    pub input_device: Option<usize>,
    pub output_device: Option<usize>,
    /// Wake the engine thread from input callbacks rather than output ones.
    pub sync_to_input: bool,
    /// Byte budget of the host-to-DSP control queue.
    pub msg_queue_bytes: usize,
    /// Frames per device callback, at the device rate.
    pub device_cycle_frames: usize,
    /// Frames per DSP callback, at the processing rate.
    pub dsp_block_frames: usize,
    pub cycle_count: usize,
    /// Device sample rate.
    pub sample_rate: f64,
    pub rate_ratio: RateRatio,
    /// Input channels to open; `None` opens every channel the device has.
    pub input_channels: Option<usize>,
    pub output_channels: Option<usize>,
}

impl Default for SubsystemConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            sync_to_input: true,
            msg_queue_bytes: 16 * 1024,
            device_cycle_frames: 256,
            dsp_block_frames: 64,
            cycle_count: 3,
            sample_rate: 48_000.0,
            rate_ratio: RateRatio::Unity,
            input_channels: None,
            output_channels: None,
        }
    }
}

impl SubsystemConfig {
    /// Full-duplex sub-system on a single device.
    pub fn duplex(device: usize) -> Self {
        Self {
            input_device: Some(device),
            output_device: Some(device),
            ..Self::default()
        }
    }

    pub fn with_input(mut self, device: usize) -> Self {
        self.input_device = Some(device);
        self
    }

    pub fn with_output(mut self, device: usize) -> Self {
        self.output_device = Some(device);
        self
    }

    pub fn with_sync_to_input(mut self, sync: bool) -> Self {
        self.sync_to_input = sync;
        self
    }

    pub fn with_cycle(mut self, device_cycle_frames: usize, cycle_count: usize) -> Self {
        self.device_cycle_frames = device_cycle_frames;
        self.cycle_count = cycle_count;
        self
    }

    pub fn with_block(mut self, dsp_block_frames: usize) -> Self {
        self.dsp_block_frames = dsp_block_frames;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_rate_ratio(mut self, ratio: RateRatio) -> Self {
        self.rate_ratio = ratio;
        self
    }

    pub fn with_channels(mut self, inputs: Option<usize>, outputs: Option<usize>) -> Self {
        self.input_channels = inputs;
        self.output_channels = outputs;
        self
    }

    pub fn with_msg_queue_bytes(mut self, bytes: usize) -> Self {
        self.msg_queue_bytes = bytes;
        self
    }

    pub fn device(&self, dir: Dir) -> Option<usize> {
        match dir {
            Dir::In => self.input_device,
            Dir::Out => self.output_device,
        }
    }

    pub fn processing_rate(&self) -> f64 {
        self.rate_ratio.processing_rate(self.sample_rate)
    }

    /// Duration of one device cycle.
    pub fn cycle_duration(&self) -> Duration {
        Duration::from_secs_f64(self.device_cycle_frames as f64 / self.sample_rate)
    }

    fn validate(&self, subsystem: usize) -> Result<()> {
        if self.input_device.is_none() && self.output_device.is_none() {
            return Err(EngineError::NoDevice { subsystem });
        }
        for (field, value) in [
            ("dsp_block_frames", self.dsp_block_frames),
            ("device_cycle_frames", self.device_cycle_frames),
            ("cycle_count", self.cycle_count),
            ("msg_queue_bytes", self.msg_queue_bytes),
        ] {
            if value == 0 {
                return Err(EngineError::ZeroParameter { subsystem, field });
            }
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(EngineError::InvalidSampleRate {
                subsystem,
                rate: self.sample_rate,
            });
        }
        self.rate_ratio.check_cycle(self.device_cycle_frames)?;
        Ok(())
    }

    /// Name of the first buffer parameter that differs from `other`.
    fn shared_mismatch(&self, other: &Self) -> Option<&'static str> {
        if self.dsp_block_frames != other.dsp_block_frames {
            Some("dsp_block_frames")
        } else if self.cycle_count != other.cycle_count {
            Some("cycle_count")
        } else if self.sample_rate != other.sample_rate {
            Some("sample_rate")
        } else if self.rate_ratio != other.rate_ratio {
            Some("rate_ratio")
        } else if self.device_cycle_frames != other.device_cycle_frames {
            Some("device_cycle_frames")
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Meter integration period; also sets the status interval.
    pub meter_ms: u32,
    /// Upper bound on how long `disable` waits for an in-flight DSP callback.
    pub disable_timeout_ms: u64,
    /// Slots in the DSP-to-host queue shared by every sub-system.
    pub host_queue_capacity: usize,
    /// SCHED_FIFO priority requested by engine threads.
    pub realtime_priority: Option<i32>,
    pub subsystems: Vec<SubsystemConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            meter_ms: DEFAULT_METER_MS,
            disable_timeout_ms: 500,
            host_queue_capacity: 256,
            realtime_priority: None,
            subsystems: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn with_subsystem(mut self, subsystem: SubsystemConfig) -> Self {
        self.subsystems.push(subsystem);
        self
    }

    pub fn with_meter_ms(mut self, meter_ms: u32) -> Self {
        self.meter_ms = meter_ms;
        self
    }

    pub fn with_disable_timeout(mut self, timeout: Duration) -> Self {
        self.disable_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_realtime_priority(mut self, priority: i32) -> Self {
        self.realtime_priority = Some(priority);
        self
    }

    pub fn disable_timeout(&self) -> Duration {
        Duration::from_millis(self.disable_timeout_ms)
    }

    /// Checks each sub-system's parameters and the device binding rules: a
    /// device direction belongs to at most one sub-system, and a device used
    /// by two sub-systems must be configured identically by both.
    pub fn validate(&self) -> Result<()> {
        if self.host_queue_capacity == 0 {
            return Err(EngineError::ZeroParameter {
                subsystem: 0,
                field: "host_queue_capacity",
            });
        }
        let mut bound: HashMap<(usize, Dir), usize> = HashMap::new();
        let mut owner: HashMap<usize, usize> = HashMap::new();
        for (index, subsystem) in self.subsystems.iter().enumerate() {
            subsystem.validate(index)?;
            for dir in [Dir::In, Dir::Out] {
                let Some(device) = subsystem.device(dir) else {
                    continue;
                };
                if let Some(&first) = bound.get(&(device, dir)) {
                    return Err(EngineError::DeviceReused {
                        device,
                        dir,
                        first,
                        second: index,
                    });
                }
                bound.insert((device, dir), index);
                match owner.get(&device) {
                    Some(&first) if first != index => {
                        if let Some(field) = self.subsystems[first].shared_mismatch(subsystem) {
                            return Err(EngineError::SharedMismatch {
                                device,
                                first,
                                second: index,
                                field,
                            });
                        }
                    }
                    Some(_) => {}
                    None => {
                        owner.insert(device, index);
                    }
                }
            }
        }
        Ok(())
    }

    /// Sub-system bound to `device` in direction `dir`.
    pub fn binding(&self, device: usize, dir: Dir) -> Option<usize> {
        self.subsystems
            .iter()
            .position(|subsystem| subsystem.device(dir) == Some(device))
    }
}
