//! WAV files as devices: an input file plays into the engine, an output file
//! records what the engine plays.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use engine_rt::{InputPacket, OutputPacket};
use parking_lot::Mutex;

use crate::driver::DriverThread;
use crate::nrt::Pacing;
use crate::{
    AudioDeviceBackend, BackendError, BackendKind, DeviceInfo, PacketHandler, Result, StreamConfig,
};

const DEFAULT_CYCLE_FRAMES: usize = 256;

type Writer = hound::WavWriter<BufWriter<File>>;

enum Role {
    /// Interleaved samples loaded at registration.
    Input { samples: Arc<[f32]>, looped: bool },
    Output,
}

struct FileSlot {
    path: PathBuf,
    channels: usize,
    sample_rate: u32,
    role: Role,
    finished: Arc<AtomicBool>,
    open: Option<OpenFile>,
}

struct OpenFile {
    cycle: Arc<Mutex<FileCycle>>,
    thread: Option<DriverThread>,
}

struct FileCycle {
    index: usize,
    channels: usize,
    frames: usize,
    sample_rate: f64,
    handler: Arc<dyn PacketHandler>,
    buffer: Vec<f32>,
    source: Option<(Arc<[f32]>, bool)>,
    position: usize,
    writer: Option<Writer>,
    finished: Arc<AtomicBool>,
    elapsed: u64,
}

impl FileCycle {
    /// Returns false once an input file is exhausted.
    fn run(&mut self) -> bool {
        let timestamp = Duration::from_secs_f64(self.elapsed as f64 / self.sample_rate);
        self.elapsed += self.frames as u64;
        match &self.source {
            Some((samples, looped)) => {
                let mut filled = 0;
                while filled < self.buffer.len() {
                    if self.position >= samples.len() {
                        if *looped && !samples.is_empty() {
                            self.position = 0;
                        } else {
                            break;
                        }
                    }
                    let take = (self.buffer.len() - filled).min(samples.len() - self.position);
                    self.buffer[filled..filled + take]
                        .copy_from_slice(&samples[self.position..self.position + take]);
                    filled += take;
                    self.position += take;
                }
                self.buffer[filled..].fill(0.0);
                let packet = InputPacket::interleaved_f32(self.index, 0, self.channels, &self.buffer)
                    .with_timestamp(timestamp);
                self.handler.process(&[packet], &mut []);
                if filled < self.buffer.len() {
                    self.finished.store(true, Ordering::Release);
                    return false;
                }
                true
            }
            None => {
                self.buffer.fill(0.0);
                let packet = OutputPacket::interleaved_f32(self.index, 0, self.channels, &mut self.buffer)
                    .with_timestamp(timestamp);
                self.handler.process(&[], &mut [packet]);
                let failed = match self.writer.as_mut() {
                    Some(writer) => self
                        .buffer
                        .iter()
                        .try_for_each(|&sample| writer.write_sample(sample))
                        .err(),
                    None => None,
                };
                if let Some(err) = failed {
                    tracing::error!(device = self.index, %err, "failed to write output file; recording stopped");
                    self.writer = None;
                }
                true
            }
        }
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
        }
        Ok(())
    }
}

/// Backend whose devices are WAV files.
pub struct FileBackedBackend {
    slots: Vec<FileSlot>,
    cycle_frames: usize,
    pacing: Pacing,
}

impl std::fmt::Debug for FileBackedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackedBackend")
            .field("files", &self.slots.iter().map(|s| &s.path).collect::<Vec<_>>())
            .field("cycle_frames", &self.cycle_frames)
            .field("pacing", &self.pacing)
            .finish()
    }
}

impl Default for FileBackedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FileBackedBackend {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            cycle_frames: DEFAULT_CYCLE_FRAMES,
            pacing: Pacing::Realtime,
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_cycle_frames(mut self, frames: usize) -> Self {
        self.cycle_frames = frames.max(1);
        self
    }

    /// Registers a WAV file as an input device and loads its samples.
    pub fn add_input(&mut self, path: impl AsRef<Path>, looped: bool) -> Result<usize> {
        let path = path.as_ref();
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()?
            }
        };
        tracing::info!(
            path = %path.display(),
            channels = spec.channels,
            sample_rate = spec.sample_rate,
            frames = samples.len() / usize::from(spec.channels.max(1)),
            "input file loaded"
        );
        Ok(self.push(FileSlot {
            path: path.to_path_buf(),
            channels: usize::from(spec.channels),
            sample_rate: spec.sample_rate,
            role: Role::Input {
                samples: samples.into(),
                looped,
            },
            finished: Arc::new(AtomicBool::new(false)),
            open: None,
        }))
    }

    /// Registers a WAV file to be written with what the engine plays.
    pub fn add_output(&mut self, path: impl AsRef<Path>, channels: usize, sample_rate: u32) -> usize {
        self.push(FileSlot {
            path: path.as_ref().to_path_buf(),
            channels,
            sample_rate,
            role: Role::Output,
            finished: Arc::new(AtomicBool::new(false)),
            open: None,
        })
    }

    fn push(&mut self, slot: FileSlot) -> usize {
        self.slots.push(slot);
        self.slots.len() - 1
    }

    /// True once an input file has played to its end (never for looped files).
    pub fn is_finished(&self, device: usize) -> bool {
        self.slots
            .get(device)
            .is_some_and(|slot| slot.finished.load(Ordering::Acquire))
    }

    fn info(&self, index: usize, slot: &FileSlot) -> DeviceInfo {
        let (inputs, outputs) = match slot.role {
            Role::Input { .. } => (slot.channels, 0),
            Role::Output => (0, slot.channels),
        };
        DeviceInfo {
            index,
            name: slot.path.display().to_string(),
            input_channels: inputs,
            output_channels: outputs,
            sample_rate: f64::from(slot.sample_rate),
            cycle_frames: self.cycle_frames,
        }
    }

    fn open_file(&mut self, device: usize) -> Result<&mut OpenFile> {
        self.slots
            .get_mut(device)
            .ok_or(BackendError::DeviceNotFound(device))?
            .open
            .as_mut()
            .ok_or(BackendError::NotOpen(device))
    }
}

impl AudioDeviceBackend for FileBackedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::FileBacked
    }

    fn name(&self) -> &str {
        "wav files"
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self
            .slots
            .iter()
            .enumerate()
            .map(|(index, slot)| self.info(index, slot))
            .collect())
    }

    fn open(&mut self, device: usize, config: &StreamConfig, handler: Arc<dyn PacketHandler>) -> Result<()> {
        let slot = self
            .slots
            .get(device)
            .ok_or(BackendError::DeviceNotFound(device))?;
        if slot.open.is_some() {
            return Err(BackendError::AlreadyOpen(device));
        }
        config.check_against(&self.info(device, slot))?;
        if (config.sample_rate - f64::from(slot.sample_rate)).abs() > f64::EPSILON {
            return Err(BackendError::UnsupportedConfiguration);
        }

        let (channels, source, writer) = match &slot.role {
            Role::Input { samples, looped } => (slot.channels, Some((samples.clone(), *looped)), None),
            Role::Output => {
                let spec = hound::WavSpec {
                    channels: u16::try_from(slot.channels).map_err(|_| BackendError::UnsupportedConfiguration)?,
                    sample_rate: slot.sample_rate,
                    bits_per_sample: 32,
                    sample_format: hound::SampleFormat::Float,
                };
                (slot.channels, None, Some(hound::WavWriter::create(&slot.path, spec)?))
            }
        };
        slot.finished.store(false, Ordering::Release);
        let cycle = FileCycle {
            index: device,
            channels,
            frames: config.cycle_frames,
            sample_rate: config.sample_rate,
            handler,
            buffer: vec![0.0; config.cycle_frames * channels],
            source,
            position: 0,
            writer,
            finished: slot.finished.clone(),
            elapsed: 0,
        };
        tracing::debug!(device, path = %slot.path.display(), "file device opened");
        self.slots[device].open = Some(OpenFile {
            cycle: Arc::new(Mutex::new(cycle)),
            thread: None,
        });
        Ok(())
    }

    fn start(&mut self, device: usize) -> Result<()> {
        let pacing = self.pacing;
        let open = self.open_file(device)?;
        if open.thread.as_ref().is_some_and(|t| !t.is_finished()) {
            return Ok(());
        }
        let period = {
            let cycle = open.cycle.lock();
            pacing.period(cycle.frames, cycle.sample_rate)
        };
        let cycle = open.cycle.clone();
        open.thread = Some(DriverThread::spawn(format!("rtio-file-{device}"), period, move || {
            cycle.lock().run()
        })?);
        Ok(())
    }

    fn stop(&mut self, device: usize) -> Result<()> {
        let open = self.open_file(device)?;
        if let Some(mut thread) = open.thread.take() {
            thread.stop();
        }
        Ok(())
    }

    fn close(&mut self, device: usize) {
        let Some(slot) = self.slots.get_mut(device) else {
            return;
        };
        if let Some(mut open) = slot.open.take() {
            if let Some(mut thread) = open.thread.take() {
                thread.stop();
            }
            if let Err(err) = open.cycle.lock().finish() {
                tracing::error!(device, %err, "failed to finalize output file");
            }
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

impl Drop for FileBackedBackend {
    fn drop(&mut self) {
        for device in 0..self.slots.len() {
            self.close(device);
        }
    }
}
