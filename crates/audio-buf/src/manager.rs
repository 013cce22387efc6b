use std::time::Duration;

use engine_rt::{InputPacket, OutputPacket};
use resample::RateRatio;

use crate::direction::{DirectionBuffers, DirectionLayout};
use crate::{BufferError, ChannelFlags, Dir, IoFlags, Result};

pub const MIN_METER_MS: u32 = 10;
pub const MAX_METER_MS: u32 = 1000;
pub const DEFAULT_METER_MS: u32 = 100;

/// Parameters for [`BufferManager::setup`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceSetup {
    pub sample_rate: f64,
    /// Processing frames per DSP block.
    pub block_frames: usize,
    pub cycle_count: usize,
    pub input_channels: usize,
    pub input_cycle_frames: usize,
    pub output_channels: usize,
    pub output_cycle_frames: usize,
    pub ratio: RateRatio,
}

impl Default for DeviceSetup {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            block_frames: 64,
            cycle_count: 3,
            input_channels: 0,
            input_cycle_frames: 256,
            output_channels: 0,
            output_cycle_frames: 256,
            ratio: RateRatio::Unity,
        }
    }
}

impl DeviceSetup {
    pub fn with_input(mut self, channels: usize, cycle_frames: usize) -> Self {
        self.input_channels = channels;
        self.input_cycle_frames = cycle_frames;
        self
    }

    pub fn with_output(mut self, channels: usize, cycle_frames: usize) -> Self {
        self.output_channels = channels;
        self.output_cycle_frames = cycle_frames;
        self
    }

    pub fn with_block(mut self, block_frames: usize, cycle_count: usize) -> Self {
        self.block_frames = block_frames;
        self.cycle_count = cycle_count;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_ratio(mut self, ratio: RateRatio) -> Self {
        self.ratio = ratio;
        self
    }

    fn layout(&self, channels: usize, cycle_frames: usize) -> DirectionLayout {
        DirectionLayout {
            channels,
            cycle_frames,
            block_frames: self.block_frames,
            cycle_count: self.cycle_count,
            device_rate: self.sample_rate,
            ratio: self.ratio,
        }
    }

    fn validate(&self, device: usize) -> Result<()> {
        if self.block_frames == 0 {
            return Err(BufferError::ZeroBlock);
        }
        if self.cycle_count == 0 {
            return Err(BufferError::ZeroCycleCount);
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(BufferError::InvalidSampleRate(self.sample_rate));
        }
        for (dir, channels, frames) in [
            (Dir::In, self.input_channels, self.input_cycle_frames),
            (Dir::Out, self.output_channels, self.output_cycle_frames),
        ] {
            if channels == 0 {
                continue;
            }
            if frames == 0 {
                return Err(BufferError::ZeroCycleFrames { device, dir });
            }
            self.ratio.check_cycle(frames)?;
        }
        Ok(())
    }
}

/// Input and output buffers of one device. Either may be absent.
#[derive(Debug, Default)]
pub struct DeviceSlot {
    input: Option<DirectionBuffers>,
    output: Option<DirectionBuffers>,
}

impl DeviceSlot {
    pub fn input(&self) -> Option<&DirectionBuffers> {
        self.input.as_ref()
    }

    pub fn output(&self) -> Option<&DirectionBuffers> {
        self.output.as_ref()
    }

    pub fn direction(&self, dir: Dir) -> Option<&DirectionBuffers> {
        match dir {
            Dir::In => self.input.as_ref(),
            Dir::Out => self.output.as_ref(),
        }
    }
}

/// Owner of every device's circular buffers for one configuration.
///
/// Device callbacks enter through [`update`](Self::update); the engine thread
/// uses [`get`](Self::get)/[`get_io`](Self::get_io) and [`advance`](Self::advance).
/// All of these take `&self` and are lock-free, so the manager is shared as an
/// `Arc` once [`setup`](Self::setup) has run for every device.
#[derive(Debug, Default)]
pub struct BufferManager {
    slots: Vec<DeviceSlot>,
    zeros: Box<[f32]>,
    meter_ms: u32,
}

impl BufferManager {
    pub fn new(device_count: usize, meter_ms: u32) -> Self {
        let mut manager = Self::default();
        manager.initialize(device_count, meter_ms);
        manager
    }

    /// Allocates `device_count` empty device slots, dropping any previous ones.
    pub fn initialize(&mut self, device_count: usize, meter_ms: u32) {
        self.finalize();
        self.slots = (0..device_count).map(|_| DeviceSlot::default()).collect();
        self.meter_ms = meter_ms.clamp(MIN_METER_MS, MAX_METER_MS);
        tracing::debug!(devices = device_count, meter_ms = self.meter_ms, "buffer manager initialized");
    }

    /// Releases every device slot. Safe to call repeatedly or before
    /// [`initialize`](Self::initialize).
    pub fn finalize(&mut self) {
        if self.slots.is_empty() && self.zeros.is_empty() {
            return;
        }
        self.slots.clear();
        self.zeros = Box::default();
        tracing::debug!("buffer manager finalized");
    }

    pub fn is_initialized(&self) -> bool {
        !self.slots.is_empty()
    }

    pub fn device_count(&self) -> usize {
        self.slots.len()
    }

    pub fn meter_ms(&self) -> u32 {
        self.meter_ms
    }

    /// Replaces both direction buffer sets of `device`.
    pub fn setup(&mut self, device: usize, setup: &DeviceSetup) -> Result<()> {
        let count = self.slots.len();
        if device >= count {
            return Err(BufferError::DeviceOutOfRange { device, count });
        }
        if let Err(err) = setup.validate(device) {
            tracing::error!(device, %err, "rejected buffer setup");
            return Err(err);
        }

        let meter_ms = self.meter_ms;
        let make = |dir: Dir, channels: usize, frames: usize| {
            (channels > 0).then(|| DirectionBuffers::new(dir, setup.layout(channels, frames), meter_ms))
        };
        let slot = DeviceSlot {
            input: make(Dir::In, setup.input_channels, setup.input_cycle_frames),
            output: make(Dir::Out, setup.output_channels, setup.output_cycle_frames),
        };
        tracing::info!(
            device,
            inputs = setup.input_channels,
            outputs = setup.output_channels,
            in_len = slot.input.as_ref().map_or(0, DirectionBuffers::len),
            out_len = slot.output.as_ref().map_or(0, DirectionBuffers::len),
            block = setup.block_frames,
            ratio = setup.ratio.signed(),
            "device buffers configured"
        );
        self.slots[device] = slot;
        self.resize_zeros();
        Ok(())
    }

    fn resize_zeros(&mut self) {
        let needed = self
            .slots
            .iter()
            .flat_map(|slot| [slot.input.as_ref(), slot.output.as_ref()])
            .flatten()
            .map(|set| {
                let layout = set.layout();
                layout.cycle_frames.max(layout.block_frames)
            })
            .max()
            .unwrap_or(0);
        if needed > self.zeros.len() {
            self.zeros = vec![0.0; needed].into_boxed_slice();
        }
    }

    pub fn slot(&self, device: usize) -> Option<&DeviceSlot> {
        self.slots.get(device)
    }

    pub fn direction(&self, device: usize, dir: Dir) -> Option<&DirectionBuffers> {
        self.slots.get(device)?.direction(dir)
    }

    fn require(&self, device: usize, dir: Dir) -> Result<&DirectionBuffers> {
        let count = self.slots.len();
        let slot = self
            .slots
            .get(device)
            .ok_or(BufferError::DeviceOutOfRange { device, count })?;
        slot.direction(dir)
            .ok_or(BufferError::NotConfigured { device, dir })
    }

    /// Device-callback entry point: moves input packets into their buffers and
    /// fills output packets from theirs.
    ///
    /// Packets addressed to unknown devices or unconfigured directions are
    /// ignored. Capacity violations are counted as faults on the direction.
    pub fn update(&self, inputs: &[InputPacket<'_>], outputs: &mut [OutputPacket<'_>]) {
        for packet in inputs {
            if let Some(set) = self.direction(packet.device, Dir::In) {
                set.capture(packet, &self.zeros);
            }
        }
        for packet in outputs.iter_mut() {
            match self.direction(packet.device, Dir::Out) {
                Some(set) => set.playback(packet, &self.zeros),
                None => {
                    for ch in 0..packet.channels {
                        packet.zero_channel_from(ch, 0);
                    }
                }
            }
        }
    }

    /// True when every enabled channel of the direction holds a block (input)
    /// or has room for one (output).
    pub fn is_device_ready(&self, device: usize, dir: Dir) -> bool {
        self.direction(device, dir).is_some_and(DirectionBuffers::is_ready)
    }

    /// Writes raw pointers to the current block of each channel into `out`,
    /// returning the direction's channel count.
    ///
    /// Input pointers address the block at the read cursor and must only be
    /// read; output pointers address the block at the write cursor. Each block
    /// is contiguous for [`block_frames`](Self::block_frames) samples. Disabled
    /// channels and entries past the channel count are null.
    pub fn get(&self, device: usize, dir: Dir, out: &mut [*mut f32]) -> Result<usize> {
        let set = self.require(device, dir)?;
        set.block_ptrs(out);
        Ok(set.channel_count())
    }

    /// Moves the engine-side cursors of the requested directions by one block.
    ///
    /// Returns false if any requested direction could not move; each such
    /// direction counts one fault and keeps its fill count.
    pub fn advance(&self, device: usize, flags: IoFlags) -> bool {
        let Some(slot) = self.slots.get(device) else {
            return false;
        };
        let mut moved = true;
        if flags.contains(IoFlags::IN) {
            moved &= slot.input.as_ref().map_or(true, DirectionBuffers::advance);
        }
        if flags.contains(IoFlags::OUT) {
            moved &= slot.output.as_ref().map_or(true, DirectionBuffers::advance);
        }
        moved
    }

    /// Block pointers for a paired input/output device.
    ///
    /// Output channels in pass-through mode receive a copy of the input
    /// channel with the same index (or silence if there is none) and their
    /// pointer is nulled. Other enabled output blocks are zero-filled.
    pub fn get_io(
        &self,
        input: Option<usize>,
        output: Option<usize>,
        inputs: &mut [*const f32],
        outputs: &mut [*mut f32],
    ) -> Result<()> {
        let in_set = input.map(|device| self.require(device, Dir::In).map(|set| (device, set))).transpose()?;
        let out_set = output.map(|device| self.require(device, Dir::Out).map(|set| (device, set))).transpose()?;

        for (device, set) in in_set.iter().chain(out_set.iter()) {
            if !set.can_advance() {
                return Err(BufferError::NotReady {
                    device: *device,
                    dir: set.dir(),
                });
            }
        }

        inputs.fill(std::ptr::null());
        if let Some((_, set)) = in_set {
            for (slot, channel) in inputs.iter_mut().zip(set.channels()) {
                if channel.is_enabled() {
                    *slot = channel.block_ptr(true).cast_const();
                }
            }
        }

        outputs.fill(std::ptr::null_mut());
        let Some((_, out_set)) = out_set else {
            return Ok(());
        };
        out_set.block_ptrs(outputs);
        let frames = out_set.block_frames();
        let in_frames = in_set.map_or(0, |(_, set)| set.block_frames());
        for (index, slot) in outputs.iter_mut().enumerate() {
            if slot.is_null() {
                continue;
            }
            // SAFETY: the output direction has room for a block, so the block
            // at the write cursor is owned by the engine role until `advance`.
            let block = unsafe { std::slice::from_raw_parts_mut(*slot, frames) };
            let passes = out_set
                .channel(index)
                .is_some_and(|c| c.flags().contains(ChannelFlags::PASS));
            if passes {
                let source = inputs.get(index).copied().unwrap_or(std::ptr::null());
                let copied = if source.is_null() {
                    0
                } else {
                    let n = frames.min(in_frames);
                    // SAFETY: the input direction holds a block at the read
                    // cursor, owned by the engine role until `advance`.
                    let source = unsafe { std::slice::from_raw_parts(source, n) };
                    block[..n].copy_from_slice(source);
                    n
                };
                block[copied..].fill(0.0);
                *slot = std::ptr::null_mut();
            } else {
                block.fill(0.0);
            }
        }
        Ok(())
    }

    /// Copies one input block of `input` into the output buffers of `output`
    /// channel by channel and advances both. Returns false when either side is
    /// not ready.
    pub fn input_to_output(&self, input: usize, output: usize) -> Result<bool> {
        let in_set = self.require(input, Dir::In)?;
        let out_set = self.require(output, Dir::Out)?;
        if !(in_set.can_advance() && out_set.can_advance()) {
            return Ok(false);
        }
        let frames = out_set.block_frames();
        let in_frames = in_set.block_frames().min(frames);
        for (index, channel) in out_set.channels().iter().enumerate() {
            let dst = channel.block_ptr(false);
            // SAFETY: both directions can advance, so the output block at the
            // write cursor and the input block at the read cursor belong to the
            // engine role.
            let block = unsafe { std::slice::from_raw_parts_mut(dst, frames) };
            let copied = match in_set.channel(index) {
                Some(source) => {
                    let src = unsafe { std::slice::from_raw_parts(source.block_ptr(true), in_frames) };
                    block[..in_frames].copy_from_slice(src);
                    in_frames
                }
                None => 0,
            };
            block[copied..].fill(0.0);
        }
        let moved_in = in_set.advance();
        let moved_out = out_set.advance();
        Ok(moved_in && moved_out)
    }

    /// Zero-fills one output block of `device` and advances it. Returns false
    /// when there is no room for a block.
    pub fn zero_output(&self, device: usize) -> Result<bool> {
        let set = self.require(device, Dir::Out)?;
        if !set.can_advance() {
            return Ok(false);
        }
        let frames = set.block_frames();
        for channel in set.channels() {
            // SAFETY: the direction has room for a block at the write cursor.
            unsafe { std::slice::from_raw_parts_mut(channel.block_ptr(false), frames) }.fill(0.0);
        }
        Ok(set.advance())
    }

    /// Extrapolated time of the block at the engine-side cursor, once the
    /// device has delivered a timestamped packet.
    pub fn timestamp(&self, device: usize, dir: Dir) -> Option<Duration> {
        self.direction(device, dir)?.timestamp()
    }

    fn with_channels<F>(&self, device: usize, dir: Dir, channel: Option<usize>, f: F) -> Result<()>
    where
        F: FnMut(&crate::ChannelBuffer),
    {
        let set = self.require(device, dir)?;
        if set.for_channels(channel, f) {
            Ok(())
        } else {
            Err(BufferError::ChannelOutOfRange {
                device,
                dir,
                channel: channel.unwrap_or_default(),
                count: set.channel_count(),
            })
        }
    }

    fn channel(&self, device: usize, dir: Dir, channel: usize) -> Result<&crate::ChannelBuffer> {
        let set = self.require(device, dir)?;
        set.channel(channel).ok_or(BufferError::ChannelOutOfRange {
            device,
            dir,
            channel,
            count: set.channel_count(),
        })
    }

    fn set_flag(&self, device: usize, dir: Dir, channel: Option<usize>, flag: ChannelFlags, enable: bool) -> Result<()> {
        self.with_channels(device, dir, channel, |c| c.set_flags(flag, enable))
    }

    /// Sets the gain of one channel, or of every channel when `channel` is `None`.
    pub fn set_gain(&self, device: usize, dir: Dir, channel: Option<usize>, gain: f32) -> Result<()> {
        self.with_channels(device, dir, channel, |c| c.set_gain(gain))
    }

    pub fn gain(&self, device: usize, dir: Dir, channel: usize) -> Result<f32> {
        Ok(self.channel(device, dir, channel)?.gain())
    }

    pub fn enable_channel(&self, device: usize, dir: Dir, channel: Option<usize>, enable: bool) -> Result<()> {
        self.set_flag(device, dir, channel, ChannelFlags::ENABLED, enable)
    }

    pub fn is_channel_enabled(&self, device: usize, dir: Dir, channel: usize) -> Result<bool> {
        Ok(self.channel(device, dir, channel)?.is_enabled())
    }

    pub fn enable_mute(&self, device: usize, dir: Dir, channel: Option<usize>, enable: bool) -> Result<()> {
        self.set_flag(device, dir, channel, ChannelFlags::MUTED, enable)
    }

    pub fn enable_tone(&self, device: usize, dir: Dir, channel: Option<usize>, enable: bool) -> Result<()> {
        self.set_flag(device, dir, channel, ChannelFlags::TONE, enable)
    }

    pub fn set_tone_hz(&self, device: usize, dir: Dir, channel: Option<usize>, hz: f32) -> Result<()> {
        self.with_channels(device, dir, channel, |c| c.set_tone_hz(hz))
    }

    pub fn enable_meter(&self, device: usize, dir: Dir, channel: Option<usize>, enable: bool) -> Result<()> {
        self.set_flag(device, dir, channel, ChannelFlags::METER, enable)
    }

    /// Pass-through applies to output channels: [`get_io`](Self::get_io)
    /// copies the matching input channel into them.
    pub fn enable_pass(&self, device: usize, dir: Dir, channel: Option<usize>, enable: bool) -> Result<()> {
        self.set_flag(device, dir, channel, ChannelFlags::PASS, enable)
    }

    pub fn flags(&self, device: usize, dir: Dir, channel: usize) -> Result<ChannelFlags> {
        Ok(self.channel(device, dir, channel)?.flags())
    }

    pub fn meter(&self, device: usize, dir: Dir, channel: usize) -> Result<f32> {
        Ok(self.channel(device, dir, channel)?.meter())
    }

    /// Copies the meter readings of a direction into `out`, returning how many
    /// were written. Unconfigured directions write nothing.
    pub fn meters(&self, device: usize, dir: Dir, out: &mut [f32]) -> usize {
        let Some(set) = self.direction(device, dir) else {
            return 0;
        };
        let mut written = 0;
        for (slot, channel) in out.iter_mut().zip(set.channels()) {
            *slot = channel.meter();
            written += 1;
        }
        written
    }

    pub fn channel_count(&self, device: usize, dir: Dir) -> usize {
        self.direction(device, dir).map_or(0, DirectionBuffers::channel_count)
    }

    pub fn block_frames(&self, device: usize, dir: Dir) -> Option<usize> {
        self.direction(device, dir).map(DirectionBuffers::block_frames)
    }

    pub fn fault_count(&self, device: usize, dir: Dir) -> u64 {
        self.direction(device, dir).map_or(0, DirectionBuffers::fault_count)
    }

    pub fn fill_count(&self, device: usize, dir: Dir, channel: usize) -> Option<usize> {
        Some(self.direction(device, dir)?.channel(channel)?.fill_count())
    }

    /// Logs the fill, cursor and fault state of every configured direction.
    pub fn report(&self) {
        for (device, slot) in self.slots.iter().enumerate() {
            for set in [slot.input.as_ref(), slot.output.as_ref()].into_iter().flatten() {
                let first = set.channel(0);
                tracing::info!(
                    device,
                    dir = set.dir().label(),
                    channels = set.channel_count(),
                    len = set.len(),
                    block = set.block_frames(),
                    fill = first.map_or(0, |c| c.fill_count()),
                    read = first.map_or(0, |c| c.read_index()),
                    write = first.map_or(0, |c| c.write_index()),
                    frames = set.frames_advanced(),
                    faults = set.fault_count(),
                    "buffer state"
                );
            }
        }
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        self.finalize();
    }
}
