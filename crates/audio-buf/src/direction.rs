use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use engine_rt::{InputPacket, OutputPacket};
use resample::RateRatio;

use crate::channel::{ChannelBuffer, CopyParams};
use crate::meter::MeterRing;
use crate::{ChannelFlags, Dir};

const UNSET: u64 = u64::MAX;

/// Geometry of one direction of a device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionLayout {
    pub channels: usize,
    /// Device frames delivered per hardware callback.
    pub cycle_frames: usize,
    /// Processing frames consumed or produced per DSP block.
    pub block_frames: usize,
    pub cycle_count: usize,
    pub device_rate: f64,
    pub ratio: RateRatio,
}

impl DirectionLayout {
    /// Ring length: the processing-rate span of all cycles, rounded up to whole
    /// blocks, never less than one block.
    pub fn buffer_len(&self) -> usize {
        let block = self.block_frames.max(1);
        let span = self.ratio.to_processing(self.cycle_frames) * self.cycle_count;
        span.div_ceil(block).max(1) * block
    }
}

/// The channel buffers of one direction of one device.
#[derive(Debug)]
pub struct DirectionBuffers {
    dir: Dir,
    layout: DirectionLayout,
    len: usize,
    channels: Box<[ChannelBuffer]>,
    base_ns: AtomicU64,
    frames_advanced: AtomicU64,
    faults: AtomicU64,
    in_callback: AtomicBool,
}

/// Marks the device-callback role of a direction as taken for one callback.
struct CallbackGuard<'a>(&'a AtomicBool);

impl<'a> CallbackGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for CallbackGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl DirectionBuffers {
    pub(crate) fn new(dir: Dir, layout: DirectionLayout, meter_ms: u32) -> Self {
        let len = layout.buffer_len();
        let meter_slots = MeterRing::slots_for(meter_ms, layout.device_rate, layout.cycle_frames);
        let channels = (0..layout.channels)
            .map(|_| ChannelBuffer::new(len, meter_slots))
            .collect();
        Self {
            dir,
            layout,
            len,
            channels,
            base_ns: AtomicU64::new(UNSET),
            frames_advanced: AtomicU64::new(0),
            faults: AtomicU64::new(0),
            in_callback: AtomicBool::new(false),
        }
    }

    pub fn dir(&self) -> Dir {
        self.dir
    }

    pub fn layout(&self) -> &DirectionLayout {
        &self.layout
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, index: usize) -> Option<&ChannelBuffer> {
        self.channels.get(index)
    }

    pub fn channels(&self) -> &[ChannelBuffer] {
        &self.channels
    }

    pub fn block_frames(&self) -> usize {
        self.layout.block_frames
    }

    pub fn fault_count(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    fn fault(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether one block can be consumed (input) or produced (output) on every
    /// enabled channel. A direction without enabled channels is never ready.
    pub fn is_ready(&self) -> bool {
        let block = self.layout.block_frames;
        let mut enabled = self.channels.iter().filter(|c| c.is_enabled()).peekable();
        if enabled.peek().is_none() {
            return false;
        }
        match self.dir {
            Dir::In => enabled.all(|c| c.fill_count() >= block),
            Dir::Out => enabled.all(|c| c.headroom() >= block),
        }
    }

    /// Whether every channel, enabled or not, can move one block.
    pub(crate) fn can_advance(&self) -> bool {
        let block = self.layout.block_frames;
        match self.dir {
            Dir::In => self.channels.iter().all(|c| c.fill_count() >= block),
            Dir::Out => self.channels.iter().all(|c| c.headroom() >= block),
        }
    }

    /// Moves the engine-side cursor of every channel forward by one block.
    pub(crate) fn advance(&self) -> bool {
        if self.channels.is_empty() {
            return true;
        }
        if !self.can_advance() {
            self.fault();
            return false;
        }
        let block = self.layout.block_frames;
        let moved = match self.dir {
            Dir::In => self.channels.iter().all(|c| c.release_block(block)),
            Dir::Out => self.channels.iter().all(|c| c.commit_block(block)),
        };
        if moved {
            self.frames_advanced.fetch_add(block as u64, Ordering::Relaxed);
        } else {
            self.fault();
        }
        moved
    }

    /// Raw block pointers at the engine-side cursor. Disabled channels and
    /// channels beyond the direction yield null.
    pub(crate) fn block_ptrs(&self, out: &mut [*mut f32]) {
        let consumer_reads = self.dir == Dir::In;
        for (index, slot) in out.iter_mut().enumerate() {
            *slot = match self.channels.get(index) {
                Some(channel) if channel.is_enabled() => channel.block_ptr(consumer_reads),
                _ => std::ptr::null_mut(),
            };
        }
    }

    /// Copies an input packet into the channels it covers.
    ///
    /// Either the whole packet lands or none of it does: a channel without
    /// room for the packet drops it and counts one fault. A packet arriving
    /// while another callback is inside this direction is dropped the same way.
    pub(crate) fn capture(&self, packet: &InputPacket<'_>, zeros: &[f32]) {
        let Some(_guard) = CallbackGuard::acquire(&self.in_callback) else {
            self.fault();
            return;
        };
        if !packet.is_consistent() {
            self.fault();
            return;
        }
        self.mark_base(packet.timestamp);
        let covered = self.covered(packet.begin_channel, packet.channels);
        let ratio = self.layout.ratio;
        let frames = packet.frames;
        // SAFETY: the guard gives this call the device-callback role.
        unsafe {
            if covered
                .clone()
                .any(|ch| self.channels[ch].capture_len(ratio, frames) > self.channels[ch].headroom())
            {
                self.fault();
                return;
            }
            let params = self.copy_params(zeros);
            for ch in covered {
                let source = packet.channel(ch - packet.begin_channel);
                let wanted = self.channels[ch].capture_len(ratio, frames);
                if self.channels[ch].capture(source, frames, &params) != wanted {
                    self.fault();
                }
            }
        }
    }

    /// Fills an output packet from the channels it covers. Channels that run
    /// short are zero-filled past what was available and count one fault for
    /// the packet; packet channels beyond the direction are silenced.
    pub(crate) fn playback(&self, packet: &mut OutputPacket<'_>, zeros: &[f32]) {
        let Some(_guard) = CallbackGuard::acquire(&self.in_callback) else {
            self.fault();
            return;
        };
        if !packet.is_consistent() {
            self.fault();
            return;
        }
        self.mark_base(packet.timestamp);
        let covered = self.covered(packet.begin_channel, packet.channels);
        let params = self.copy_params(zeros);
        let frames = packet.frames;
        let mut short = false;
        for rel in 0..packet.channels {
            let ch = packet.begin_channel + rel;
            if !covered.contains(&ch) {
                packet.zero_channel_from(rel, 0);
                continue;
            }
            // SAFETY: the guard gives this call the device-callback role.
            let (produced, ran_short) = unsafe {
                self.channels[ch].playback(frames, &params, |frame, s| packet.set(rel, frame, s))
            };
            packet.zero_channel_from(rel, produced);
            short |= ran_short;
        }
        if short {
            self.fault();
        }
    }

    fn covered(&self, begin: usize, count: usize) -> std::ops::Range<usize> {
        let end = begin.saturating_add(count).min(self.channels.len());
        begin.min(end)..end
    }

    fn copy_params<'z>(&self, zeros: &'z [f32]) -> CopyParams<'z> {
        CopyParams {
            ratio: self.layout.ratio,
            device_rate: self.layout.device_rate,
            zeros,
        }
    }

    fn mark_base(&self, timestamp: Option<Duration>) {
        let Some(timestamp) = timestamp else {
            return;
        };
        if self.base_ns.load(Ordering::Relaxed) != UNSET {
            return;
        }
        let nanos = u64::try_from(timestamp.as_nanos()).unwrap_or(UNSET - 1);
        let _ = self
            .base_ns
            .compare_exchange(UNSET, nanos, Ordering::AcqRel, Ordering::Relaxed);
    }

    /// Time of the block at the engine-side cursor, extrapolated from the first
    /// hardware timestamp and the frames advanced since.
    pub fn timestamp(&self) -> Option<Duration> {
        let base = self.base_ns.load(Ordering::Acquire);
        if base == UNSET {
            return None;
        }
        let rate = self.layout.ratio.processing_rate(self.layout.device_rate);
        let frames = self.frames_advanced.load(Ordering::Relaxed);
        let offset = if rate > 0.0 {
            Duration::from_secs_f64(frames as f64 / rate)
        } else {
            Duration::ZERO
        };
        Some(Duration::from_nanos(base) + offset)
    }

    pub fn frames_advanced(&self) -> u64 {
        self.frames_advanced.load(Ordering::Relaxed)
    }

    /// Sets or clears `flags` on one channel, or on all when `channel` is `None`.
    pub(crate) fn set_flags(&self, channel: Option<usize>, flags: ChannelFlags, enable: bool) -> bool {
        self.for_channels(channel, |c| c.set_flags(flags, enable))
    }

    pub(crate) fn for_channels<F>(&self, channel: Option<usize>, mut f: F) -> bool
    where
        F: FnMut(&ChannelBuffer),
    {
        match channel {
            None => {
                self.channels.iter().for_each(&mut f);
                true
            }
            Some(index) => match self.channels.get(index) {
                Some(c) => {
                    f(c);
                    true
                }
                None => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(channels: usize, ratio: RateRatio) -> DirectionLayout {
        DirectionLayout {
            channels,
            cycle_frames: 25,
            block_frames: 10,
            cycle_count: 3,
            device_rate: 48_000.0,
            ratio,
        }
    }

    #[test]
    fn buffer_length_is_whole_blocks() {
        assert_eq!(layout(1, RateRatio::Unity).buffer_len(), 80);
        assert_eq!(layout(1, RateRatio::Interpolate(2)).buffer_len(), 150);
        let tiny = DirectionLayout {
            cycle_frames: 2,
            cycle_count: 1,
            ..layout(1, RateRatio::Unity)
        };
        assert_eq!(tiny.buffer_len(), 10);
    }

    #[test]
    fn input_readiness_boundary() {
        let zeros = [0.0; 32];
        let set = DirectionBuffers::new(Dir::In, layout(2, RateRatio::Unity), 100);
        let data = [0.25f32; 18];
        set.capture(&InputPacket::interleaved_f32(0, 0, 2, &data), &zeros);
        assert_eq!(set.channels()[0].fill_count(), 9);
        assert!(!set.is_ready());
        let data = [0.25f32; 2];
        set.capture(&InputPacket::interleaved_f32(0, 0, 2, &data), &zeros);
        assert!(set.is_ready());
    }

    #[test]
    fn output_readiness_tracks_headroom() {
        let zeros = [0.0; 32];
        let set = DirectionBuffers::new(Dir::Out, layout(1, RateRatio::Unity), 100);
        assert!(set.is_ready());
        for _ in 0..7 {
            assert!(set.advance());
        }
        assert_eq!(set.channels()[0].headroom(), 10);
        assert!(set.is_ready());
        let mut out = [0.0f32; 1];
        set.playback(&mut OutputPacket::interleaved_f32(0, 0, 1, &mut out), &zeros);
        assert_eq!(set.channels()[0].headroom(), 11);
        assert!(set.advance());
        assert_eq!(set.channels()[0].headroom(), 1);
        assert!(!set.is_ready());
        assert!(!set.advance());
        assert_eq!(set.fault_count(), 1);
    }

    #[test]
    fn no_enabled_channel_is_never_ready() {
        let set = DirectionBuffers::new(Dir::Out, layout(2, RateRatio::Unity), 100);
        set.set_flags(None, ChannelFlags::ENABLED, false);
        assert!(!set.is_ready());
    }

    #[test]
    fn timestamp_extrapolates_from_first_packet() {
        let zeros = [0.0; 32];
        let set = DirectionBuffers::new(Dir::In, layout(1, RateRatio::Unity), 100);
        assert_eq!(set.timestamp(), None);
        let data = [0.0f32; 24];
        let first = InputPacket::interleaved_f32(0, 0, 1, &data).with_timestamp(Duration::from_secs(1));
        set.capture(&first, &zeros);
        let later = InputPacket::interleaved_f32(0, 0, 1, &data).with_timestamp(Duration::from_secs(5));
        set.capture(&later, &zeros);
        assert!(set.advance());
        assert!(set.advance());
        let expected = Duration::from_secs(1) + Duration::from_secs_f64(20.0 / 48_000.0);
        assert_eq!(set.timestamp(), Some(expected));
    }
}
