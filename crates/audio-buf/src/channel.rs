//! One circular sample buffer per logical channel.
//!
//! Ownership of the fields follows the producer/consumer roles of the owning
//! direction. On the input side the device callback writes and the engine
//! reads; on the output side the roles are reversed. The device-side state
//! (tone phase, rate-converter memory, meter ring) is only touched from the
//! device callback. Only the fill count is shared between roles.

use std::cell::UnsafeCell;
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicU32, Ordering};

use atomic_float::AtomicF32;
use engine_rt::{Cursor, FillCount, RingIndex};
use resample::{RateRatio, RateState};

use crate::meter::MeterRing;
use crate::ChannelFlags;

const DEFAULT_TONE_HZ: f32 = 1_000.0;

/// State owned by the device-callback role of a channel.
#[derive(Debug)]
struct DeviceSide {
    tone_phase: f64,
    rate: RateState,
    meter: MeterRing,
}

/// Parameters shared by every channel touched in one device callback.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CopyParams<'z> {
    pub ratio: RateRatio,
    pub device_rate: f64,
    pub zeros: &'z [f32],
}

pub struct ChannelBuffer {
    samples: Box<[UnsafeCell<f32>]>,
    ring: RingIndex,
    write: Cursor,
    read: Cursor,
    fill: FillCount,
    flags: AtomicU32,
    gain: AtomicF32,
    tone_hz: AtomicF32,
    meter: AtomicF32,
    device: UnsafeCell<DeviceSide>,
}

// SAFETY: sample slots are handed between the producer and consumer roles by
// the fill count (release on publish, acquire on observe), cursors and device
// state each have a single owning role, and everything else is atomic.
unsafe impl Sync for ChannelBuffer {}

impl std::fmt::Debug for ChannelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelBuffer")
            .field("len", &self.ring.len())
            .field("write", &self.write.get())
            .field("read", &self.read.get())
            .field("fill", &self.fill.get())
            .field("flags", &self.flags())
            .field("gain", &self.gain())
            .finish()
    }
}

impl ChannelBuffer {
    pub(crate) fn new(len: usize, meter_slots: usize) -> Self {
        let ring = RingIndex::new(len);
        Self {
            samples: (0..ring.len()).map(|_| UnsafeCell::new(0.0)).collect(),
            ring,
            write: Cursor::default(),
            read: Cursor::default(),
            fill: FillCount::new(ring.len()),
            flags: AtomicU32::new(ChannelFlags::default().bits()),
            gain: AtomicF32::new(1.0),
            tone_hz: AtomicF32::new(DEFAULT_TONE_HZ),
            meter: AtomicF32::new(0.0),
            device: UnsafeCell::new(DeviceSide {
                tone_phase: 0.0,
                rate: RateState::default(),
                meter: MeterRing::new(meter_slots),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fill.get() == 0
    }

    pub fn fill_count(&self) -> usize {
        self.fill.get()
    }

    pub fn headroom(&self) -> usize {
        self.fill.headroom()
    }

    pub fn read_index(&self) -> usize {
        self.read.get()
    }

    pub fn write_index(&self) -> usize {
        self.write.get()
    }

    pub fn flags(&self) -> ChannelFlags {
        ChannelFlags::from_bits_truncate(self.flags.load(Ordering::Relaxed))
    }

    pub fn set_flags(&self, flags: ChannelFlags, enable: bool) {
        if enable {
            self.flags.fetch_or(flags.bits(), Ordering::Relaxed);
        } else {
            self.flags.fetch_and(!flags.bits(), Ordering::Relaxed);
        }
        if flags.contains(ChannelFlags::METER) && !enable {
            self.meter.store(0.0, Ordering::Relaxed);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.flags().contains(ChannelFlags::ENABLED)
    }

    pub fn gain(&self) -> f32 {
        self.gain.load(Ordering::Relaxed)
    }

    pub fn set_gain(&self, gain: f32) {
        self.gain.store(gain, Ordering::Relaxed);
    }

    pub fn tone_hz(&self) -> f32 {
        self.tone_hz.load(Ordering::Relaxed)
    }

    pub fn set_tone_hz(&self, hz: f32) {
        self.tone_hz.store(hz.max(0.0), Ordering::Relaxed);
    }

    /// Latest RMS meter reading.
    pub fn meter(&self) -> f32 {
        self.meter.load(Ordering::Relaxed)
    }

    /// Pointer to the first sample of slot `index`. Slots are contiguous.
    #[inline]
    fn slot(&self, index: usize) -> *mut f32 {
        self.samples[index].get()
    }

    /// Pointer to the block at the consumer-side cursor: the read cursor for
    /// input, the write cursor for output.
    #[inline]
    pub(crate) fn block_ptr(&self, consumer_reads: bool) -> *mut f32 {
        let index = if consumer_reads {
            self.read.get()
        } else {
            self.write.get()
        };
        self.slot(index)
    }

    /// # Safety
    ///
    /// Must only be called from the device-callback role of this channel.
    #[allow(clippy::mut_from_ref)]
    #[inline]
    unsafe fn device_side(&self) -> &mut DeviceSide {
        &mut *self.device.get()
    }

    /// Processing-rate samples a device callback of `frames` frames would write.
    ///
    /// # Safety
    ///
    /// Device-callback role only.
    pub(crate) unsafe fn capture_len(&self, ratio: RateRatio, frames: usize) -> usize {
        ratio.output_len(&self.device_side().rate, frames)
    }

    /// Copies one callback's worth of device samples into the ring.
    ///
    /// The caller has checked that the ring has room for
    /// [`capture_len`](Self::capture_len) samples. Returns the number of samples
    /// published.
    ///
    /// # Safety
    ///
    /// Device-callback role of an input channel only.
    pub(crate) unsafe fn capture<I>(&self, input: I, frames: usize, params: &CopyParams<'_>) -> usize
    where
        I: Iterator<Item = f32>,
    {
        let flags = self.flags();
        let side = self.device_side();

        if !flags.contains(ChannelFlags::ENABLED) {
            // Interpolation starts from the retained sample; silence it so the
            // zeros, and the first block after re-enabling, ramp from zero.
            side.rate.prev = 0.0;
            let zeros = params
                .zeros
                .iter()
                .copied()
                .chain(std::iter::repeat(0.0))
                .take(frames);
            let written = self.write_converted(zeros, params.ratio, &mut side.rate, false);
            return self.publish(written);
        }

        let gain = self.gain();
        let muted = flags.contains(ChannelFlags::MUTED);
        let mut power = 0.0f64;
        let written = if flags.contains(ChannelFlags::TONE) {
            let tone = ToneIter::new(&mut side.tone_phase, self.tone_hz(), params.device_rate, frames);
            let source = tone.map(|s| s * gain).inspect(|s| power += f64::from(s * s));
            self.write_converted(source, params.ratio, &mut side.rate, muted)
        } else {
            let source = input
                .take(frames)
                .map(|s| s * gain)
                .inspect(|s| power += f64::from(s * s));
            self.write_converted(source, params.ratio, &mut side.rate, muted)
        };

        if flags.contains(ChannelFlags::METER) {
            self.meter
                .store(side.meter.push(power, frames), Ordering::Relaxed);
        }
        self.publish(written)
    }

    unsafe fn write_converted<I>(&self, source: I, ratio: RateRatio, rate: &mut RateState, muted: bool) -> usize
    where
        I: Iterator<Item = f32>,
    {
        let len = self.ring.len();
        let mut w = self.write.get();
        let written = resample::convert(ratio, rate, source, |s| {
            // SAFETY: slots between the write cursor and write + headroom are
            // owned by the producer until published through the fill count.
            unsafe { *self.slot(w) = if muted { 0.0 } else { s } };
            w += 1;
            if w == len {
                w = 0;
            }
        });
        self.write.set(w);
        written
    }

    fn publish(&self, written: usize) -> usize {
        if self.fill.try_add(written) {
            written
        } else {
            0
        }
    }

    /// Fills one callback's worth of device samples from the ring through `put`.
    ///
    /// Returns the number of device frames produced and whether the ring ran
    /// short of the samples the callback asked for. Frames past the returned
    /// count are left to the caller to silence.
    ///
    /// # Safety
    ///
    /// Device-callback role of an output channel only.
    pub(crate) unsafe fn playback<F>(&self, frames: usize, params: &CopyParams<'_>, mut put: F) -> (usize, bool)
    where
        F: FnMut(usize, f32),
    {
        let ratio = params.ratio.inverse();
        let flags = self.flags();
        let side = self.device_side();

        let wanted = ratio.input_for(&side.rate, frames);
        let available = self.fill.get();
        let take = wanted.min(available);

        let gain = self.gain();
        let enabled = flags.contains(ChannelFlags::ENABLED);
        let muted = flags.contains(ChannelFlags::MUTED);
        let silent = !enabled || muted;
        let tone = enabled && flags.contains(ChannelFlags::TONE);

        let len = self.ring.len();
        let mut r = self.read.get();
        let ring_samples = std::iter::from_fn(|| {
            // SAFETY: `take` slots starting at the read cursor were published
            // by the producer and are owned by this role until released.
            let s = unsafe { *self.slot(r) };
            r += 1;
            if r == len {
                r = 0;
            }
            Some(s)
        })
        .take(take)
        .map(|s| s * gain);

        let mut power = 0.0f64;
        let mut frame = 0usize;
        resample::convert(ratio, &mut side.rate, ring_samples, |s| {
            if frame < frames {
                power += f64::from(s * s);
                put(frame, if silent || tone { 0.0 } else { s });
            }
            frame += 1;
        });
        let produced = frame.min(frames);
        // `wanted` is an upper bound when decimating; only missing frames count.
        let short = produced < frames;

        if tone {
            // A test tone replaces the buffered signal for the whole callback.
            power = 0.0;
            let tone = ToneIter::new(&mut side.tone_phase, self.tone_hz(), params.device_rate, frames);
            for (index, s) in tone.enumerate() {
                let s = s * gain;
                power += f64::from(s * s);
                put(index, if muted { 0.0 } else { s });
            }
        }

        self.read.set(r);
        self.fill.try_sub(take);

        if enabled && flags.contains(ChannelFlags::METER) {
            self.meter
                .store(side.meter.push(power, frames), Ordering::Relaxed);
        }

        let produced = if tone { frames } else { produced };
        (produced, short)
    }

    /// Consumer-side cursor advance for an input ring. The caller has checked
    /// that at least `n` samples are held.
    pub(crate) fn release_block(&self, n: usize) -> bool {
        if self.fill.try_sub(n) {
            self.read.advance(self.ring, n);
            true
        } else {
            false
        }
    }

    /// Consumer-side cursor advance for an output ring. The caller has checked
    /// that at least `n` slots are free.
    pub(crate) fn commit_block(&self, n: usize) -> bool {
        // Cursor first: the device callback reads slots only after observing
        // the fill count, and only the engine role moves this cursor.
        let previous = self.write.get();
        self.write.advance(self.ring, n);
        if self.fill.try_add(n) {
            true
        } else {
            self.write.set(previous);
            false
        }
    }
}

/// Running-phase sine generator at the device rate.
struct ToneIter<'p> {
    phase: &'p mut f64,
    step: f64,
    remaining: usize,
}

impl<'p> ToneIter<'p> {
    fn new(phase: &'p mut f64, hz: f32, rate: f64, frames: usize) -> Self {
        let step = if rate > 0.0 {
            TAU * f64::from(hz) / rate
        } else {
            0.0
        };
        Self {
            phase,
            step,
            remaining: frames,
        }
    }
}

impl Iterator for ToneIter<'_> {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let value = self.phase.sin() as f32;
        *self.phase = (*self.phase + self.step) % TAU;
        Some(value)
    }
}
