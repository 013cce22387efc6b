//! Integer-ratio sample-rate conversion applied while samples cross the
//! boundary between a device and the processing buffers.
//!
//! Upsampling is linear interpolation from the previously retained sample; the
//! last of each group of interpolated samples equals the input exactly, so no
//! phase error accumulates across calls. Downsampling keeps every N-th sample
//! without an anti-alias filter.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RateError {
    #[error("{frames} frames per cycle is not divisible by the decimation factor {factor}")]
    IndivisibleCycle { frames: usize, factor: usize },
}

/// Relation between a device's sample rate and the processing rate.
///
/// The variant names the operation applied to samples travelling from the
/// device into the processing buffers; the playback path applies
/// [`inverse`](Self::inverse). As a signed integer, `N > 1` decimates by `N`,
/// `N < -1` interpolates by `|N|`, and `-1..=1` is unity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum RateRatio {
    #[default]
    Unity,
    /// The device runs `N` times faster than the processing rate.
    Decimate(u32),
    /// The processing rate is `N` times the device rate.
    Interpolate(u32),
}

impl From<i32> for RateRatio {
    fn from(value: i32) -> Self {
        match value {
            n if n > 1 => RateRatio::Decimate(n as u32),
            n if n < -1 => RateRatio::Interpolate(n.unsigned_abs()),
            _ => RateRatio::Unity,
        }
    }
}

impl From<RateRatio> for i32 {
    fn from(value: RateRatio) -> Self {
        value.signed()
    }
}

impl RateRatio {
    pub fn signed(self) -> i32 {
        match self {
            RateRatio::Unity => 1,
            RateRatio::Decimate(n) => n as i32,
            RateRatio::Interpolate(n) => -(n as i32),
        }
    }

    pub fn factor(self) -> usize {
        match self {
            RateRatio::Unity => 1,
            RateRatio::Decimate(n) | RateRatio::Interpolate(n) => n.max(1) as usize,
        }
    }

    pub fn inverse(self) -> Self {
        match self {
            RateRatio::Unity => RateRatio::Unity,
            RateRatio::Decimate(n) => RateRatio::Interpolate(n),
            RateRatio::Interpolate(n) => RateRatio::Decimate(n),
        }
    }

    pub fn is_unity(self) -> bool {
        self.factor() == 1
    }

    /// Processing-rate frames corresponding to `device_frames` device frames.
    pub fn to_processing(self, device_frames: usize) -> usize {
        match self {
            RateRatio::Unity => device_frames,
            RateRatio::Decimate(_) => device_frames / self.factor(),
            RateRatio::Interpolate(_) => device_frames * self.factor(),
        }
    }

    /// Device-rate frames corresponding to `processing_frames` processing frames.
    pub fn to_device(self, processing_frames: usize) -> usize {
        self.inverse().to_processing(processing_frames)
    }

    pub fn processing_rate(self, device_rate: f64) -> f64 {
        match self {
            RateRatio::Unity => device_rate,
            RateRatio::Decimate(_) => device_rate / self.factor() as f64,
            RateRatio::Interpolate(_) => device_rate * self.factor() as f64,
        }
    }

    /// Checks that a device cycle maps onto a whole number of processing frames.
    pub fn check_cycle(self, device_frames: usize) -> Result<(), RateError> {
        let factor = self.factor();
        if matches!(self, RateRatio::Decimate(_)) && device_frames % factor != 0 {
            return Err(RateError::IndivisibleCycle {
                frames: device_frames,
                factor,
            });
        }
        Ok(())
    }

    /// Exact number of samples [`convert`] emits for `input_len` inputs given `state`.
    pub fn output_len(self, state: &RateState, input_len: usize) -> usize {
        match self {
            RateRatio::Unity => input_len,
            RateRatio::Interpolate(_) => input_len * self.factor(),
            RateRatio::Decimate(_) => (state.phase + input_len) / self.factor(),
        }
    }

    /// Largest input count whose conversion emits no more than `output_len` samples.
    pub fn input_for(self, state: &RateState, output_len: usize) -> usize {
        match self {
            RateRatio::Unity => output_len,
            RateRatio::Interpolate(_) => output_len / self.factor(),
            RateRatio::Decimate(_) => {
                (output_len * self.factor() + self.factor() - 1).saturating_sub(state.phase)
            }
        }
    }
}

/// State retained across calls for one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateState {
    /// Most recent input sample, the start point of the next interpolation.
    pub prev: f32,
    /// Inputs consumed since the last decimated output.
    pub phase: usize,
}

impl RateState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Converts `input` by `ratio`, handing every produced sample to `emit`.
///
/// Returns the number of samples emitted.
#[inline]
pub fn convert<I, F>(ratio: RateRatio, state: &mut RateState, input: I, mut emit: F) -> usize
where
    I: IntoIterator<Item = f32>,
    F: FnMut(f32),
{
    match ratio {
        RateRatio::Unity => {
            let mut produced = 0;
            for sample in input {
                emit(sample);
                state.prev = sample;
                produced += 1;
            }
            produced
        }
        RateRatio::Interpolate(_) => interpolate(ratio.factor(), state, input, emit),
        RateRatio::Decimate(_) => decimate(ratio.factor(), state, input, emit),
    }
}

/// Emits `mult` linearly interpolated samples per input sample.
#[inline]
pub fn interpolate<I, F>(mult: usize, state: &mut RateState, input: I, mut emit: F) -> usize
where
    I: IntoIterator<Item = f32>,
    F: FnMut(f32),
{
    let mult = mult.max(1);
    let step = 1.0 / mult as f32;
    let mut produced = 0;
    for sample in input {
        let delta = sample - state.prev;
        for k in 1..mult {
            emit(state.prev + delta * (k as f32 * step));
        }
        emit(sample);
        state.prev = sample;
        produced += mult;
    }
    produced
}

/// Emits the last sample of every run of `div` input samples.
#[inline]
pub fn decimate<I, F>(div: usize, state: &mut RateState, input: I, mut emit: F) -> usize
where
    I: IntoIterator<Item = f32>,
    F: FnMut(f32),
{
    let div = div.max(1);
    let mut produced = 0;
    for sample in input {
        state.phase += 1;
        state.prev = sample;
        if state.phase >= div {
            emit(sample);
            state.phase = 0;
            produced += 1;
        }
    }
    produced
}
