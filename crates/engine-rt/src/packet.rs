//! The packet contract between device backends and the buffer manager.
//!
//! A backend callback delivers one packet per device direction. The packet
//! borrows the driver's sample memory for the duration of the callback and
//! describes which device channels it covers and how the samples are laid out.

use std::time::Duration;

/// Sample encoding of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    F32,
    I16,
    /// 24-bit samples, sign extended into 32-bit containers.
    I24,
    I32,
}

impl SampleFormat {
    pub fn bits(self) -> u32 {
        match self {
            SampleFormat::F32 | SampleFormat::I32 => 32,
            SampleFormat::I24 => 24,
            SampleFormat::I16 => 16,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, SampleFormat::F32)
    }
}

const I16_SCALE: f32 = 32_768.0;
const I24_SCALE: f32 = 8_388_608.0;
const I32_SCALE: f32 = 2_147_483_648.0;

#[inline]
fn quantize(value: f32, scale: f32, min: f32, max: f32) -> f32 {
    (value * scale).round().clamp(min, max)
}

/// Read-only view of a driver's sample memory.
#[derive(Debug, Clone, Copy)]
pub enum Samples<'a> {
    F32(&'a [f32]),
    I16(&'a [i16]),
    I24(&'a [i32]),
    I32(&'a [i32]),
}

impl<'a> Samples<'a> {
    pub fn format(&self) -> SampleFormat {
        match self {
            Samples::F32(_) => SampleFormat::F32,
            Samples::I16(_) => SampleFormat::I16,
            Samples::I24(_) => SampleFormat::I24,
            Samples::I32(_) => SampleFormat::I32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Samples::F32(data) => data.len(),
            Samples::I16(data) => data.len(),
            Samples::I24(data) | Samples::I32(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn get(&self, index: usize) -> f32 {
        match self {
            Samples::F32(data) => data[index],
            Samples::I16(data) => data[index] as f32 / I16_SCALE,
            Samples::I24(data) => data[index] as f32 / I24_SCALE,
            Samples::I32(data) => data[index] as f32 / I32_SCALE,
        }
    }
}

/// Writable view of a driver's sample memory.
#[derive(Debug)]
pub enum SamplesMut<'a> {
    F32(&'a mut [f32]),
    I16(&'a mut [i16]),
    I24(&'a mut [i32]),
    I32(&'a mut [i32]),
}

impl<'a> SamplesMut<'a> {
    pub fn format(&self) -> SampleFormat {
        match self {
            SamplesMut::F32(_) => SampleFormat::F32,
            SamplesMut::I16(_) => SampleFormat::I16,
            SamplesMut::I24(_) => SampleFormat::I24,
            SamplesMut::I32(_) => SampleFormat::I32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SamplesMut::F32(data) => data.len(),
            SamplesMut::I16(data) => data.len(),
            SamplesMut::I24(data) | SamplesMut::I32(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn set(&mut self, index: usize, value: f32) {
        match self {
            SamplesMut::F32(data) => data[index] = value,
            SamplesMut::I16(data) => {
                data[index] = quantize(value, I16_SCALE, i16::MIN as f32, i16::MAX as f32) as i16
            }
            SamplesMut::I24(data) => {
                data[index] = quantize(value, I24_SCALE, -I24_SCALE, I24_SCALE - 1.0) as i32
            }
            SamplesMut::I32(data) => {
                data[index] = quantize(value, I32_SCALE, i32::MIN as f32, i32::MAX as f32) as i32
            }
        }
    }
}

#[inline]
fn sample_index(interleaved: bool, channels: usize, frames: usize, ch: usize, frame: usize) -> usize {
    if interleaved {
        frame * channels + ch
    } else {
        ch * frames + frame
    }
}

/// Samples captured by a device, destined for the input buffers.
#[derive(Debug, Clone, Copy)]
pub struct InputPacket<'a> {
    pub device: usize,
    /// First device channel covered by this packet.
    pub begin_channel: usize,
    pub channels: usize,
    pub frames: usize,
    pub interleaved: bool,
    pub samples: Samples<'a>,
    /// Hardware timestamp of the first frame.
    pub timestamp: Option<Duration>,
}

impl<'a> InputPacket<'a> {
    /// Interleaved f32 packet covering channels `begin_channel..begin_channel + channels`.
    pub fn interleaved_f32(device: usize, begin_channel: usize, channels: usize, data: &'a [f32]) -> Self {
        let channels = channels.max(1);
        Self {
            device,
            begin_channel,
            channels,
            frames: data.len() / channels,
            interleaved: true,
            samples: Samples::F32(data),
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: Duration) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn format(&self) -> SampleFormat {
        self.samples.format()
    }

    /// True when the sample memory covers every channel and frame the header claims.
    pub fn is_consistent(&self) -> bool {
        self.channels
            .checked_mul(self.frames)
            .is_some_and(|needed| needed <= self.samples.len())
    }

    /// Normalised sample at packet-relative channel `ch`.
    #[inline]
    pub fn sample(&self, ch: usize, frame: usize) -> f32 {
        self.samples
            .get(sample_index(self.interleaved, self.channels, self.frames, ch, frame))
    }

    /// Iterates the normalised samples of one packet-relative channel.
    pub fn channel(&self, ch: usize) -> impl Iterator<Item = f32> + '_ {
        (0..self.frames).map(move |frame| self.sample(ch, frame))
    }
}

/// Sample memory a device will play, filled from the output buffers.
#[derive(Debug)]
pub struct OutputPacket<'a> {
    pub device: usize,
    pub begin_channel: usize,
    pub channels: usize,
    pub frames: usize,
    pub interleaved: bool,
    pub samples: SamplesMut<'a>,
    pub timestamp: Option<Duration>,
}

impl<'a> OutputPacket<'a> {
    pub fn interleaved_f32(
        device: usize,
        begin_channel: usize,
        channels: usize,
        data: &'a mut [f32],
    ) -> Self {
        let channels = channels.max(1);
        Self {
            device,
            begin_channel,
            channels,
            frames: data.len() / channels,
            interleaved: true,
            samples: SamplesMut::F32(data),
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: Duration) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn format(&self) -> SampleFormat {
        self.samples.format()
    }

    pub fn is_consistent(&self) -> bool {
        self.channels
            .checked_mul(self.frames)
            .is_some_and(|needed| needed <= self.samples.len())
    }

    /// Writes a normalised sample, saturating integer formats.
    #[inline]
    pub fn set(&mut self, ch: usize, frame: usize, value: f32) {
        let index = sample_index(self.interleaved, self.channels, self.frames, ch, frame);
        self.samples.set(index, value);
    }

    /// Silences frames `from..frames` of one packet-relative channel.
    pub fn zero_channel_from(&mut self, ch: usize, from: usize) {
        for frame in from..self.frames {
            self.set(ch, frame, 0.0);
        }
    }
}
