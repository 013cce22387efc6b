//! Test signals played into simulated input devices.

use std::f64::consts::TAU;

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalSource {
    Silence,
    Sine { hz: f64, amplitude: f32 },
    /// Frame counter as the sample value, offset per channel by
    /// `channel * 10_000`. Exact in f32 for the first 2^24 frames.
    Ramp,
    Noise { amplitude: f32, seed: u64 },
}

impl Default for SignalSource {
    fn default() -> Self {
        SignalSource::Sine {
            hz: 440.0,
            amplitude: 0.25,
        }
    }
}

/// Running generator state for one device.
#[derive(Debug)]
pub(crate) struct SignalGen {
    source: SignalSource,
    frame: u64,
    phase: f64,
    rng: StdRng,
}

impl SignalGen {
    pub(crate) fn new(source: SignalSource) -> Self {
        let seed = match source {
            SignalSource::Noise { seed, .. } => seed,
            _ => 0,
        };
        Self {
            source,
            frame: 0,
            phase: 0.0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Fills an interleaved buffer of `channels` channels.
    pub(crate) fn fill(&mut self, out: &mut [f32], channels: usize, sample_rate: f64) {
        let channels = channels.max(1);
        for frame in out.chunks_mut(channels) {
            match self.source {
                SignalSource::Silence => frame.fill(0.0),
                SignalSource::Sine { hz, amplitude } => {
                    frame.fill(self.phase.sin() as f32 * amplitude);
                    self.phase = (self.phase + TAU * hz / sample_rate) % TAU;
                }
                SignalSource::Ramp => {
                    for (ch, sample) in frame.iter_mut().enumerate() {
                        *sample = (self.frame + ch as u64 * 10_000) as f32;
                    }
                }
                SignalSource::Noise { amplitude, .. } => {
                    for sample in frame.iter_mut() {
                        *sample = self.rng.gen_range(-1.0f32..=1.0) * amplitude;
                    }
                }
            }
            self.frame += 1;
        }
    }
}
