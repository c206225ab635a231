//! Ten-band graphic equalizer for the lossy decode path.
//!
//! Peaking biquads at the ISO octave centres. Gains are fixed at construction;
//! filter state is kept per channel so any interleaved layout works.

use std::f32::consts::PI;

use crate::config::EQ_BANDS;

/// ISO octave band centre frequencies (Hz).
pub const BAND_FREQUENCIES: [f32; EQ_BANDS] = [
    31.5, 63.0, 125.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0, 16000.0,
];

/// Octave bandwidth.
const BAND_Q: f32 = 1.41;
const MAX_GAIN_DB: f32 = 12.0;
const BYPASS_DB: f32 = 0.01;

#[derive(Clone, Copy, Debug, Default)]
struct History {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

#[derive(Clone, Debug)]
struct Band {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    state: Vec<History>,
}

impl Band {
    fn peaking(frequency: f32, gain_db: f32, sample_rate: f32, channels: usize) -> Option<Self> {
        if gain_db.abs() < BYPASS_DB || sample_rate < 1.0 {
            return None;
        }
        let a = 10.0_f32.powf(gain_db / 40.0);
        let omega = 2.0 * PI * frequency.min(sample_rate * 0.45) / sample_rate;
        let (sin_omega, cos_omega) = omega.sin_cos();
        let alpha = sin_omega / (2.0 * BAND_Q);

        let a0 = 1.0 + alpha / a;
        Some(Self {
            b0: (1.0 + alpha * a) / a0,
            b1: (-2.0 * cos_omega) / a0,
            b2: (1.0 - alpha * a) / a0,
            a1: (-2.0 * cos_omega) / a0,
            a2: (1.0 - alpha / a) / a0,
            state: vec![History::default(); channels],
        })
    }

    #[inline]
    fn run(&mut self, ch: usize, x: f32) -> f32 {
        let h = &mut self.state[ch];
        let mut y = self.b0 * x + self.b1 * h.x1 + self.b2 * h.x2 - self.a1 * h.y1 - self.a2 * h.y2;
        if y.abs() < 1e-15 {
            y = 0.0;
        }
        h.x2 = h.x1;
        h.x1 = x;
        h.y2 = h.y1;
        h.y1 = y;
        y
    }
}

#[derive(Clone, Debug)]
pub struct GraphicEq {
    bands: Vec<Band>,
    channels: usize,
}

impl GraphicEq {
    /// Build the filter chain; bands with (near) zero gain are left out.
    pub fn new(gains_db: &[f32; EQ_BANDS], sample_rate: u32, channels: usize) -> Self {
        let channels = channels.max(1);
        let bands = BAND_FREQUENCIES
            .iter()
            .zip(gains_db)
            .filter_map(|(&freq, &gain)| {
                let gain = if gain.is_finite() {
                    gain.clamp(-MAX_GAIN_DB, MAX_GAIN_DB)
                } else {
                    0.0
                };
                Band::peaking(freq, gain, sample_rate as f32, channels)
            })
            .collect();
        Self { bands, channels }
    }

    /// True when every band is bypassed.
    pub fn is_flat(&self) -> bool {
        self.bands.is_empty()
    }

    /// Filter interleaved samples in place.
    pub fn process(&mut self, samples: &mut [f32]) {
        if self.bands.is_empty() {
            return;
        }
        for frame in samples.chunks_exact_mut(self.channels) {
            for (ch, sample) in frame.iter_mut().enumerate() {
                let mut v = *sample;
                for band in &mut self.bands {
                    v = band.run(ch, v);
                }
                *sample = v;
            }
        }
    }

    /// Clear filter history (after a seek).
    pub fn reset(&mut self) {
        for band in &mut self.bands {
            band.state.fill(History::default());
        }
    }
}
