//! Output normalization: peak and ITU-R BS.1770 integrated loudness.

use crate::audio::{db_to_linear, PcmBuffer};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::debug;

const BLOCK_SECS: f64 = 0.4;
const BLOCK_OVERLAP: f64 = 0.75;
const ABSOLUTE_GATE_LUFS: f64 = -70.0;
const RELATIVE_GATE_LU: f64 = -10.0;
const LOUDNESS_OFFSET: f64 = -0.691;

/// How the mixed output is normalized, applied once after concatenation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "target", rename_all = "snake_case")]
pub enum Normalization {
    /// Leave levels untouched
    None,
    /// Scale so the largest sample reaches this level in dBFS
    Peak(f32),
    /// Scale so the integrated loudness reaches this level in LUFS
    Loudness(f32),
}

impl Default for Normalization {
    fn default() -> Self {
        Self::Peak(-1.0)
    }
}

impl Normalization {
    /// Normalize a buffer in place. Silent buffers are left untouched.
    pub fn apply(self, buffer: &mut PcmBuffer) {
        match self {
            Self::None => {}
            Self::Peak(target_dbfs) => {
                let peak = buffer.peak();
                if peak > 0.0 {
                    let factor = db_to_linear(target_dbfs) / peak;
                    debug!("Peak normalization: peak {:.4} -> {:.1} dBFS", peak, target_dbfs);
                    buffer.scale(factor);
                }
            }
            Self::Loudness(target_lufs) => {
                if let Some(measured) = integrated_loudness(buffer) {
                    #[allow(clippy::cast_possible_truncation)]
                    let gain_db = (f64::from(target_lufs) - measured) as f32;
                    debug!("Loudness normalization: {:.2} LUFS -> {:.1} LUFS", measured, target_lufs);
                    buffer.apply_gain_db(gain_db);
                }
            }
        }
    }
}

/// Direct-form I biquad section
#[derive(Debug, Clone, Copy)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Biquad {
    fn from_raw(b: [f64; 3], a: [f64; 3]) -> Self {
        Self {
            b0: b[0] / a[0],
            b1: b[1] / a[0],
            b2: b[2] / a[0],
            a1: a[1] / a[0],
            a2: a[2] / a[0],
        }
    }

    /// K-weighting stage 1: high shelf modelling the head
    fn high_shelf(sample_rate: f64) -> Self {
        let (gain_db, q, fc) = (4.0, std::f64::consts::FRAC_1_SQRT_2, 1500.0);
        let a = 10.0_f64.powf(gain_db / 40.0);
        let w0 = 2.0 * PI * fc / sample_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        Self::from_raw(
            [
                a * ((a + 1.0) + (a - 1.0) * cos + two_sqrt_a_alpha),
                -2.0 * a * ((a - 1.0) + (a + 1.0) * cos),
                a * ((a + 1.0) + (a - 1.0) * cos - two_sqrt_a_alpha),
            ],
            [
                (a + 1.0) - (a - 1.0) * cos + two_sqrt_a_alpha,
                2.0 * ((a - 1.0) - (a + 1.0) * cos),
                (a + 1.0) - (a - 1.0) * cos - two_sqrt_a_alpha,
            ],
        )
    }

    /// K-weighting stage 2: RLB high pass
    fn high_pass(sample_rate: f64) -> Self {
        let (q, fc) = (0.5, 38.0);
        let w0 = 2.0 * PI * fc / sample_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);

        Self::from_raw(
            [(1.0 + cos) / 2.0, -(1.0 + cos), (1.0 + cos) / 2.0],
            [1.0 + alpha, -2.0 * cos, 1.0 - alpha],
        )
    }

    fn process(&self, input: &[f64]) -> Vec<f64> {
        let (mut x1, mut x2, mut y1, mut y2) = (0.0, 0.0, 0.0, 0.0);
        input
            .iter()
            .map(|&x| {
                let y = self.b0 * x + self.b1 * x1 + self.b2 * x2 - self.a1 * y1 - self.a2 * y2;
                x2 = x1;
                x1 = x;
                y2 = y1;
                y1 = y;
                y
            })
            .collect()
    }
}

/// Integrated loudness in LUFS, or `None` when the buffer is empty or entirely gated
///
/// Buffers shorter than one 400 ms block are measured as a single block.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn integrated_loudness(buffer: &PcmBuffer) -> Option<f64> {
    if buffer.is_empty() {
        return None;
    }

    let sample_rate = f64::from(buffer.sample_rate());
    let channels = usize::from(buffer.channels());
    let frames = buffer.frames();
    let shelf = Biquad::high_shelf(sample_rate);
    let high_pass = Biquad::high_pass(sample_rate);

    let weighted: Vec<Vec<f64>> = (0..channels)
        .map(|ch| {
            let channel: Vec<f64> = buffer
                .samples()
                .iter()
                .skip(ch)
                .step_by(channels)
                .map(|&s| f64::from(s))
                .collect();
            high_pass.process(&shelf.process(&channel))
        })
        .collect();

    let block = ((BLOCK_SECS * sample_rate) as usize).min(frames).max(1);
    let step = ((BLOCK_SECS * (1.0 - BLOCK_OVERLAP) * sample_rate) as usize).max(1);
    let block_count = (frames - block) / step + 1;

    // Per block, sum over channels of mean square (channel weights are 1.0 for mono/stereo)
    let powers: Vec<f64> = (0..block_count)
        .map(|j| {
            let start = j * step;
            weighted
                .iter()
                .map(|channel| channel[start..start + block].iter().map(|s| s * s).sum::<f64>() / block as f64)
                .sum()
        })
        .collect();

    let loudness = |power: f64| LOUDNESS_OFFSET + 10.0 * power.log10();

    let above_absolute: Vec<f64> = powers
        .iter()
        .copied()
        .filter(|&p| p > 0.0 && loudness(p) > ABSOLUTE_GATE_LUFS)
        .collect();
    if above_absolute.is_empty() {
        return None;
    }

    let relative_gate =
        loudness(above_absolute.iter().sum::<f64>() / above_absolute.len() as f64) + RELATIVE_GATE_LU;
    let gated: Vec<f64> = above_absolute
        .into_iter()
        .filter(|&p| loudness(p) > relative_gate)
        .collect();
    if gated.is_empty() {
        return None;
    }

    Some(loudness(gated.iter().sum::<f64>() / gated.len() as f64))
}
