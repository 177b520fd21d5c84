//! Post-processing of the concatenated phrase buffer.
//!
//! Runs after the wavtool: the phrase-level dynamics curve, optional DC
//! offset removal, and optional edge fades. All passes are in place on the
//! final mono buffer.

use crate::music;
use crate::phrase::Phrase;
use crate::wav::SAMPLE_RATE;

/// Shape of the optional edge fade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FadeCurve {
    #[default]
    Linear,
    Exponential,
    Sine,
    EqualPower,
    RaisedCosine,
}

impl FadeCurve {
    /// Gain at progress `x` in `[0, 1]` of a fade-in (0 silent, 1 full).
    fn gain(self, x: f64) -> f64 {
        use std::f64::consts::PI;
        match self {
            Self::Linear => x,
            Self::Exponential => {
                // -5 gives roughly 43 dB of range before the knee.
                let factor = -5.0;
                ((factor * (1.0 - x)).exp() - factor.exp()) / (1.0 - factor.exp())
            }
            Self::Sine => (x * PI / 2.0).sin(),
            Self::EqualPower => x.sqrt(),
            Self::RaisedCosine => (1.0 - (x * PI).cos()) / 2.0,
        }
    }
}

/// Apply the phrase dynamics curve (percent, one point per 5 ticks,
/// starting at the curve start) as a gain ramp. No-op when absent.
pub fn apply_dynamics(phrase: &Phrase, samples: &mut [f32]) {
    let Some(dynamics) = &phrase.dynamics else {
        return;
    };
    if dynamics.is_empty() {
        return;
    }
    let interval_ms = music::tick_to_ms(phrase.tempo, music::CURVE_INTERVAL_TICKS as f64);
    let interval_samples = interval_ms * SAMPLE_RATE as f64 / 1000.0;
    for (i, sample) in samples.iter_mut().enumerate() {
        let pos = i as f64 / interval_samples;
        let lo = (pos.floor() as usize).min(dynamics.len() - 1);
        let hi = (lo + 1).min(dynamics.len() - 1);
        let alpha = (pos - lo as f64).clamp(0.0, 1.0) as f32;
        let gain = (dynamics[lo] + (dynamics[hi] - dynamics[lo]) * alpha) / 100.0;
        *sample *= gain;
    }
}

/// Subtract the mean. The estimate deliberately excludes the first and
/// last 100 samples, where fades and envelope tails bias the mean.
pub fn remove_dc_offset(samples: &mut [f32]) {
    const EDGE: usize = 100;
    if samples.len() <= 2 * EDGE {
        return;
    }
    let body = &samples[EDGE..samples.len() - EDGE];
    let mean = body.iter().sum::<f32>() / body.len() as f32;
    for sample in samples.iter_mut() {
        *sample -= mean;
    }
}

/// Fade both edges of the buffer. The length is clamped so the two fades
/// never overlap.
pub fn apply_fades(samples: &mut [f32], fade_ms: f64, curve: FadeCurve) {
    if fade_ms <= 0.0 || samples.is_empty() {
        return;
    }
    let fade = ((fade_ms * SAMPLE_RATE as f64 / 1000.0) as usize).min(samples.len() / 2);
    if fade == 0 {
        return;
    }
    let len = samples.len();
    for i in 0..fade {
        let x = i as f64 / fade as f64;
        let gain = curve.gain(x) as f32;
        samples[i] *= gain;
        samples[len - 1 - i] *= gain;
    }
}
