//! Input data model of the renderer.
//!
//! A [`Phrase`] is a snapshot handed over by the project model: an ordered
//! run of [`Phone`]s on one timing axis plus phrase-level expression curves
//! sampled every 5 ticks. The renderer never mutates a phrase; everything
//! derived from it lives in [`crate::item::RenderItem`].

use std::path::PathBuf;

use crate::error::RenderError;
use crate::music;
use crate::wav::SAMPLE_RATE;

/// Voicebank timing metadata for one source sample, in milliseconds.
///
/// `cutoff` follows the oto.ini convention: positive values measure from
/// the end of the file, negative values from `offset`.
#[derive(Debug, Clone, Default)]
pub struct Oto {
    pub file: PathBuf,
    /// Name of the oto set the entry came from; part of the source temp key.
    pub set: String,
    pub offset: f64,
    pub consonant: f64,
    pub cutoff: f64,
    pub preutter: f64,
    pub overlap: f64,
}

/// One point of the 5-point gain envelope: `x` in ms, `y` in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnvPoint {
    pub x: f32,
    pub y: f32,
}

impl EnvPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Piecewise-linear gain polyline applied to a rendered phone.
#[derive(Debug, Clone)]
pub struct Envelope(pub [EnvPoint; 5]);

impl Default for Envelope {
    fn default() -> Self {
        // The classic wavtool default: 5 ms attack, 35 ms release.
        Envelope([
            EnvPoint::new(0.0, 0.0),
            EnvPoint::new(5.0, 100.0),
            EnvPoint::new(35.0, 100.0),
            EnvPoint::new(100.0, 100.0),
            EnvPoint::new(135.0, 0.0),
        ])
    }
}

/// One resampler flag: textual key, optional integer value, and the
/// expression abbreviation it came from (used for manifest filtering).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flag {
    pub key: String,
    pub value: Option<i32>,
    pub abbr: String,
}

impl Flag {
    pub fn new(key: &str, value: Option<i32>, abbr: &str) -> Self {
        Self {
            key: key.to_string(),
            value,
            abbr: abbr.to_string(),
        }
    }
}

/// One segment within a phrase.
#[derive(Debug, Clone)]
pub struct Phone {
    pub phoneme: String,
    /// Nominal start on the phrase timing axis, ms.
    pub position_ms: f64,
    pub end_ms: f64,
    /// Lead-in actually granted by the layout step (preutterance clipped
    /// against the previous phone), ms.
    pub leading_ms: f64,
    pub preutter_ms: f64,
    pub overlap_ms: f64,
    pub tone: i32,
    /// Velocity/volume/modulation as integer percent (100 = neutral).
    pub velocity: i32,
    pub volume: i32,
    pub modulation: i32,
    pub flags: Vec<Flag>,
    pub resampler: String,
    pub tempo: f64,
    pub oto: Oto,
    pub envelope: Envelope,
}

impl Phone {
    pub fn duration_ms(&self) -> f64 {
        self.end_ms - self.position_ms
    }

    /// Reject oto geometry that would make the resampler read outside the
    /// sample or place the consonant after the audible region.
    pub fn validate(&self) -> Result<(), RenderError> {
        let invalid = |reason: String| RenderError::InvalidOto {
            phoneme: self.phoneme.clone(),
            reason,
        };
        if self.oto.offset < 0.0 {
            return Err(invalid(format!("negative offset {}", self.oto.offset)));
        }
        if self.oto.consonant < 0.0 {
            return Err(invalid(format!("negative consonant {}", self.oto.consonant)));
        }
        if self.oto.preutter < 0.0 {
            return Err(invalid(format!("negative preutterance {}", self.oto.preutter)));
        }
        if self.oto.cutoff < 0.0 && -self.oto.cutoff < self.oto.preutter {
            return Err(invalid(format!(
                "cutoff {}ms after offset lies left of preutterance {}ms",
                -self.oto.cutoff, self.oto.preutter
            )));
        }
        Ok(())
    }
}

/// Ordered sequence of phones sharing one timing axis.
#[derive(Debug, Clone)]
pub struct Phrase {
    pub singer_id: String,
    pub tempo: f64,
    /// Nominal phrase start, ms.
    pub position_ms: f64,
    /// Lead-in of the first phone, ms. Curve data starts at
    /// `position_ms - leading_ms`.
    pub leading_ms: f64,
    pub phones: Vec<Phone>,
    /// Pitch curve in cents (tone × 100 + bend), one point per 5 ticks.
    pub pitches: Vec<f32>,
    /// Optional expression curves on the same 5-tick grid.
    pub dynamics: Option<Vec<f32>>,
    pub gender: Option<Vec<f32>>,
    pub tension: Option<Vec<f32>>,
    pub breathiness: Option<Vec<f32>>,
    pub voicing: Option<Vec<f32>>,
}

impl Phrase {
    /// Start of the curve data on the phrase axis, ms.
    pub fn curve_start_ms(&self) -> f64 {
        self.position_ms - self.leading_ms
    }

    /// Pitch curve value (cents) at an absolute ms position, linearly
    /// interpolated; clamped at the curve edges, never extrapolated.
    pub fn pitch_at_ms(&self, ms: f64) -> f64 {
        if self.pitches.is_empty() {
            return 0.0;
        }
        let ticks = music::ms_to_tick(self.tempo, ms - self.curve_start_ms());
        let index = ticks / music::CURVE_INTERVAL_TICKS as f64;
        let index = index.clamp(0.0, (self.pitches.len() - 1) as f64);
        let lo = index.floor() as usize;
        let hi = index.ceil() as usize;
        let alpha = index - lo as f64;
        self.pitches[lo] as f64 + (self.pitches[hi] as f64 - self.pitches[lo] as f64) * alpha
    }

    /// Local F0 in Hz at a sample position of the phrase buffer.
    pub fn f0_at_sample(&self, sample: f64) -> f64 {
        if self.pitches.is_empty() {
            return 0.0;
        }
        let sample_ms = sample / SAMPLE_RATE as f64 * 1000.0;
        let ticks = music::ms_to_tick(self.tempo, sample_ms);
        let index = (ticks / music::CURVE_INTERVAL_TICKS as f64).round() as isize;
        let index = index.clamp(0, self.pitches.len() as isize - 1) as usize;
        music::tone_to_freq(self.pitches[index] as f64 / 100.0)
    }

    pub fn validate(&self) -> Result<(), RenderError> {
        if self.phones.is_empty() {
            return Err(RenderError::EmptyPhrase);
        }
        for phone in &self.phones {
            phone.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_phrase(cents: f32, points: usize) -> Phrase {
        Phrase {
            singer_id: "singer".into(),
            tempo: 120.0,
            position_ms: 100.0,
            leading_ms: 20.0,
            phones: vec![test_phone()],
            pitches: vec![cents; points],
            dynamics: None,
            gender: None,
            tension: None,
            breathiness: None,
            voicing: None,
        }
    }

    pub(crate) fn test_phone() -> Phone {
        Phone {
            phoneme: "a".into(),
            position_ms: 100.0,
            end_ms: 400.0,
            leading_ms: 20.0,
            preutter_ms: 20.0,
            overlap_ms: 10.0,
            tone: 60,
            velocity: 100,
            volume: 100,
            modulation: 0,
            flags: vec![],
            resampler: "native".into(),
            tempo: 120.0,
            oto: Oto {
                file: PathBuf::from("a.wav"),
                set: "main".into(),
                offset: 10.0,
                consonant: 60.0,
                cutoff: -500.0,
                preutter: 20.0,
                overlap: 10.0,
            },
            envelope: Envelope::default(),
        }
    }

    #[test]
    fn pitch_lookup_clamps_at_edges() {
        let phrase = flat_phrase(6000.0, 8);
        // Far before the curve start and far after its end.
        assert_eq!(phrase.pitch_at_ms(-10_000.0), 6000.0);
        assert_eq!(phrase.pitch_at_ms(10_000.0), 6000.0);
    }

    #[test]
    fn f0_lookup_uses_cents() {
        let phrase = flat_phrase(6900.0, 8); // A4
        let f0 = phrase.f0_at_sample(0.0);
        assert!((f0 - 440.0).abs() < 1e-6);
    }

    #[test]
    fn cutoff_left_of_preutter_is_rejected() {
        let mut phone = test_phone();
        phone.oto.cutoff = -10.0; // audible region ends before the preutterance
        let err = phone.validate().unwrap_err();
        assert!(err.to_string().contains("preutterance"));
    }

    #[test]
    fn well_formed_oto_passes() {
        assert!(test_phone().validate().is_ok());
    }
}
