//! In-process synthesis backend.
//!
//! Renders a [`RenderItem`] without any serialization boundary: the source
//! sample is decoded, trimmed by the oto geometry, the consonant is
//! stretched by the velocity ratio, the vowel is looped out to the
//! required length, and the pitch-bend slice modulates the playback rate.
//! This is a time-domain approximation; spectral-envelope work (gender,
//! tension, modulation) is the domain of vocoder-class engines and is
//! intentionally not attempted here.

use std::path::{Path, PathBuf};

use crate::item::RenderItem;
use crate::music;
use crate::wav::{self, SAMPLE_RATE};

/// Registry name of the built-in backend.
pub const NATIVE_NAME: &str = "native";

/// Expression abbreviations the native backend honors.
const SUPPORTED_FLAGS: &[&str] = &["vel", "vol", "mod", "gen", "bre", "ten", "voi"];

#[derive(Debug, Default)]
pub struct NativeResampler;

impl NativeResampler {
    pub fn supports_flag(&self, abbr: &str) -> bool {
        SUPPORTED_FLAGS.contains(&abbr)
    }

    /// Render to mono samples of exactly `item.required_length` ms.
    /// Empty on failure (missing or undecodable source).
    pub fn render(&self, item: &RenderItem) -> Vec<f32> {
        let source_path = pick_source(item);
        let source = match wav::read_mono(source_path) {
            Ok(samples) if !samples.is_empty() => samples,
            Ok(_) => {
                log::warn!("source {} is empty", source_path.display());
                return Vec::new();
            }
            Err(e) => {
                log::warn!(
                    "cannot decode source {} for \"{}\": {e}",
                    source_path.display(),
                    item.phoneme
                );
                return Vec::new();
            }
        };

        let to_samples = |ms: f64| ms * SAMPLE_RATE as f64 / 1000.0;
        let source_len = source.len() as f64;
        let offset = to_samples(item.offset).clamp(0.0, source_len - 1.0);
        let vowel_start = (offset + to_samples(item.consonant)).min(source_len - 1.0);
        let cut_end = if item.cutoff < 0.0 {
            offset + to_samples(-item.cutoff)
        } else {
            source_len - to_samples(item.cutoff)
        };
        let cut_end = cut_end.clamp(vowel_start + 1.0, source_len);

        let stretch = (1.0 - item.velocity as f64 * 0.01).exp2();
        let consonant_out_ms = item.consonant * stretch;
        let out_len = to_samples(item.required_length).round() as usize;

        let gain = item.volume as f32 / 100.0;
        let mut out = Vec::with_capacity(out_len);
        let mut pos = offset;
        for i in 0..out_len {
            let ms = i as f64 * 1000.0 / SAMPLE_RATE as f64;
            out.push(sample_lerp(&source, pos) * gain);

            let rate = (bend_cents(item, ms) / 1200.0).exp2();
            let base = if ms < consonant_out_ms { 1.0 / stretch } else { 1.0 };
            pos += rate * base;
            if pos >= cut_end {
                // Loop the vowel region.
                pos = vowel_start + (pos - cut_end) % (cut_end - vowel_start);
            }
        }
        out
    }

    /// Render and persist at the item's cache path.
    pub fn render_to_file(&self, item: &RenderItem) -> Option<PathBuf> {
        let samples = self.render(item);
        if samples.is_empty() {
            return None;
        }
        match wav::write_mono(&item.output_file, &samples) {
            Ok(()) => Some(item.output_file.clone()),
            Err(e) => {
                log::error!(
                    "failed to write native render output {}: {e}",
                    item.output_file.display()
                );
                None
            }
        }
    }
}

fn pick_source(item: &RenderItem) -> &Path {
    if item.input_temp.exists() {
        &item.input_temp
    } else {
        &item.input_file
    }
}

/// Pitch bend (cents, relative to the item's tone) at an output-relative
/// millisecond position. The slice starts at the pitch-leading point, which
/// is exactly where the rendered file starts.
fn bend_cents(item: &RenderItem, ms: f64) -> f64 {
    if item.pitches.is_empty() {
        return 0.0;
    }
    let index = (music::ms_to_tick(item.tempo, ms) / music::CURVE_INTERVAL_TICKS as f64) as usize;
    item.pitches[index.min(item.pitches.len() - 1)] as f64
}

fn sample_lerp(samples: &[f32], pos: f64) -> f32 {
    let lo = pos.floor() as usize;
    if lo + 1 >= samples.len() {
        return *samples.last().unwrap_or(&0.0);
    }
    let alpha = (pos - lo as f64) as f32;
    samples[lo] * (1.0 - alpha) + samples[lo + 1] * alpha
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RenderCache;
    use crate::item::tests_support::sample_phrase;

    /// Phrase + item whose oto points at a generated 1-second ramp wav.
    fn item_with_source(volume: i32) -> (tempfile::TempDir, RenderItem) {
        let dir = tempfile::tempdir().unwrap();
        let cache = RenderCache::new(dir.path()).unwrap();
        let source = dir.path().join("ka.wav");
        let samples: Vec<f32> = (0..SAMPLE_RATE).map(|i| i as f32 / SAMPLE_RATE as f32).collect();
        wav::write_mono(&source, &samples).unwrap();

        let mut phrase = sample_phrase();
        phrase.phones[0].oto.file = source;
        phrase.phones[0].volume = volume;
        let item = RenderItem::new(&phrase, &phrase.phones[0], |_| true, &cache);
        (dir, item)
    }

    #[test]
    fn output_length_matches_required_length() {
        let (_dir, item) = item_with_source(100);
        let samples = NativeResampler.render(&item);
        let expected = (item.required_length * SAMPLE_RATE as f64 / 1000.0).round() as usize;
        assert_eq!(samples.len(), expected);
    }

    #[test]
    fn playback_starts_at_oto_offset() {
        let (_dir, item) = item_with_source(100);
        let samples = NativeResampler.render(&item);
        // The source is a 0..1 ramp; offset is 30 ms.
        let offset_value = 30.0 / 1000.0;
        assert!((samples[0] - offset_value as f32).abs() < 1e-3);
    }

    #[test]
    fn volume_scales_output() {
        let (_dir, loud) = item_with_source(100);
        let (_dir2, quiet) = item_with_source(50);
        let loud_samples = NativeResampler.render(&loud);
        let quiet_samples = NativeResampler.render(&quiet);
        let idx = loud_samples.len() / 2;
        assert!((quiet_samples[idx] - loud_samples[idx] * 0.5).abs() < 1e-3);
    }

    #[test]
    fn missing_source_renders_silence() {
        let (_dir, mut item) = crate::item::tests_support::sample_item();
        item.input_file = PathBuf::from("/nonexistent/ka.wav");
        item.input_temp = PathBuf::from("/nonexistent/tmp.wav");
        assert!(NativeResampler.render(&item).is_empty());
        assert!(NativeResampler.render_to_file(&item).is_none());
    }

    #[test]
    fn render_to_file_lands_at_cache_path() {
        let (_dir, item) = item_with_source(100);
        let path = NativeResampler.render_to_file(&item).unwrap();
        assert_eq!(path, item.output_file);
        let decoded = wav::read_mono(&path).unwrap();
        assert!(!decoded.is_empty());
    }
}
