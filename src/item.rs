//! Per-phone synthesis job descriptors.
//!
//! A [`RenderItem`] is everything a resampler backend needs to render one
//! phone, derived once from the phrase snapshot and then immutable. Its
//! 64-bit content hash covers every field that affects the rendered audio,
//! which makes it both the cache key and the de-duplication key for
//! concurrent renders.

use std::path::PathBuf;

use xxhash_rust::xxh64::xxh64;

use crate::cache::RenderCache;
use crate::music;
use crate::phrase::{EnvPoint, Flag, Phone, Phrase};
use crate::wav::SAMPLE_RATE;

/// Output length quantization grid, ms. Keeps native engine buffers
/// cache-friendly and stabilizes the cache key across sub-grid timing
/// jitter.
const LENGTH_GRID_MS: f64 = 50.0;

#[derive(Debug, Clone)]
pub struct RenderItem {
    pub resampler: String,
    pub input_file: PathBuf,
    /// Writable copy of `input_file` inside the cache directory.
    pub input_temp: PathBuf,
    pub output_file: PathBuf,

    pub phoneme: String,
    pub tone: i32,
    /// Flags the chosen backend actually honors.
    pub flags: Vec<Flag>,
    pub velocity: i32,
    pub volume: i32,
    pub modulation: i32,

    pub preutter_ms: f64,
    pub overlap_ms: f64,
    pub offset: f64,
    pub required_length: f64,
    pub consonant: f64,
    pub cutoff: f64,
    pub skip_over: f64,

    pub tempo: f64,
    /// Pitch bend relative to `tone`, in cents, one point per 5 ticks.
    pub pitches: Vec<i32>,

    /// Placement of the phone on the phrase axis, ms.
    pub position_ms: f64,
    pub leading_ms: f64,
    pub envelope: [EnvPoint; 5],

    pub hash: u64,
}

impl RenderItem {
    /// Build the job for one phone. `supports_flag` is the chosen backend's
    /// flag filter; unsupported flags are dropped before hashing so the
    /// cache key reflects what the backend will actually see.
    pub fn new(
        phrase: &Phrase,
        phone: &Phone,
        supports_flag: impl Fn(&str) -> bool,
        cache: &RenderCache,
    ) -> Self {
        let flags: Vec<Flag> = phone
            .flags
            .iter()
            .filter(|flag| supports_flag(&flag.abbr))
            .cloned()
            .collect();

        let stretch_ratio = (1.0 - phone.velocity as f64 * 0.01).exp2();
        let pitch_leading_ms = phone.oto.preutter * stretch_ratio;
        let skip_over = phone.oto.preutter * stretch_ratio - phone.leading_ms;
        let envelope_end = phone.envelope.0[4].x as f64;
        let required_length =
            ((pitch_leading_ms + envelope_end) / LENGTH_GRID_MS + 1.0).ceil() * LENGTH_GRID_MS;

        let pitches = slice_pitches(phrase, phone, pitch_leading_ms);

        let mut item = Self {
            resampler: phone.resampler.clone(),
            input_file: phone.oto.file.clone(),
            input_temp: cache.source_temp_path(&phrase.singer_id, &phone.oto.set, &phone.oto.file),
            output_file: PathBuf::new(),
            phoneme: phone.phoneme.clone(),
            tone: phone.tone,
            flags,
            velocity: phone.velocity,
            volume: phone.volume,
            modulation: phone.modulation,
            preutter_ms: phone.preutter_ms,
            overlap_ms: phone.overlap_ms,
            offset: phone.oto.offset,
            required_length,
            consonant: phone.oto.consonant,
            cutoff: phone.oto.cutoff,
            skip_over,
            tempo: phone.tempo,
            pitches,
            position_ms: phone.position_ms,
            leading_ms: phone.leading_ms,
            envelope: phone.envelope.0,
            hash: 0,
        };
        item.hash = item.compute_hash();
        item.output_file = cache.resampler_output_path(&phrase.singer_id, item.hash);
        item
    }

    /// Serialize every audio-affecting field in fixed order and digest it.
    fn compute_hash(&self) -> u64 {
        let mut buf = Vec::with_capacity(256);
        put_str(&mut buf, &self.resampler);
        put_str(&mut buf, &self.input_file.to_string_lossy());
        put_i32(&mut buf, self.tone);
        for flag in &self.flags {
            put_str(&mut buf, &flag.key);
            match flag.value {
                Some(value) => {
                    buf.push(1);
                    put_i32(&mut buf, value);
                }
                None => buf.push(0),
            }
        }
        put_i32(&mut buf, self.velocity);
        put_i32(&mut buf, self.volume);
        put_i32(&mut buf, self.modulation);
        put_f64(&mut buf, self.offset);
        put_f64(&mut buf, self.required_length);
        put_f64(&mut buf, self.consonant);
        put_f64(&mut buf, self.cutoff);
        put_f64(&mut buf, self.skip_over);
        put_f64(&mut buf, self.tempo);
        for &pitch in &self.pitches {
            put_i32(&mut buf, pitch);
        }
        xxh64(&buf, 0)
    }

    /// Envelope rebased to output-file sample indices: x shifted so point 0
    /// sits at `skip_over`, y rescaled from percent to linear gain.
    pub fn envelope_in_samples(&self) -> Vec<EnvPoint> {
        let skip_samples = (self.skip_over * SAMPLE_RATE as f64 / 1000.0) as f32;
        let shift = -self.envelope[0].x;
        self.envelope
            .iter()
            .map(|p| EnvPoint {
                x: (p.x + shift) * SAMPLE_RATE as f32 / 1000.0 + skip_samples,
                y: p.y / 100.0,
            })
            .collect()
    }

    /// Multiply samples by the piecewise-linear envelope gain.
    pub fn apply_envelope(&self, samples: &mut [f32]) {
        let envelope = self.envelope_in_samples();
        let mut next = 0usize;
        for (i, sample) in samples.iter_mut().enumerate() {
            while next < envelope.len() && i as f32 > envelope[next].x {
                next += 1;
            }
            let gain = if next == 0 {
                envelope[0].y
            } else if next >= envelope.len() {
                envelope[envelope.len() - 1].y
            } else {
                let p0 = envelope[next - 1];
                let p1 = envelope[next];
                if p0.x >= p1.x {
                    p0.y
                } else {
                    p0.y + (p1.y - p0.y) * (i as f32 - p0.x) / (p1.x - p0.x)
                }
            };
            *sample *= gain;
        }
    }
}

/// Fixed-interval (5-tick) resample of the phrase pitch curve, windowed to
/// `[phone start - pitch leading, phone end]`, expressed in cents relative
/// to the phone's tone. The curve lookup clamps at the edges, so a window
/// reaching before the phrase data repeats the first sample.
fn slice_pitches(phrase: &Phrase, phone: &Phone, pitch_leading_ms: f64) -> Vec<i32> {
    let window_ms = phone.end_ms - (phone.position_ms - pitch_leading_ms);
    let count = (music::ms_to_tick(phone.tempo, window_ms)
        / music::CURVE_INTERVAL_TICKS as f64)
        .ceil()
        .max(0.0) as usize;
    let interval_ms = music::tick_to_ms(phone.tempo, music::CURVE_INTERVAL_TICKS as f64);
    let start_ms = phone.position_ms - pitch_leading_ms;
    (0..count)
        .map(|i| {
            let cents = phrase.pitch_at_ms(start_ms + interval_ms * i as f64);
            (cents - phone.tone as f64 * 100.0).round() as i32
        })
        .collect()
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn put_i32(buf: &mut Vec<u8>, v: i32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_f64(buf: &mut Vec<u8>, v: f64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use crate::phrase::{Envelope, Oto};
    use std::path::Path;

    /// A fully-populated item backed by a throwaway cache directory, for
    /// tests in other modules that only need a plausible job descriptor.
    pub(crate) fn sample_item() -> (tempfile::TempDir, RenderItem) {
        let dir = tempfile::tempdir().unwrap();
        let cache = RenderCache::new(dir.path()).unwrap();
        let phrase = sample_phrase();
        let item = RenderItem::new(&phrase, &phrase.phones[0], |_| true, &cache);
        (dir, item)
    }

    pub(crate) fn sample_phrase() -> Phrase {
        Phrase {
            singer_id: "singer".into(),
            tempo: 120.0,
            position_ms: 100.0,
            leading_ms: 5.0,
            phones: vec![sample_phone()],
            pitches: vec![6000.0; 200],
            dynamics: None,
            gender: None,
            tension: None,
            breathiness: None,
            voicing: None,
        }
    }

    pub(crate) fn sample_phone() -> Phone {
        Phone {
            phoneme: "ka".into(),
            position_ms: 100.0,
            end_ms: 400.0,
            leading_ms: 5.0,
            preutter_ms: 20.0,
            overlap_ms: 10.0,
            tone: 60,
            velocity: 100,
            volume: 100,
            modulation: 0,
            flags: vec![Flag::new("g", Some(-5), "gen")],
            resampler: "native".into(),
            tempo: 120.0,
            oto: Oto {
                file: Path::new("ka.wav").to_path_buf(),
                set: "main".into(),
                offset: 30.0,
                consonant: 75.0,
                cutoff: -600.0,
                preutter: 20.0,
                overlap: 10.0,
            },
            envelope: Envelope([
                EnvPoint::new(0.0, 0.0),
                EnvPoint::new(5.0, 100.0),
                EnvPoint::new(35.0, 100.0),
                EnvPoint::new(100.0, 100.0),
                EnvPoint::new(120.0, 0.0),
            ]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::sample_phrase as test_phrase;
    use super::*;
    use std::path::Path;

    fn test_cache() -> (tempfile::TempDir, RenderCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = RenderCache::new(dir.path()).unwrap();
        (dir, cache)
    }

    fn build(phrase: &Phrase, phone: &Phone, cache: &RenderCache) -> RenderItem {
        RenderItem::new(phrase, phone, |_| true, cache)
    }

    #[test]
    fn neutral_velocity_gives_unit_stretch() {
        let (_dir, cache) = test_cache();
        let phrase = test_phrase();
        let item = build(&phrase, &phrase.phones[0], &cache);
        // velocity=100 => stretch 1.0; preutter 20, leading 5 => skip 15.
        assert!((item.skip_over - 15.0).abs() < 1e-9);
    }

    #[test]
    fn required_length_matches_grid_formula() {
        let (_dir, cache) = test_cache();
        let phrase = test_phrase();
        // envelope[4].x = 120, pitch leading = 20 => ceil(140/50 + 1)*50 = 200.
        let item = build(&phrase, &phrase.phones[0], &cache);
        assert_eq!(item.required_length, 200.0);
    }

    #[test]
    fn required_length_is_positive_multiple_of_grid() {
        let (_dir, cache) = test_cache();
        let phrase = test_phrase();
        for velocity in [40, 70, 100, 130, 180] {
            let mut phone = phrase.phones[0].clone();
            phone.velocity = velocity;
            let item = build(&phrase, &phone, &cache);
            assert!(item.required_length > 0.0);
            assert_eq!(item.required_length % 50.0, 0.0);
            let stretch = (1.0 - velocity as f64 * 0.01).exp2();
            let needed = phone.oto.preutter * stretch + phone.envelope.0[4].x as f64;
            assert!(item.required_length >= needed.ceil());
        }
    }

    #[test]
    fn hash_is_deterministic() {
        let (_dir, cache) = test_cache();
        let phrase = test_phrase();
        let a = build(&phrase, &phrase.phones[0], &cache);
        let b = build(&phrase, &phrase.phones[0], &cache);
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.output_file, b.output_file);
    }

    #[test]
    fn every_contributing_field_changes_the_hash() {
        let (_dir, cache) = test_cache();
        let phrase = test_phrase();
        let base = build(&phrase, &phrase.phones[0], &cache);

        let mutations: Vec<Box<dyn Fn(&mut Phone)>> = vec![
            Box::new(|p| p.velocity += 1),
            Box::new(|p| p.volume -= 1),
            Box::new(|p| p.modulation += 10),
            Box::new(|p| p.tone += 1),
            Box::new(|p| p.resampler = "other".into()),
            Box::new(|p| p.oto.file = Path::new("ta.wav").to_path_buf()),
            Box::new(|p| p.oto.offset += 1.0),
            Box::new(|p| p.oto.consonant += 1.0),
            Box::new(|p| p.oto.cutoff += 1.0),
            Box::new(|p| p.tempo += 1.0),
            Box::new(|p| p.flags[0].value = Some(-6)),
        ];
        for (i, mutate) in mutations.iter().enumerate() {
            let mut phone = phrase.phones[0].clone();
            mutate(&mut phone);
            let item = build(&phrase, &phone, &cache);
            assert_ne!(base.hash, item.hash, "mutation {i} did not change hash");
        }
    }

    #[test]
    fn pitch_bend_changes_the_hash() {
        let (_dir, cache) = test_cache();
        let phrase = test_phrase();
        let base = build(&phrase, &phrase.phones[0], &cache);
        let mut bent = phrase.clone();
        bent.pitches[40] += 30.0;
        let item = build(&bent, &bent.phones[0], &cache);
        assert_ne!(base.hash, item.hash);
    }

    #[test]
    fn unsupported_flags_are_dropped_and_do_not_hash() {
        let (_dir, cache) = test_cache();
        let phrase = test_phrase();
        let with_flag = build(&phrase, &phrase.phones[0], &cache);
        let without_flag = RenderItem::new(&phrase, &phrase.phones[0], |_| false, &cache);
        assert!(without_flag.flags.is_empty());
        assert_ne!(with_flag.hash, without_flag.hash);
    }

    #[test]
    fn pitch_window_left_pads_with_first_sample() {
        let (_dir, cache) = test_cache();
        let mut phrase = test_phrase();
        // Ramp so the first value is distinguishable.
        phrase.pitches = (0..200).map(|i| 6000.0 + i as f32).collect();
        // Window starts 20 ms before the phone, which is before curve start
        // (curve begins at position - leading = 95 ms, window at 80 ms).
        let item = build(&phrase, &phrase.phones[0], &cache);
        assert_eq!(item.pitches[0], 0); // clamped to pitches[0] = tone * 100
        assert!(item.pitches.iter().any(|&p| p > 0));
    }

    #[test]
    fn envelope_gain_is_applied_piecewise() {
        let (_dir, cache) = test_cache();
        let phrase = test_phrase();
        let mut phone = phrase.phones[0].clone();
        phone.leading_ms = 20.0; // skip_over = 0 keeps indices easy
        let item = build(&phrase, &phone, &cache);
        let n = (200.0 * SAMPLE_RATE as f64 / 1000.0) as usize;
        let mut samples = vec![1.0f32; n];
        item.apply_envelope(&mut samples);
        assert_eq!(samples[0], 0.0);
        // Inside the sustain plateau (between 5 ms and 100 ms) gain is 1.
        let sustain = (50.0 * SAMPLE_RATE as f64 / 1000.0) as usize;
        assert!((samples[sustain] - 1.0).abs() < 1e-6);
        // Past envelope end the gain stays at the last point's value.
        assert_eq!(samples[n - 1], 0.0);
    }
}
