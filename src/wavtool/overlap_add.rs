//! In-process concatenation by overlap-add.
//!
//! Rendered phones already share one timing axis, so concatenation is
//! additive placement into a phrase buffer, with the 5-point envelope
//! providing the crossfade. The convergence variant additionally measures
//! the harmonic phase at each junction and nudges every segment by a whole
//! number of samples so adjacent periodic waveforms meet in phase instead
//! of comb-filtering. Corrections are cumulative: each segment aligns to
//! its already-shifted predecessor.

use std::f64::consts::PI;

use crate::context::RenderConfig;
use crate::item::RenderItem;
use crate::phrase::Phrase;
use crate::wav::{self, SAMPLE_RATE};

use super::filter::PeakFilter;

pub struct OverlapAdd {
    name: &'static str,
    phase_compensated: bool,
}

impl OverlapAdd {
    /// Plain overlap-add, no junction analysis.
    pub fn simple() -> Self {
        Self {
            name: super::WAVTOOL_SIMPLE,
            phase_compensated: false,
        }
    }

    /// Overlap-add with per-junction phase correction.
    pub fn convergence() -> Self {
        Self {
            name: super::WAVTOOL_CONVERGENCE,
            phase_compensated: true,
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn concatenate(
        &self,
        phrase: &Phrase,
        items: &[RenderItem],
        config: &RenderConfig,
    ) -> Vec<f32> {
        let segments = self.plan_segments(phrase, items, config);

        let mut len = 0i64;
        for seg in &segments {
            len = len.max(seg.place_base() + seg.samples.len() as i64);
        }
        let phrase_len = ((phrase.phones.last().map_or(0.0, |p| p.end_ms)
            - phrase.curve_start_ms())
            * SAMPLE_RATE as f64
            / 1000.0)
            .round() as i64;
        let mut out = vec![0.0f32; len.max(phrase_len).max(0) as usize];

        for seg in &segments {
            let base = seg.place_base();
            let first = seg.skip.max(0) as usize;
            for (s, &v) in seg.samples.iter().enumerate().skip(first) {
                let idx = base + s as i64;
                if idx >= 0 && (idx as usize) < out.len() {
                    out[idx as usize] += v;
                }
            }
        }
        out
    }

    /// Decode, analyze and envelope every item; compute the correction
    /// chain. Split out so the corrections are observable.
    pub(crate) fn plan_segments(
        &self,
        phrase: &Phrase,
        items: &[RenderItem],
        config: &RenderConfig,
    ) -> Vec<Segment> {
        let mut segments: Vec<Segment> = items
            .iter()
            .map(|item| self.build_segment(phrase, item, config))
            .collect();

        if self.phase_compensated {
            for i in 1..segments.len() {
                let (prev, cur) = {
                    let (a, b) = segments.split_at_mut(i);
                    (&a[i - 1], &mut b[0])
                };
                let (Some(tail), Some(head)) = (prev.tail_phase, cur.head_phase) else {
                    continue;
                };
                if cur.head_f0 <= 0.0 {
                    continue;
                }
                // The predecessor's own shift moved its tail phase; fold
                // that in before measuring the mismatch.
                let prev_corr_angle =
                    prev.correction as f64 * 2.0 * PI / SAMPLE_RATE as f64 * cur.head_f0;
                let mut diff = (head - tail + prev_corr_angle).rem_euclid(2.0 * PI);
                if diff > PI {
                    diff -= 2.0 * PI;
                }
                cur.correction =
                    (diff / (2.0 * PI) * SAMPLE_RATE as f64 / cur.head_f0).round() as i64;
            }
        }

        for (seg, item) in segments.iter_mut().zip(items) {
            item.apply_envelope(&mut seg.samples);
        }
        segments
    }

    fn build_segment(&self, phrase: &Phrase, item: &RenderItem, config: &RenderConfig) -> Segment {
        let samples = wav::read_mono(&item.output_file).unwrap_or_else(|e| {
            log::warn!(
                "no rendered audio for \"{}\" at {}: {e}",
                item.phoneme,
                item.output_file.display()
            );
            Vec::new()
        });

        let ms_to_samples = SAMPLE_RATE as f64 / 1000.0;
        let pos = ((item.position_ms - item.leading_ms - phrase.curve_start_ms()) * ms_to_samples)
            .round() as i64;
        let skip = (item.skip_over * ms_to_samples).round() as i64;

        let mut seg = Segment {
            samples,
            pos,
            skip,
            correction: 0,
            head_f0: 0.0,
            head_phase: None,
            tail_phase: None,
        };
        if !self.phase_compensated || seg.samples.is_empty() {
            return seg;
        }

        let env = item.envelope_in_samples();
        // Junction windows sit at the crossfade midpoints: between envelope
        // points 0-1 on the head side, 3-4 on the tail side.
        let head = window_range(
            (env[0].x + env[1].x) as f64 / 2.0,
            config.phase_window_len,
            seg.samples.len(),
        );
        let tail = window_range(
            (env[3].x + env[4].x) as f64 / 2.0,
            config.phase_window_len,
            seg.samples.len(),
        );

        // Phases are measured against the shared phrase axis so values from
        // different segments are directly comparable. Only the head F0 is
        // kept on the segment; the correction recurrence converts angles to
        // samples at the junction's head side.
        seg.head_f0 = phrase.f0_at_sample((pos - skip) as f64 + center(&head));
        let tail_f0 = phrase.f0_at_sample((pos - skip) as f64 + center(&tail));
        seg.head_phase = calc_phase(
            &seg.samples[head.clone()],
            pos - skip + head.start as i64,
            seg.head_f0,
            config,
        );
        seg.tail_phase = calc_phase(
            &seg.samples[tail.clone()],
            pos - skip + tail.start as i64,
            tail_f0,
            config,
        );
        seg
    }
}

pub(crate) struct Segment {
    pub samples: Vec<f32>,
    /// Phrase-buffer index of the granted lead-in point (file sample `skip`).
    pub pos: i64,
    pub skip: i64,
    pub correction: i64,
    pub head_f0: f64,
    pub head_phase: Option<f64>,
    pub tail_phase: Option<f64>,
}

impl Segment {
    /// Phrase-buffer index of file sample 0, correction applied.
    fn place_base(&self) -> i64 {
        self.pos + self.correction - self.skip
    }
}

fn window_range(center_sample: f64, window_len: usize, samples_len: usize) -> std::ops::Range<usize> {
    let start = (center_sample - window_len as f64 / 2.0).max(0.0) as usize;
    let start = start.min(samples_len);
    start..(start + window_len).min(samples_len)
}

fn center(range: &std::ops::Range<usize>) -> f64 {
    (range.start + range.end) as f64 / 2.0
}

/// Phase of the fundamental near the window center, or `None` when the
/// window does not look like a stable periodic waveform at `f0`. `offset`
/// is the phrase-axis position of the window start.
fn calc_phase(window: &[f32], offset: i64, f0: f64, config: &RenderConfig) -> Option<f64> {
    if window.len() < 4 || f0 <= 0.0 {
        return None;
    }
    let filtered = PeakFilter::new(f0, SAMPLE_RATE as f64, config.phase_filter_q).zero_phase(window);
    let max = filtered.iter().copied().fold(0.0f32, f32::max);
    if max > config.phase_amplitude_cutoff {
        // The narrowband filter ringing up means the window is not a
        // steady tone; a phase read off it would be noise.
        return None;
    }

    // Nearest local maxima on either side of the window center; the
    // distance between them measures one period.
    let mut left = 0usize;
    for i in (1..filtered.len() / 2).rev() {
        if filtered[i] >= filtered[i - 1] && filtered[i] >= filtered[i + 1] {
            left = i;
            break;
        }
    }
    let mut right = 0usize;
    for i in filtered.len() / 2..filtered.len() - 1 {
        if filtered[i] >= filtered[i - 1] && filtered[i] >= filtered[i + 1] {
            right = i;
            break;
        }
    }
    if left >= right {
        return None;
    }
    let measured_f0 = SAMPLE_RATE as f64 / (right - left) as f64;
    if (f0 - measured_f0).abs() > f0 * config.phase_f0_tolerance {
        return None;
    }

    // Peak midpoint in periods along the phrase axis; the distance to the
    // nearest whole period is the phase.
    let t = (offset as f64 + (left + right) as f64 / 2.0) / SAMPLE_RATE as f64 * f0;
    Some(2.0 * PI * (t.round() - t))
}
