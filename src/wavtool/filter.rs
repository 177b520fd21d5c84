//! Narrowband zero-phase filtering for phase estimation.
//!
//! The phase estimator needs the waveform near one harmonic with no group
//! delay, so peaks keep their positions. A biquad peaking band-pass is run
//! forward and backward over the analysis window; the double pass squares
//! the magnitude response (narrowing the band) and cancels the phase shift.

/// Constant-peak-gain band-pass biquad (RBJ cookbook form).
#[derive(Debug, Clone, Copy)]
pub struct PeakFilter {
    b0: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl PeakFilter {
    /// Center the pass band at `freq` Hz for sample rate `fs`. Higher `q`
    /// narrows the band around the target harmonic.
    pub fn new(freq: f64, fs: f64, q: f64) -> Self {
        let w0 = 2.0 * std::f64::consts::PI * freq / fs;
        let alpha = w0.sin() / (2.0 * q);
        let a0 = 1.0 + alpha;
        Self {
            b0: alpha / a0,
            b2: -alpha / a0,
            a1: -2.0 * w0.cos() / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    fn run(&self, input: &[f32], output: &mut Vec<f32>) {
        output.clear();
        let (mut x1, mut x2, mut y1, mut y2) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
        for &x in input {
            let x = x as f64;
            let y = self.b0 * x + self.b2 * x2 - self.a1 * y1 - self.a2 * y2;
            x2 = x1;
            x1 = x;
            y2 = y1;
            y1 = y;
            output.push(y as f32);
        }
    }

    /// Forward-backward application: zero phase shift, squared magnitude.
    pub fn zero_phase(&self, input: &[f32]) -> Vec<f32> {
        let mut forward = Vec::with_capacity(input.len());
        self.run(input, &mut forward);
        forward.reverse();
        let mut backward = Vec::with_capacity(input.len());
        self.run(&forward, &mut backward);
        backward.reverse();
        backward
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FS: f64 = 44100.0;

    fn sine(freq: f64, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / FS).sin() as f32)
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn passes_band_and_rejects_out_of_band() {
        let filter = PeakFilter::new(220.0, FS, 5.0);
        let n = 8820;
        let in_band = filter.zero_phase(&sine(220.0, n));
        let out_of_band = filter.zero_phase(&sine(2200.0, n));
        // Ignore the edges where the backward pass settles.
        let mid = n / 4..3 * n / 4;
        assert!(rms(&in_band[mid.clone()]) > 10.0 * rms(&out_of_band[mid]));
    }

    #[test]
    fn zero_phase_keeps_peak_positions() {
        let freq = 220.0;
        let n = 4410;
        let input = sine(freq, n);
        let filtered = PeakFilter::new(freq, FS, 5.0).zero_phase(&input);

        // Find a peak of the input near the middle and check the filtered
        // signal peaks within one sample of it.
        let period = (FS / freq) as usize;
        let center = n / 2;
        let window = center..center + period;
        let input_peak = peak_index(&input, window.clone());
        let filtered_peak = peak_index(&filtered, window);
        assert!((input_peak as i64 - filtered_peak as i64).abs() <= 1);
    }

    fn peak_index(samples: &[f32], range: std::ops::Range<usize>) -> usize {
        range
            .clone()
            .max_by(|&a, &b| samples[a].partial_cmp(&samples[b]).unwrap())
            .unwrap()
    }
}
