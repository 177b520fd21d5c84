//! Mono f32 WAV decode/encode for cache files.
//!
//! External resamplers write 16-bit or float WAVs in whatever channel
//! layout they like; everything downstream of the backend boundary works on
//! mono f32 at [`SAMPLE_RATE`], so decoding normalizes both.

use std::path::Path;

/// Sample rate of the whole pipeline. Classic UTAU tooling is fixed at
/// 44.1 kHz and the cache file naming gives no room to vary it per file.
pub const SAMPLE_RATE: u32 = 44100;

/// Decode a WAV file to mono f32, averaging channels.
pub fn read_mono(path: &Path) -> Result<Vec<f32>, hound::Error> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()?
        }
    };

    if channels == 1 {
        return Ok(interleaved);
    }
    Ok(interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect())
}

/// Write mono f32 samples as a 32-bit float WAV.
pub fn write_mono(path: &Path, samples: &[f32]) -> Result<(), hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_mono_float() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.wav");
        let samples: Vec<f32> = (0..64).map(|i| (i as f32 / 64.0).sin()).collect();
        write_mono(&path, &samples).unwrap();
        let decoded = read_mono(&path).unwrap();
        assert_eq!(decoded.len(), samples.len());
        for (a, b) in decoded.iter().zip(&samples) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn downmixes_stereo_int16() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..32 {
            writer.write_sample(8192i16).unwrap();
            writer.write_sample(-8192i16).unwrap();
        }
        writer.finalize().unwrap();

        let decoded = read_mono(&path).unwrap();
        assert_eq!(decoded.len(), 32);
        assert!(decoded.iter().all(|s| s.abs() < 1e-4));
    }
}
