use std::f64::consts::PI;
use std::path::PathBuf;
use std::time::Instant;

use phrasesynth::phrase::{Envelope, Oto};
use phrasesynth::wav::{self, SAMPLE_RATE};
use phrasesynth::{CancellationToken, Phone, Phrase, PhraseRenderer, RenderConfig, RenderContext};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let work_dir = PathBuf::from("demo-cache");
    std::fs::create_dir_all(&work_dir)?;

    // Generate a small stand-in voice sample: a 261.6 Hz (C4) tone with a
    // soft attack, playing the role of an "a" recording from a voicebank.
    let source = work_dir.join("a.wav");
    let samples: Vec<f32> = (0..SAMPLE_RATE * 2)
        .map(|i| {
            let t = i as f64 / SAMPLE_RATE as f64;
            let attack = (t * 20.0).min(1.0);
            ((2.0 * PI * 261.6 * t).sin() * 0.4 * attack) as f32
        })
        .collect();
    wav::write_mono(&source, &samples)?;

    let config = RenderConfig::builder()
        .cache_dir(work_dir.clone())
        .build()?;
    let ctx = RenderContext::new(config)?;

    // Three notes, C4 E4 G4, with a pitch curve sliding into each tone.
    let tones = [60, 64, 67];
    let phones: Vec<Phone> = tones
        .iter()
        .enumerate()
        .map(|(i, &tone)| Phone {
            phoneme: "a".into(),
            position_ms: 500.0 * i as f64,
            end_ms: 500.0 * (i + 1) as f64,
            leading_ms: if i == 0 { 0.0 } else { 20.0 },
            preutter_ms: 20.0,
            overlap_ms: 10.0,
            tone,
            velocity: 100,
            volume: 100,
            modulation: 0,
            flags: vec![],
            resampler: "native".into(),
            tempo: 120.0,
            oto: Oto {
                file: source.clone(),
                set: "demo".into(),
                offset: 0.0,
                consonant: 50.0,
                cutoff: -1900.0,
                preutter: 20.0,
                overlap: 10.0,
            },
            envelope: Envelope::default(),
        })
        .collect();

    let pitches = pitch_curve(&phones, 120.0);
    let phrase = Phrase {
        singer_id: "demo".into(),
        tempo: 120.0,
        position_ms: 0.0,
        leading_ms: 0.0,
        phones,
        pitches,
        dynamics: None,
        gender: None,
        tension: None,
        breathiness: None,
        voicing: None,
    };

    let render_start = Instant::now();
    let result = PhraseRenderer::new(&ctx)
        .render(&phrase, &CancellationToken::new())?
        .expect("not cancelled");
    let render_dur = render_start.elapsed();

    let audio_duration = result.samples.len() as f64 / SAMPLE_RATE as f64;
    println!(
        "Rendered {:.2}s of audio in {:.2?} ({:.1}x real-time)",
        audio_duration,
        render_dur,
        audio_duration / render_dur.as_secs_f64()
    );

    let output = PathBuf::from("phrase.wav");
    result.write_wav(&output)?;
    println!("Wrote {}", output.display());
    Ok(())
}

/// Sample the melody onto the 5-tick curve grid, with a short portamento
/// into each note.
fn pitch_curve(phones: &[Phone], tempo: f64) -> Vec<f32> {
    let end_ms = phones.last().map_or(0.0, |p| p.end_ms) + 500.0;
    let interval_ms = phrasesynth::music::tick_to_ms(tempo, 5.0);
    let count = (end_ms / interval_ms).ceil() as usize;
    (0..count)
        .map(|i| {
            let ms = i as f64 * interval_ms;
            let idx = phones
                .iter()
                .rposition(|p| ms >= p.position_ms)
                .unwrap_or(0);
            let cur = phones[idx].tone as f64 * 100.0;
            let prev = if idx > 0 {
                phones[idx - 1].tone as f64 * 100.0
            } else {
                cur
            };
            // 50 ms linear glide at each note start.
            let alpha = ((ms - phones[idx].position_ms) / 50.0).clamp(0.0, 1.0);
            (prev + (cur - prev) * alpha) as f32
        })
        .collect()
}
