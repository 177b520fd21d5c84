//! Musical unit conversions shared across the pipeline.
//!
//! Tones are MIDI note numbers (C4 = 60). Pitch curves are stored in cents
//! (tone × 100 plus bend). Time is either milliseconds or ticks at a fixed
//! resolution of 480 ticks per quarter note.

/// Ticks per quarter note.
pub const TICK_RESOLUTION: i32 = 480;

/// Sampling interval of phrase-level expression curves, in ticks.
pub const CURVE_INTERVAL_TICKS: i32 = 5;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Format a tone as the name external resamplers expect, e.g. `C4`, `A#3`.
pub fn tone_name(tone: i32) -> String {
    if tone < 0 {
        return String::new();
    }
    format!("{}{}", NOTE_NAMES[(tone % 12) as usize], tone / 12 - 1)
}

/// Frequency in Hz of a (possibly fractional) tone. A4 (69) = 440 Hz.
pub fn tone_to_freq(tone: f64) -> f64 {
    440.0 * ((tone - 69.0) / 12.0).exp2()
}

/// Milliseconds spanned by `ticks` at the given tempo.
pub fn tick_to_ms(tempo: f64, ticks: f64) -> f64 {
    ticks * 60_000.0 / (tempo * TICK_RESOLUTION as f64)
}

/// Ticks spanned by `ms` at the given tempo.
pub fn ms_to_tick(tempo: f64, ms: f64) -> f64 {
    ms * tempo * TICK_RESOLUTION as f64 / 60_000.0
}
