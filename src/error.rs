use std::path::PathBuf;

/// Structural rendering failures.
///
/// Per-phone problems (a missing resampler executable, a subprocess that
/// exits nonzero or times out, a rejected phase estimate) are deliberately
/// *not* represented here: they degrade to silent segments or zero
/// correction and are only logged, so one bad voice sample cannot abort a
/// whole phrase. This enum covers the failures that make the phrase as a
/// whole unrenderable.
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("phoneme \"{phoneme}\": invalid oto timing: {reason}")]
    InvalidOto { phoneme: String, reason: String },
    #[error("phrase has no phones")]
    EmptyPhrase,
    #[error("no resampler registered under \"{0}\" and no fallback configured")]
    NoResampler(String),
    #[error("cache directory {0} is not writable")]
    CacheDirUnwritable(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
