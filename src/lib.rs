//! # phrasesynth
//!
//! A Rust library for rendering concatenative singing-voice phrases in the
//! classic UTAU style: per-phone resampling, cached and de-duplicated by
//! content hash, joined by a phase-aware wavtool.
//!
//! ## Features
//!
//! - **Pluggable resamplers**: a built-in native engine plus external
//!   classic resampler executables discovered from a tools directory
//! - **Phase-compensated concatenation**: junctions are aligned to the
//!   local pitch period so crossfades do not comb-filter
//! - **Content-addressed cache**: unchanged phones are never re-rendered,
//!   across phrases and across sessions
//! - **Bounded parallelism and cooperative cancellation**
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! phrasesynth = "0.3"
//! ```
//!
//! ```ignore
//! use std::path::Path;
//! use phrasesynth::{CancellationToken, PhraseRenderer, RenderConfig, RenderContext};
//!
//! let config = RenderConfig::builder()
//!     .cache_dir("cache")
//!     .tools_dir(Path::new("tools").to_path_buf())
//!     .build()?;
//! let ctx = RenderContext::new(config)?;
//!
//! let result = PhraseRenderer::new(&ctx)
//!     .render(&phrase, &CancellationToken::new())?
//!     .expect("not cancelled");
//! result.write_wav(Path::new("phrase.wav"))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cache;
pub mod context;
pub mod engine;
pub mod error;
pub mod item;
pub mod music;
pub mod phrase;
pub mod process;
pub mod protocol;
pub mod resampler;
pub mod wav;
pub mod wavtool;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use context::{RenderConfig, RenderContext};
pub use engine::{PhraseRenderer, RenderResult};
pub use error::RenderError;
pub use phrase::{Envelope, Flag, Oto, Phone, Phrase};
pub use wavtool::post::FadeCurve;

/// Cooperative cancellation handle shared between the caller and render
/// workers. Cancellation is a latch; a token is never reset.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_shared_across_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
