//! Concatenation backends.
//!
//! A wavtool takes the per-phone rendered files of one phrase and joins
//! them into a single buffer. Two in-process engines cover the common
//! case; external classic wavtools are driven through a generated script.

pub mod filter;
pub mod overlap_add;
pub mod post;
pub mod script;

use crate::context::RenderContext;
use crate::item::RenderItem;
use crate::phrase::Phrase;
use crate::CancellationToken;

pub use overlap_add::OverlapAdd;
pub use script::ScriptWavtool;

/// Name of the plain overlap-add engine.
pub const WAVTOOL_SIMPLE: &str = "simple";
/// Name of the phase-compensated overlap-add engine.
pub const WAVTOOL_CONVERGENCE: &str = "convergence";

pub trait Wavtool {
    fn name(&self) -> &str;
    /// Join the items into one phrase buffer. `None` when cancelled;
    /// failures degrade to silence, not errors.
    fn concatenate(
        &self,
        phrase: &Phrase,
        items: &[RenderItem],
        ctx: &RenderContext,
        cancellation: &CancellationToken,
    ) -> Option<Vec<f32>>;
    fn check_permissions(&self);
}

pub enum WavtoolBackend {
    OverlapAdd(OverlapAdd),
    Script(ScriptWavtool),
}

impl Wavtool for WavtoolBackend {
    fn name(&self) -> &str {
        match self {
            Self::OverlapAdd(tool) => tool.name(),
            Self::Script(tool) => tool.name(),
        }
    }

    fn concatenate(
        &self,
        phrase: &Phrase,
        items: &[RenderItem],
        ctx: &RenderContext,
        cancellation: &CancellationToken,
    ) -> Option<Vec<f32>> {
        if cancellation.is_cancelled() {
            return None;
        }
        let samples = match self {
            Self::OverlapAdd(tool) => tool.concatenate(phrase, items, &ctx.config),
            Self::Script(tool) => tool.concatenate(items, &ctx.cache, &|name| {
                ctx.resampler_script_ref(name)
            }),
        };
        Some(samples)
    }

    fn check_permissions(&self) {
        match self {
            Self::OverlapAdd(_) => {}
            Self::Script(tool) => tool.check_permissions(),
        }
    }
}
