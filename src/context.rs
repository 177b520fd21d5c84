//! Explicit render context.
//!
//! Everything the pipeline needs access to (the discovered backend
//! registries, the cache with its lock table, the tunable constants)
//! lives in one [`RenderContext`] value that is passed through
//! every stage. Construction is the configuration point: backends are
//! discovered once, and the chosen wavtool/resampler names are resolved
//! against the registries at render time.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use derive_builder::Builder;

use crate::cache::RenderCache;
use crate::error::RenderError;
use crate::resampler::{self, ResamplerBackend, NATIVE_NAME};
use crate::wavtool::post::FadeCurve;
use crate::wavtool::{OverlapAdd, ScriptWavtool, WavtoolBackend, WAVTOOL_CONVERGENCE, WAVTOOL_SIMPLE};

/// Tunable pipeline settings.
///
/// The phase-correction thresholds are empirically chosen values with no
/// derivation behind them; they are configuration precisely so downstream
/// users can tune them per voicebank instead of trusting the defaults.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct RenderConfig {
    /// Directory for rendered-phone wavs, source temp copies and scripts.
    pub cache_dir: PathBuf,
    /// Root to scan for external resampler executables.
    #[builder(default)]
    pub tools_dir: Option<PathBuf>,
    /// Root to scan for external wavtool executables.
    #[builder(default)]
    pub wavtools_dir: Option<PathBuf>,
    /// Name of the concatenation engine to use.
    #[builder(default = "WAVTOOL_CONVERGENCE.to_string()")]
    pub wavtool: String,
    /// Fallback when a phone names an unknown resampler.
    #[builder(default = "NATIVE_NAME.to_string()")]
    pub default_resampler: String,
    /// Worker cap for per-phone resampler jobs. External resamplers are
    /// short-lived processes; two workers balance their spawn overhead
    /// against host concurrency.
    #[builder(default = "2")]
    pub worker_threads: usize,

    /// Analysis window length for boundary phase estimation, samples.
    #[builder(default = "880")]
    pub phase_window_len: usize,
    /// Q of the narrowband peak filter centered on the local F0.
    #[builder(default = "5.0")]
    pub phase_filter_q: f64,
    /// Peak amplitude above which the filtered window is considered
    /// unstable and the phase estimate is rejected.
    #[builder(default = "10.0")]
    pub phase_amplitude_cutoff: f32,
    /// Allowed relative deviation between measured and expected F0.
    #[builder(default = "0.25")]
    pub phase_f0_tolerance: f64,

    /// Age past which the cache sweep removes artifacts.
    #[builder(default = "Duration::from_secs(7 * 24 * 3600)")]
    pub cache_retention: Duration,

    #[builder(default = "false")]
    pub remove_dc_offset: bool,
    /// Edge fade length, ms; 0 disables the fade pass.
    #[builder(default = "0.0")]
    pub phrase_fade_ms: f64,
    #[builder(default)]
    pub fade_curve: FadeCurve,
}

impl RenderConfig {
    pub fn builder() -> RenderConfigBuilder {
        RenderConfigBuilder::default()
    }
}

pub struct RenderContext {
    pub config: RenderConfig,
    pub cache: RenderCache,
    resamplers: HashMap<String, ResamplerBackend>,
    wavtools: HashMap<String, WavtoolBackend>,
}

impl RenderContext {
    pub fn new(config: RenderConfig) -> Result<Self, RenderError> {
        let cache = RenderCache::new(&config.cache_dir)?;

        let resamplers = resampler::discover(config.tools_dir.as_deref());
        if !resamplers.contains_key(&config.default_resampler) {
            return Err(RenderError::NoResampler(config.default_resampler.clone()));
        }

        let mut wavtools = HashMap::new();
        wavtools.insert(
            WAVTOOL_SIMPLE.to_string(),
            WavtoolBackend::OverlapAdd(OverlapAdd::simple()),
        );
        wavtools.insert(
            WAVTOOL_CONVERGENCE.to_string(),
            WavtoolBackend::OverlapAdd(OverlapAdd::convergence()),
        );
        if let Some(dir) = &config.wavtools_dir {
            for tool in ScriptWavtool::discover(dir) {
                wavtools.insert(tool.name().to_string(), WavtoolBackend::Script(tool));
            }
        }

        Ok(Self {
            config,
            cache,
            resamplers,
            wavtools,
        })
    }

    /// Resolve a phone's resampler name, falling back to the configured
    /// default. Erring here is structural: with no usable backend the
    /// phrase cannot be rendered at all.
    pub fn resampler_for(&self, name: &str) -> Result<&ResamplerBackend, RenderError> {
        self.resamplers
            .get(name)
            .or_else(|| {
                if !name.is_empty() {
                    log::warn!(
                        "resampler \"{name}\" not found, falling back to \"{}\"",
                        self.config.default_resampler
                    );
                }
                self.resamplers.get(&self.config.default_resampler)
            })
            .ok_or_else(|| RenderError::NoResampler(name.to_string()))
    }

    /// The configured concatenation engine (simple overlap-add when the
    /// configured name is unknown).
    pub fn wavtool(&self) -> &WavtoolBackend {
        self.wavtools.get(&self.config.wavtool).unwrap_or_else(|| {
            log::warn!(
                "wavtool \"{}\" not found, using \"{WAVTOOL_SIMPLE}\"",
                self.config.wavtool
            );
            &self.wavtools[WAVTOOL_SIMPLE]
        })
    }

    /// Filesystem path of a named resampler, for embedding into wavtool
    /// scripts. The native backend has no path and keeps its name.
    pub fn resampler_script_ref(&self, name: &str) -> String {
        match self.resamplers.get(name) {
            Some(ResamplerBackend::Exe(exe)) => exe.path().to_string_lossy().into_owned(),
            _ => name.to_string(),
        }
    }

    pub fn resampler_names(&self) -> impl Iterator<Item = &str> {
        self.resamplers.keys().map(|s| s.as_str())
    }

    /// Remove cache artifacts older than the configured retention window.
    pub fn sweep_cache(&self) -> std::io::Result<usize> {
        self.cache.sweep(self.config.cache_retention)
    }
}
