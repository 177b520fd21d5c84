//! Phrase rendering orchestration.
//!
//! One [`PhraseRenderer::render`] call takes a phrase snapshot through the
//! whole pipeline: validation, per-phone job construction, bounded-parallel
//! resampling into the cache, concatenation, post-processing. Cancellation
//! is cooperative; workers check the token between jobs, so an in-flight
//! external process finishes but nothing new starts.

use rayon::prelude::*;

use crate::context::RenderContext;
use crate::error::RenderError;
use crate::item::RenderItem;
use crate::phrase::Phrase;
use crate::resampler::Resampler;
use crate::wav;
use crate::wavtool::{post, Wavtool};
use crate::CancellationToken;

/// A rendered phrase and where it sits on the project timeline.
#[derive(Debug, Clone)]
pub struct RenderResult {
    pub samples: Vec<f32>,
    /// Nominal phrase start, ms. The buffer begins `leading_ms` earlier.
    pub position_ms: f64,
    pub leading_ms: f64,
}

impl RenderResult {
    pub fn write_wav(&self, path: &std::path::Path) -> Result<(), hound::Error> {
        wav::write_mono(path, &self.samples)
    }
}

pub struct PhraseRenderer<'a> {
    ctx: &'a RenderContext,
}

impl<'a> PhraseRenderer<'a> {
    pub fn new(ctx: &'a RenderContext) -> Self {
        Self { ctx }
    }

    /// Render one phrase. `Ok(None)` means the job was cancelled.
    pub fn render(
        &self,
        phrase: &Phrase,
        cancellation: &CancellationToken,
    ) -> Result<Option<RenderResult>, RenderError> {
        phrase.validate()?;

        let items: Vec<RenderItem> = phrase
            .phones
            .iter()
            .map(|phone| {
                let backend = self.ctx.resampler_for(&phone.resampler)?;
                Ok(RenderItem::new(
                    phrase,
                    phone,
                    |abbr| backend.supports_flag(abbr),
                    &self.ctx.cache,
                ))
            })
            .collect::<Result<_, RenderError>>()?;

        self.render_items(&items, cancellation);
        if cancellation.is_cancelled() {
            log::info!("phrase render cancelled");
            return Ok(None);
        }

        let Some(mut samples) =
            self.ctx
                .wavtool()
                .concatenate(phrase, &items, self.ctx, cancellation)
        else {
            return Ok(None);
        };

        post::apply_dynamics(phrase, &mut samples);
        if self.ctx.config.remove_dc_offset {
            post::remove_dc_offset(&mut samples);
        }
        post::apply_fades(
            &mut samples,
            self.ctx.config.phrase_fade_ms,
            self.ctx.config.fade_curve,
        );

        Ok(Some(RenderResult {
            samples,
            position_ms: phrase.position_ms,
            leading_ms: phrase.leading_ms,
        }))
    }

    fn render_items(&self, items: &[RenderItem], cancellation: &CancellationToken) {
        let worker = |item: &RenderItem| self.render_one(item, cancellation);
        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.ctx.config.worker_threads)
            .build()
        {
            Ok(pool) => pool.install(|| items.par_iter().for_each(worker)),
            Err(e) => {
                log::warn!("worker pool unavailable ({e}), rendering serially");
                items.iter().for_each(worker);
            }
        }
    }

    /// Render one item into the cache, de-duplicated against concurrent
    /// renders of the same content by the per-output lock.
    fn render_one(&self, item: &RenderItem, cancellation: &CancellationToken) {
        if cancellation.is_cancelled() {
            return;
        }
        let backend = match self.ctx.resampler_for(&item.resampler) {
            Ok(backend) => backend,
            Err(e) => {
                log::error!("{e}");
                return;
            }
        };

        let key = item.output_file.file_name().unwrap_or_default().to_string_lossy().into_owned();
        let lock = self.ctx.cache.lock(&key);
        let _guard = lock.lock().unwrap();
        if item.output_file.exists() {
            log::debug!("cache hit for \"{}\" ({key})", item.phoneme);
            return;
        }

        if let Err(e) = self.ctx.cache.copy_source_temp(&item.input_file, &item.input_temp) {
            log::warn!(
                "cannot stage source {} into cache: {e}",
                item.input_file.display()
            );
        }
        backend.render_to_file(item);
        // Analysis sidecars the tool dropped next to the temp copy go back
        // to the voicebank so later renders skip the analysis.
        if let Err(e) = self.ctx.cache.copy_back_meta(&item.input_file, &item.input_temp) {
            log::warn!(
                "cannot copy analysis files back to {}: {e}",
                item.input_file.parent().unwrap_or(std::path::Path::new("")).display()
            );
        }
    }
}
