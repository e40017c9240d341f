//! Fit one (target, model family) pair.
//!
//! `Fitter::get` is the single entry point: it serves a result from the
//! in-memory LRU or the on-disk artifact when those are still valid, and
//! otherwise reads the observations, runs (or reuses) the sampler, derives
//! every reported quantity and writes a fresh artifact.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use crate::domain::{
    CacheLocator, FitConfig, FitResult, ModelComponents, Observations,
};
use crate::error::AppError;
use crate::fit::cache::{self, CacheKey, CacheStatus, ResultCache};
use crate::fit::context::ComputationContext;
use crate::fit::derive::derive;
use crate::fit::inference::{InferenceEngine, draw_seed, infer};
use crate::io::diagnostics;
use crate::models::ModelLibrary;

/// What to recompute regardless of cache state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FitOptions {
    /// Rerun the sampler and everything downstream of it.
    pub update_fit: bool,
    /// Keep sampler output but redo the derivation and diagnostics.
    pub update_analysis: bool,
    /// Fit photometry only.
    pub no_spectra: bool,
}

impl FitOptions {
    fn force_result(&self) -> bool {
        self.update_fit || self.update_analysis
    }
}

/// Reads the observations for one target.
pub trait ObservationSource: Send + Sync {
    /// `Ok(None)` when the file holds no photometry at all.
    fn read(&self, rawphot: &Path, include_spectra: bool) -> Result<Option<Observations>, AppError>;
}

pub struct Fitter {
    config: FitConfig,
    library: Box<dyn ModelLibrary>,
    engine: Box<dyn InferenceEngine>,
    source: Box<dyn ObservationSource>,
    memo: Mutex<ResultCache>,
}

impl Fitter {
    pub fn new(
        config: FitConfig,
        library: Box<dyn ModelLibrary>,
        engine: Box<dyn InferenceEngine>,
        source: Box<dyn ObservationSource>,
    ) -> Self {
        let memo = Mutex::new(ResultCache::new(config.fitting.cache_capacity));
        Self {
            config,
            library,
            engine,
            source,
            memo,
        }
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    fn memo(&self) -> MutexGuard<'_, ResultCache> {
        self.memo.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Forget every in-memory result for one target.
    pub fn invalidate(&self, rawphot: &Path) {
        self.memo().invalidate_target(rawphot);
    }

    pub fn clear(&self) {
        self.memo().clear();
    }

    /// The result for `family` fitted to `rawphot`.
    ///
    /// Fails with `NoPhotometry` when the target has nothing to fit and with
    /// `Config` when the family names an unknown or ambiguous component. A
    /// fresh result that cannot be stored is a `Cache` error.
    pub fn get<S: AsRef<str>>(
        &self,
        rawphot: &Path,
        family: &[S],
        opts: &FitOptions,
    ) -> Result<FitResult, AppError> {
        let components = ModelComponents::classify(family, &self.config.models)?;
        let locator = CacheLocator::new(rawphot, &components, &self.config.fitting);
        let key: CacheKey = (rawphot.to_path_buf(), components.names().to_vec());
        let force = opts.force_result();
        let status = cache::check(&locator.artifact, rawphot, &locator.marker(), force);

        if status == CacheStatus::Valid {
            if let Some(hit) = self.memo().get(&key) {
                tracing::debug!(target_id = %locator.id, family = %components.joined(), "memo hit");
                return Ok(hit.clone());
            }
            match cache::load(&locator.artifact, rawphot, &self.config.fitting) {
                Ok(result) => {
                    tracing::debug!(target_id = %locator.id, family = %components.joined(), "cache hit");
                    self.memo().insert(key, result.clone());
                    return Ok(result);
                }
                Err(e) => {
                    tracing::warn!(target_id = %locator.id, error = %e, "ignoring unreadable cache");
                }
            }
        } else {
            self.memo().invalidate(&key);
        }

        let result = self.compute(rawphot, components, locator, opts)?;
        cache::store(&result)?;
        self.memo().insert(key, result.clone());
        Ok(result)
    }

    fn compute(
        &self,
        rawphot: &Path,
        components: ModelComponents,
        locator: CacheLocator,
        opts: &FitOptions,
    ) -> Result<FitResult, AppError> {
        let observations = match self.source.read(rawphot, !opts.no_spectra)? {
            Some(obs) if obs.has_photometry() => obs,
            _ => {
                return Err(AppError::no_photometry(format!(
                    "No photometry in '{}'.",
                    rawphot.display()
                )));
            }
        };

        tracing::info!(target_id = %locator.id, family = %components.joined(), "computing result");
        let ctx = ComputationContext::new(observations, &components, self.library.as_ref())?;
        let posterior = infer(
            self.engine.as_ref(),
            &ctx,
            &locator,
            rawphot,
            opts.update_fit,
            self.config.sampler.max_base_len,
        )?;

        let marginals = posterior.marginals()?;
        let seed = draw_seed(self.config.fitting.seed, &locator);
        let draw = posterior.draw(self.config.fitting.n_samples, seed);

        let corner = locator.corner();
        if cache::needs_refresh(&corner, &locator.marker(), opts.force_result()) {
            if let Err(e) = diagnostics::write_corner(&corner, &ctx.parameters, &draw) {
                tracing::warn!(target_id = %locator.id, error = %e, "failed to write corner table");
            }
        }

        let derived = derive(
            &ctx,
            &components,
            &marginals,
            &draw,
            self.library.as_ref(),
            &self.config.models,
            seed.wrapping_add(1),
        )?;

        let comp_parameters: Vec<Vec<String>> =
            ctx.models.iter().map(|m| m.parameters().to_vec()).collect();
        let comp_best_params = (0..ctx.models.len())
            .map(|i| marginals.median[ctx.comp_range(i)].to_vec())
            .collect();
        let comp_best_params_1sig = (0..ctx.models.len())
            .map(|i| marginals.sigma[ctx.comp_range(i)].to_vec())
            .collect();

        let result = FitResult {
            rawphot: rawphot.to_path_buf(),
            components,
            locator,
            evidence: posterior.evidence,
            ndim: ctx.ndim(),
            parameters: ctx.parameters.clone(),
            best_params: marginals.median,
            best_params_1sig: marginals.sigma,
            comp_parameters,
            comp_best_params,
            comp_best_params_1sig,
            obs_keywords: ctx.observations.keywords.clone(),
            filters: ctx.obs.filters.clone(),
            wavelengths: ctx.obs.wavelengths.clone(),
            obs_fnujy: derived.obs_fnujy,
            obs_e_fnujy: derived.obs_e_fnujy,
            obs_upperlim: ctx.obs.upper_limit.clone(),
            filters_ignore: ctx.obs.ignore.clone(),
            model_fnujy: derived.model_fnujy,
            model_comp_fnujy: derived.model_comp_fnujy,
            residuals: derived.residuals,
            chisq: derived.chisq,
            dof: derived.dof,
            all_filters: derived.all_filters,
            all_phot: derived.all_phot,
            star_phot: derived.star_phot,
            disk_phot: derived.disk_phot,
            comp_spectra: derived.comp_spectra,
            star_spec: derived.star_spec,
            disk_spec: derived.disk_spec,
            star: derived.star,
            disk_r: derived.disk_r,
            distributions: derived.distributions,
            completed_at: Utc::now(),
        };
        drop(ctx);

        let table = result.locator.distributions_table();
        if cache::needs_refresh(&table, &result.locator.marker(), opts.force_result()) {
            if let Err(e) = diagnostics::write_distributions(&table, &result) {
                tracing::warn!(target_id = %result.id(), error = %e, "failed to write distributions table");
            }
        }

        tracing::info!(
            target_id = %result.id(),
            family = %result.components.joined(),
            evidence = result.evidence,
            chisq = result.chisq,
            "result ready"
        );
        Ok(result)
    }
}
