//! Transient computation state for one (target, model family) fit.
//!
//! A `ComputationContext` binds the observations to the component models:
//! filter slots are resolved once, parameter offsets are laid out, and the
//! observations are flattened. It lives only while a result is being computed
//! and is dropped before the result is cached.

use std::ops::Range;

use crate::domain::{ConcatObs, ModelComponents, Observations};
use crate::error::AppError;
use crate::models::{ComponentModel, ModelLibrary};

/// Name given to the normalisation parameter of spectrum `i`.
pub fn spec_norm_name(i: usize) -> String {
    format!("spec_norm_{i}")
}

#[derive(Debug)]
pub struct ComputationContext {
    pub observations: Observations,
    pub obs: ConcatObs,
    pub models: Vec<ComponentModel>,
    /// Every free parameter: component parameters in order, then one
    /// normalisation per observed spectrum.
    pub parameters: Vec<String>,
    offsets: Vec<usize>,
    phot_slots: Vec<Vec<(usize, usize)>>,
    n_phot: usize,
}

impl ComputationContext {
    pub fn new(
        observations: Observations,
        components: &ModelComponents,
        library: &dyn ModelLibrary,
    ) -> Result<Self, AppError> {
        let models = components
            .names()
            .iter()
            .map(|name| library.component(name))
            .collect::<Result<Vec<_>, _>>()?;

        let obs = observations.concat(|f| library.filter_wavelength(f).unwrap_or(f64::NAN));
        let phot_filters = observations.photometry.filters();

        let phot_slots = models
            .iter()
            .map(|m| m.filter_slots(&phot_filters))
            .collect::<Result<Vec<_>, _>>()?;

        let mut offsets = Vec::with_capacity(models.len());
        let mut parameters = Vec::new();
        for m in &models {
            offsets.push(parameters.len());
            parameters.extend(m.parameters().iter().cloned());
        }
        parameters.extend((0..observations.spectra.len()).map(spec_norm_name));

        Ok(Self {
            n_phot: phot_filters.len(),
            observations,
            obs,
            models,
            parameters,
            offsets,
            phot_slots,
        })
    }

    pub fn ndim(&self) -> usize {
        self.parameters.len()
    }

    pub fn npoints(&self) -> usize {
        self.obs.fnujy.len()
    }

    /// Parameter index range of component `i` (including its `norm`).
    pub fn comp_range(&self, i: usize) -> Range<usize> {
        let start = self.offsets[i];
        start..start + self.models[i].nparam()
    }

    /// Index of the first spectrum normalisation parameter.
    fn spec_offset(&self) -> usize {
        self.offsets
            .last()
            .zip(self.models.last())
            .map(|(o, m)| o + m.nparam())
            .unwrap_or(0)
    }

    /// Per-point multiplicative normalisation applied to the observations:
    /// 1 for photometry, the spectrum's normalisation otherwise.
    pub fn obs_scale(&self, params: &[f64]) -> Vec<f64> {
        let base = self.spec_offset();
        self.obs
            .ispec
            .iter()
            .map(|s| match s {
                Some(i) => params.get(base + i).copied().unwrap_or(1.0),
                None => 1.0,
            })
            .collect()
    }

    /// Model flux at every observed point: (total, per component).
    pub fn model_fluxes(&self, params: &[f64]) -> (Vec<f64>, Vec<Vec<f64>>) {
        let npts = self.npoints();
        let mut total = vec![0.0; npts];
        let mut comps = Vec::with_capacity(self.models.len());

        for (i, m) in self.models.iter().enumerate() {
            let p = &params[self.comp_range(i)];
            let mut f = m.fluxes(&self.phot_slots[i], p);
            f.reserve(npts - self.n_phot);
            for s in &self.observations.spectra {
                f.extend(m.spectrum_at(&s.wavelength, p));
            }
            for (t, v) in total.iter_mut().zip(&f) {
                *t += v;
            }
            comps.push(f);
        }
        (total, comps)
    }

    /// Normalised residuals `(obs·scale - model) / (err·scale)`.
    ///
    /// Ignored points and points without a usable error contribute zero. An
    /// upper limit only counts when the model exceeds it.
    pub fn residuals_for(&self, params: &[f64], model: &[f64]) -> Vec<f64> {
        let scale = self.obs_scale(params);
        (0..self.npoints())
            .map(|k| {
                let err = self.obs.e_fnujy[k] * scale[k];
                if self.obs.ignore[k] || !(err.is_finite() && err > 0.0) {
                    return 0.0;
                }
                let obs = self.obs.fnujy[k] * scale[k];
                if self.obs.upper_limit[k] && model[k] <= obs {
                    return 0.0;
                }
                (obs - model[k]) / err
            })
            .collect()
    }

    pub fn residuals(&self, params: &[f64]) -> Vec<f64> {
        let (model, _) = self.model_fluxes(params);
        self.residuals_for(params, &model)
    }

    /// Gaussian log-likelihood, `-χ²/2`.
    pub fn log_likelihood(&self, params: &[f64]) -> f64 {
        -0.5 * self.residuals(params).iter().map(|r| r * r).sum::<f64>()
    }
}
