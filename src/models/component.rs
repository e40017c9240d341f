//! Component models as seen by the fitting engine.
//!
//! A component (one star or one disk) is made of sub-models of two kinds:
//!
//! - photometric: flux density in named filters
//! - spectral: flux density on a wavelength grid, used for luminosities and
//!   for the component spectra
//!
//! Each component has exactly one spectral sub-model; this is checked when the
//! component is built rather than discovered later.
//!
//! Parameters are the model parameters followed by a trailing `norm`, the
//! log10 of the flux scaling.

use std::collections::HashMap;

use crate::domain::{Spectrum, irradiance};
use crate::error::AppError;
use crate::math::interp;

/// Name of the trailing normalisation parameter every component carries.
pub const NORM_PARAMETER: &str = "norm";

/// Flux densities in named filters.
pub trait PhotometricModel: Send + Sync {
    fn filters(&self) -> &[String];
    /// Jy in each of `filters()`, for model parameters + `norm`.
    fn fnujy(&self, params: &[f64]) -> Vec<f64>;
}

/// Flux density on a fixed wavelength grid.
pub trait SpectralModel: Send + Sync {
    /// µm, ascending.
    fn wavelength(&self) -> &[f64];
    /// Jy at each of `wavelength()`, for model parameters + `norm`.
    fn fnujy(&self, params: &[f64]) -> Vec<f64>;
}

pub enum SubModel {
    Photometric(Box<dyn PhotometricModel>),
    Spectral(Box<dyn SpectralModel>),
}

/// Source of component models and the filter set they cover.
pub trait ModelLibrary: Send + Sync {
    fn component(&self, name: &str) -> Result<ComponentModel, AppError>;
    /// Every filter the library can evaluate, in a stable order.
    fn filters(&self) -> Vec<String>;
    /// Effective wavelength of a filter, µm.
    fn filter_wavelength(&self, filter: &str) -> Option<f64>;
}

pub struct ComponentModel {
    name: String,
    parameters: Vec<String>,
    parts: Vec<SubModel>,
    spectral: usize,
    filter_index: HashMap<String, (usize, usize)>,
}

impl std::fmt::Debug for ComponentModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentModel")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("parts", &self.parts.len())
            .finish()
    }
}

impl ComponentModel {
    /// `model_parameters` excludes `norm`, which is appended here.
    pub fn new(
        name: impl Into<String>,
        model_parameters: Vec<String>,
        parts: Vec<SubModel>,
    ) -> Result<Self, AppError> {
        let name = name.into();
        let spectral: Vec<usize> = parts
            .iter()
            .enumerate()
            .filter(|(_, p)| matches!(p, SubModel::Spectral(_)))
            .map(|(i, _)| i)
            .collect();
        if spectral.len() != 1 {
            return Err(AppError::config(format!(
                "Component '{name}' must have exactly one spectral sub-model, found {}.",
                spectral.len()
            )));
        }

        let mut filter_index = HashMap::new();
        for (i, part) in parts.iter().enumerate() {
            if let SubModel::Photometric(m) = part {
                for (j, f) in m.filters().iter().enumerate() {
                    filter_index.entry(f.clone()).or_insert((i, j));
                }
            }
        }

        let mut parameters = model_parameters;
        parameters.push(NORM_PARAMETER.to_string());

        Ok(Self {
            name,
            parameters,
            parts,
            spectral: spectral[0],
            filter_index,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter names including the trailing `norm`.
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub fn nparam(&self) -> usize {
        self.parameters.len()
    }

    pub fn spectral(&self) -> &dyn SpectralModel {
        match &self.parts[self.spectral] {
            SubModel::Spectral(m) => m.as_ref(),
            SubModel::Photometric(_) => unreachable!("spectral index checked in ComponentModel::new"),
        }
    }

    pub fn has_filter(&self, filter: &str) -> bool {
        self.filter_index.contains_key(filter)
    }

    /// Resolve filter names to (sub-model, column) slots once, so repeated
    /// evaluation does no lookups.
    pub fn filter_slots(&self, filters: &[String]) -> Result<Vec<(usize, usize)>, AppError> {
        filters
            .iter()
            .map(|f| {
                self.filter_index.get(f).copied().ok_or_else(|| {
                    AppError::config(format!("Model '{}' has no filter '{f}'.", self.name))
                })
            })
            .collect()
    }

    /// Flux in the resolved filter slots.
    pub fn fluxes(&self, slots: &[(usize, usize)], params: &[f64]) -> Vec<f64> {
        let mut cache: Vec<Option<Vec<f64>>> = (0..self.parts.len()).map(|_| None).collect();
        slots
            .iter()
            .map(|&(part, col)| {
                let values = cache[part].get_or_insert_with(|| match &self.parts[part] {
                    SubModel::Photometric(m) => m.fnujy(params),
                    SubModel::Spectral(m) => m.fnujy(params),
                });
                values[col]
            })
            .collect()
    }

    /// Spectral sub-model resampled to `wavelength` (µm).
    pub fn spectrum_at(&self, wavelength: &[f64], params: &[f64]) -> Vec<f64> {
        let m = self.spectral();
        let native = m.fnujy(params);
        wavelength
            .iter()
            .map(|&w| interp(m.wavelength(), &native, w))
            .collect()
    }

    pub fn spectrum(&self, wavelength: &[f64], params: &[f64]) -> Spectrum {
        Spectrum::new(wavelength.to_vec(), self.spectrum_at(wavelength, params))
    }

    /// Integrated flux of the spectral sub-model on its native grid, W m⁻².
    pub fn irradiance(&self, params: &[f64]) -> f64 {
        let m = self.spectral();
        irradiance(m.wavelength(), &m.fnujy(params))
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn requires_exactly_one_spectral_part() {
        let none = ComponentModel::new("x", vec![], vec![]);
        assert!(none.is_err());

        let two = ComponentModel::new(
            "x",
            vec![],
            vec![
                SubModel::Spectral(Box::new(Flat {
                    filters: vec![],
                    wavelength: vec![1.0],
                })),
                SubModel::Spectral(Box::new(Flat {
                    filters: vec![],
                    wavelength: vec![1.0],
                })),
            ],
        );
        assert!(two.is_err());
    }

    #[test]
    fn norm_is_appended_and_scales_flux() {
        let c = flat_component("bb", "Teff", &["B", "V"]);
        assert_eq!(c.parameters(), &["Teff".to_string(), "norm".to_string()]);

        let slots = c.filter_slots(&["V".to_string(), "B".to_string()]).unwrap();
        let f = c.fluxes(&slots, &[2.0, 1.0]);
        assert_eq!(f, vec![20.0, 20.0]);
    }

    #[test]
    fn unknown_filter_is_rejected() {
        let c = flat_component("bb", "Teff", &["B"]);
        assert!(c.filter_slots(&["K".to_string()]).is_err());
    }

    #[test]
    fn irradiance_uses_spectral_part() {
        let c = flat_component("bb", "Teff", &["B"]);
        let irr = c.irradiance(&[1.0, 0.0]);
        assert!((irr - irradiance(&[1.0, 10.0, 100.0], &[1.0, 1.0, 1.0])).abs() < 1e-30);
    }
}
