//! Shared domain types.
//!
//! These are kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting
//! - written into the JSON cache artifacts
//! - handed to the report/export writers

use serde::{Deserialize, Serialize};

use crate::domain::config::ModelsConfig;
use crate::error::AppError;

/// Physical role of a model component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Star,
    Disk,
}

/// Ordered component names, each resolved to exactly one `ComponentKind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelComponents {
    names: Vec<String>,
    kinds: Vec<ComponentKind>,
}

impl ModelComponents {
    /// Classify each name against the configured star/disk lists.
    pub fn classify<S: AsRef<str>>(names: &[S], models: &ModelsConfig) -> Result<Self, AppError> {
        if names.is_empty() {
            return Err(AppError::config("A model family needs at least one component."));
        }

        let mut kinds = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let is_star = models.star.iter().any(|s| s == name);
            let is_disk = models.disk.iter().any(|d| d == name);
            let kind = match (is_star, is_disk) {
                (true, false) => ComponentKind::Star,
                (false, true) => ComponentKind::Disk,
                (true, true) => {
                    return Err(AppError::config(format!(
                        "Component '{name}' is listed as both star and disk."
                    )));
                }
                (false, false) => {
                    return Err(AppError::config(format!(
                        "Couldn't assign component '{name}' to star or disk given lists {:?} and {:?}.",
                        models.star, models.disk
                    )));
                }
            };
            kinds.push(kind);
        }

        Ok(Self {
            names: names.iter().map(|n| n.as_ref().to_string()).collect(),
            kinds,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn kinds(&self) -> &[ComponentKind] {
        &self.kinds
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// `a+b+c`, as used in sampler file names.
    pub fn joined(&self) -> String {
        self.names.join("+")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ComponentKind)> {
        self.names.iter().map(String::as_str).zip(self.kinds.iter().copied())
    }

    pub fn has_star(&self) -> bool {
        self.kinds.contains(&ComponentKind::Star)
    }
}

/// Point estimate with asymmetric 1σ uncertainties.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub value: f64,
    /// `value - p16`.
    pub lo: f64,
    /// `p84 - value`.
    pub hi: f64,
}

impl Estimate {
    /// Build from the (p16, p50, p84) triple.
    pub fn from_percentiles(low: f64, median: f64, high: f64) -> Self {
        Self {
            value: median,
            lo: median - low,
            hi: high - median,
        }
    }

    /// Symmetrised uncertainty.
    pub fn sigma(&self) -> f64 {
        (self.lo + self.hi) / 2.0
    }
}

/// Reported value of a fitted parameter.
///
/// `sigma` is the marginal 1σ of the fitted quantity. For `log_` parameters
/// both `value` and `sigma` are exponentiated, while `lo`/`hi` come from the
/// exponentiated sample distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamEstimate {
    pub name: String,
    pub value: f64,
    pub sigma: f64,
    pub lo: f64,
    pub hi: f64,
}

/// Per-filter estimates (one entry per filter or observed point).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FluxEstimate {
    pub value: Vec<f64>,
    pub lo: Vec<f64>,
    pub hi: Vec<f64>,
}

impl FluxEstimate {
    pub fn from_percentiles(low: &[f64], median: &[f64], high: &[f64]) -> Self {
        Self {
            value: median.to_vec(),
            lo: median.iter().zip(low).map(|(m, l)| m - l).collect(),
            hi: high.iter().zip(median).map(|(h, m)| h - m).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// A model spectrum on a wavelength grid (µm, Jy) with its integrated flux.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    pub wavelength: Vec<f64>,
    pub fnujy: Vec<f64>,
    /// Integrated flux, W m⁻².
    pub irradiance: f64,
}

impl Spectrum {
    pub fn new(wavelength: Vec<f64>, fnujy: Vec<f64>) -> Self {
        let irradiance = irradiance(&wavelength, &fnujy);
        Self {
            wavelength,
            fnujy,
            irradiance,
        }
    }
}

/// Integrate a flux density spectrum (µm, Jy) over frequency, in W m⁻².
pub fn irradiance(wavelength_um: &[f64], fnujy: &[f64]) -> f64 {
    const C_UM_PER_S: f64 = 2.997_924_58e14;
    const JY: f64 = 1e-26;

    let mut total = 0.0;
    for i in 1..wavelength_um.len().min(fnujy.len()) {
        let nu0 = C_UM_PER_S / wavelength_um[i - 1];
        let nu1 = C_UM_PER_S / wavelength_um[i];
        total += 0.5 * (fnujy[i - 1] + fnujy[i]) * (nu0 - nu1).abs();
    }
    total * JY
}

/// One photometric measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotPoint {
    pub filter: String,
    pub fnujy: f64,
    pub e_fnujy: f64,
    pub upper_limit: bool,
    /// Excluded from the fit but still reported.
    pub ignore: bool,
    pub bibcode: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Photometry {
    pub points: Vec<PhotPoint>,
}

impl Photometry {
    pub fn nphot(&self) -> usize {
        self.points.len()
    }

    pub fn filters(&self) -> Vec<String> {
        self.points.iter().map(|p| p.filter.clone()).collect()
    }
}

/// An observed spectrum (µm, Jy).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObsSpectrum {
    pub wavelength: Vec<f64>,
    pub fnujy: Vec<f64>,
    pub e_fnujy: Vec<f64>,
    pub bibcode: String,
}

/// Target metadata read from the rawphot keywords.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObsKeywords {
    pub main_id: Option<String>,
    pub sp_type: Option<String>,
    pub raj2000: Option<f64>,
    pub dej2000: Option<f64>,
    /// Parallax in mas.
    pub plx_value: Option<f64>,
    /// Parallax uncertainty in mas.
    pub plx_err: Option<f64>,
}

impl ObsKeywords {
    /// Parallax and its error (mas) when both are usable for a draw.
    pub fn usable_parallax(&self) -> Option<(f64, f64)> {
        match (self.plx_value, self.plx_err) {
            (Some(v), Some(e)) if v.is_finite() && e.is_finite() && v > 0.0 && e > 0.0 => Some((v, e)),
            _ => None,
        }
    }
}

/// Everything read for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observations {
    pub photometry: Photometry,
    pub spectra: Vec<ObsSpectrum>,
    pub keywords: ObsKeywords,
}

/// Observations flattened into per-point arrays, photometry first, then each
/// spectrum in order.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcatObs {
    pub fnujy: Vec<f64>,
    pub e_fnujy: Vec<f64>,
    pub upper_limit: Vec<bool>,
    pub ignore: Vec<bool>,
    /// For each point, the index of its normalisation parameter relative to
    /// the first spectrum normalisation, or `None` for photometry.
    pub ispec: Vec<Option<usize>>,
    /// Number of points in each observation block.
    pub nel: Vec<usize>,
    pub wavelengths: Vec<f64>,
    /// Filter name per point; spectrum points are labelled `spec<i>`.
    pub filters: Vec<String>,
    pub bibcode: Vec<String>,
}

impl Observations {
    pub fn has_photometry(&self) -> bool {
        self.photometry.nphot() > 0
    }

    pub fn concat(&self, filter_wavelength: impl Fn(&str) -> f64) -> ConcatObs {
        let mut out = ConcatObs {
            fnujy: Vec::new(),
            e_fnujy: Vec::new(),
            upper_limit: Vec::new(),
            ignore: Vec::new(),
            ispec: Vec::new(),
            nel: Vec::new(),
            wavelengths: Vec::new(),
            filters: Vec::new(),
            bibcode: Vec::new(),
        };

        for p in &self.photometry.points {
            out.fnujy.push(p.fnujy);
            out.e_fnujy.push(p.e_fnujy);
            out.upper_limit.push(p.upper_limit);
            out.ignore.push(p.ignore);
            out.ispec.push(None);
            out.wavelengths.push(filter_wavelength(&p.filter));
            out.filters.push(p.filter.clone());
            out.bibcode.push(p.bibcode.clone());
        }
        out.nel.push(self.photometry.nphot());

        for (i, s) in self.spectra.iter().enumerate() {
            for j in 0..s.wavelength.len() {
                out.fnujy.push(s.fnujy[j]);
                out.e_fnujy.push(s.e_fnujy.get(j).copied().unwrap_or(0.0));
                out.upper_limit.push(false);
                out.ignore.push(false);
                out.ispec.push(Some(i));
                out.wavelengths.push(s.wavelength[j]);
                out.filters.push(format!("spec{i}"));
                out.bibcode.push(s.bibcode.clone());
            }
            out.nel.push(s.wavelength.len());
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn models() -> ModelsConfig {
        ModelsConfig {
            star: vec!["s1".to_string(), "s2".to_string()],
            disk: vec!["d1".to_string()],
            ..ModelsConfig::default()
        }
    }

    #[test]
    fn classifies_star_and_disk() {
        let comps = ModelComponents::classify(&["s1", "d1", "s2"], &models()).unwrap();
        assert_eq!(
            comps.kinds(),
            &[ComponentKind::Star, ComponentKind::Disk, ComponentKind::Star]
        );
        assert_eq!(comps.joined(), "s1+d1+s2");
        assert!(comps.has_star());
    }

    #[test]
    fn unknown_component_is_config_error() {
        let err = ModelComponents::classify(&["s1", "nope"], &models()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
        assert!(err.message().contains("nope"));
    }

    #[test]
    fn estimate_from_percentiles() {
        let e = Estimate::from_percentiles(1.0, 2.0, 4.0);
        assert_eq!(e.value, 2.0);
        assert_eq!(e.lo, 1.0);
        assert_eq!(e.hi, 2.0);
        assert_eq!(e.sigma(), 1.5);
    }

    #[test]
    fn flat_spectrum_irradiance() {
        // 1 Jy between 1 and 2 µm spans c/2 µm-Hz.
        let irr = irradiance(&[1.0, 2.0], &[1.0, 1.0]);
        let expected = 1e-26 * (2.997_924_58e14 - 2.997_924_58e14 / 2.0);
        assert!((irr - expected).abs() < 1e-30);
    }

    #[test]
    fn parallax_needs_positive_value_and_error() {
        let mut kw = ObsKeywords {
            plx_value: Some(10.0),
            plx_err: Some(1.0),
            ..ObsKeywords::default()
        };
        assert_eq!(kw.usable_parallax(), Some((10.0, 1.0)));
        kw.plx_value = Some(-1.0);
        assert_eq!(kw.usable_parallax(), None);
        kw.plx_value = Some(10.0);
        kw.plx_err = None;
        assert_eq!(kw.usable_parallax(), None);
    }
}
