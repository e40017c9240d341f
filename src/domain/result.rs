//! Persistent fit results.
//!
//! A `FitResult` holds only derived data: evidence, parameter estimates,
//! distributions and physical quantities. Model objects never live here, so a
//! result can be written to and restored from a cache artifact losslessly.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::domain::config::FittingConfig;
use crate::domain::types::{
    Estimate, FluxEstimate, ModelComponents, ObsKeywords, ParamEstimate, Spectrum,
};

/// Suffix of the per-target photometry file.
pub const RAWPHOT_SUFFIX: &str = "-rawphot.txt";

/// Sampler output whose presence and mtime mark a finished inference run.
pub const MARKER_SUFFIX: &str = "phys_live.points";

/// Where a (target, model family) pair keeps its sampler output and cache.
///
/// This is a pure function of the rawphot path and the ordered components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheLocator {
    /// Directory holding the rawphot file.
    pub path: PathBuf,
    pub id: String,
    /// Sampler working directory, `<path>/<id><sampler_dir_suffix>`.
    pub sampler_dir: PathBuf,
    /// Base for sampler files, `<sampler_dir>/<a+b><model_suffix>`.
    pub base: PathBuf,
    /// Serialized `FitResult`.
    pub artifact: PathBuf,
}

impl CacheLocator {
    pub fn new(rawphot: &Path, components: &ModelComponents, fitting: &FittingConfig) -> Self {
        let path = rawphot.parent().map(Path::to_path_buf).unwrap_or_default();
        let id = target_id(rawphot);
        let sampler_dir = path.join(format!("{id}{}", fitting.sampler_dir_suffix));
        let base_name = base_name(components, fitting);
        let base = sampler_dir.join(&base_name);
        let artifact = sampler_dir.join(format!("{base_name}.json"));
        Self {
            path,
            id,
            sampler_dir,
            base,
            artifact,
        }
    }

    /// `<base><suffix>`; sampler files are named by appending to the base.
    pub fn with_suffix(&self, suffix: &str) -> PathBuf {
        let mut s = self.base.clone().into_os_string();
        s.push(suffix);
        PathBuf::from(s)
    }

    pub fn marker(&self) -> PathBuf {
        self.with_suffix(MARKER_SUFFIX)
    }

    pub fn corner(&self) -> PathBuf {
        self.with_suffix("corner.csv")
    }

    pub fn distributions_table(&self) -> PathBuf {
        self.with_suffix("distributions.csv")
    }
}

/// Sampler base name relative to the sampler directory.
pub fn base_name(components: &ModelComponents, fitting: &FittingConfig) -> String {
    format!("{}{}", components.joined(), fitting.model_suffix)
}

/// Target id: the rawphot file name without `-rawphot.txt`.
pub fn target_id(rawphot: &Path) -> String {
    let name = rawphot
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.strip_suffix(RAWPHOT_SUFFIX) {
        Some(id) => id.to_string(),
        None => name,
    }
}

/// A named posterior sample array. The last axis is always the sample axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", content = "data", rename_all = "lowercase")]
pub enum Distribution {
    /// One value per sample.
    Scalar(Vec<f64>),
    /// `points × samples`.
    Matrix(DMatrix<f64>),
    /// One `points × samples` matrix per component.
    Stack(Vec<DMatrix<f64>>),
}

impl Distribution {
    pub fn n_samples(&self) -> usize {
        match self {
            Distribution::Scalar(v) => v.len(),
            Distribution::Matrix(m) => m.ncols(),
            Distribution::Stack(ms) => ms.first().map(|m| m.ncols()).unwrap_or(0),
        }
    }
}

/// Star-specific derived quantities for one star component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StarResult {
    pub component: String,
    pub parameters: Vec<ParamEstimate>,
    /// L☉ at 1 pc.
    pub lstar_1pc: Estimate,
    /// Parallax and its error in arcsec, when a parallax was measured.
    pub plx_arcsec: Option<(f64, f64)>,
    /// L☉.
    pub lstar: Option<Estimate>,
    /// R☉.
    pub rstar: Option<Estimate>,
    pub distributions: BTreeMap<String, Vec<f64>>,
}

/// Disk-specific derived quantities for one disk component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskResult {
    pub component: String,
    pub parameters: Vec<ParamEstimate>,
    pub ldisk_1pc: Estimate,
    /// Fractional luminosity; absent when the family has no star.
    pub ldisk_lstar: Option<Estimate>,
    /// Blackbody radius in au.
    pub rdisk_bb: Option<Estimate>,
    pub distributions: BTreeMap<String, Vec<f64>>,
}

/// A headline quantity with a symmetric uncertainty, by report key.
pub trait Headline {
    fn quantity(&self, key: &str) -> Option<(f64, f64)>;
}

fn param_quantity(params: &[ParamEstimate], key: &str) -> Option<(f64, f64)> {
    params
        .iter()
        .find(|p| p.name == key)
        .map(|p| (p.value, p.sigma))
}

impl Headline for StarResult {
    fn quantity(&self, key: &str) -> Option<(f64, f64)> {
        match key {
            "lstar_1pc" => Some((self.lstar_1pc.value, self.lstar_1pc.sigma())),
            "lstar" => self.lstar.map(|e| (e.value, e.sigma())),
            "rstar" => self.rstar.map(|e| (e.value, e.sigma())),
            _ => param_quantity(&self.parameters, key),
        }
    }
}

impl Headline for DiskResult {
    fn quantity(&self, key: &str) -> Option<(f64, f64)> {
        match key {
            "ldisk_1pc" => Some((self.ldisk_1pc.value, self.ldisk_1pc.sigma())),
            "ldisk_lstar" => self.ldisk_lstar.map(|e| (e.value, e.sigma())),
            "rdisk_bb" => self.rdisk_bb.map(|e| (e.value, e.sigma())),
            _ => param_quantity(&self.parameters, key),
        }
    }
}

/// One fitted model family for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub rawphot: PathBuf,
    pub components: ModelComponents,
    pub locator: CacheLocator,

    pub evidence: f64,
    /// Total free parameters, including spectrum normalisations.
    pub ndim: usize,
    pub parameters: Vec<String>,
    pub best_params: Vec<f64>,
    pub best_params_1sig: Vec<f64>,
    pub comp_parameters: Vec<Vec<String>>,
    pub comp_best_params: Vec<Vec<f64>>,
    pub comp_best_params_1sig: Vec<Vec<f64>>,

    pub obs_keywords: ObsKeywords,
    pub filters: Vec<String>,
    pub wavelengths: Vec<f64>,
    /// Observed fluxes scaled by the best-fit spectrum normalisations.
    pub obs_fnujy: Vec<f64>,
    pub obs_e_fnujy: Vec<f64>,
    pub obs_upperlim: Vec<bool>,
    pub filters_ignore: Vec<bool>,

    pub model_fnujy: FluxEstimate,
    pub model_comp_fnujy: Vec<FluxEstimate>,
    pub residuals: Vec<f64>,
    pub chisq: f64,
    pub dof: i64,

    pub all_filters: Vec<String>,
    pub all_phot: FluxEstimate,
    pub star_phot: Option<FluxEstimate>,
    pub disk_phot: Option<FluxEstimate>,

    pub comp_spectra: Vec<Spectrum>,
    pub star_spec: Option<Spectrum>,
    pub disk_spec: Option<Spectrum>,

    pub star: Vec<StarResult>,
    pub disk_r: Vec<DiskResult>,

    pub distributions: BTreeMap<String, Distribution>,
    pub completed_at: DateTime<Utc>,
}

impl FitResult {
    pub fn id(&self) -> &str {
        &self.locator.id
    }

    /// Re-derive path metadata from the current rawphot location, so that a
    /// cache copied or moved elsewhere reports where it now lives.
    pub fn refresh_file_info(&mut self, rawphot: &Path, fitting: &FittingConfig) {
        self.rawphot = rawphot.to_path_buf();
        self.locator = CacheLocator::new(rawphot, &self.components, fitting);
    }

    /// Star results followed by disk results, as reported.
    pub fn main_results(&self) -> Vec<&dyn Headline> {
        let mut out: Vec<&dyn Headline> = Vec::with_capacity(self.star.len() + self.disk_r.len());
        out.extend(self.star.iter().map(|s| s as &dyn Headline));
        out.extend(self.disk_r.iter().map(|d| d as &dyn Headline));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::{FittingConfig, ModelsConfig};

    fn comps(names: &[&str]) -> ModelComponents {
        let models = ModelsConfig {
            star: vec!["s".to_string()],
            disk: vec!["d".to_string()],
            ..ModelsConfig::default()
        };
        ModelComponents::classify(names, &models).unwrap()
    }

    #[test]
    fn locator_is_pure_function_of_inputs() {
        let fitting = FittingConfig::default();
        let raw = Path::new("/data/HD1/HD1-rawphot.txt");
        let a = CacheLocator::new(raw, &comps(&["s", "d"]), &fitting);
        let b = CacheLocator::new(raw, &comps(&["s", "d"]), &fitting);
        assert_eq!(a, b);
        assert_eq!(a.id, "HD1");
        assert_eq!(a.sampler_dir, Path::new("/data/HD1/HD1-mnest"));
        assert_eq!(a.base, Path::new("/data/HD1/HD1-mnest/s+d_"));
        assert_eq!(a.artifact, Path::new("/data/HD1/HD1-mnest/s+d_.json"));
        assert_eq!(a.marker(), Path::new("/data/HD1/HD1-mnest/s+d_phys_live.points"));

        let c = CacheLocator::new(raw, &comps(&["d", "s"]), &fitting);
        assert_ne!(a.base, c.base);
    }

    #[test]
    fn target_id_strips_suffix_only() {
        // A char-set strip would eat the trailing 't' here.
        assert_eq!(target_id(Path::new("x/star_t-rawphot.txt")), "star_t");
        assert_eq!(target_id(Path::new("x/other.txt")), "other.txt");
    }
}
