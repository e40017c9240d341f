//! Run configuration.
//!
//! Everything the fitting engine needs to know about the model family, the
//! star/disk membership tables and the sampler is carried in a `FitConfig`
//! value that is passed explicitly into each entry point. It is read from TOML
//! (`--config`, else `$SDF_CONFIG`, else built-in defaults).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::math::log_space;

/// Environment variable naming a TOML config file.
pub const CONFIG_ENV: &str = "SDF_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub fitting: FittingConfig,
    pub models: ModelsConfig,
    pub sampler: SamplerConfig,
    pub files: FilesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FittingConfig {
    /// Candidate component combinations, in increasing complexity.
    pub families: Vec<Vec<String>>,
    /// Posterior draws used for every derived distribution.
    pub n_samples: usize,
    /// Base seed for the posterior subsample and parallax draws.
    pub seed: u64,
    /// Evidence margin per extra parameter a more complex model must beat.
    pub ev_threshold: f64,
    /// Suffix appended to the target id for the sampler directory.
    pub sampler_dir_suffix: String,
    /// Suffix appended to the joined component names for sampler files.
    pub model_suffix: String,
    /// Upper bound on in-memory cached results.
    pub cache_capacity: usize,
}

impl Default for FittingConfig {
    fn default() -> Self {
        Self {
            families: vec![
                vec!["phoenix_m".to_string()],
                vec!["phoenix_m".to_string(), "bb_disk_r".to_string()],
                vec![
                    "phoenix_m".to_string(),
                    "bb_disk_r".to_string(),
                    "bb_disk_r".to_string(),
                ],
            ],
            n_samples: 500,
            seed: 42,
            ev_threshold: 5.0,
            sampler_dir_suffix: "-mnest".to_string(),
            model_suffix: "_".to_string(),
            cache_capacity: 128,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Component names that are stars.
    pub star: Vec<String>,
    /// Component names that are disks.
    pub disk: Vec<String>,
    /// Disk components that get star-relative derived quantities.
    /// Defaults to `disk` when absent.
    pub disk_r: Option<Vec<String>>,
    /// Steradians per unit of the normalisation parameter (`10^norm`).
    pub solid_angle_sr: f64,
    pub wave_min_um: f64,
    pub wave_max_um: f64,
    pub wave_steps: usize,
    /// Directory holding tabulated model grids.
    pub grid_dir: PathBuf,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            star: vec![
                "phoenix_m".to_string(),
                "phoenix_cool".to_string(),
                "phoenix_sol".to_string(),
                "kurucz_m".to_string(),
                "bb_star".to_string(),
            ],
            disk: vec![
                "bb_disk".to_string(),
                "modbb_disk".to_string(),
                "bb_disk_r".to_string(),
                "modbb_disk_r".to_string(),
            ],
            disk_r: None,
            // 1 square arcsecond in steradians.
            solid_angle_sr: 2.350_443_053_909_789e-11,
            wave_min_um: 0.1,
            wave_max_um: 3000.0,
            wave_steps: 1000,
            grid_dir: PathBuf::from("models"),
        }
    }
}

impl ModelsConfig {
    pub fn disk_r_list(&self) -> &[String] {
        self.disk_r.as_deref().unwrap_or(&self.disk)
    }

    pub fn is_disk_r(&self, name: &str) -> bool {
        self.disk_r_list().iter().any(|d| d == name)
    }

    /// Wavelength grid (µm) used for component spectra.
    pub fn default_wavelengths(&self) -> Result<Vec<f64>, AppError> {
        log_space(self.wave_min_um, self.wave_max_um, self.wave_steps)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Sampler executable, run inside the sampler directory.
    pub command: String,
    /// Extra arguments placed before the output base name.
    pub args: Vec<String>,
    /// Longest relative base name the sampler accepts.
    pub max_base_len: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            command: "sdf-multinest".to_string(),
            args: Vec::new(),
            max_base_len: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Root of the target tree; named samples live in `<root>/samples/`.
    pub sdb_root: PathBuf,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            sdb_root: PathBuf::from("."),
        }
    }
}

impl FitConfig {
    /// Load from an explicit path, else `$SDF_CONFIG` (a `.env` file is
    /// honoured), else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => {
                dotenvy::dotenv().ok();
                std::env::var(CONFIG_ENV).ok().map(PathBuf::from)
            }
        };

        let config = match path {
            Some(p) => Self::from_toml_file(&p)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, AppError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AppError::config(format!("Failed to read config '{}': {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
            .map_err(|e| AppError::config(format!("{} ({})", e, path.display())))
    }

    pub fn from_toml_str(text: &str) -> Result<Self, AppError> {
        toml::from_str(text).map_err(|e| AppError::config(format!("Invalid config TOML: {e}")))
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.fitting.n_samples == 0 {
            return Err(AppError::config("fitting.n_samples must be > 0."));
        }
        if self.fitting.families.is_empty() || self.fitting.families.iter().any(|f| f.is_empty()) {
            return Err(AppError::config(
                "fitting.families must list at least one non-empty component combination.",
            ));
        }
        if !(self.fitting.ev_threshold.is_finite() && self.fitting.ev_threshold >= 0.0) {
            return Err(AppError::config("fitting.ev_threshold must be finite and >= 0."));
        }
        if !(self.models.solid_angle_sr.is_finite() && self.models.solid_angle_sr > 0.0) {
            return Err(AppError::config("models.solid_angle_sr must be finite and > 0."));
        }
        if let Some(name) = self.models.star.iter().find(|s| self.models.disk.contains(s)) {
            return Err(AppError::config(format!(
                "Component '{name}' is listed as both star and disk."
            )));
        }
        if let Some(name) = self
            .models
            .disk_r_list()
            .iter()
            .find(|d| !self.models.disk.contains(d))
        {
            return Err(AppError::config(format!(
                "models.disk_r entry '{name}' is not a disk component."
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        FitConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = FitConfig::from_toml_str(
            r#"
            [fitting]
            n_samples = 50
            families = [["bb_star"], ["bb_star", "bb_disk"]]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.fitting.n_samples, 50);
        assert_eq!(cfg.fitting.families.len(), 2);
        assert_eq!(cfg.fitting.model_suffix, "_");
        assert!(cfg.models.is_disk_r("bb_disk"));
    }

    #[test]
    fn rejects_component_in_both_lists() {
        let mut cfg = FitConfig::default();
        cfg.models.disk.push("bb_star".to_string());
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }

    #[test]
    fn rejects_zero_samples() {
        let mut cfg = FitConfig::default();
        cfg.fitting.n_samples = 0;
        assert!(cfg.validate().is_err());
    }
}
