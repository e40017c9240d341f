//! Fakes shared by the fitting tests: a flat-spectrum model library and an
//! in-process sampler that counts its runs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use nalgebra::DMatrix;

use crate::domain::{
    CacheLocator, Estimate, FitConfig, FitResult, FittingConfig, FluxEstimate, ModelComponents,
    ModelsConfig, ObsKeywords, ObsSpectrum, Observations, PhotPoint, Photometry,
};
use crate::error::AppError;
use crate::fit::context::ComputationContext;
use crate::fit::inference::{InferenceEngine, SamplerOutput};
use crate::models::component::fixtures::flat_component;
use crate::models::{ComponentModel, ModelLibrary};

pub const FILTERS: [(&str, f64); 3] = [("2MJ", 1.25), ("WISE3", 12.0), ("WISE4", 22.0)];

pub fn models_config() -> ModelsConfig {
    ModelsConfig {
        star: vec!["star_a".to_string(), "star_b".to_string()],
        disk: vec!["disk_a".to_string(), "disk_b".to_string()],
        disk_r: None,
        wave_min_um: 1.0,
        wave_max_um: 100.0,
        wave_steps: 20,
        ..ModelsConfig::default()
    }
}

pub fn config(families: &[&[&str]]) -> FitConfig {
    FitConfig {
        fitting: FittingConfig {
            families: families
                .iter()
                .map(|f| f.iter().map(|s| s.to_string()).collect())
                .collect(),
            n_samples: 200,
            ..FittingConfig::default()
        },
        models: models_config(),
        ..FitConfig::default()
    }
}

pub fn components(names: &[&str]) -> ModelComponents {
    ModelComponents::classify(names, &models_config()).unwrap()
}

#[derive(Default)]
pub struct FakeLibrary;

impl ModelLibrary for FakeLibrary {
    fn component(&self, name: &str) -> Result<ComponentModel, AppError> {
        let filters: Vec<&str> = FILTERS.iter().map(|(f, _)| *f).collect();
        if name.starts_with("star_") {
            Ok(flat_component(name, "Teff", &filters))
        } else if name.starts_with("disk_") {
            Ok(flat_component(name, "log_Temp", &filters))
        } else {
            Err(AppError::config(format!("No model '{name}'.")))
        }
    }

    fn filters(&self) -> Vec<String> {
        FILTERS.iter().map(|(f, _)| f.to_string()).collect()
    }

    fn filter_wavelength(&self, filter: &str) -> Option<f64> {
        FILTERS.iter().find(|(f, _)| *f == filter).map(|(_, w)| *w)
    }
}

pub fn observations(points: &[(&str, f64, f64)]) -> Observations {
    Observations {
        photometry: Photometry {
            points: points
                .iter()
                .map(|&(filter, fnujy, e_fnujy)| PhotPoint {
                    filter: filter.to_string(),
                    fnujy,
                    e_fnujy,
                    upper_limit: false,
                    ignore: false,
                    bibcode: "test".to_string(),
                })
                .collect(),
        },
        spectra: Vec::new(),
        keywords: ObsKeywords::default(),
    }
}

pub fn observations_with_spectrum() -> Observations {
    let mut obs = observations(&[("2MJ", 1.0, 0.1), ("WISE3", 2.0, 0.2), ("WISE4", 3.0, 0.3)]);
    obs.spectra.push(ObsSpectrum {
        wavelength: vec![5.0, 20.0],
        fnujy: vec![1.5, 2.5],
        e_fnujy: vec![0.1, 0.1],
        bibcode: "spec".to_string(),
    });
    obs
}

/// Write `<dir>/<id>/<id>-rawphot.txt`, back-dated so that files written
/// later in a test are unambiguously newer.
pub fn write_rawphot(dir: &Path, id: &str, points: &[(&str, f64, f64)]) -> PathBuf {
    write_rawphot_with(dir, id, points, &[])
}

pub fn write_rawphot_with(
    dir: &Path,
    id: &str,
    points: &[(&str, f64, f64)],
    keywords: &[(&str, &str)],
) -> PathBuf {
    let target = dir.join(id);
    std::fs::create_dir_all(&target).unwrap();
    let path = target.join(format!("{id}-rawphot.txt"));

    let mut text = String::new();
    for (k, v) in keywords {
        text.push_str(&format!("\\{k} = {v}\n"));
    }
    text.push_str("| Band | Phot | Err | Lim | Unit | bibcode | exclude |\n");
    for (band, phot, err) in points {
        text.push_str(&format!("{band} {phot} {err} 0 Jy test 0\n"));
    }
    std::fs::write(&path, text).unwrap();
    set_mtime(&path, SystemTime::now() - Duration::from_secs(10));
    path
}

pub fn set_mtime(path: &Path, t: SystemTime) {
    std::fs::File::options()
        .append(true)
        .open(path)
        .unwrap()
        .set_modified(t)
        .unwrap();
}

/// In-process sampler with a fixed evidence per model family.
///
/// The posterior is a deterministic cloud of samples between 1.0 and 1.1 in
/// every dimension, with weights cycling through 1..=5.
pub struct FakeEngine {
    evidence: HashMap<String, f64>,
    rows: usize,
    runs: AtomicUsize,
    run_bases: Mutex<Vec<String>>,
}

impl FakeEngine {
    /// Evidence by joined component names, e.g. `("star_a+disk_a", 5.0)`.
    pub fn with_evidence(evidence: &[(&str, f64)]) -> Self {
        Self {
            evidence: evidence.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            rows: 300,
            runs: AtomicUsize::new(0),
            run_bases: Mutex::new(Vec::new()),
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn run_bases(&self) -> Vec<String> {
        self.run_bases.lock().unwrap().clone()
    }

    fn evidence_for(&self, base: &str) -> f64 {
        let joined = base.strip_suffix('_').unwrap_or(base);
        self.evidence.get(joined).copied().unwrap_or(0.0)
    }
}

impl InferenceEngine for FakeEngine {
    fn run(&self, _ctx: &ComputationContext, workdir: &Path, base: &str) -> Result<(), AppError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.run_bases.lock().unwrap().push(base.to_string());
        std::fs::write(workdir.join(format!("{base}phys_live.points")), "").unwrap();
        Ok(())
    }

    fn load(&self, base: &Path, ndim: usize) -> Result<SamplerOutput, AppError> {
        let name = base.file_name().unwrap().to_string_lossy().into_owned();
        let table = DMatrix::from_fn(self.rows, ndim + 2, |i, j| match j {
            0 => 1.0 + (i % 5) as f64,
            1 => 0.0,
            _ => 1.0 + 0.01 * ((i * 7 + j * 3) % 11) as f64,
        });
        Ok(SamplerOutput {
            evidence: self.evidence_for(&name),
            table,
        })
    }
}

impl InferenceEngine for Arc<FakeEngine> {
    fn run(&self, ctx: &ComputationContext, workdir: &Path, base: &str) -> Result<(), AppError> {
        self.as_ref().run(ctx, workdir, base)
    }

    fn load(&self, base: &Path, ndim: usize) -> Result<SamplerOutput, AppError> {
        self.as_ref().load(base, ndim)
    }
}

/// A small, fully populated result for cache and report tests.
pub fn sample_result(rawphot: &Path, fitting: &FittingConfig) -> FitResult {
    let components = components(&["star_a", "disk_a"]);
    let locator = CacheLocator::new(rawphot, &components, fitting);
    let flux = FluxEstimate {
        value: vec![1.0, 2.0],
        lo: vec![0.1, 0.2],
        hi: vec![0.1, 0.3],
    };
    let est = Estimate {
        value: 1.5,
        lo: 0.1,
        hi: 0.2,
    };
    FitResult {
        rawphot: rawphot.to_path_buf(),
        locator,
        evidence: -12.5,
        ndim: 4,
        parameters: ["Teff", "norm", "log_Temp", "norm"].map(String::from).to_vec(),
        best_params: vec![5800.0, -1.0, 1.7, -3.0],
        best_params_1sig: vec![50.0, 0.01, 0.1, 0.05],
        comp_parameters: vec![
            vec!["Teff".to_string(), "norm".to_string()],
            vec!["log_Temp".to_string(), "norm".to_string()],
        ],
        comp_best_params: vec![vec![5800.0, -1.0], vec![1.7, -3.0]],
        comp_best_params_1sig: vec![vec![50.0, 0.01], vec![0.1, 0.05]],
        components,
        obs_keywords: ObsKeywords {
            main_id: Some("HD 1".to_string()),
            plx_value: Some(10.0),
            plx_err: Some(1.0),
            ..ObsKeywords::default()
        },
        filters: vec!["2MJ".to_string(), "WISE4".to_string()],
        wavelengths: vec![1.25, 22.0],
        obs_fnujy: vec![1.0, 2.1],
        obs_e_fnujy: vec![0.1, 0.2],
        obs_upperlim: vec![false, false],
        filters_ignore: vec![false, false],
        model_fnujy: flux.clone(),
        model_comp_fnujy: vec![flux.clone(), flux.clone()],
        residuals: vec![0.0, 0.5],
        chisq: 0.25,
        dof: 0,
        all_filters: vec!["2MJ".to_string(), "WISE4".to_string()],
        all_phot: flux.clone(),
        star_phot: Some(flux.clone()),
        disk_phot: Some(flux),
        comp_spectra: Vec::new(),
        star_spec: None,
        disk_spec: None,
        star: vec![crate::domain::StarResult {
            component: "star_a".to_string(),
            parameters: vec![crate::domain::ParamEstimate {
                name: "Teff".to_string(),
                value: 5800.0,
                sigma: 50.0,
                lo: 48.0,
                hi: 52.0,
            }],
            lstar_1pc: est,
            plx_arcsec: Some((0.01, 0.001)),
            lstar: Some(est),
            rstar: Some(est),
            distributions: Default::default(),
        }],
        disk_r: vec![crate::domain::DiskResult {
            component: "disk_a".to_string(),
            parameters: vec![crate::domain::ParamEstimate {
                name: "Temp".to_string(),
                value: 50.0,
                sigma: 12.0,
                lo: 10.0,
                hi: 14.0,
            }],
            ldisk_1pc: est,
            ldisk_lstar: Some(Estimate {
                value: 1.234e-4,
                lo: 1e-5,
                hi: 1e-5,
            }),
            rdisk_bb: Some(est),
            distributions: Default::default(),
        }],
        distributions: Default::default(),
        completed_at: Utc::now(),
    }
}
