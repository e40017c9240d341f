//! Export the preferred result for a target to `<dir>/<id>-best.json`.
//!
//! The export is the "portable" summary of a target: the winning model
//! family, its fit quality, parameter estimates, headline star / disk
//! quantities and synthetic photometry in every library filter. It is meant
//! for downstream catalogues; the full result stays in the cache artifact.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{Estimate, FitResult, FluxEstimate, ParamEstimate};
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestExport {
    pub tool: String,
    pub id: String,
    pub main_id: Option<String>,
    pub components: Vec<String>,
    pub evidence: f64,
    pub chisq: f64,
    pub dof: i64,
    pub parameters: Vec<ParamEstimate>,
    pub stars: Vec<StarExport>,
    pub disks: Vec<DiskExport>,
    pub filters: Vec<String>,
    pub photometry: FluxEstimate,
    /// Other families that were fitted, best first.
    pub alternatives: Vec<Alternative>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StarExport {
    pub component: String,
    pub parameters: Vec<ParamEstimate>,
    pub lstar_1pc: Estimate,
    pub lstar: Option<Estimate>,
    pub rstar: Option<Estimate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskExport {
    pub component: String,
    pub parameters: Vec<ParamEstimate>,
    pub ldisk_1pc: Estimate,
    pub ldisk_lstar: Option<Estimate>,
    pub rdisk_bb: Option<Estimate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub components: Vec<String>,
    pub evidence: f64,
    pub ndim: usize,
}

pub fn export_path(result: &FitResult) -> PathBuf {
    result.locator.path.join(format!("{}-best.json", result.id()))
}

/// Summary of a ranked result set; `results[0]` is the preferred model.
pub fn build_export(results: &[FitResult]) -> Option<BestExport> {
    let best = results.first()?;
    let parameters = best
        .parameters
        .iter()
        .zip(&best.best_params)
        .zip(&best.best_params_1sig)
        .map(|((name, &value), &sigma)| ParamEstimate {
            name: name.clone(),
            value,
            sigma,
            lo: sigma,
            hi: sigma,
        })
        .collect();

    Some(BestExport {
        tool: "sdf".to_string(),
        id: best.id().to_string(),
        main_id: best.obs_keywords.main_id.clone(),
        components: best.components.names().to_vec(),
        evidence: best.evidence,
        chisq: best.chisq,
        dof: best.dof,
        parameters,
        stars: best
            .star
            .iter()
            .map(|s| StarExport {
                component: s.component.clone(),
                parameters: s.parameters.clone(),
                lstar_1pc: s.lstar_1pc,
                lstar: s.lstar,
                rstar: s.rstar,
            })
            .collect(),
        disks: best
            .disk_r
            .iter()
            .map(|d| DiskExport {
                component: d.component.clone(),
                parameters: d.parameters.clone(),
                ldisk_1pc: d.ldisk_1pc,
                ldisk_lstar: d.ldisk_lstar,
                rdisk_bb: d.rdisk_bb,
            })
            .collect(),
        filters: best.all_filters.clone(),
        photometry: best.all_phot.clone(),
        alternatives: results[1..]
            .iter()
            .map(|r| Alternative {
                components: r.components.names().to_vec(),
                evidence: r.evidence,
                ndim: r.ndim,
            })
            .collect(),
    })
}

/// Write the export for a ranked result set. Returns the path written, or
/// `None` for an empty set.
pub fn write_best_json(results: &[FitResult]) -> Result<Option<PathBuf>, AppError> {
    let Some(export) = build_export(results) else {
        return Ok(None);
    };
    let path = export_path(&results[0]);
    let file = File::create(&path)
        .map_err(|e| AppError::io(format!("Failed to create export '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &export)
        .map_err(|e| AppError::io(format!("Failed to write export JSON: {e}")))?;
    Ok(Some(path))
}

pub fn read_best_json(path: &Path) -> Result<BestExport, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::io(format!("Failed to open export '{}': {e}", path.display())))?;
    serde_json::from_reader(file).map_err(|e| AppError::io(format!("Invalid export JSON: {e}")))
}
