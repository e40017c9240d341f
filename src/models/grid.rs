//! Tabulated model library.
//!
//! Each component model is a precomputed grid stored as one JSON file,
//! `<grid_dir>/<name>.json`:
//!
//! ```text
//! {
//!   "parameters": ["Teff"],
//!   "axes": [[3000.0, 4000.0, ...]],
//!   "filters": ["2MJ", "WISE3", ...],
//!   "filter_wavelengths": [1.24, 12.0, ...],
//!   "phot": [...],          // nodes × filters, row-major over axes
//!   "wavelength": [...],    // µm
//!   "spec": [...]           // nodes × wavelength
//! }
//! ```
//!
//! Fluxes are interpolated multilinearly in parameter space (clamped to the
//! grid) and scaled by `10^norm`. No radiative physics happens here.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::math::multilinear;
use crate::models::component::{
    ComponentModel, ModelLibrary, PhotometricModel, SpectralModel, SubModel,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridTable {
    pub parameters: Vec<String>,
    pub axes: Vec<Vec<f64>>,
    pub filters: Vec<String>,
    pub filter_wavelengths: Vec<f64>,
    pub phot: Vec<f64>,
    pub wavelength: Vec<f64>,
    pub spec: Vec<f64>,
}

impl GridTable {
    fn nodes(&self) -> usize {
        self.axes.iter().map(Vec::len).product()
    }

    pub fn validate(&self, name: &str) -> Result<(), AppError> {
        let bad = |what: &str| AppError::config(format!("Model grid '{name}': {what}."));

        if self.parameters.len() != self.axes.len() {
            return Err(bad("parameter and axis counts differ"));
        }
        if self.axes.iter().any(|a| a.is_empty() || a.windows(2).any(|w| w[1] <= w[0])) {
            return Err(bad("axes must be non-empty and strictly ascending"));
        }
        if self.filters.len() != self.filter_wavelengths.len() {
            return Err(bad("filter and filter wavelength counts differ"));
        }
        if self.phot.len() != self.nodes() * self.filters.len() {
            return Err(bad("photometry table size does not match axes × filters"));
        }
        if self.wavelength.len() < 2 || self.spec.len() != self.nodes() * self.wavelength.len() {
            return Err(bad("spectrum table size does not match axes × wavelength"));
        }
        Ok(())
    }

    fn interpolate(&self, table: &[f64], stride: usize, params: &[f64]) -> Vec<f64> {
        let n = self.axes.len();
        let norm = params.get(n).copied().unwrap_or(0.0);
        let mut out = vec![0.0; stride];
        multilinear(&self.axes, table, stride, &params[..n.min(params.len())], &mut out);
        let scale = 10f64.powf(norm);
        out.iter_mut().for_each(|v| *v *= scale);
        out
    }
}

struct GridPhot(Arc<GridTable>);

impl PhotometricModel for GridPhot {
    fn filters(&self) -> &[String] {
        &self.0.filters
    }

    fn fnujy(&self, params: &[f64]) -> Vec<f64> {
        self.0.interpolate(&self.0.phot, self.0.filters.len(), params)
    }
}

struct GridSpec(Arc<GridTable>);

impl SpectralModel for GridSpec {
    fn wavelength(&self) -> &[f64] {
        &self.0.wavelength
    }

    fn fnujy(&self, params: &[f64]) -> Vec<f64> {
        self.0.interpolate(&self.0.spec, self.0.wavelength.len(), params)
    }
}

/// All grids found in one directory, loaded up front.
pub struct GridLibrary {
    dir: PathBuf,
    tables: HashMap<String, Arc<GridTable>>,
    filters: Vec<String>,
    filter_wavelengths: HashMap<String, f64>,
}

impl GridLibrary {
    pub fn open(dir: &Path) -> Result<Self, AppError> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            AppError::config(format!("Failed to read model grid dir '{}': {e}", dir.display()))
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|x| x == "json"))
            .collect();
        paths.sort();

        let mut tables = HashMap::new();
        let mut filters = Vec::new();
        let mut filter_wavelengths = HashMap::new();
        for path in paths {
            let Some(name) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            let table = read_table(&path)?;
            table.validate(&name)?;
            for (f, &w) in table.filters.iter().zip(&table.filter_wavelengths) {
                if !filter_wavelengths.contains_key(f) {
                    filter_wavelengths.insert(f.clone(), w);
                    filters.push(f.clone());
                }
            }
            tables.insert(name, Arc::new(table));
        }

        tracing::debug!(dir = %dir.display(), n = tables.len(), "loaded model grids");
        Ok(Self {
            dir: dir.to_path_buf(),
            tables,
            filters,
            filter_wavelengths,
        })
    }
}

fn read_table(path: &Path) -> Result<GridTable, AppError> {
    let file = File::open(path).map_err(|e| {
        AppError::config(format!("Failed to open model grid '{}': {e}", path.display()))
    })?;
    serde_json::from_reader(std::io::BufReader::new(file)).map_err(|e| {
        AppError::config(format!("Invalid model grid '{}': {e}", path.display()))
    })
}

impl ModelLibrary for GridLibrary {
    fn component(&self, name: &str) -> Result<ComponentModel, AppError> {
        let table = self.tables.get(name).ok_or_else(|| {
            AppError::config(format!(
                "No model grid '{name}.json' in '{}'.",
                self.dir.display()
            ))
        })?;
        ComponentModel::new(
            name,
            table.parameters.clone(),
            vec![
                SubModel::Photometric(Box::new(GridPhot(Arc::clone(table)))),
                SubModel::Spectral(Box::new(GridSpec(Arc::clone(table)))),
            ],
        )
    }

    fn filters(&self) -> Vec<String> {
        self.filters.clone()
    }

    fn filter_wavelength(&self, filter: &str) -> Option<f64> {
        self.filter_wavelengths.get(filter).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_grid(dir: &Path, name: &str, table: &GridTable) {
        let file = File::create(dir.join(format!("{name}.json"))).unwrap();
        serde_json::to_writer(file, table).unwrap();
    }

    fn linear_grid() -> GridTable {
        // Flux rises linearly with T: phot = [T, 2T], spec = [T, T].
        GridTable {
            parameters: vec!["Temp".to_string()],
            axes: vec![vec![10.0, 20.0]],
            filters: vec!["A".to_string(), "B".to_string()],
            filter_wavelengths: vec![1.0, 2.0],
            phot: vec![10.0, 20.0, 20.0, 40.0],
            wavelength: vec![1.0, 2.0],
            spec: vec![10.0, 10.0, 20.0, 20.0],
        }
    }

    #[test]
    fn loads_and_interpolates_grid() {
        let dir = tempfile::tempdir().unwrap();
        write_grid(dir.path(), "bb_disk", &linear_grid());

        let lib = GridLibrary::open(dir.path()).unwrap();
        assert_eq!(lib.filters(), vec!["A".to_string(), "B".to_string()]);
        assert_eq!(lib.filter_wavelength("B"), Some(2.0));

        let comp = lib.component("bb_disk").unwrap();
        assert_eq!(comp.parameters(), &["Temp".to_string(), "norm".to_string()]);

        let slots = comp.filter_slots(&["B".to_string(), "A".to_string()]).unwrap();
        let f = comp.fluxes(&slots, &[15.0, 1.0]);
        assert!((f[0] - 300.0).abs() < 1e-9);
        assert!((f[1] - 150.0).abs() < 1e-9);

        let spec = comp.spectrum_at(&[1.5], &[15.0, 0.0]);
        assert!((spec[0] - 15.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_mis_sized_table() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = linear_grid();
        table.phot.pop();
        write_grid(dir.path(), "broken", &table);
        assert!(GridLibrary::open(dir.path()).is_err());
    }

    #[test]
    fn missing_component_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let lib = GridLibrary::open(dir.path()).unwrap();
        let err = lib.component("nope").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }
}
