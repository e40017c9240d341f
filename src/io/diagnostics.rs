//! Diagnostic tables written next to the sampler output.
//!
//! - `<base>corner.csv`: the posterior draw, one row per sample, for corner
//!   plots
//! - `<base>distributions.csv`: the per-sample star and disk quantities

use std::path::Path;

use crate::domain::FitResult;
use crate::error::AppError;
use crate::fit::PosteriorDraw;

fn writer(path: &Path) -> Result<csv::Writer<std::fs::File>, AppError> {
    csv::Writer::from_path(path)
        .map_err(|e| AppError::io(format!("Failed to create '{}': {e}", path.display())))
}

fn write_err(path: &Path) -> impl Fn(csv::Error) -> AppError + '_ {
    move |e| AppError::io(format!("Failed to write '{}': {e}", path.display()))
}

pub fn write_corner(path: &Path, parameters: &[String], draw: &PosteriorDraw) -> Result<(), AppError> {
    let mut w = writer(path)?;
    let mut header = vec!["weight".to_string()];
    header.extend(parameters.iter().cloned());
    w.write_record(&header).map_err(write_err(path))?;

    for (weight, row) in draw.weights.iter().zip(&draw.params) {
        let mut record = Vec::with_capacity(row.len() + 1);
        record.push(weight.to_string());
        record.extend(row.iter().map(f64::to_string));
        w.write_record(&record).map_err(write_err(path))?;
    }
    w.flush()
        .map_err(|e| AppError::io(format!("Failed to write '{}': {e}", path.display())))
}

/// Columns are `<component>:<quantity>` for every per-sample distribution
/// held by the star and disk results.
pub fn write_distributions(path: &Path, result: &FitResult) -> Result<(), AppError> {
    let mut columns: Vec<(String, &Vec<f64>)> = Vec::new();
    for s in &result.star {
        columns.extend(s.distributions.iter().map(|(k, v)| (format!("{}:{k}", s.component), v)));
    }
    for d in &result.disk_r {
        columns.extend(d.distributions.iter().map(|(k, v)| (format!("{}:{k}", d.component), v)));
    }

    let mut w = writer(path)?;
    w.write_record(columns.iter().map(|(name, _)| name.as_str()))
        .map_err(write_err(path))?;
    let rows = columns.iter().map(|(_, v)| v.len()).max().unwrap_or(0);
    for j in 0..rows {
        w.write_record(
            columns
                .iter()
                .map(|(_, v)| v.get(j).map(f64::to_string).unwrap_or_default()),
        )
        .map_err(write_err(path))?;
    }
    w.flush()
        .map_err(|e| AppError::io(format!("Failed to write '{}': {e}", path.display())))
}
