//! External-command sampler.
//!
//! The sampler is a separate program (MultiNest-compatible output). For each
//! run we write `<base>problem.json` describing the fit and invoke
//!
//! ```text
//! <command> <args...> <base>
//! ```
//!
//! inside the sampler directory, so every file it writes is relative to the
//! base. Output read back:
//!
//! - `<base>.txt`: posterior rows `weight -2lnL p_0 .. p_n`
//! - `<base>stats.dat`: the `Global Log-Evidence` line
//! - `<base>phys_live.points`: presence marks a finished run

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::Command;

use nalgebra::DMatrix;
use serde::Serialize;

use crate::domain::SamplerConfig;
use crate::error::AppError;
use crate::fit::{ComputationContext, InferenceEngine, SamplerOutput};

#[derive(Debug, Clone)]
pub struct ExternalSampler {
    command: String,
    args: Vec<String>,
    grid_dir: PathBuf,
}

impl ExternalSampler {
    pub fn new(config: &SamplerConfig, grid_dir: &Path) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            grid_dir: grid_dir.to_path_buf(),
        }
    }
}

/// Everything the sampler needs to evaluate the likelihood.
#[derive(Debug, Serialize)]
struct Problem<'a> {
    components: Vec<&'a str>,
    parameters: &'a [String],
    grid_dir: &'a Path,
    filters: &'a [String],
    wavelengths: &'a [f64],
    fnujy: &'a [f64],
    e_fnujy: &'a [f64],
    upper_limit: &'a [bool],
    ignore: &'a [bool],
    ispec: &'a [Option<usize>],
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut s = base.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

impl InferenceEngine for ExternalSampler {
    fn run(&self, ctx: &ComputationContext, workdir: &Path, base: &str) -> Result<(), AppError> {
        let problem_path = workdir.join(format!("{base}problem.json"));
        let problem = Problem {
            components: ctx.models.iter().map(|m| m.name()).collect(),
            parameters: &ctx.parameters,
            grid_dir: &self.grid_dir,
            filters: &ctx.obs.filters,
            wavelengths: &ctx.obs.wavelengths,
            fnujy: &ctx.obs.fnujy,
            e_fnujy: &ctx.obs.e_fnujy,
            upper_limit: &ctx.obs.upper_limit,
            ignore: &ctx.obs.ignore,
            ispec: &ctx.obs.ispec,
        };
        let file = File::create(&problem_path).map_err(|e| {
            AppError::io(format!("Failed to create '{}': {e}", problem_path.display()))
        })?;
        serde_json::to_writer_pretty(BufWriter::new(file), &problem)
            .map_err(|e| AppError::io(format!("Failed to write sampler problem: {e}")))?;

        tracing::debug!(command = %self.command, base, workdir = %workdir.display(), "invoking sampler");
        let status = Command::new(&self.command)
            .args(&self.args)
            .arg(base)
            .current_dir(workdir)
            .status()
            .map_err(|e| AppError::inference(format!("Failed to start sampler '{}': {e}", self.command)))?;
        if !status.success() {
            return Err(AppError::inference(format!(
                "Sampler '{}' failed for '{base}' ({status}).",
                self.command
            )));
        }
        Ok(())
    }

    fn load(&self, base: &Path, ndim: usize) -> Result<SamplerOutput, AppError> {
        let table = read_posterior(&with_suffix(base, ".txt"), ndim)?;
        let evidence = read_evidence(&with_suffix(base, "stats.dat"))?;
        Ok(SamplerOutput { evidence, table })
    }
}

/// Parse a Fortran-style float, including the exponent form without an `E`
/// that very small values are written in (`0.1234-310`).
pub fn parse_fortran_float(s: &str) -> Option<f64> {
    if let Ok(v) = s.parse::<f64>() {
        return Some(v);
    }
    let bytes = s.as_bytes();
    let split = (1..bytes.len()).rev().find(|&i| {
        matches!(bytes[i], b'-' | b'+') && !matches!(bytes[i - 1], b'e' | b'E')
    })?;
    format!("{}E{}", &s[..split], &s[split..]).parse().ok()
}

pub fn read_posterior(path: &Path, ndim: usize) -> Result<DMatrix<f64>, AppError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| AppError::inference(format!("Failed to read posterior '{}': {e}", path.display())))?;

    let width = ndim + 2;
    let mut data = Vec::new();
    let mut rows = 0;
    for (idx, line) in text.lines().enumerate() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        if fields.len() != width {
            return Err(AppError::inference(format!(
                "Posterior '{}' line {}: {} columns, expected {width}.",
                path.display(),
                idx + 1,
                fields.len()
            )));
        }
        for f in fields {
            data.push(parse_fortran_float(f).ok_or_else(|| {
                AppError::inference(format!(
                    "Posterior '{}' line {}: bad number '{f}'.",
                    path.display(),
                    idx + 1
                ))
            })?);
        }
        rows += 1;
    }
    Ok(DMatrix::from_row_slice(rows, width, &data))
}

pub fn read_evidence(path: &Path) -> Result<f64, AppError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| AppError::inference(format!("Failed to read stats '{}': {e}", path.display())))?;
    text.lines()
        .find(|l| l.contains("Global Log-Evidence"))
        .and_then(|l| l.split_once(':'))
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .and_then(parse_fortran_float)
        .ok_or_else(|| {
            AppError::inference(format!("No global log-evidence in '{}'.", path.display()))
        })
}
