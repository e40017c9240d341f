//! Target discovery and the per-target workflow shared by every run mode:
//!
//! lock -> quick check -> fit all families -> report -> export
//!
//! Targets are independent and run in parallel; families within a target
//! are fitted in order by `fit_results`.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use rayon::prelude::*;

use crate::domain::RAWPHOT_SUFFIX;
use crate::error::AppError;
use crate::fit::cache::{mtime, needs_refresh};
use crate::fit::{FitOptions, Fitter, fit_results};
use crate::io::{LockOutcome, export, try_lock};
use crate::report::{self, RunSummary};

/// What to do for each target beyond fitting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSettings {
    pub fit: FitOptions,
    pub report: bool,
    pub export: bool,
    pub force_report: bool,
    pub force_export: bool,
    pub quick_update_check: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOutcome {
    Fitted,
    /// Skipped by the quick update check.
    UpToDate,
    NoPhotometry,
    /// Another process holds the target lock.
    Locked,
}

/// Every `*-rawphot.txt` below `dir` whose parent directory name matches
/// `subset`, sorted.
pub fn rawphot_files(dir: &Path, subset: &str) -> Result<Vec<PathBuf>, AppError> {
    let mut out = Vec::new();
    walk(dir, &mut |path| {
        let is_rawphot = path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().ends_with(RAWPHOT_SUFFIX));
        let in_subset = path
            .parent()
            .and_then(Path::file_name)
            .is_some_and(|n| wildcard_match(subset, &n.to_string_lossy()));
        if is_rawphot && in_subset {
            out.push(path.to_path_buf());
        }
    })?;
    out.sort();
    Ok(out)
}

fn walk(dir: &Path, visit: &mut dyn FnMut(&Path)) -> Result<(), AppError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| AppError::io(format!("Failed to read directory '{}': {e}", dir.display())))?;
    for entry in entries {
        let entry = entry.map_err(|e| AppError::io(format!("Failed to read '{}': {e}", dir.display())))?;
        let path = entry.path();
        if path.is_dir() {
            walk(&path, visit)?;
        } else {
            visit(&path);
        }
    }
    Ok(())
}

/// `*` matches any run of characters; everything else is literal.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }

    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if !name.starts_with(first) || name.len() < first.len() + last.len() || !name.ends_with(last) {
        return false;
    }
    let mut rest = &name[first.len()..name.len() - last.len()];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(i) => rest = &rest[i + part.len()..],
            None => return false,
        }
    }
    true
}

/// Target ids listed one per line in `<sdb_root>/samples/<name>.txt`.
pub fn sample_targets(sdb_root: &Path, name: &str) -> Result<Vec<String>, AppError> {
    let path = sdb_root.join("samples").join(format!("{name}.txt"));
    let text = std::fs::read_to_string(&path)
        .map_err(|e| AppError::input(format!("Failed to read sample '{}': {e}", path.display())))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Rawphot files for every target in the named samples, found under
/// `<sdb_root>/masters/<id>/`.
pub fn sample_files(sdb_root: &Path, samples: &[String]) -> Result<Vec<PathBuf>, AppError> {
    let mut out = Vec::new();
    for sample in samples {
        for id in sample_targets(sdb_root, sample)? {
            let dir = sdb_root.join("masters").join(&id);
            if !dir.is_dir() {
                tracing::warn!(target_id = %id, sample = %sample, "no masters directory for target");
                continue;
            }
            out.extend(rawphot_files(&dir, "*")?);
        }
    }
    Ok(out)
}

/// True when `index.txt` exists and no file in the target directory is newer.
pub fn quick_check_current(dir: &Path) -> bool {
    let Some(t_index) = mtime(&report::index_path(dir)) else {
        return false;
    };
    let mut newest = SystemTime::UNIX_EPOCH;
    let walked = walk(dir, &mut |path| {
        let is_lock = path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with(".sdf_lock-"));
        if !is_lock {
            if let Some(t) = mtime(path) {
                newest = newest.max(t);
            }
        }
    });
    walked.is_ok() && t_index >= newest
}

/// Lock, fit and write outputs for one target.
pub fn process_target(fitter: &Fitter, rawphot: &Path, settings: &RunSettings) -> Result<TargetOutcome, AppError> {
    let _guard = match try_lock(rawphot)? {
        LockOutcome::Acquired(guard) => guard,
        LockOutcome::Held => {
            tracing::debug!(file = %rawphot.display(), "target locked, skipping");
            return Ok(TargetOutcome::Locked);
        }
    };

    let dir = rawphot.parent().unwrap_or_else(|| Path::new("."));
    if settings.quick_update_check && quick_check_current(dir) {
        tracing::info!(file = %rawphot.display(), "no files newer than index.txt");
        return Ok(TargetOutcome::UpToDate);
    }

    tracing::info!(file = %rawphot.display(), "fitting target");
    let Some(results) = fit_results(fitter, rawphot, &settings.fit, true)? else {
        return Ok(TargetOutcome::NoPhotometry);
    };

    if settings.report && report::write_index(&results, settings.force_report)? {
        tracing::debug!(file = %rawphot.display(), "wrote index.txt");
    }
    if settings.export {
        let best = &results[0];
        let path = export::export_path(best);
        if needs_refresh(&path, &best.locator.artifact, settings.force_export) {
            export::write_best_json(&results)?;
        }
    }
    Ok(TargetOutcome::Fitted)
}

/// Process every target on a pool of `jobs` threads (rayon default if
/// `None`). Per-target failures are logged and counted, never fatal.
pub fn run_targets(
    fitter: &Fitter,
    targets: &[PathBuf],
    settings: &RunSettings,
    jobs: Option<usize>,
) -> Result<RunSummary, AppError> {
    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(n) = jobs {
        builder = builder.num_threads(n);
    }
    let pool = builder
        .build()
        .map_err(|e| AppError::config(format!("Failed to start worker pool: {e}")))?;

    let outcomes: Vec<Result<TargetOutcome, AppError>> = pool.install(|| {
        targets
            .par_iter()
            .map(|t| {
                let outcome = process_target(fitter, t, settings);
                if let Err(e) = &outcome {
                    tracing::error!(file = %t.display(), error = %e, "target failed");
                }
                outcome
            })
            .collect()
    });

    let mut summary = RunSummary {
        targets: targets.len(),
        ..RunSummary::default()
    };
    for outcome in outcomes {
        match outcome {
            Ok(TargetOutcome::Fitted) => summary.fitted += 1,
            Ok(TargetOutcome::UpToDate) => summary.up_to_date += 1,
            Ok(TargetOutcome::NoPhotometry) => summary.no_photometry += 1,
            Ok(TargetOutcome::Locked) => summary.locked += 1,
            Err(_) => summary.failed += 1,
        }
    }
    Ok(summary)
}
