//! Per-target text report (`<dir>/index.txt`) and run summaries.

pub mod format;

use std::path::{Path, PathBuf};

use crate::domain::FitResult;
use crate::error::AppError;
use crate::fit::cache::needs_refresh;

pub use format::{format_index, format_run_summary, main_results_text};

/// Per-run target counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub targets: usize,
    pub fitted: usize,
    pub up_to_date: usize,
    pub no_photometry: usize,
    pub locked: usize,
    pub failed: usize,
}

pub fn index_path(dir: &Path) -> PathBuf {
    dir.join("index.txt")
}

/// Rewrite `index.txt` if it is older than any result's cache artifact (or
/// `force`). Returns whether the file was written.
pub fn write_index(results: &[FitResult], force: bool) -> Result<bool, AppError> {
    let Some(best) = results.first() else {
        return Ok(false);
    };
    let path = index_path(&best.locator.path);
    let stale = force || results.iter().any(|r| needs_refresh(&path, &r.locator.artifact, false));
    if !stale {
        tracing::debug!(path = %path.display(), "report up to date");
        return Ok(false);
    }

    std::fs::write(&path, format_index(results))
        .map_err(|e| AppError::io(format!("Failed to write report '{}': {e}", path.display())))?;
    Ok(true)
}
