//! Model selection across component families.
//!
//! Families are fitted in configured order (simplest first). Fitting stops
//! early once a multi-component family fails to reach the best evidence seen
//! so far: a more complex model that does not help is not worth extending.
//!
//! Ranking (`sort_results`) is pairwise. A model with `d` more free
//! parameters must beat a simpler one by more than `margin · d` in log
//! evidence; between equally complex models the higher evidence wins. Models
//! are ordered by number of pairwise wins, then evidence, then input order.

use std::cmp::Ordering;
use std::path::Path;

use crate::domain::{FitResult, ResultSet};
use crate::error::{AppError, ErrorKind};
use crate::fit::fitter::{FitOptions, Fitter};

/// Fit every configured family to one target.
///
/// `Ok(None)` when the target has no photometry or no family could be fitted.
pub fn fit_results(
    fitter: &Fitter,
    rawphot: &Path,
    opts: &FitOptions,
    sort: bool,
) -> Result<Option<ResultSet>, AppError> {
    let families = &fitter.config().fitting.families;
    let mut results: ResultSet = Vec::with_capacity(families.len());
    let mut best_evidence = f64::NEG_INFINITY;

    for family in families {
        let result = match fitter.get(rawphot, family, opts) {
            Ok(r) => r,
            Err(e) if e.kind() == ErrorKind::NoPhotometry => {
                tracing::info!(file = %rawphot.display(), "no photometry, skipping target");
                return Ok(None);
            }
            Err(e) if e.kind() == ErrorKind::Config => {
                tracing::warn!(family = %family.join("+"), error = %e, "skipping model family");
                continue;
            }
            Err(e) => return Err(e),
        };

        let evidence = result.evidence;
        results.push(result);
        if family.len() > 1 && evidence < best_evidence {
            tracing::debug!(family = %family.join("+"), evidence, best_evidence, "evidence stopped improving");
            break;
        }
        best_evidence = best_evidence.max(evidence);
    }

    if results.is_empty() {
        tracing::warn!(file = %rawphot.display(), "no model family could be fitted");
        return Ok(None);
    }

    if sort {
        let margin = fitter.config().fitting.ev_threshold;
        results = sort_results(results, margin);
    }
    Ok(Some(results))
}

/// True when model `a` beats model `b`.
fn beats(ev_a: f64, ndim_a: usize, ev_b: f64, ndim_b: usize, margin: f64) -> bool {
    let d = ndim_a as f64 - ndim_b as f64;
    match d.partial_cmp(&0.0) {
        Some(Ordering::Greater) => ev_a - ev_b > margin * d,
        Some(Ordering::Less) => ev_b - ev_a <= margin * -d,
        _ => ev_a > ev_b,
    }
}

/// Ranking of (evidence, ndim) pairs, best first; returns input indices.
pub fn sort_evidence(evidence: &[f64], ndim: &[usize], margin: f64) -> Vec<usize> {
    let n = evidence.len().min(ndim.len());
    let wins: Vec<usize> = (0..n)
        .map(|a| {
            (0..n)
                .filter(|&b| b != a && beats(evidence[a], ndim[a], evidence[b], ndim[b], margin))
                .count()
        })
        .collect();

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        wins[b]
            .cmp(&wins[a])
            .then_with(|| evidence[b].total_cmp(&evidence[a]))
            .then_with(|| a.cmp(&b))
    });
    order
}

/// Results reordered best first.
pub fn sort_results(results: ResultSet, margin: f64) -> ResultSet {
    let evidence: Vec<f64> = results.iter().map(|r| r.evidence).collect();
    let ndim: Vec<usize> = results.iter().map(|r| r.ndim).collect();
    let order = sort_evidence(&evidence, &ndim, margin);

    let mut slots: Vec<Option<FitResult>> = results.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}
