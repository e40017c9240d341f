//! Weighted percentiles of posterior samples.
//!
//! Nested-sampling posteriors carry a non-uniform weight per sample, so every
//! point estimate and uncertainty goes through a weighted percentile rather
//! than a plain one.
//!
//! Convention (weighted Hazen / midpoint rule): with samples sorted ascending
//! and `S_i` the cumulative weight, sample `i` sits at plotting position
//!
//! ```text
//! p_i = (S_i - w_i / 2) / S_n
//! ```
//!
//! and the percentile is linearly interpolated between positions, clamped to
//! the smallest/largest sample outside `[p_1, p_n]`. With uniform weights this
//! is the unweighted Hazen percentile, e.g. the median of `[1, 2, 3, 4]` is
//! `2.5`.

use nalgebra::DMatrix;

use crate::domain::{Estimate, FluxEstimate};
use crate::error::AppError;

/// Percentiles giving the median and the 1σ band.
pub const SIGMA_PERCENTILES: [f64; 3] = [16.0, 50.0, 84.0];

/// Which matrix index the reduction runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// Reduce over rows: one output per column.
    Rows,
    /// Reduce over columns: one output per row.
    Columns,
}

/// Weighted percentiles of a 1-D sample set, one output per requested
/// percentile (in the order given).
///
/// Samples with a non-finite value or a non-positive weight are ignored. If
/// nothing remains the reduction fails with an `EmptyDistribution` error.
pub fn weighted_percentiles(
    weights: &[f64],
    samples: &[f64],
    percentiles: &[f64],
) -> Result<Vec<f64>, AppError> {
    if weights.len() != samples.len() {
        return Err(AppError::empty_distribution(format!(
            "Weight/sample length mismatch: {} weights for {} samples.",
            weights.len(),
            samples.len()
        )));
    }
    if let Some(bad) = percentiles.iter().find(|p| !(0.0..=100.0).contains(*p)) {
        return Err(AppError::config(format!("Percentile {bad} is outside [0, 100].")));
    }

    let mut pairs: Vec<(f64, f64)> = samples
        .iter()
        .zip(weights)
        .filter(|(x, w)| x.is_finite() && w.is_finite() && **w > 0.0)
        .map(|(&x, &w)| (x, w))
        .collect();

    if pairs.is_empty() {
        return Err(AppError::empty_distribution(
            "Weighted percentile of an empty or zero-weight distribution.",
        ));
    }

    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let total: f64 = pairs.iter().map(|(_, w)| w).sum();
    let mut positions = Vec::with_capacity(pairs.len());
    let mut cum = 0.0;
    for (_, w) in &pairs {
        cum += w;
        positions.push((cum - w / 2.0) / total);
    }

    Ok(percentiles
        .iter()
        .map(|&pc| interpolate(&pairs, &positions, pc / 100.0))
        .collect())
}

fn interpolate(pairs: &[(f64, f64)], positions: &[f64], t: f64) -> f64 {
    let last = pairs.len() - 1;
    if t <= positions[0] {
        return pairs[0].0;
    }
    if t >= positions[last] {
        return pairs[last].0;
    }

    // First position at or above t; guaranteed to exist and be > 0 here.
    let i = positions.partition_point(|&p| p < t);
    let (p0, p1) = (positions[i - 1], positions[i]);
    let (x0, x1) = (pairs[i - 1].0, pairs[i].0);
    if p1 <= p0 {
        return x1;
    }
    x0 + (t - p0) / (p1 - p0) * (x1 - x0)
}

/// (p16, p50, p84) of a 1-D sample set.
pub fn reduce(weights: &[f64], samples: &[f64]) -> Result<(f64, f64, f64), AppError> {
    let pc = weighted_percentiles(weights, samples, &SIGMA_PERCENTILES)?;
    Ok((pc[0], pc[1], pc[2]))
}

/// Median with asymmetric 1σ uncertainties.
pub fn reduce_estimate(weights: &[f64], samples: &[f64]) -> Result<Estimate, AppError> {
    let (lo, med, hi) = reduce(weights, samples)?;
    Ok(Estimate::from_percentiles(lo, med, hi))
}

/// Weighted percentiles of a matrix along `axis`.
///
/// Returns one vector per requested percentile; each vector has one entry per
/// row (`Axis::Columns`) or per column (`Axis::Rows`). The weights run along
/// the reduced axis.
pub fn reduce_matrix(
    weights: &[f64],
    samples: &DMatrix<f64>,
    percentiles: &[f64],
    axis: Axis,
) -> Result<Vec<Vec<f64>>, AppError> {
    let (n_out, n_reduce) = match axis {
        Axis::Columns => (samples.nrows(), samples.ncols()),
        Axis::Rows => (samples.ncols(), samples.nrows()),
    };
    if weights.len() != n_reduce {
        return Err(AppError::empty_distribution(format!(
            "Weight/sample length mismatch: {} weights along an axis of {}.",
            weights.len(),
            n_reduce
        )));
    }

    let mut out = vec![Vec::with_capacity(n_out); percentiles.len()];
    let mut lane = Vec::with_capacity(n_reduce);
    for k in 0..n_out {
        lane.clear();
        match axis {
            Axis::Columns => lane.extend(samples.row(k).iter().copied()),
            Axis::Rows => lane.extend(samples.column(k).iter().copied()),
        }
        let pc = weighted_percentiles(weights, &lane, percentiles)?;
        for (o, v) in out.iter_mut().zip(pc) {
            o.push(v);
        }
    }
    Ok(out)
}

/// Median and 1σ band for each lane of a matrix.
pub fn reduce_matrix_estimate(
    weights: &[f64],
    samples: &DMatrix<f64>,
    axis: Axis,
) -> Result<FluxEstimate, AppError> {
    let pc = reduce_matrix(weights, samples, &SIGMA_PERCENTILES, axis)?;
    Ok(FluxEstimate::from_percentiles(&pc[0], &pc[1], &pc[2]))
}

/// Reduce a stack of `points × samples` matrices (e.g. one per component).
pub fn reduce_stack_estimate(
    weights: &[f64],
    stack: &[DMatrix<f64>],
) -> Result<Vec<FluxEstimate>, AppError> {
    stack
        .iter()
        .map(|m| reduce_matrix_estimate(weights, m, Axis::Columns))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn median_of_even_uniform_set() {
        let pc = weighted_percentiles(&[1.0; 4], &[1.0, 2.0, 3.0, 4.0], &[50.0]).unwrap();
        assert!(close(pc[0], 2.5), "got {}", pc[0]);
    }

    #[test]
    fn uniform_weights_match_unweighted_hazen() {
        // Unweighted Hazen: h = n p + 1/2 (1-based), linear interpolation.
        fn hazen(sorted: &[f64], p: f64) -> f64 {
            let n = sorted.len() as f64;
            let h = (n * p + 0.5).clamp(1.0, n);
            let lo = h.floor() as usize;
            let hi = h.ceil() as usize;
            sorted[lo - 1] + (h - lo as f64) * (sorted[hi - 1] - sorted[lo - 1])
        }

        let samples = [5.0, -1.0, 3.5, 2.0, 8.0, 0.5, 4.25];
        let mut sorted: Vec<f64> = samples.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        for w in [1.0, 0.25, 7.0] {
            let weights = vec![w; samples.len()];
            let pcs = [0.0, 10.0, 16.0, 50.0, 84.0, 99.0];
            let got = weighted_percentiles(&weights, &samples, &pcs).unwrap();
            for (g, p) in got.iter().zip(pcs) {
                assert!(close(*g, hazen(&sorted, p / 100.0)), "p={p} got {g}");
            }
        }
    }

    #[test]
    fn sigma_band_of_uniform_set() {
        let (lo, med, hi) = reduce(&[1.0; 4], &[4.0, 3.0, 2.0, 1.0]).unwrap();
        assert!(close(lo, 1.14));
        assert!(close(med, 2.5));
        assert!(close(hi, 3.86));
    }

    #[test]
    fn heavier_weight_pulls_median() {
        let light = weighted_percentiles(&[1.0, 1.0], &[1.0, 2.0], &[50.0]).unwrap()[0];
        let heavy = weighted_percentiles(&[3.0, 1.0], &[1.0, 2.0], &[50.0]).unwrap()[0];
        assert!(close(light, 1.5));
        assert!(heavy < light);
        assert!(close(heavy, 1.25));
    }

    #[test]
    fn zero_weight_samples_are_ignored() {
        let pc = weighted_percentiles(&[0.0, 1.0, 1.0, 0.0], &[100.0, 2.0, 3.0, -5.0], &[50.0])
            .unwrap();
        assert!(close(pc[0], 2.5));
    }

    #[test]
    fn empty_or_zero_weight_is_an_error() {
        let err = weighted_percentiles(&[], &[], &[50.0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyDistribution);

        let err = weighted_percentiles(&[0.0, 0.0], &[1.0, 2.0], &[50.0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyDistribution);
    }

    #[test]
    fn length_mismatch_is_an_error() {
        assert!(weighted_percentiles(&[1.0], &[1.0, 2.0], &[50.0]).is_err());
    }

    #[test]
    fn single_sample_is_every_percentile() {
        let pc = weighted_percentiles(&[0.3], &[7.0], &SIGMA_PERCENTILES).unwrap();
        assert_eq!(pc, vec![7.0, 7.0, 7.0]);
    }

    #[test]
    fn matrix_reduction_along_either_axis() {
        // 2 filters x 4 samples.
        let m = DMatrix::from_row_slice(2, 4, &[1.0, 2.0, 3.0, 4.0, 10.0, 20.0, 30.0, 40.0]);
        let w = [1.0; 4];
        let med = reduce_matrix(&w, &m, &[50.0], Axis::Columns).unwrap();
        assert!(close(med[0][0], 2.5));
        assert!(close(med[0][1], 25.0));

        let t = m.transpose();
        let med_t = reduce_matrix(&w, &t, &[50.0], Axis::Rows).unwrap();
        assert_eq!(med, med_t);

        let est = reduce_matrix_estimate(&w, &m, Axis::Columns).unwrap();
        assert!(close(est.value[1], 25.0));
        assert!(close(est.lo[0], 2.5 - 1.14));
    }

    #[test]
    fn matrix_weights_must_match_reduced_axis() {
        let m = DMatrix::<f64>::zeros(2, 4);
        assert!(reduce_matrix(&[1.0; 2], &m, &[50.0], Axis::Columns).is_err());
    }
}
