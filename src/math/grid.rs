//! Grid helpers: log-spaced axes and interpolation on tabulated grids.

use crate::error::AppError;

/// Generate `steps` log-spaced points between `min` and `max` (inclusive).
pub fn log_space(min: f64, max: f64, steps: usize) -> Result<Vec<f64>, AppError> {
    if !(min.is_finite() && max.is_finite() && min > 0.0 && max > 0.0 && max > min) {
        return Err(AppError::config(format!(
            "Invalid log range: min={min}, max={max} (must be finite, >0, and max>min)."
        )));
    }
    if steps < 2 {
        return Err(AppError::config("Log grid steps must be >= 2."));
    }

    let ln_min = min.ln();
    let ln_max = max.ln();
    let step = (ln_max - ln_min) / (steps as f64 - 1.0);

    let mut out = Vec::with_capacity(steps);
    for i in 0..steps {
        out.push((ln_min + step * i as f64).exp());
    }
    Ok(out)
}

/// Bracketing index and fractional position of `x` on an ascending axis,
/// clamped to the axis ends.
pub fn bracket(axis: &[f64], x: f64) -> (usize, f64) {
    if axis.len() < 2 || x <= axis[0] {
        return (0, 0.0);
    }
    let last = axis.len() - 1;
    if x >= axis[last] {
        return (last - 1, 1.0);
    }
    let i = axis.partition_point(|&a| a <= x).saturating_sub(1).min(last - 1);
    let span = axis[i + 1] - axis[i];
    let f = if span > 0.0 { (x - axis[i]) / span } else { 0.0 };
    (i, f)
}

/// Piecewise-linear interpolation of `(xs, ys)` at `x`, clamped at the ends.
pub fn interp(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    match xs.len() {
        0 => 0.0,
        1 => ys[0],
        _ => {
            let (i, f) = bracket(xs, x);
            ys[i] + f * (ys[i + 1] - ys[i])
        }
    }
}

/// Multilinear interpolation on a regular grid.
///
/// `values` is laid out row-major over `axes` with `stride` trailing values
/// per grid node (e.g. one per filter); the interpolated `stride` values are
/// written to `out`.
pub fn multilinear(axes: &[Vec<f64>], values: &[f64], stride: usize, point: &[f64], out: &mut [f64]) {
    out.iter_mut().for_each(|v| *v = 0.0);

    let brackets: Vec<(usize, f64)> = axes
        .iter()
        .zip(point)
        .map(|(axis, &x)| bracket(axis, x))
        .collect();

    // Walk the 2^d corners of the enclosing cell.
    let dims = axes.len();
    for corner in 0..(1usize << dims) {
        let mut weight = 1.0;
        let mut offset = 0usize;
        for d in 0..dims {
            let (i, f) = brackets[d];
            let upper = (corner >> d) & 1 == 1;
            let idx = if axes[d].len() < 2 {
                0
            } else if upper {
                i + 1
            } else {
                i
            };
            weight *= if upper { f } else { 1.0 - f };
            offset = offset * axes[d].len() + idx;
        }
        if weight == 0.0 {
            continue;
        }
        let node = &values[offset * stride..(offset + 1) * stride];
        for (o, v) in out.iter_mut().zip(node) {
            *o += weight * v;
        }
    }
}
