//! Inference driver.
//!
//! Decides whether the sampler has to run for a (target, model family) pair,
//! runs it through an `InferenceEngine` when its output is missing or stale,
//! and turns the posterior table into marginals and a reproducible subsample.
//!
//! Posterior table layout, one row per sample:
//!
//! ```text
//! weight  -2·lnL  p_0 ... p_{ndim-1}
//! ```

use std::path::Path;

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::domain::CacheLocator;
use crate::error::AppError;
use crate::fit::cache::mtime;
use crate::fit::context::ComputationContext;
use crate::math::reduce;

/// Raw output of a finished sampler run.
#[derive(Debug, Clone)]
pub struct SamplerOutput {
    pub evidence: f64,
    pub table: DMatrix<f64>,
}

/// The external Bayesian sampler.
///
/// `run` is only called when the marker file is missing; it must leave
/// `<workdir>/<base>` prefixed output behind, including the marker. `load`
/// reads a finished run back.
pub trait InferenceEngine: Send + Sync {
    fn run(&self, ctx: &ComputationContext, workdir: &Path, base: &str) -> Result<(), AppError>;
    fn load(&self, base: &Path, ndim: usize) -> Result<SamplerOutput, AppError>;
}

/// Posterior of one finished run.
#[derive(Debug, Clone)]
pub struct Posterior {
    pub evidence: f64,
    pub ndim: usize,
    table: DMatrix<f64>,
}

/// Marginal median and symmetrised 1σ per parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Marginals {
    pub median: Vec<f64>,
    pub sigma: Vec<f64>,
}

/// Rows drawn uniformly (with replacement) from the posterior table.
#[derive(Debug, Clone)]
pub struct PosteriorDraw {
    pub weights: Vec<f64>,
    pub params: Vec<Vec<f64>>,
}

impl PosteriorDraw {
    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Parameter `j` across all drawn samples.
    pub fn column(&self, j: usize) -> Vec<f64> {
        self.params.iter().map(|p| p[j]).collect()
    }
}

impl Posterior {
    pub fn new(output: SamplerOutput, ndim: usize) -> Result<Self, AppError> {
        let SamplerOutput { evidence, table } = output;
        if table.nrows() == 0 {
            return Err(AppError::inference("Sampler produced an empty posterior."));
        }
        if table.ncols() != ndim + 2 {
            return Err(AppError::inference(format!(
                "Posterior has {} columns, expected {} (weight, -2lnL and {ndim} parameters).",
                table.ncols(),
                ndim + 2
            )));
        }
        if !evidence.is_finite() {
            return Err(AppError::inference("Sampler reported a non-finite evidence."));
        }
        Ok(Self {
            evidence,
            ndim,
            table,
        })
    }

    pub fn nrows(&self) -> usize {
        self.table.nrows()
    }

    pub fn weights(&self) -> Vec<f64> {
        self.table.column(0).iter().copied().collect()
    }

    pub fn param_column(&self, j: usize) -> Vec<f64> {
        self.table.column(j + 2).iter().copied().collect()
    }

    pub fn marginals(&self) -> Result<Marginals, AppError> {
        let w = self.weights();
        let mut median = Vec::with_capacity(self.ndim);
        let mut sigma = Vec::with_capacity(self.ndim);
        for j in 0..self.ndim {
            let (lo, med, hi) = reduce(&w, &self.param_column(j))?;
            median.push(med);
            sigma.push((hi - lo) / 2.0);
        }
        Ok(Marginals { median, sigma })
    }

    /// `n` rows drawn uniformly at random; same seed, same draw.
    pub fn draw(&self, n: usize, seed: u64) -> PosteriorDraw {
        let mut rng = StdRng::seed_from_u64(seed);
        let rows = self.table.nrows();
        let mut weights = Vec::with_capacity(n);
        let mut params = Vec::with_capacity(n);
        for _ in 0..n {
            let i = rng.gen_range(0..rows);
            weights.push(self.table[(i, 0)]);
            params.push((0..self.ndim).map(|j| self.table[(i, j + 2)]).collect());
        }
        PosteriorDraw { weights, params }
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(hash: u64, bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(hash, |h, &b| (h ^ u64::from(b)).wrapping_mul(FNV_PRIME))
}

/// Seed for the draws of one (target, model family) pair.
///
/// FNV-1a over the base seed, target id and base name, so the value is the
/// same on every platform and toolchain.
pub fn draw_seed(base_seed: u64, locator: &CacheLocator) -> u64 {
    let base = base_file_name(locator).unwrap_or_default();
    let mut h = fnv1a(FNV_OFFSET, &base_seed.to_le_bytes());
    h = fnv1a(h, locator.id.as_bytes());
    // Separator so ("ab", "c") and ("a", "bc") differ.
    h = fnv1a(h, &[0xff]);
    fnv1a(h, base.as_bytes())
}

/// True when existing sampler output predates the input and must be redone.
pub fn needs_rerun(locator: &CacheLocator, input: &Path, force: bool) -> bool {
    if force {
        return true;
    }
    match (mtime(input), mtime(&locator.marker())) {
        (Some(t_input), Some(t_marker)) => t_input > t_marker,
        _ => false,
    }
}

/// Names the sampler and the fitter append to a base. A file belongs to a
/// base only if its name is `<base><suffix>` for one of these, so families
/// whose names share a prefix (`bb_disk` / `bb_disk_r`) never collide.
pub const OUTPUT_SUFFIXES: [&str; 18] = [
    ".txt",
    ".json",
    ".json.tmp",
    "stats.dat",
    "summary.txt",
    "phys_live.points",
    "live.points",
    "post_equal_weights.dat",
    "post_separate.dat",
    "ev.dat",
    "resume.dat",
    "params.json",
    "IS.points",
    "IS.ptprob",
    "IS.iterinfo",
    "problem.json",
    "corner.csv",
    "distributions.csv",
];

fn is_output_of(name: &str, base: &str) -> bool {
    name.strip_prefix(base)
        .is_some_and(|rest| OUTPUT_SUFFIXES.contains(&rest))
}

/// Remove the sampler and diagnostic files of this base.
pub fn delete_outputs(locator: &CacheLocator) -> Result<usize, AppError> {
    let Some(prefix) = base_file_name(locator) else {
        return Ok(0);
    };
    let entries = match std::fs::read_dir(&locator.sampler_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(AppError::io(format!(
                "Failed to read sampler dir '{}': {e}",
                locator.sampler_dir.display()
            )));
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let matches = path
            .file_name()
            .is_some_and(|n| is_output_of(&n.to_string_lossy(), &prefix));
        if matches && path.is_file() {
            std::fs::remove_file(&path).map_err(|e| {
                AppError::io(format!("Failed to remove '{}': {e}", path.display()))
            })?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn base_file_name(locator: &CacheLocator) -> Option<String> {
    locator
        .base
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

/// Make sure a finished sampler run exists for `locator`, then load it.
pub fn infer(
    engine: &dyn InferenceEngine,
    ctx: &ComputationContext,
    locator: &CacheLocator,
    input: &Path,
    force: bool,
    max_base_len: usize,
) -> Result<Posterior, AppError> {
    let base = base_file_name(locator)
        .ok_or_else(|| AppError::inference("Sampler base has no file name."))?;
    if base.len() > max_base_len {
        return Err(AppError::config(format!(
            "Sampler base '{base}' is {} characters, over the limit of {max_base_len}.",
            base.len()
        )));
    }

    std::fs::create_dir_all(&locator.sampler_dir).map_err(|e| {
        AppError::io(format!(
            "Failed to create sampler dir '{}': {e}",
            locator.sampler_dir.display()
        ))
    })?;

    if needs_rerun(locator, input, force) {
        let removed = delete_outputs(locator)?;
        tracing::info!(target_id = %locator.id, base = %base, removed, "discarding stale sampler output");
    }

    let marker = locator.marker();
    if !marker.exists() {
        tracing::info!(target_id = %locator.id, base = %base, ndim = ctx.ndim(), "running sampler");
        engine.run(ctx, &locator.sampler_dir, &base)?;
        if !marker.exists() {
            return Err(AppError::inference(format!(
                "Sampler finished without writing '{}'.",
                marker.display()
            )));
        }
    }

    let output = engine.load(&locator.base, ctx.ndim())?;
    Posterior::new(output, ctx.ndim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FittingConfig, ModelComponents, ModelsConfig};
    use crate::fit::testkit::{self, FakeEngine, FakeLibrary};
    use std::time::{Duration, SystemTime};

    fn posterior(rows: &[[f64; 3]]) -> Posterior {
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        let table = DMatrix::from_row_slice(rows.len(), 3, &flat);
        Posterior::new(SamplerOutput { evidence: 1.0, table }, 1).unwrap()
    }

    #[test]
    fn marginals_use_weighted_median_and_half_band() {
        let p = posterior(&[[1.0, 0.0, 1.0], [1.0, 0.0, 2.0], [1.0, 0.0, 3.0], [1.0, 0.0, 4.0]]);
        let m = p.marginals().unwrap();
        assert!((m.median[0] - 2.5).abs() < 1e-12);
        assert!((m.sigma[0] - (3.86 - 1.14) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn draw_is_reproducible_for_a_seed() {
        let p = posterior(&[[0.1, 0.0, 1.0], [0.2, 0.0, 2.0], [0.7, 0.0, 3.0]]);
        let a = p.draw(50, 7);
        let b = p.draw(50, 7);
        assert_eq!(a.params, b.params);
        assert_eq!(a.weights, b.weights);
        assert_eq!(a.len(), 50);
        // Weights travel with their rows.
        for (w, row) in a.weights.iter().zip(&a.params) {
            assert_eq!(*w, [0.1, 0.2, 0.7][(row[0] as usize) - 1]);
        }
        assert_ne!(p.draw(50, 8).params, a.params);
    }

    #[test]
    fn table_width_must_match_dimension() {
        let table = DMatrix::from_row_slice(1, 3, &[1.0, 0.0, 1.0]);
        let err = Posterior::new(SamplerOutput { evidence: 0.0, table }, 2).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Inference);
    }

    #[test]
    fn runs_once_then_reuses_output_until_input_changes() {
        let dir = tempfile::tempdir().unwrap();
        let raw = testkit::write_rawphot(dir.path(), "T", &[("WISE3", 10.0, 1.0)]);
        let comps = testkit::components(&["star_a"]);
        let locator = CacheLocator::new(&raw, &comps, &FittingConfig::default());
        let ctx = ComputationContext::new(
            testkit::observations(&[("WISE3", 10.0, 1.0)]),
            &comps,
            &FakeLibrary::default(),
        )
        .unwrap();
        let engine = FakeEngine::with_evidence(&[("star_a", 3.0)]);

        let p = infer(&engine, &ctx, &locator, &raw, false, 100).unwrap();
        assert_eq!(p.evidence, 3.0);
        assert_eq!(engine.runs(), 1);

        infer(&engine, &ctx, &locator, &raw, false, 100).unwrap();
        assert_eq!(engine.runs(), 1);

        // A newer input discards the old run.
        let later = SystemTime::now() + Duration::from_secs(60);
        std::fs::File::options()
            .append(true)
            .open(&raw)
            .unwrap()
            .set_modified(later)
            .unwrap();
        infer(&engine, &ctx, &locator, &raw, false, 100).unwrap();
        assert_eq!(engine.runs(), 2);

        infer(&engine, &ctx, &locator, &raw, true, 100).unwrap();
        assert_eq!(engine.runs(), 3);
    }

    #[test]
    fn overlong_base_is_rejected_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let raw = testkit::write_rawphot(dir.path(), "T", &[("WISE3", 10.0, 1.0)]);
        let comps = testkit::components(&["star_a", "disk_a"]);
        let locator = CacheLocator::new(&raw, &comps, &FittingConfig::default());
        let ctx = ComputationContext::new(
            testkit::observations(&[("WISE3", 10.0, 1.0)]),
            &comps,
            &FakeLibrary::default(),
        )
        .unwrap();
        let engine = FakeEngine::with_evidence(&[]);

        assert!(infer(&engine, &ctx, &locator, &raw, false, 5).is_err());
        assert_eq!(engine.runs(), 0);
    }

    #[test]
    fn draw_seed_is_a_fixed_function_of_its_inputs() {
        assert_eq!(fnv1a(FNV_OFFSET, b""), FNV_OFFSET);
        assert_eq!(fnv1a(FNV_OFFSET, b"a"), 0xaf63_dc4c_8601_ec8c);

        let fitting = FittingConfig::default();
        let raw = Path::new("/d/T/T-rawphot.txt");
        let star = CacheLocator::new(raw, &testkit::components(&["star_a"]), &fitting);
        let both = CacheLocator::new(raw, &testkit::components(&["star_a", "disk_a"]), &fitting);
        assert_eq!(draw_seed(42, &star), 17_912_445_460_142_973_175);
        assert_ne!(draw_seed(42, &star), draw_seed(43, &star));
        assert_ne!(draw_seed(42, &star), draw_seed(42, &both));
    }

    #[test]
    fn delete_outputs_only_touches_matching_base() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("T-rawphot.txt");
        let locator = CacheLocator::new(
            &raw,
            &testkit::components(&["star_a"]),
            &FittingConfig::default(),
        );
        std::fs::create_dir_all(&locator.sampler_dir).unwrap();
        for name in ["star_a_.txt", "star_a_phys_live.points", "star_a+disk_a_.txt"] {
            std::fs::write(locator.sampler_dir.join(name), "").unwrap();
        }
        assert_eq!(delete_outputs(&locator).unwrap(), 2);
        assert!(locator.sampler_dir.join("star_a+disk_a_.txt").exists());
    }

    #[test]
    fn delete_outputs_spares_family_sharing_a_name_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("T-rawphot.txt");
        let models = ModelsConfig {
            star: vec!["phoenix_m".to_string()],
            disk: vec!["bb_disk".to_string(), "bb_disk_r".to_string()],
            ..ModelsConfig::default()
        };
        let comps = ModelComponents::classify(&["phoenix_m", "bb_disk"], &models).unwrap();
        let locator = CacheLocator::new(&raw, &comps, &FittingConfig::default());
        std::fs::create_dir_all(&locator.sampler_dir).unwrap();
        for name in [
            "phoenix_m+bb_disk_phys_live.points",
            "phoenix_m+bb_disk_.json",
            "phoenix_m+bb_disk_r_phys_live.points",
            "phoenix_m+bb_disk_r_.json",
            "phoenix_m+bb_disk_r_.txt",
        ] {
            std::fs::write(locator.sampler_dir.join(name), "").unwrap();
        }

        assert_eq!(delete_outputs(&locator).unwrap(), 2);
        assert!(!locator.marker().exists());
        for name in [
            "phoenix_m+bb_disk_r_phys_live.points",
            "phoenix_m+bb_disk_r_.json",
            "phoenix_m+bb_disk_r_.txt",
        ] {
            assert!(locator.sampler_dir.join(name).exists(), "{name} was removed");
        }
    }
}
