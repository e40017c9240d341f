//! Physical derivation engine.
//!
//! Turns a finished posterior into everything a `FitResult` reports: scaled
//! observations, model flux distributions, residuals, photometry in every
//! library filter, component spectra and the star / disk physical quantities.
//!
//! All distributions are evaluated on the same posterior draw, so quantities
//! combined sample-by-sample (e.g. `ldisk / lstar`) keep their correlations.

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::ops::Range;

use nalgebra::DMatrix;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution as _, Normal};
use rayon::prelude::*;

use crate::domain::{
    ComponentKind, DiskResult, Distribution, FluxEstimate, ModelComponents,
    ModelsConfig, ObsKeywords, ParamEstimate, Spectrum, StarResult,
};
use crate::error::AppError;
use crate::fit::context::ComputationContext;
use crate::fit::inference::{Marginals, PosteriorDraw};
use crate::math::{Axis, reduce, reduce_estimate, reduce_matrix_estimate, reduce_stack_estimate};
use crate::models::ModelLibrary;

/// Parsec, m.
pub const PC_M: f64 = 3.085_677_581_491_367e16;
/// Nominal solar luminosity, W.
pub const L_SUN_W: f64 = 3.828e26;
/// Nominal solar radius, m.
pub const R_SUN_M: f64 = 6.957e8;
/// Blackbody dust temperature at 1 au from the Sun, K.
pub const T_BB_1AU: f64 = 278.3;

const LOG_PREFIX: &str = "log_";

/// Irradiance (W m⁻²) to luminosity at 1 pc (L☉).
pub fn lum_1pc(irradiance: f64) -> f64 {
    irradiance * 4.0 * PI * PC_M * PC_M / L_SUN_W
}

/// Everything derived from one posterior.
#[derive(Debug, Clone)]
pub struct Derivation {
    pub obs_fnujy: Vec<f64>,
    pub obs_e_fnujy: Vec<f64>,
    pub model_fnujy: FluxEstimate,
    pub model_comp_fnujy: Vec<FluxEstimate>,
    pub residuals: Vec<f64>,
    pub chisq: f64,
    pub dof: i64,
    pub all_filters: Vec<String>,
    pub all_phot: FluxEstimate,
    pub star_phot: Option<FluxEstimate>,
    pub disk_phot: Option<FluxEstimate>,
    pub comp_spectra: Vec<Spectrum>,
    pub star_spec: Option<Spectrum>,
    pub disk_spec: Option<Spectrum>,
    pub star: Vec<StarResult>,
    pub disk_r: Vec<DiskResult>,
    pub distributions: BTreeMap<String, Distribution>,
}

/// Truncated-normal parallax draw in arcsec, or `None` without a usable
/// parallax. Values at or below zero are redrawn.
pub fn parallax_samples(keywords: &ObsKeywords, n: usize, seed: u64) -> Result<Option<Vec<f64>>, AppError> {
    let Some((plx_mas, err_mas)) = keywords.usable_parallax() else {
        return Ok(None);
    };
    let normal = Normal::new(plx_mas / 1e3, err_mas / 1e3)
        .map_err(|e| AppError::input(format!("Parallax distribution error: {e}")))?;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
        let v = normal.sample(&mut rng);
        if v > 0.0 {
            out.push(v);
        }
    }
    Ok(Some(out))
}

pub fn derive(
    ctx: &ComputationContext,
    components: &ModelComponents,
    marginals: &Marginals,
    draw: &PosteriorDraw,
    library: &dyn ModelLibrary,
    models: &ModelsConfig,
    seed: u64,
) -> Result<Derivation, AppError> {
    let weights = &draw.weights;
    let n = draw.len();
    let best = &marginals.median;
    let mut distributions = BTreeMap::new();

    let plx = parallax_samples(&ctx.observations.keywords, n, seed)?;
    if let Some(p) = &plx {
        distributions.insert("parallax".to_string(), Distribution::Scalar(p.clone()));
    }

    // Observations, scaled by the best-fit spectrum normalisations.
    let scale = ctx.obs_scale(best);
    let obs_fnujy: Vec<f64> = ctx.obs.fnujy.iter().zip(&scale).map(|(f, s)| f * s).collect();
    let obs_e_fnujy: Vec<f64> = ctx.obs.e_fnujy.iter().zip(&scale).map(|(e, s)| e * s).collect();

    // Model flux at the observed points, per sample.
    let evaluated: Vec<(Vec<f64>, Vec<Vec<f64>>)> =
        draw.params.par_iter().map(|p| ctx.model_fluxes(p)).collect();
    let npts = ctx.npoints();
    let model_dist = DMatrix::from_fn(npts, n, |k, j| evaluated[j].0[k]);
    let comp_dist: Vec<DMatrix<f64>> = (0..ctx.models.len())
        .map(|i| DMatrix::from_fn(npts, n, |k, j| evaluated[j].1[i][k]))
        .collect();
    let model_fnujy = reduce_matrix_estimate(weights, &model_dist, Axis::Columns)?;
    let model_comp_fnujy = reduce_stack_estimate(weights, &comp_dist)?;
    distributions.insert("model_fnujy".to_string(), Distribution::Matrix(model_dist));
    distributions.insert("model_comp_fnujy".to_string(), Distribution::Stack(comp_dist));

    let residuals = ctx.residuals(best);
    let chisq: f64 = residuals.iter().map(|r| r * r).sum();
    let dof = npts as i64 - ctx.ndim() as i64 - 1;

    // Photometry in every filter all components can evaluate.
    let all_filters: Vec<String> = library
        .filters()
        .into_iter()
        .filter(|f| ctx.models.iter().all(|m| m.has_filter(f)))
        .collect();
    let slots = ctx
        .models
        .iter()
        .map(|m| m.filter_slots(&all_filters))
        .collect::<Result<Vec<_>, _>>()?;
    let per_sample: Vec<Vec<Vec<f64>>> = draw
        .params
        .par_iter()
        .map(|p| {
            ctx.models
                .iter()
                .enumerate()
                .map(|(i, m)| m.fluxes(&slots[i], &p[ctx.comp_range(i)]))
                .collect()
        })
        .collect();
    let nf = all_filters.len();
    let sum_kind = |kind: Option<ComponentKind>| {
        DMatrix::from_fn(nf, n, |k, j| {
            components
                .kinds()
                .iter()
                .enumerate()
                .filter(|(_, c)| kind.is_none_or(|want| **c == want))
                .map(|(i, _)| per_sample[j][i][k])
                .sum::<f64>()
        })
    };
    let all_dist = sum_kind(None);
    let all_phot = reduce_matrix_estimate(weights, &all_dist, Axis::Columns)?;
    distributions.insert("all_phot".to_string(), Distribution::Matrix(all_dist));

    let mut star_phot = None;
    let mut disk_phot = None;
    for (kind, key, slot) in [
        (ComponentKind::Star, "star_phot", &mut star_phot),
        (ComponentKind::Disk, "disk_phot", &mut disk_phot),
    ] {
        if components.kinds().contains(&kind) {
            let dist = sum_kind(Some(kind));
            *slot = Some(reduce_matrix_estimate(weights, &dist, Axis::Columns)?);
            distributions.insert(key.to_string(), Distribution::Matrix(dist));
        }
    }

    // Component spectra at the best fit.
    let wave = models.default_wavelengths()?;
    let comp_spectra: Vec<Spectrum> = ctx
        .models
        .iter()
        .enumerate()
        .map(|(i, m)| m.spectrum(&wave, &best[ctx.comp_range(i)]))
        .collect();
    let star_spec = summed_spectrum(&wave, &comp_spectra, components, ComponentKind::Star);
    let disk_spec = summed_spectrum(&wave, &comp_spectra, components, ComponentKind::Disk);

    // Star results; the summed star luminosity feeds the disk results.
    let mut star = Vec::new();
    let mut lstar_1pc_tot = vec![0.0; n];
    for (i, (name, kind)) in components.iter().enumerate() {
        if kind != ComponentKind::Star {
            continue;
        }
        let range = ctx.comp_range(i);
        let lstar_1pc = luminosity_samples(ctx, i, draw);
        for (t, l) in lstar_1pc_tot.iter_mut().zip(&lstar_1pc) {
            *t += l;
        }

        let mut dists = BTreeMap::new();
        let mut lstar = None;
        let mut rstar = None;
        if let Some(p) = &plx {
            let norm_col = draw.column(range.end - 1);
            let l: Vec<f64> = lstar_1pc.iter().zip(p).map(|(l, p)| l / (p * p)).collect();
            let r: Vec<f64> = norm_col
                .iter()
                .zip(p)
                .map(|(norm, p)| (models.solid_angle_sr * 10f64.powf(*norm) / PI).sqrt() * PC_M / p / R_SUN_M)
                .collect();
            lstar = Some(reduce_estimate(weights, &l)?);
            rstar = Some(reduce_estimate(weights, &r)?);
            dists.insert("lstar".to_string(), l);
            dists.insert("rstar".to_string(), r);
        }

        star.push(StarResult {
            component: name.to_string(),
            parameters: param_estimates(&ctx.parameters, range, marginals, draw)?,
            lstar_1pc: reduce_estimate(weights, &lstar_1pc)?,
            plx_arcsec: ctx
                .observations
                .keywords
                .usable_parallax()
                .map(|(v, e)| (v / 1e3, e / 1e3)),
            lstar,
            rstar,
            distributions: {
                dists.insert("lstar_1pc".to_string(), lstar_1pc);
                dists
            },
        });
    }
    let star_lum_known = components.has_star() && lstar_1pc_tot.iter().sum::<f64>() > 0.0;
    if components.has_star() {
        distributions.insert(
            "lstar_1pc_tot".to_string(),
            Distribution::Scalar(lstar_1pc_tot.clone()),
        );
    }

    // Disk results, for disks modelled with a radius-dependent temperature.
    let mut disk_r = Vec::new();
    for (i, (name, kind)) in components.iter().enumerate() {
        if kind != ComponentKind::Disk || !models.is_disk_r(name) {
            continue;
        }
        let range = ctx.comp_range(i);
        let ldisk_1pc = luminosity_samples(ctx, i, draw);
        let mut dists = BTreeMap::new();

        let mut ldisk_lstar = None;
        if star_lum_known {
            let frac: Vec<f64> = ldisk_1pc.iter().zip(&lstar_1pc_tot).map(|(d, s)| d / s).collect();
            ldisk_lstar = Some(reduce_estimate(weights, &frac)?);
            dists.insert("ldisk_lstar".to_string(), frac);
        }

        let temp = temperature_samples(&ctx.parameters, range.clone(), draw);
        let mut rdisk_bb = None;
        if let (Some(p), Some(t), true) = (&plx, &temp, star_lum_known) {
            let r: Vec<f64> = (0..n)
                .map(|j| {
                    let lstar = lstar_1pc_tot[j] / (p[j] * p[j]);
                    lstar.sqrt() * (T_BB_1AU / t[j]).powi(2)
                })
                .collect();
            rdisk_bb = Some(reduce_estimate(weights, &r)?);
            dists.insert("rdisk_bb".to_string(), r);
        }
        if let Some(t) = temp {
            dists.insert("Temp".to_string(), t);
        }

        disk_r.push(DiskResult {
            component: name.to_string(),
            parameters: param_estimates(&ctx.parameters, range, marginals, draw)?,
            ldisk_1pc: reduce_estimate(weights, &ldisk_1pc)?,
            ldisk_lstar,
            rdisk_bb,
            distributions: {
                dists.insert("ldisk_1pc".to_string(), ldisk_1pc);
                dists
            },
        });
    }

    Ok(Derivation {
        obs_fnujy,
        obs_e_fnujy,
        model_fnujy,
        model_comp_fnujy,
        residuals,
        chisq,
        dof,
        all_filters,
        all_phot,
        star_phot,
        disk_phot,
        comp_spectra,
        star_spec,
        disk_spec,
        star,
        disk_r,
        distributions,
    })
}

/// Luminosity at 1 pc (L☉) of component `i` for every drawn sample.
fn luminosity_samples(ctx: &ComputationContext, i: usize, draw: &PosteriorDraw) -> Vec<f64> {
    let range = ctx.comp_range(i);
    let model = &ctx.models[i];
    draw.params
        .par_iter()
        .map(|p| lum_1pc(model.irradiance(&p[range.clone()])))
        .collect()
}

/// Dust temperature samples from a `Temp` or `log_Temp` parameter.
fn temperature_samples(names: &[String], range: Range<usize>, draw: &PosteriorDraw) -> Option<Vec<f64>> {
    range.into_iter().find_map(|j| match names[j].as_str() {
        "Temp" => Some(draw.column(j)),
        "log_Temp" => Some(draw.column(j).into_iter().map(|v| 10f64.powf(v)).collect()),
        _ => None,
    })
}

/// Reported estimates for the parameters in `range`.
///
/// `log_` parameters are reported under their bare name with value and
/// sigma exponentiated; lo/hi come from the exponentiated samples.
fn param_estimates(
    names: &[String],
    range: Range<usize>,
    marginals: &Marginals,
    draw: &PosteriorDraw,
) -> Result<Vec<ParamEstimate>, AppError> {
    range
        .map(|j| {
            let column = draw.column(j);
            let (name, value, sigma, samples) = match names[j].strip_prefix(LOG_PREFIX) {
                Some(bare) => (
                    bare.to_string(),
                    10f64.powf(marginals.median[j]),
                    10f64.powf(marginals.sigma[j]),
                    column.iter().map(|v| 10f64.powf(*v)).collect(),
                ),
                None => (
                    names[j].clone(),
                    marginals.median[j],
                    marginals.sigma[j],
                    column,
                ),
            };
            let (lo, _, hi) = reduce(&draw.weights, &samples)?;
            Ok(ParamEstimate {
                name,
                value,
                sigma,
                lo: (value - lo).max(0.0),
                hi: (hi - value).max(0.0),
            })
        })
        .collect()
}

fn summed_spectrum(
    wave: &[f64],
    spectra: &[Spectrum],
    components: &ModelComponents,
    kind: ComponentKind,
) -> Option<Spectrum> {
    let mut total = vec![0.0; wave.len()];
    let mut any = false;
    for (s, k) in spectra.iter().zip(components.kinds()) {
        if *k == kind {
            any = true;
            for (t, v) in total.iter_mut().zip(&s.fnujy) {
                *t += v;
            }
        }
    }
    if !any || total.iter().all(|v| *v == 0.0) {
        return None;
    }
    Some(Spectrum::new(wave.to_vec(), total))
}
