//! Text formatting for results and run summaries.
//!
//! Formatting lives here so the fitting code never has to care how numbers
//! end up on screen or in `index.txt`.

use crate::domain::{FitResult, Headline};
use crate::report::RunSummary;

/// Order in which headline quantities are reported.
pub const TEXT_ORDER: [&str; 10] = [
    "Teff",
    "lstar",
    "rstar",
    "Temp",
    "rdisk_bb",
    "ldisk_lstar",
    "lam0",
    "beta",
    "Dmin",
    "q",
];

/// Display label and unit for a headline quantity.
pub fn label(key: &str) -> Option<(&'static str, &'static str)> {
    let entry = match key {
        "Teff" => ("T_star", "K"),
        "MH" => ("[M/H]", ""),
        "logg" => ("logg", ""),
        "lstar" => ("L_star", "L_Sun"),
        "rstar" => ("R_star", "R_Sun"),
        "Temp" => ("T_dust", "K"),
        "lam0" => ("λ0", "µm"),
        "beta" => ("β", ""),
        "Dmin" => ("D_min", "µm"),
        "q" => ("q", ""),
        "ldisk_lstar" => ("L_disk/L_star", ""),
        "rdisk_bb" => ("R_BB", "au"),
        _ => return None,
    };
    Some(entry)
}

/// Round `unc` to one significant figure and `value` to the same decimal
/// place. Non-positive or non-finite uncertainties leave both untouched.
pub fn round_1sf(unc: f64, value: f64) -> (f64, f64) {
    if !(unc.is_finite() && unc > 0.0) || !value.is_finite() {
        return (unc, value);
    }
    let scale = 10f64.powi(unc.log10().floor() as i32);
    ((unc / scale).round() * scale, (value / scale).round() * scale)
}

/// `%g`-style formatting: six significant digits, trailing zeros dropped,
/// exponent form below 1e-4 and from 1e6.
pub fn fmt_g(v: f64) -> String {
    if v == 0.0 {
        return "0".to_string();
    }
    if !v.is_finite() {
        return v.to_string();
    }

    let sci = format!("{v:.5e}");
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return sci;
    };
    let exp: i32 = exp.parse().unwrap_or(0);
    if !(-4..6).contains(&exp) {
        let sign = if exp < 0 { '-' } else { '+' };
        return format!("{}e{sign}{:02}", trim_zeros(mantissa), exp.abs());
    }
    let decimals = (5 - exp).max(0) as usize;
    trim_zeros(&format!("{v:.decimals$}")).to_string()
}

fn trim_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// One line per star/disk sub-result, quantities in `TEXT_ORDER`.
pub fn main_results_text(result: &FitResult) -> Vec<String> {
    result
        .main_results()
        .into_iter()
        .map(headline_text)
        .collect()
}

fn headline_text(res: &dyn Headline) -> String {
    let mut parts = Vec::new();
    for key in TEXT_ORDER {
        let (Some((value, unc)), Some((name, unit))) = (res.quantity(key), label(key)) else {
            continue;
        };
        let (unc, value) = round_1sf(unc, value);
        let text = format!("{name} = {} ± {} {unit}", fmt_g(value), fmt_g(unc));
        parts.push(text.trim_end().to_string());
    }
    parts.join(" , ")
}

/// The `index.txt` body for one target. `results` is best first.
pub fn format_index(results: &[FitResult]) -> String {
    let mut out = String::new();
    let Some(best) = results.first() else {
        return out;
    };

    let kw = &best.obs_keywords;
    out.push_str(&format!("=== sdf results: {} ===\n", best.id()));
    if let Some(main_id) = &kw.main_id {
        out.push_str(&format!("main_id : {main_id}\n"));
    }
    if let Some(sp_type) = &kw.sp_type {
        out.push_str(&format!("sp_type : {sp_type}\n"));
    }
    if let (Some(ra), Some(dec)) = (kw.raj2000, kw.dej2000) {
        out.push_str(&format!("radec   : {ra:.6} {dec:+.6}\n"));
    }
    match (kw.plx_value, kw.plx_err) {
        (Some(v), Some(e)) => out.push_str(&format!("plx     : {} ± {} mas\n", fmt_g(v), fmt_g(e))),
        (Some(v), None) => out.push_str(&format!("plx     : {} mas\n", fmt_g(v))),
        _ => {}
    }
    out.push('\n');

    out.push_str(&format!(
        "{:>4}  {:<32} {:>12} {:>5} {:>10} {:>5}\n",
        "rank", "model", "evidence", "ndim", "chisq", "dof"
    ));
    for (rank, r) in results.iter().enumerate() {
        out.push_str(&format!(
            "{:>4}  {:<32} {:>12.3} {:>5} {:>10.3} {:>5}\n",
            rank + 1,
            truncate(&r.components.joined(), 32),
            r.evidence,
            r.ndim,
            r.chisq,
            r.dof
        ));
        let names = r.star.iter().map(|s| &s.component).chain(r.disk_r.iter().map(|d| &d.component));
        for (name, line) in names.zip(main_results_text(r)) {
            if !line.is_empty() {
                out.push_str(&format!("      {name}: {line}\n"));
            }
        }
    }
    out
}

/// End-of-run counts printed by the binary.
pub fn format_run_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    out.push_str("=== sdf run summary ===\n");
    out.push_str(&format!("targets       : {}\n", summary.targets));
    out.push_str(&format!("fitted        : {}\n", summary.fitted));
    out.push_str(&format!("up to date    : {}\n", summary.up_to_date));
    out.push_str(&format!("no photometry : {}\n", summary.no_photometry));
    out.push_str(&format!("locked        : {}\n", summary.locked));
    out.push_str(&format!("failed        : {}\n", summary.failed));
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
