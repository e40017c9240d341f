//! Command-line parsing for the `sdf` fitter.
//!
//! Parsing stays here; target discovery and fitting live in `app`.

use std::path::PathBuf;

use clap::{ArgGroup, Parser};

use crate::fit::FitOptions;

/// Fit SED models to sdb rawphot files.
#[derive(Debug, Parser)]
#[command(name = "sdf", version, about = "Fit SED models to sdb rawphot files")]
#[command(group(ArgGroup::new("targets").required(true).args(["file", "dir", "sample"])))]
pub struct Cli {
    /// Fit these rawphot files.
    #[arg(short = 'f', long, num_args = 1.., value_name = "RAWPHOT")]
    pub file: Vec<PathBuf>,

    /// Fit every `*-rawphot.txt` below these directories.
    #[arg(short = 'd', long, num_args = 1.., value_name = "DIR")]
    pub dir: Vec<PathBuf>,

    /// Fit the targets listed in `<sdb_root>/samples/<NAME>.txt`.
    #[arg(short = 's', long, num_args = 1.., value_name = "NAME")]
    pub sample: Vec<String>,

    /// With `--dir`, only use rawphot files whose directory matches this
    /// name (`*` wildcards allowed).
    #[arg(long, default_value = "*")]
    pub subset: String,

    /// Refit everything, ignoring cached results and sampler output.
    #[arg(short = 'u', long)]
    pub update_all: bool,

    /// Recompute derived quantities but reuse sampler output.
    #[arg(long)]
    pub update_analysis: bool,

    /// Rewrite `index.txt` even if it is up to date.
    #[arg(long)]
    pub update_report: bool,

    /// Rewrite the best-result export even if it is up to date.
    #[arg(long)]
    pub update_export: bool,

    /// Exclude spectra from fitting.
    #[arg(long)]
    pub no_spectra: bool,

    /// Skip a target when `index.txt` is its most recently modified file.
    #[arg(short = 'q', long)]
    pub quick_update_check: bool,

    /// Don't write `index.txt`.
    #[arg(long)]
    pub no_report: bool,

    /// Don't write `<id>-best.json`.
    #[arg(long)]
    pub no_export: bool,

    /// Worker threads (default: one per core).
    #[arg(short = 'j', long)]
    pub jobs: Option<usize>,

    /// TOML config file (else `$SDF_CONFIG`, else defaults).
    #[arg(short = 'c', long, value_name = "TOML")]
    pub config: Option<PathBuf>,

    /// Debug logging.
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl Cli {
    pub fn fit_options(&self) -> FitOptions {
        FitOptions {
            update_fit: self.update_all,
            update_analysis: self.update_all || self.update_analysis,
            no_spectra: self.no_spectra,
        }
    }

    pub fn force_report(&self) -> bool {
        self.update_all || self.update_report
    }

    pub fn force_export(&self) -> bool {
        self.update_all || self.update_export
    }
}
