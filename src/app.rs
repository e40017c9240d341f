//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and installs logging
//! - loads the run configuration
//! - builds the fitter from the model grids and the external sampler
//! - collects targets and fits them in parallel
//! - prints a run summary

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Cli;
use crate::domain::FitConfig;
use crate::error::AppError;
use crate::fit::Fitter;
use crate::io::{ExternalSampler, RawphotReader};
use crate::models::GridLibrary;

pub mod pipeline;

/// Entry point for the `sdf` binary.
pub fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    let config = FitConfig::load(cli.config.as_deref())?;
    let targets = collect_targets(&cli, &config)?;
    if targets.is_empty() {
        tracing::warn!("no rawphot files found");
        return Ok(());
    }
    tracing::info!(targets = targets.len(), "starting run");

    let fitter = build_fitter(config)?;
    let settings = pipeline::RunSettings {
        fit: cli.fit_options(),
        report: !cli.no_report,
        export: !cli.no_export,
        force_report: cli.force_report(),
        force_export: cli.force_export(),
        quick_update_check: cli.quick_update_check,
    };
    let summary = pipeline::run_targets(&fitter, &targets, &settings, cli.jobs)?;
    println!("{}", crate::report::format_run_summary(&summary));
    Ok(())
}

fn init_logger(verbose: bool) {
    let default = if verbose { "sdf_fit=debug,info" } else { "sdf_fit=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .init();
}

fn build_fitter(config: FitConfig) -> Result<Fitter, AppError> {
    let library = GridLibrary::open(&config.models.grid_dir)?;
    let sampler = ExternalSampler::new(&config.sampler, &config.models.grid_dir);
    Ok(Fitter::new(
        config,
        Box::new(library),
        Box::new(sampler),
        Box::new(RawphotReader),
    ))
}

/// Rawphot files named by `--file`, found under `--dir`, or listed by
/// `--sample`.
pub fn collect_targets(cli: &Cli, config: &FitConfig) -> Result<Vec<PathBuf>, AppError> {
    if !cli.file.is_empty() {
        return cli
            .file
            .iter()
            .map(|f| {
                std::path::absolute(f)
                    .map_err(|e| AppError::input(format!("Bad path '{}': {e}", f.display())))
            })
            .collect();
    }

    let mut files = Vec::new();
    if !cli.dir.is_empty() {
        for dir in &cli.dir {
            files.extend(pipeline::rawphot_files(dir, &cli.subset)?);
        }
    } else if !cli.sample.is_empty() {
        files = pipeline::sample_files(&config.files.sdb_root, &cli.sample)?;
    }
    Ok(files)
}
