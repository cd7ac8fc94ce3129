use std::io::Write;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, error, info, trace, warn};

use s3compat_rs::config::Config;
use s3compat_rs::storage::create_storage;
use s3compat_rs::{CLIArgs, Scenario, ScenarioOutcome, ScenarioReport, run_scenarios};

mod tracing_init;

const EXIT_CODE_FAILED: i32 = 1;

/// s3compat - Conformance harness for S3-compatible object stores.
///
/// This binary is a thin wrapper over the s3compat-rs library.
/// All core functionality is implemented in the library crate.
#[cfg_attr(coverage_nightly, coverage(off))]
#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config_exit_if_err();

    if config.list_scenarios {
        print_scenarios(&mut std::io::stdout())?;
        return Ok(());
    }

    start_tracing_if_necessary(&config);
    warn_if_part_size_below_minimum(&config);

    trace!("config = {:?}", config);

    let reports = run(&config).await;
    print_summary(&mut std::io::stdout(), &reports)?;

    let exit_code = exit_code_from_reports(&reports);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

#[cfg_attr(coverage_nightly, coverage(off))]
fn load_config_exit_if_err() -> Config {
    match Config::try_from(CLIArgs::parse()) {
        Ok(config) => config,
        Err(error_message) => {
            clap::Error::raw(clap::error::ErrorKind::ValueValidation, error_message).exit()
        }
    }
}

fn start_tracing_if_necessary(config: &Config) -> bool {
    let Some(tracing_config) = config.tracing_config.as_ref() else {
        return false;
    };

    tracing_init::init_tracing(tracing_config);
    true
}

fn warn_if_part_size_below_minimum(config: &Config) -> bool {
    if !config.harness.part_size_below_minimum() {
        return false;
    }

    warn!(
        part_size = config.harness.part_size,
        "part size is below the S3 minimum; multi-part uploads may fail with EntityTooSmall."
    );
    true
}

#[cfg_attr(coverage_nightly, coverage(off))]
async fn run(config: &Config) -> Vec<ScenarioReport> {
    let Some(client_config) = config.client_config.as_ref() else {
        error!("no client configuration.");
        return Vec::new();
    };
    let storage = create_storage(client_config).await;

    let start_time = tokio::time::Instant::now();
    debug!("conformance run start.");

    let reports = run_scenarios(&storage, config).await;

    let duration_sec = format!("{:.3}", start_time.elapsed().as_secs_f32());
    let failed = reports.iter().filter(|report| !report.passed()).count();
    if failed == 0 {
        info!(
            duration_sec = duration_sec,
            scenarios = reports.len(),
            "s3compat has been completed."
        );
    } else {
        error!(
            duration_sec = duration_sec,
            scenarios = reports.len(),
            failed = failed,
            "s3compat failed."
        );
    }
    reports
}

fn exit_code_from_reports(reports: &[ScenarioReport]) -> i32 {
    if reports.is_empty() || reports.iter().any(|report| !report.passed()) {
        EXIT_CODE_FAILED
    } else {
        0
    }
}

fn print_scenarios<W: Write>(writer: &mut W) -> Result<()> {
    for scenario in Scenario::all() {
        writeln!(writer, "{:<24}{}", scenario.name(), scenario.description())?;
    }
    Ok(())
}

fn print_summary<W: Write>(writer: &mut W, reports: &[ScenarioReport]) -> Result<()> {
    for report in reports {
        let status = match &report.outcome {
            ScenarioOutcome::Passed => "PASS",
            ScenarioOutcome::Skipped { .. } => "SKIP",
            ScenarioOutcome::Failed { .. } => "FAIL",
        };
        write!(
            writer,
            "{status} {:<24}{:>9.3}s",
            report.name(),
            report.duration.as_secs_f32()
        )?;
        match &report.outcome {
            ScenarioOutcome::Skipped { reason } => writeln!(writer, "  {reason}")?,
            ScenarioOutcome::Failed { error, .. } => writeln!(writer, "  {error}")?,
            ScenarioOutcome::Passed => writeln!(writer)?,
        }
    }
    Ok(())
}
