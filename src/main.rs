use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod desired;
mod error;
mod inventory;
mod manifest;
mod model;
mod reconcile;
mod store;
#[cfg(test)]
mod testing;
mod workflow;

use cli::{Command, CommonArgs, PlanArgs, RootArgs, SyncArgs, ValidateArgs};
use config::SyncConfig;
use model::DepartmentRule;
use reconcile::{ApplyMode, ReconcileReport};
use workflow::RunSettings;

fn main() -> Result<()> {
    let args = RootArgs::parse();

    match args.command {
        Command::Sync(args) => cmd_sync(args),
        Command::Plan(args) => cmd_plan(args),
        Command::Validate(args) => cmd_validate(args),
    }
}

fn cmd_sync(args: SyncArgs) -> Result<()> {
    init_tracing(args.common.verbose);
    let config = load_effective_config(&args.common)?;
    let settings = RunSettings::from_config(&config, ApplyMode::Apply, args.delete_orphans)?;
    if !settings.delete_orphans {
        tracing::info!("orphan deletion disabled, candidates will only be reported");
    }
    let report = workflow::execute(&config, &settings)?;
    emit_report(&report, args.json)
}

fn cmd_plan(args: PlanArgs) -> Result<()> {
    init_tracing(args.common.verbose);
    let config = load_effective_config(&args.common)?;
    let settings = RunSettings::from_config(&config, ApplyMode::DryRun, false)?;
    let report = workflow::execute(&config, &settings)?;
    emit_report(&report, args.json)
}

#[derive(Serialize)]
struct ValidationOutput {
    config: SyncConfig,
    departments: Vec<DepartmentRule>,
    manifest_prefix: String,
}

fn cmd_validate(args: ValidateArgs) -> Result<()> {
    init_tracing(args.common.verbose);
    let config = load_effective_config(&args.common)?;
    let settings = RunSettings::from_config(&config, ApplyMode::DryRun, false)?;
    if args.require_credentials {
        config::require_credentials(&config)?;
    }
    let output = ValidationOutput {
        config: config::redacted(&config),
        departments: settings.rules,
        manifest_prefix: settings.prefix,
    };
    let text = serde_json::to_string_pretty(&output).context("serialize validation output")?;
    println!("{text}");
    Ok(())
}

fn load_effective_config(common: &CommonArgs) -> Result<SyncConfig> {
    let mut config = config::load_config(common.config.as_deref())?;
    config::apply_env_overrides(&mut config, |name| std::env::var(name).ok())
        .context("apply environment overrides")?;
    Ok(config)
}

fn emit_report(report: &ReconcileReport, json: bool) -> Result<()> {
    if json {
        let text = serde_json::to_string_pretty(report).context("serialize run report")?;
        println!("{text}");
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("munki_manifest_sync={level},warn")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
