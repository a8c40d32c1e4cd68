//! CLI argument parsing for the manifest sync job.
//!
//! Settings come from the config file and `MUNKI_SYNC_*` variables; flags only
//! pick the command, the config path, and output options.
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "munki-manifest-sync",
    version,
    about = "Reconcile Munki device manifests in Azure Blob Storage with Intune",
    after_help = "Commands:\n  sync      Create, update, and (if enabled) delete manifests\n  plan      Show what sync would change without writing\n  validate  Check the configuration without contacting any service\n\nExamples:\n  munki-manifest-sync validate --config /etc/munki-sync.json\n  munki-manifest-sync plan --json\n  munki-manifest-sync sync --delete-orphans",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Sync(SyncArgs),
    Plan(PlanArgs),
    Validate(ValidateArgs),
}

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// JSON config file (defaults to the user config dir if present)
    #[arg(long, value_name = "PATH", env = "MUNKI_SYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Reconcile manifests and write changes")]
pub struct SyncArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Delete orphan manifests (otherwise they are only reported)
    #[arg(long)]
    pub delete_orphans: bool,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Compute the reconciliation without writing anything")]
pub struct PlanArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Print the planned actions as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Validate the configuration and print the effective settings")]
pub struct ValidateArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Also require credentials to be present
    #[arg(long)]
    pub require_credentials: bool,
}
