//! One reconciliation run from configuration to report.
//!
//! Failures before any device is processed (configuration, authentication,
//! listing manifests or devices) abort the run; everything after that is
//! recorded per device in the report.
use crate::config::{
    configured_manifest_names, normalized_prefix, require_credentials, validate_config, SyncConfig,
};
use crate::desired::{build_desired, DesiredInputs};
use crate::inventory::{GraphClient, GraphSettings, InventorySource};
use crate::model::{DepartmentRule, KnownManifests};
use crate::reconcile::{
    reconcile_devices, reconcile_orphans, ApplyMode, DeviceAction, OrphanAction, ReconcileContext,
    ReconcileReport,
};
use crate::store::{BlobStore, ConnectionString, ManifestStore};
use anyhow::{Context, Result};
use std::time::Duration;
use ureq::Agent;

/// Everything `run_sync` needs besides the collaborators.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub prefix: String,
    pub platform_filter: String,
    pub catalogs: Vec<String>,
    pub rules: Vec<DepartmentRule>,
    /// Every configured department manifest name, valid rule or not.
    pub protected_names: Vec<String>,
    pub mode: ApplyMode,
    pub delete_orphans: bool,
}

impl RunSettings {
    /// Validate `config` and derive run settings from it.
    pub fn from_config(config: &SyncConfig, mode: ApplyMode, delete_orphans: bool) -> Result<Self> {
        let rules = validate_config(config).context("validate config")?;
        Ok(Self {
            prefix: normalized_prefix(config),
            platform_filter: config.platform_filter.trim().to_string(),
            catalogs: config
                .catalogs
                .iter()
                .map(|catalog| catalog.trim())
                .filter(|catalog| !catalog.is_empty())
                .map(str::to_string)
                .collect(),
            rules,
            protected_names: configured_manifest_names(config),
            mode,
            delete_orphans: delete_orphans || config.delete_orphans,
        })
    }
}

/// Connect to Graph and Blob storage, then run one reconciliation.
pub fn execute(config: &SyncConfig, settings: &RunSettings) -> Result<ReconcileReport> {
    let credentials = require_credentials(config)?;
    let agent = build_agent(config.request_timeout_secs);

    let connection = ConnectionString::parse(&credentials.storage_connection_string)
        .context("parse storage connection string")?;
    let store = BlobStore::new(agent.clone(), connection, &config.container);

    let graph = GraphSettings {
        graph_endpoint: config.graph_endpoint.clone(),
        login_endpoint: config.login_endpoint.clone(),
        tenant: credentials.tenant,
        client_id: credentials.client_id,
        client_secret: credentials.client_secret,
    };
    let inventory = GraphClient::connect(agent, &graph).context("authenticate with Microsoft Graph")?;

    run_sync(&inventory, &store, settings)
}

/// Run one reconciliation against the given collaborators.
pub fn run_sync<I, S>(inventory: &I, store: &S, settings: &RunSettings) -> Result<ReconcileReport>
where
    I: InventorySource + ?Sized,
    S: ManifestStore + ?Sized,
{
    let object_names = store
        .list_names(&settings.prefix)
        .with_context(|| format!("list manifests under {}", settings.prefix))?;
    let known = KnownManifests::from_object_names(&settings.prefix, &object_names);
    tracing::info!(count = known.len(), prefix = %settings.prefix, "listed existing manifests");
    if known.is_empty() {
        tracing::warn!(prefix = %settings.prefix, "no manifests found, site_default and departments are missing");
    }

    let devices = inventory
        .list_devices(&settings.platform_filter)
        .with_context(|| format!("list devices matching {}", settings.platform_filter))?;
    tracing::info!(count = devices.len(), "listed managed devices");

    let ctx = ReconcileContext {
        prefix: &settings.prefix,
        known: &known,
        protected_names: &settings.protected_names,
        mode: settings.mode,
        delete_orphans: settings.delete_orphans,
    };
    let orphans = reconcile_orphans(store, ctx, &devices);

    let desired = build_desired(
        inventory,
        &devices,
        DesiredInputs {
            rules: &settings.rules,
            known: &known,
            catalogs: &settings.catalogs,
        },
    );
    let report = reconcile_devices(store, ctx, &desired, orphans);
    log_report(&report);
    Ok(report)
}

fn build_agent(timeout_secs: u64) -> Agent {
    let config = Agent::config_builder()
        .http_status_as_error(false)
        .timeout_global(Some(Duration::from_secs(timeout_secs)))
        .build();
    config.into()
}

/// Log one line per device and orphan plus the totals.
pub fn log_report(report: &ReconcileReport) {
    for outcome in &report.devices {
        let serial = outcome.serial.as_str();
        match &outcome.action {
            DeviceAction::Created { .. } => tracing::info!(serial, "created"),
            DeviceAction::Updated { added, removed, .. } => {
                tracing::info!(serial, ?added, ?removed, "updated")
            }
            DeviceAction::Unchanged => tracing::info!(serial, "unchanged"),
            DeviceAction::Skipped { reason } => tracing::info!(serial, %reason, "skipped"),
            DeviceAction::Failed { error } => tracing::warn!(serial, %error, "failed"),
        }
    }
    let candidates: Vec<&str> = report
        .orphans
        .iter()
        .filter(|orphan| orphan.action != OrphanAction::Deleted)
        .map(|orphan| orphan.name.as_str())
        .collect();
    if !candidates.is_empty() {
        tracing::info!(?candidates, "orphan manifest candidates");
    }
    let summary = &report.summary;
    tracing::info!(
        mode = ?report.mode,
        created = summary.created,
        updated = summary.updated,
        unchanged = summary.unchanged,
        skipped = summary.skipped,
        failed = summary.failed,
        orphans = summary.orphans,
        deleted = summary.deleted,
        "reconciliation finished"
    );
}
