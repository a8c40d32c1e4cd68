//! Diff desired manifests against storage and apply the difference.
//!
//! Decisions per device:
//! - no stored manifest: create it from the desired record
//! - stored manifest: add missing valid names and remove department names the
//!   device no longer qualifies for; write only when something changed
//!
//! Orphan handling runs first, against the start-of-run snapshot, before any
//! membership lookup; it deletes only when explicitly enabled.
use crate::desired::{DesiredManifest, Membership};
use crate::error::SyncError;
use crate::manifest::{encode, merge_included, StoredManifest};
use crate::model::{Device, KnownManifests, SITE_DEFAULT};
use crate::store::ManifestStore;
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyMode {
    Apply,
    DryRun,
}

/// Run-wide inputs for the reconciler.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileContext<'a> {
    pub prefix: &'a str,
    pub known: &'a KnownManifests,
    /// Configured department manifest names; never orphans.
    pub protected_names: &'a [String],
    pub mode: ApplyMode,
    pub delete_orphans: bool,
}

impl ReconcileContext<'_> {
    fn object_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DeviceAction {
    Created {
        included_manifests: Vec<String>,
    },
    Updated {
        added: Vec<String>,
        removed: Vec<String>,
        included_manifests: Vec<String>,
    },
    Unchanged,
    Skipped {
        reason: String,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceOutcome {
    pub serial: String,
    pub display_name: String,
    #[serde(flatten)]
    pub action: DeviceAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OrphanAction {
    /// Logged only; deletion is disabled or this is a dry run.
    Candidate,
    Deleted,
    DeleteFailed { error: String },
    /// Deletion was enabled but refused because the inventory was empty.
    Refused,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanOutcome {
    pub name: String,
    #[serde(flatten)]
    pub action: OrphanAction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub orphans: usize,
    pub deleted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub mode: ApplyMode,
    pub summary: ReconcileSummary,
    pub devices: Vec<DeviceOutcome>,
    pub orphans: Vec<OrphanOutcome>,
}

/// Changes to an existing manifest's included manifests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludedDiff {
    pub to_add: Vec<String>,
    pub to_remove: Vec<String>,
}

impl IncludedDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Find and handle orphan manifests for the listed `devices`.
pub fn reconcile_orphans<S>(
    store: &S,
    ctx: ReconcileContext<'_>,
    devices: &[Device],
) -> Vec<OrphanOutcome>
where
    S: ManifestStore + ?Sized,
{
    let serials: BTreeSet<&str> = devices.iter().filter_map(Device::serial).collect();
    let orphan_names = find_orphans(ctx.known, &serials, ctx.protected_names);
    handle_orphans(store, ctx, &orphan_names, serials.len())
}

/// Reconcile every desired manifest and assemble the report.
pub fn reconcile_devices<S>(
    store: &S,
    ctx: ReconcileContext<'_>,
    desired: &[DesiredManifest],
    orphans: Vec<OrphanOutcome>,
) -> ReconcileReport
where
    S: ManifestStore + ?Sized,
{
    let mut seen = BTreeSet::new();
    let mut devices = Vec::with_capacity(desired.len());
    for entry in desired {
        let action = match entry.device.serial() {
            None => {
                tracing::warn!(device_id = %entry.device.id, "skipping device without serial number");
                DeviceAction::Skipped {
                    reason: "missing serial number".to_string(),
                }
            }
            Some(serial) if !seen.insert(serial.to_string()) => {
                tracing::warn!(serial, "skipping duplicate serial number");
                DeviceAction::Skipped {
                    reason: "duplicate serial number".to_string(),
                }
            }
            Some(serial) => reconcile_device(store, ctx, serial, entry),
        };
        devices.push(DeviceOutcome {
            serial: entry.device.serial_number.trim().to_string(),
            display_name: entry.device.display_name.clone(),
            action,
        });
    }

    ReconcileReport {
        mode: ctx.mode,
        summary: summarize(&devices, &orphans),
        devices,
        orphans,
    }
}

/// Stored names that belong to no device, configured department, or `site_default`.
pub fn find_orphans(
    known: &KnownManifests,
    serials: &BTreeSet<&str>,
    protected_names: &[String],
) -> Vec<String> {
    let departments: BTreeSet<&str> = protected_names.iter().map(String::as_str).collect();
    known
        .iter()
        .filter(|name| *name != SITE_DEFAULT)
        .filter(|name| !serials.contains(name))
        .filter(|name| !departments.contains(name))
        .map(str::to_string)
        .collect()
}

/// Included-manifest changes for a device with a stored manifest.
pub fn diff_included(
    desired: &DesiredManifest,
    current: &[String],
    known: &KnownManifests,
) -> IncludedDiff {
    let wanted = &desired.record.included_manifests;
    let to_add = wanted
        .iter()
        .filter(|name| !current.contains(name))
        .filter(|name| known.is_includable(name))
        .cloned()
        .collect();
    let to_remove = current
        .iter()
        .filter(|name| name.as_str() != SITE_DEFAULT)
        .filter(|name| !wanted.contains(name))
        .filter(|name| !desired.membership.contains_group_name(name))
        .cloned()
        .collect();
    IncludedDiff { to_add, to_remove }
}

fn reconcile_device<S>(
    store: &S,
    ctx: ReconcileContext<'_>,
    serial: &str,
    desired: &DesiredManifest,
) -> DeviceAction
where
    S: ManifestStore + ?Sized,
{
    let result = if ctx.known.contains(serial) {
        update_manifest(store, ctx, serial, desired)
    } else {
        create_manifest(store, ctx, serial, desired)
    };
    result.unwrap_or_else(|err| {
        tracing::error!(serial, error = %err, "manifest operation failed");
        DeviceAction::Failed {
            error: err.to_string(),
        }
    })
}

fn create_manifest<S>(
    store: &S,
    ctx: ReconcileContext<'_>,
    serial: &str,
    desired: &DesiredManifest,
) -> Result<DeviceAction, SyncError>
where
    S: ManifestStore + ?Sized,
{
    let included = desired.record.included_manifests.clone();
    tracing::info!(serial, included = ?included, "creating manifest");
    if ctx.mode == ApplyMode::Apply {
        let bytes = encode(&desired.record)?;
        match store.put(&ctx.object_name(serial), &bytes, false) {
            Ok(()) => {}
            Err(SyncError::AlreadyExists(_)) => {
                tracing::warn!(serial, "manifest appeared after listing, skipping");
                return Ok(DeviceAction::Skipped {
                    reason: "manifest already exists".to_string(),
                });
            }
            Err(err) => return Err(err),
        }
    }
    Ok(DeviceAction::Created {
        included_manifests: included,
    })
}

fn update_manifest<S>(
    store: &S,
    ctx: ReconcileContext<'_>,
    serial: &str,
    desired: &DesiredManifest,
) -> Result<DeviceAction, SyncError>
where
    S: ManifestStore + ?Sized,
{
    if let Membership::LookupFailed(error) = &desired.membership {
        tracing::warn!(serial, error = %error, "skipping update, group membership unknown");
        return Ok(DeviceAction::Skipped {
            reason: format!("group membership lookup failed: {error}"),
        });
    }

    let name = ctx.object_name(serial);
    let bytes = match store.get(&name) {
        Ok(bytes) => bytes,
        Err(SyncError::NotFound(_)) => {
            tracing::warn!(serial, "skipping, manifest not found");
            return Ok(DeviceAction::Skipped {
                reason: "manifest not found".to_string(),
            });
        }
        Err(err) => return Err(err),
    };
    let mut existing = StoredManifest::decode(&bytes)?;

    let diff = diff_included(desired, existing.included_manifests(), ctx.known);
    if diff.is_empty() {
        tracing::debug!(serial, "manifest up to date");
        return Ok(DeviceAction::Unchanged);
    }
    for removed in &diff.to_remove {
        tracing::info!(serial, manifest = %removed, "device no longer in group, removing included manifest");
    }
    for added in &diff.to_add {
        tracing::info!(serial, manifest = %added, "adding included manifest");
    }

    let merged = merge_included(existing.included_manifests(), &diff.to_remove, &diff.to_add);
    tracing::info!(serial, included = ?merged, "updating manifest");
    existing.set_included_manifests(merged.clone());
    if ctx.mode == ApplyMode::Apply {
        store.put(&name, &existing.encode()?, true)?;
    }
    Ok(DeviceAction::Updated {
        added: diff.to_add,
        removed: diff.to_remove,
        included_manifests: merged,
    })
}

fn handle_orphans<S>(
    store: &S,
    ctx: ReconcileContext<'_>,
    orphans: &[String],
    device_count: usize,
) -> Vec<OrphanOutcome>
where
    S: ManifestStore + ?Sized,
{
    let refuse = ctx.delete_orphans && device_count == 0 && !orphans.is_empty();
    if refuse {
        tracing::warn!(
            candidates = orphans.len(),
            "inventory returned no devices, refusing to delete orphan manifests"
        );
    }
    orphans
        .iter()
        .map(|name| {
            let action = if refuse {
                OrphanAction::Refused
            } else if !ctx.delete_orphans || ctx.mode == ApplyMode::DryRun {
                tracing::info!(manifest = %name, "orphan manifest candidate");
                OrphanAction::Candidate
            } else {
                tracing::info!(manifest = %name, "deleting orphan manifest");
                match store.delete(&ctx.object_name(name)) {
                    Ok(()) => OrphanAction::Deleted,
                    Err(err) => {
                        tracing::error!(manifest = %name, error = %err, "orphan deletion failed");
                        OrphanAction::DeleteFailed {
                            error: err.to_string(),
                        }
                    }
                }
            };
            OrphanOutcome {
                name: name.clone(),
                action,
            }
        })
        .collect()
}

fn summarize(devices: &[DeviceOutcome], orphans: &[OrphanOutcome]) -> ReconcileSummary {
    let mut summary = ReconcileSummary {
        orphans: orphans.len(),
        deleted: orphans
            .iter()
            .filter(|orphan| orphan.action == OrphanAction::Deleted)
            .count(),
        ..ReconcileSummary::default()
    };
    for outcome in devices {
        match outcome.action {
            DeviceAction::Created { .. } => summary.created += 1,
            DeviceAction::Updated { .. } => summary.updated += 1,
            DeviceAction::Unchanged => summary.unchanged += 1,
            DeviceAction::Skipped { .. } => summary.skipped += 1,
            DeviceAction::Failed { .. } => summary.failed += 1,
        }
    }
    summary
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;
