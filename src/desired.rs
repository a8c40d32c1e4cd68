//! Desired manifest state per device.
//!
//! Every device starts from `site_default`; department manifests are appended
//! in rule order for each rule whose group the device belongs to, but only
//! when the department manifest already exists in storage.
use crate::inventory::InventorySource;
use crate::manifest::ManifestRecord;
use crate::model::{dedupe_preserving_order, DepartmentRule, Device, KnownManifests, SITE_DEFAULT};
use std::collections::BTreeSet;

/// Outcome of resolving a device's directory group memberships.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Membership {
    Resolved {
        group_ids: BTreeSet<String>,
        group_names: BTreeSet<String>,
    },
    /// The device has no directory identity, so it cannot be in any group.
    NoDirectoryIdentity,
    /// The lookup failed; the device is treated as matching no rule.
    LookupFailed(String),
}

impl Membership {
    pub fn contains_group(&self, group_id: &str) -> bool {
        match self {
            Membership::Resolved { group_ids, .. } => group_ids.contains(group_id),
            _ => false,
        }
    }

    pub fn contains_group_name(&self, name: &str) -> bool {
        match self {
            Membership::Resolved { group_names, .. } => group_names.contains(name),
            _ => false,
        }
    }
}

/// Desired manifest for one device plus the membership it was derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredManifest {
    pub device: Device,
    pub record: ManifestRecord,
    pub membership: Membership,
}

/// Static inputs shared by every device in a run.
#[derive(Debug, Clone, Copy)]
pub struct DesiredInputs<'a> {
    pub rules: &'a [DepartmentRule],
    pub known: &'a KnownManifests,
    pub catalogs: &'a [String],
}

/// Build one desired manifest per device, in device order.
pub fn build_desired<I>(
    inventory: &I,
    devices: &[Device],
    inputs: DesiredInputs<'_>,
) -> Vec<DesiredManifest>
where
    I: InventorySource + ?Sized,
{
    devices
        .iter()
        .map(|device| {
            let membership = resolve_membership(inventory, device);
            desired_for_device(device, membership, inputs)
        })
        .collect()
}

/// Desired manifest for a device whose membership is already known.
pub fn desired_for_device(
    device: &Device,
    membership: Membership,
    inputs: DesiredInputs<'_>,
) -> DesiredManifest {
    let included = included_manifests(device, &membership, inputs.rules, inputs.known);
    DesiredManifest {
        device: device.clone(),
        record: ManifestRecord::for_device(device, inputs.catalogs, included),
        membership,
    }
}

/// Resolve group memberships, never failing the caller.
pub fn resolve_membership<I>(inventory: &I, device: &Device) -> Membership
where
    I: InventorySource + ?Sized,
{
    let Some(directory_id) = device.directory_id() else {
        tracing::info!(
            serial = %device.serial_number,
            "device has no directory identity, only adding site_default"
        );
        return Membership::NoDirectoryIdentity;
    };

    let object_id = match inventory.resolve_directory_object_id(directory_id) {
        Ok(Some(object_id)) => object_id,
        Ok(None) => {
            tracing::info!(
                serial = %device.serial_number,
                directory_id,
                "device not found in directory, only adding site_default"
            );
            return Membership::NoDirectoryIdentity;
        }
        Err(err) => {
            tracing::warn!(serial = %device.serial_number, error = %err, "directory lookup failed");
            return Membership::LookupFailed(err.to_string());
        }
    };

    match inventory.list_group_memberships(&object_id) {
        Ok(groups) => Membership::Resolved {
            group_ids: groups.iter().map(|group| group.group_id.clone()).collect(),
            group_names: groups.into_iter().map(|group| group.display_name).collect(),
        },
        Err(err) => {
            tracing::warn!(
                serial = %device.serial_number,
                error = %err,
                "group membership lookup failed"
            );
            Membership::LookupFailed(err.to_string())
        }
    }
}

fn included_manifests(
    device: &Device,
    membership: &Membership,
    rules: &[DepartmentRule],
    known: &KnownManifests,
) -> Vec<String> {
    let departments = rules
        .iter()
        .filter(|rule| membership.contains_group(&rule.group_id))
        .filter(|rule| {
            if known.contains(&rule.manifest) {
                tracing::info!(
                    serial = %device.serial_number,
                    manifest = %rule.manifest,
                    "device found in group, adding department manifest"
                );
                true
            } else {
                tracing::warn!(
                    serial = %device.serial_number,
                    manifest = %rule.manifest,
                    "department manifest not found in storage, skipping"
                );
                false
            }
        })
        .map(|rule| rule.manifest.clone());
    dedupe_preserving_order(std::iter::once(SITE_DEFAULT.to_string()).chain(departments))
}
