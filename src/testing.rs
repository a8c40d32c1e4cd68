//! Test doubles shared by the builder, reconciler, and workflow tests.
use crate::error::SyncError;
use crate::inventory::InventorySource;
use crate::manifest::{encode, ManifestRecord};
use crate::model::{DepartmentRule, Device, GroupMembership};
use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};

pub fn device(serial: &str, directory_id: Option<&str>) -> Device {
    Device {
        id: format!("intune-{serial}"),
        serial_number: serial.to_string(),
        display_name: format!("Mac {serial}"),
        user_principal_name: format!("{}@example.com", serial.to_ascii_lowercase()),
        directory_device_id: directory_id.map(str::to_string),
    }
}

pub fn rule(group_id: &str, manifest: &str) -> DepartmentRule {
    DepartmentRule {
        group_id: group_id.to_string(),
        manifest: manifest.to_string(),
    }
}

/// Encoded manifest for `serial` including `included`.
pub fn stored_manifest(serial: &str, included: &[&str]) -> Vec<u8> {
    let record = ManifestRecord {
        catalogs: vec!["Production".to_string()],
        included_manifests: included.iter().map(|name| name.to_string()).collect(),
        display_name: format!("Mac {serial}"),
        serial_number: serial.to_string(),
        user: format!("{}@example.com", serial.to_ascii_lowercase()),
        ..ManifestRecord::default()
    };
    encode(&record).expect("encode manifest")
}

#[derive(Default)]
pub struct FakeInventory {
    devices: Vec<Device>,
    groups: BTreeMap<String, Vec<GroupMembership>>,
    failing: BTreeSet<String>,
    failing_memberships: BTreeSet<String>,
    fail_listing: bool,
    lookups: Cell<usize>,
    membership_lookups: Cell<usize>,
}

impl FakeInventory {
    pub fn with_devices(mut self, devices: Vec<Device>) -> Self {
        self.devices = devices;
        self
    }

    /// Register a directory device whose groups are named `<id>-group`.
    pub fn with_device(self, directory_id: &str, group_ids: &[&str]) -> Self {
        let groups: Vec<(&str, String)> = group_ids
            .iter()
            .map(|id| (*id, format!("{id}-group")))
            .collect();
        let named: Vec<(&str, &str)> = groups.iter().map(|(id, name)| (*id, name.as_str())).collect();
        self.with_named_groups(directory_id, &named)
    }

    pub fn with_named_groups(mut self, directory_id: &str, groups: &[(&str, &str)]) -> Self {
        self.groups.insert(
            directory_id.to_string(),
            groups
                .iter()
                .map(|(id, name)| GroupMembership {
                    group_id: id.to_string(),
                    display_name: name.to_string(),
                })
                .collect(),
        );
        self
    }

    pub fn with_failing(mut self, directory_id: &str) -> Self {
        self.failing.insert(directory_id.to_string());
        self
    }

    /// Resolve `directory_id` normally but fail its membership listing.
    pub fn with_failing_memberships(mut self, directory_id: &str) -> Self {
        self.failing_memberships.insert(directory_id.to_string());
        self
    }

    pub fn with_failing_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.get()
    }

    pub fn membership_lookups(&self) -> usize {
        self.membership_lookups.get()
    }
}

impl InventorySource for FakeInventory {
    fn list_devices(&self, _platform_filter: &str) -> Result<Vec<Device>, SyncError> {
        if self.fail_listing {
            return Err(SyncError::request("managedDevices", 500, "listing failed"));
        }
        Ok(self.devices.clone())
    }

    fn resolve_directory_object_id(
        &self,
        directory_device_id: &str,
    ) -> Result<Option<String>, SyncError> {
        self.lookups.set(self.lookups.get() + 1);
        if self.failing.contains(directory_device_id) {
            return Err(SyncError::request("devices", 503, "unavailable"));
        }
        Ok(self
            .groups
            .contains_key(directory_device_id)
            .then(|| format!("obj-{directory_device_id}")))
    }

    fn list_group_memberships(&self, object_id: &str) -> Result<Vec<GroupMembership>, SyncError> {
        self.membership_lookups.set(self.membership_lookups.get() + 1);
        let directory_id = object_id.trim_start_matches("obj-");
        if self.failing_memberships.contains(directory_id) {
            return Err(SyncError::request("transitiveMemberOf", 503, "unavailable"));
        }
        Ok(self.groups.get(directory_id).cloned().unwrap_or_default())
    }
}
