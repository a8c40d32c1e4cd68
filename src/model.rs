//! Core records shared by the builder and the reconciler.
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Included manifest every device manifest starts with.
pub const SITE_DEFAULT: &str = "site_default";

/// Directory id Intune reports for devices that were never registered.
const NIL_DIRECTORY_ID: &str = "00000000-0000-0000-0000-000000000000";

/// A managed device as read from the inventory for this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: String,
    pub serial_number: String,
    pub display_name: String,
    pub user_principal_name: String,
    pub directory_device_id: Option<String>,
}

impl Device {
    /// Directory identity usable for membership lookups, if any.
    pub fn directory_id(&self) -> Option<&str> {
        self.directory_device_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty() && !id.eq_ignore_ascii_case(NIL_DIRECTORY_ID))
    }

    pub fn serial(&self) -> Option<&str> {
        Some(self.serial_number.trim()).filter(|serial| !serial.is_empty())
    }
}

/// One directory group a device belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMembership {
    pub group_id: String,
    pub display_name: String,
}

/// Maps a directory group to the department manifest its members include.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartmentRule {
    pub group_id: String,
    pub manifest: String,
}

/// Manifest object names present in storage when the run started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownManifests {
    names: BTreeSet<String>,
}

impl KnownManifests {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names
                .into_iter()
                .map(Into::into)
                .filter(|name: &String| !name.is_empty())
                .collect(),
        }
    }

    /// Build the set from full object names listed under `prefix`.
    ///
    /// Only objects directly under the prefix are manifests; nested objects
    /// such as `manifests/archive/C02ABC` are ignored.
    pub fn from_object_names(prefix: &str, object_names: &[String]) -> Self {
        Self::new(
            object_names
                .iter()
                .filter_map(|name| name.strip_prefix(prefix))
                .filter(|name| !name.contains('/'))
                .map(str::to_string),
        )
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Whether a device manifest may reference `name`.
    pub fn is_includable(&self, name: &str) -> bool {
        name == SITE_DEFAULT || self.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Copy `names` into a new sequence, keeping the first occurrence of each.
pub fn dedupe_preserving_order<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for name in names {
        let name = name.into();
        if seen.insert(name.clone()) {
            out.push(name);
        }
    }
    out
}
