//! Munki manifest records and their property-list encoding.
use crate::error::SyncError;
use crate::model::{dedupe_preserving_order, Device, SITE_DEFAULT};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

const INCLUDED_MANIFESTS: &str = "included_manifests";

/// A device manifest as stored under `<prefix><serial>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRecord {
    #[serde(default)]
    pub catalogs: Vec<String>,
    #[serde(default)]
    pub included_manifests: Vec<String>,
    #[serde(default)]
    pub managed_installs: Vec<String>,
    #[serde(default)]
    pub optional_installs: Vec<String>,
    #[serde(default)]
    pub display_name: String,
    #[serde(rename = "serialnumber", default)]
    pub serial_number: String,
    #[serde(default)]
    pub user: String,
}

impl ManifestRecord {
    /// Fresh record for `device` with the given included manifests.
    pub fn for_device(device: &Device, catalogs: &[String], included: Vec<String>) -> Self {
        Self {
            catalogs: catalogs.to_vec(),
            included_manifests: included,
            managed_installs: Vec::new(),
            optional_installs: Vec::new(),
            display_name: device.display_name.clone(),
            serial_number: device.serial_number.trim().to_string(),
            user: device.user_principal_name.clone(),
        }
    }
}

/// Encode a record as an XML property list.
pub fn encode(record: &ManifestRecord) -> Result<Vec<u8>, SyncError> {
    let mut bytes = Vec::new();
    plist::to_writer_xml(&mut bytes, record)?;
    Ok(bytes)
}

/// A manifest read back from storage.
///
/// Updates only touch `included_manifests`; every other key, including ones
/// this tool never writes (`managed_uninstalls`, `conditional_items`), is
/// written back as it was read.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredManifest {
    root: plist::Value,
    included: Vec<String>,
}

impl StoredManifest {
    /// Decode an XML or binary property list whose root is a dictionary.
    pub fn decode(bytes: &[u8]) -> Result<Self, SyncError> {
        let root = plist::Value::from_reader(Cursor::new(bytes))?;
        let dict = root
            .as_dictionary()
            .ok_or_else(|| SyncError::Decode("manifest root is not a dictionary".to_string()))?;
        let included = match dict.get(INCLUDED_MANIFESTS) {
            None => Vec::new(),
            Some(plist::Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_string().map(str::to_string).ok_or_else(|| {
                        SyncError::Decode(format!("{INCLUDED_MANIFESTS} holds a non-string entry"))
                    })
                })
                .collect::<Result<_, _>>()?,
            Some(_) => {
                return Err(SyncError::Decode(format!("{INCLUDED_MANIFESTS} is not an array")));
            }
        };
        Ok(Self { root, included })
    }

    pub fn included_manifests(&self) -> &[String] {
        &self.included
    }

    pub fn set_included_manifests(&mut self, names: Vec<String>) {
        if let Some(dict) = self.root.as_dictionary_mut() {
            dict.insert(
                INCLUDED_MANIFESTS.to_string(),
                plist::Value::Array(names.iter().cloned().map(plist::Value::String).collect()),
            );
        }
        self.included = names;
    }

    /// Encode as an XML property list.
    pub fn encode(&self) -> Result<Vec<u8>, SyncError> {
        let mut bytes = Vec::new();
        self.root.to_writer_xml(&mut bytes)?;
        Ok(bytes)
    }
}

/// Apply removals then additions, dedupe, and keep `site_default` first.
pub fn merge_included(existing: &[String], to_remove: &[String], to_add: &[String]) -> Vec<String> {
    let kept = existing
        .iter()
        .filter(|name| !to_remove.contains(name))
        .chain(to_add.iter())
        .cloned();
    let merged = dedupe_preserving_order(kept);
    if !merged.iter().any(|name| name == SITE_DEFAULT) {
        return merged;
    }
    std::iter::once(SITE_DEFAULT.to_string())
        .chain(merged.into_iter().filter(|name| name != SITE_DEFAULT))
        .collect()
}
