//! Sync configuration loading, environment overrides, and validation.
//!
//! Non-secret settings usually live in a JSON file; credentials are expected
//! from the environment so the file can be checked in.
use crate::model::{dedupe_preserving_order, DepartmentRule};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONTAINER: &str = "munki";
pub const DEFAULT_MANIFEST_PREFIX: &str = "manifests/";
pub const DEFAULT_PLATFORM_FILTER: &str = "operatingSystem eq 'macOS'";
pub const DEFAULT_GRAPH_ENDPOINT: &str = "https://graph.microsoft.com/v1.0";
pub const DEFAULT_LOGIN_ENDPOINT: &str = "https://login.microsoftonline.com";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const CONFIG_FILE_NAME: &str = "config.json";
const CONFIG_DIR_NAME: &str = "munki-manifest-sync";
const REDACTED: &str = "<redacted>";

/// On-disk configuration; every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub tenant: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub storage_connection_string: Option<String>,
    pub container: String,
    pub manifest_prefix: String,
    pub platform_filter: String,
    pub catalogs: Vec<String>,
    pub departments: Vec<DepartmentRule>,
    pub delete_orphans: bool,
    pub graph_endpoint: String,
    pub login_endpoint: String,
    pub request_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tenant: None,
            client_id: None,
            client_secret: None,
            storage_connection_string: None,
            container: DEFAULT_CONTAINER.to_string(),
            manifest_prefix: DEFAULT_MANIFEST_PREFIX.to_string(),
            platform_filter: DEFAULT_PLATFORM_FILTER.to_string(),
            catalogs: vec!["Production".to_string()],
            departments: Vec::new(),
            delete_orphans: false,
            graph_endpoint: DEFAULT_GRAPH_ENDPOINT.to_string(),
            login_endpoint: DEFAULT_LOGIN_ENDPOINT.to_string(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Credentials required before any network call is made.
#[derive(Clone)]
pub struct Credentials {
    pub tenant: String,
    pub client_id: String,
    pub client_secret: String,
    pub storage_connection_string: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("tenant", &self.tenant)
            .field("client_id", &self.client_id)
            .field("client_secret", &REDACTED)
            .field("storage_connection_string", &REDACTED)
            .finish()
    }
}

/// Default config location, used only when the file exists.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Load the config from `path`, the default location, or defaults.
pub fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match default_config_path().filter(|path| path.is_file()) {
            Some(path) => path,
            None => return Ok(SyncConfig::default()),
        },
    };
    let bytes = fs::read(&path).with_context(|| format!("read config {}", path.display()))?;
    let config: SyncConfig = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse config JSON {}", path.display()))?;
    Ok(config)
}

/// Overlay `MUNKI_SYNC_*` variables resolved through `lookup`.
pub fn apply_env_overrides<F>(config: &mut SyncConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

    if let Some(value) = var("MUNKI_SYNC_TENANT") {
        config.tenant = Some(value);
    }
    if let Some(value) = var("MUNKI_SYNC_CLIENT_ID") {
        config.client_id = Some(value);
    }
    if let Some(value) = var("MUNKI_SYNC_CLIENT_SECRET") {
        config.client_secret = Some(value);
    }
    if let Some(value) = var("MUNKI_SYNC_STORAGE_CONNECTION_STRING") {
        config.storage_connection_string = Some(value);
    }
    if let Some(value) = var("MUNKI_SYNC_CONTAINER") {
        config.container = value;
    }
    if let Some(value) = var("MUNKI_SYNC_MANIFEST_PREFIX") {
        config.manifest_prefix = value;
    }
    if let Some(value) = var("MUNKI_SYNC_PLATFORM_FILTER") {
        config.platform_filter = value;
    }
    if let Some(value) = var("MUNKI_SYNC_CATALOGS") {
        config.catalogs = split_list(&value);
    }
    if let Some(value) = var("MUNKI_SYNC_DEPARTMENTS") {
        config.departments = parse_department_list(&value)?;
    }
    if let Some(value) = var("MUNKI_SYNC_DELETE_ORPHANS") {
        config.delete_orphans = parse_bool(&value)
            .ok_or_else(|| anyhow!("MUNKI_SYNC_DELETE_ORPHANS must be a boolean (got {value:?})"))?;
    }
    Ok(())
}

/// Parse `group=manifest,group=manifest` into rules, keeping order.
pub fn parse_department_list(text: &str) -> Result<Vec<DepartmentRule>> {
    split_list(text)
        .into_iter()
        .map(|entry| {
            let (group_id, manifest) = entry
                .split_once('=')
                .ok_or_else(|| anyhow!("department entry {entry:?} must be group=manifest"))?;
            Ok(DepartmentRule {
                group_id: group_id.trim().to_string(),
                manifest: manifest.trim().to_string(),
            })
        })
        .collect()
}

/// Validate settings and return the usable department rules.
///
/// Rules with a blank group id or manifest name are dropped with a warning;
/// two rules naming the same manifest are a configuration error.
pub fn validate_config(config: &SyncConfig) -> Result<Vec<DepartmentRule>> {
    if config.container.trim().is_empty() {
        return Err(anyhow!("container must be non-empty"));
    }
    if config.manifest_prefix.trim().is_empty() {
        return Err(anyhow!("manifest_prefix must be non-empty"));
    }
    if config.platform_filter.trim().is_empty() {
        return Err(anyhow!("platform_filter must be non-empty"));
    }
    if config.catalogs.iter().all(|catalog| catalog.trim().is_empty()) {
        return Err(anyhow!("catalogs must name at least one catalog"));
    }
    if config.request_timeout_secs == 0 {
        return Err(anyhow!("request_timeout_secs must be greater than zero"));
    }

    let mut names = BTreeSet::new();
    let mut rules = Vec::new();
    for rule in &config.departments {
        let group_id = rule.group_id.trim();
        let manifest = rule.manifest.trim();
        if group_id.is_empty() || manifest.is_empty() {
            tracing::warn!(
                group_id = %rule.group_id,
                manifest = %rule.manifest,
                "dropping department rule with blank group id or manifest"
            );
            continue;
        }
        if manifest.contains('/') {
            return Err(anyhow!("department manifest {manifest:?} must not contain '/'"));
        }
        if !names.insert(manifest.to_string()) {
            return Err(anyhow!("department manifest {manifest:?} is configured twice"));
        }
        rules.push(DepartmentRule {
            group_id: group_id.to_string(),
            manifest: manifest.to_string(),
        });
    }
    Ok(rules)
}

/// Every non-blank department manifest name, including names from rules
/// dropped by `validate_config`. None of these is ever an orphan.
pub fn configured_manifest_names(config: &SyncConfig) -> Vec<String> {
    dedupe_preserving_order(
        config
            .departments
            .iter()
            .map(|rule| rule.manifest.trim())
            .filter(|manifest| !manifest.is_empty()),
    )
}

/// Resolve the credentials a run needs, naming every missing one.
pub fn require_credentials(config: &SyncConfig) -> Result<Credentials> {
    let fields = [
        ("tenant", "MUNKI_SYNC_TENANT", &config.tenant),
        ("client_id", "MUNKI_SYNC_CLIENT_ID", &config.client_id),
        ("client_secret", "MUNKI_SYNC_CLIENT_SECRET", &config.client_secret),
        (
            "storage_connection_string",
            "MUNKI_SYNC_STORAGE_CONNECTION_STRING",
            &config.storage_connection_string,
        ),
    ];
    let missing: Vec<String> = fields
        .iter()
        .filter(|(_, _, value)| !value.as_deref().is_some_and(|v| !v.trim().is_empty()))
        .map(|(field, env, _)| format!("{field} ({env})"))
        .collect();
    if !missing.is_empty() {
        return Err(anyhow!("missing credentials: {}", missing.join(", ")));
    }
    let value = |field: &Option<String>| field.clone().unwrap_or_default();
    Ok(Credentials {
        tenant: value(&config.tenant),
        client_id: value(&config.client_id),
        client_secret: value(&config.client_secret),
        storage_connection_string: value(&config.storage_connection_string),
    })
}

/// Copy of `config` safe to print: secrets are masked.
pub fn redacted(config: &SyncConfig) -> SyncConfig {
    let mask = |value: &Option<String>| value.as_ref().map(|_| REDACTED.to_string());
    SyncConfig {
        client_secret: mask(&config.client_secret),
        storage_connection_string: mask(&config.storage_connection_string),
        ..config.clone()
    }
}

/// Normalized manifest prefix ending in `/`.
pub fn normalized_prefix(config: &SyncConfig) -> String {
    let prefix = config.manifest_prefix.trim().trim_start_matches('/');
    if prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{prefix}/")
    }
}

fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
