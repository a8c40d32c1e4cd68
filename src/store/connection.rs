//! Azure Storage connection string parsing.
use crate::error::SyncError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::collections::BTreeMap;
use std::fmt;

const DEV_ACCOUNT: &str = "devstoreaccount1";
const DEV_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_BLOB_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

#[derive(Clone, PartialEq, Eq)]
pub enum BlobCredential {
    SharedKey { account: String, key: Vec<u8> },
    Sas(String),
}

impl fmt::Debug for BlobCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobCredential::SharedKey { account, .. } => f
                .debug_struct("SharedKey")
                .field("account", account)
                .finish_non_exhaustive(),
            BlobCredential::Sas(_) => f.write_str("Sas(<redacted>)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    /// Blob service endpoint without a trailing slash.
    pub blob_endpoint: String,
    pub credential: BlobCredential,
}

impl ConnectionString {
    pub fn parse(text: &str) -> Result<Self, SyncError> {
        let mut fields = BTreeMap::new();
        for part in text.split(';').map(str::trim).filter(|part| !part.is_empty()) {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                SyncError::ConnectionString(format!("segment without '=': {}", redact_key(part)))
            })?;
            fields.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        if fields
            .get("usedevelopmentstorage")
            .is_some_and(|value| value.eq_ignore_ascii_case("true"))
        {
            return Ok(Self {
                blob_endpoint: DEV_BLOB_ENDPOINT.to_string(),
                credential: shared_key(DEV_ACCOUNT, DEV_ACCOUNT_KEY)?,
            });
        }

        let account = fields.get("accountname").cloned();
        let blob_endpoint = match fields.get("blobendpoint") {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => {
                let account = account.as_deref().ok_or_else(|| {
                    SyncError::ConnectionString("AccountName or BlobEndpoint is required".to_string())
                })?;
                let protocol = fields
                    .get("defaultendpointsprotocol")
                    .map(String::as_str)
                    .unwrap_or("https");
                let suffix = fields
                    .get("endpointsuffix")
                    .map(String::as_str)
                    .unwrap_or("core.windows.net");
                format!("{protocol}://{account}.blob.{suffix}")
            }
        };

        let credential = match (fields.get("sharedaccesssignature"), fields.get("accountkey")) {
            (Some(sas), _) => BlobCredential::Sas(sas.trim_start_matches('?').to_string()),
            (None, Some(key)) => {
                let account = account.as_deref().ok_or_else(|| {
                    SyncError::ConnectionString("AccountKey requires AccountName".to_string())
                })?;
                shared_key(account, key)?
            }
            (None, None) => {
                return Err(SyncError::ConnectionString(
                    "AccountKey or SharedAccessSignature is required".to_string(),
                ))
            }
        };

        Ok(Self {
            blob_endpoint,
            credential,
        })
    }
}

fn shared_key(account: &str, key: &str) -> Result<BlobCredential, SyncError> {
    let key = STANDARD
        .decode(key)
        .map_err(|err| SyncError::ConnectionString(format!("AccountKey is not base64: {err}")))?;
    Ok(BlobCredential::SharedKey {
        account: account.to_string(),
        key,
    })
}

fn redact_key(part: &str) -> &str {
    part.split_once('=').map_or(part, |(key, _)| key)
}
