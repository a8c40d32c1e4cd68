//! Typed errors raised by the inventory and storage collaborators.
//!
//! The workflow decides whether an error is fatal from the stage it occurs
//! in (initial listing vs. per-device work), not from the variant alone.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("request to {endpoint} failed with status {status}: {body}")]
    Request {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("transport error: {0}")]
    Transport(#[from] ureq::Error),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("manifest not found: {0}")]
    NotFound(String),

    #[error("manifest already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid storage connection string: {0}")]
    ConnectionString(String),

    #[error("plist error: {0}")]
    Plist(#[from] plist::Error),
}

impl SyncError {
    pub fn request(endpoint: &str, status: u16, body: impl Into<String>) -> Self {
        SyncError::Request {
            endpoint: endpoint.to_string(),
            status,
            body: body.into(),
        }
    }
}
