//! Manifest object storage.
//!
//! Object names are container-relative (`manifests/C02ABC`). `BlobStore` is the
//! Azure Blob implementation; tests use an in-memory store.
use crate::error::SyncError;

mod blob;
mod connection;
#[cfg(test)]
pub mod memory;

pub use blob::BlobStore;
pub use connection::ConnectionString;

pub trait ManifestStore {
    /// Names of all objects starting with `prefix`.
    fn list_names(&self, prefix: &str) -> Result<Vec<String>, SyncError>;

    /// Object content; `SyncError::NotFound` when it does not exist.
    fn get(&self, name: &str) -> Result<Vec<u8>, SyncError>;

    /// Write an object. Without `overwrite`, an existing object is an
    /// `SyncError::AlreadyExists` error.
    fn put(&self, name: &str, bytes: &[u8], overwrite: bool) -> Result<(), SyncError>;

    /// Remove an object; deleting a missing object succeeds.
    fn delete(&self, name: &str) -> Result<(), SyncError>;
}
