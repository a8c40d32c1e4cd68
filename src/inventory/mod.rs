//! Device inventory lookups.
//!
//! The reconciler only sees the `InventorySource` trait; `GraphClient` talks to
//! Intune through Microsoft Graph.
use crate::error::SyncError;
use crate::model::{Device, GroupMembership};

mod graph;
mod token;

pub use graph::{GraphClient, GraphSettings};

pub trait InventorySource {
    /// All managed devices matching an OData `$filter` expression.
    fn list_devices(&self, platform_filter: &str) -> Result<Vec<Device>, SyncError>;

    /// Directory object id for a device's directory device id, if registered.
    fn resolve_directory_object_id(
        &self,
        directory_device_id: &str,
    ) -> Result<Option<String>, SyncError>;

    /// Groups the directory object is a member of, including nested groups.
    fn list_group_memberships(&self, object_id: &str) -> Result<Vec<GroupMembership>, SyncError>;
}
