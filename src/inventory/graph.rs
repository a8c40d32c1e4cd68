//! Microsoft Graph client for Intune managed devices and directory groups.
use super::token::{acquire_token, AccessToken};
use super::InventorySource;
use crate::error::SyncError;
use crate::model::{Device, GroupMembership};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use ureq::Agent;

/// Connection settings for one Graph session.
#[derive(Clone)]
pub struct GraphSettings {
    pub graph_endpoint: String,
    pub login_endpoint: String,
    pub tenant: String,
    pub client_id: String,
    pub client_secret: String,
}

pub struct GraphClient {
    agent: Agent,
    base: String,
    token: AccessToken,
}

/// One page of an OData collection.
#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink", default)]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManagedDevice {
    id: String,
    #[serde(default)]
    device_name: Option<String>,
    #[serde(default)]
    serial_number: Option<String>,
    #[serde(default)]
    user_principal_name: Option<String>,
    #[serde(rename = "azureADDeviceId", default)]
    azure_ad_device_id: Option<String>,
}

impl From<ManagedDevice> for Device {
    fn from(device: ManagedDevice) -> Self {
        Device {
            id: device.id,
            serial_number: device.serial_number.unwrap_or_default(),
            display_name: device.device_name.unwrap_or_default(),
            user_principal_name: device.user_principal_name.unwrap_or_default(),
            directory_device_id: device.azure_ad_device_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DirectoryObject {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Group {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
}

impl GraphClient {
    /// Authenticate and return a client bound to the acquired token.
    pub fn connect(agent: Agent, settings: &GraphSettings) -> Result<Self, SyncError> {
        let token = acquire_token(
            &agent,
            &settings.login_endpoint,
            &settings.tenant,
            &settings.client_id,
            &settings.client_secret,
        )?;
        Ok(Self {
            agent,
            base: settings.graph_endpoint.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Follow `@odata.nextLink` until the collection is exhausted.
    fn get_all<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, SyncError> {
        let first = format!("{}{}", self.base, path);
        let mut page: Page<T> = self.get_json(&first, query)?;
        let mut items = std::mem::take(&mut page.value);
        let mut pages = 1usize;
        while let Some(next) = page.next_link.take() {
            page = self.get_json(&next, &[])?;
            items.append(&mut page.value);
            pages += 1;
        }
        tracing::debug!(path, pages, items = items.len(), "graph collection fetched");
        Ok(items)
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SyncError> {
        let mut request = self
            .agent
            .get(url)
            .header("Authorization", self.token.bearer())
            .header("Accept", "application/json");
        for (key, value) in query {
            request = request.query(*key, *value);
        }
        let mut response = request.call()?;
        let status = response.status().as_u16();
        if status != 200 {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            return Err(SyncError::request(url, status, body));
        }
        let body = response.body_mut().read_to_string()?;
        parse_json(&body)
    }
}

impl InventorySource for GraphClient {
    fn list_devices(&self, platform_filter: &str) -> Result<Vec<Device>, SyncError> {
        let devices: Vec<ManagedDevice> = self.get_all(
            "/deviceManagement/managedDevices",
            &[("$filter", platform_filter)],
        )?;
        Ok(devices.into_iter().map(Device::from).collect())
    }

    fn resolve_directory_object_id(
        &self,
        directory_device_id: &str,
    ) -> Result<Option<String>, SyncError> {
        let filter = device_id_filter(directory_device_id);
        let objects: Vec<DirectoryObject> =
            self.get_all("/devices", &[("$filter", filter.as_str()), ("$select", "id")])?;
        Ok(objects.into_iter().next().map(|object| object.id))
    }

    fn list_group_memberships(&self, object_id: &str) -> Result<Vec<GroupMembership>, SyncError> {
        let path = format!("/devices/{object_id}/transitiveMemberOf/microsoft.graph.group");
        let groups: Vec<Group> = self.get_all(&path, &[("$select", "id,displayName")])?;
        Ok(groups
            .into_iter()
            .map(|group| GroupMembership {
                group_id: group.id,
                display_name: group.display_name.unwrap_or_default(),
            })
            .collect())
    }
}

fn device_id_filter(directory_device_id: &str) -> String {
    format!("deviceId eq '{}'", directory_device_id.replace('\'', "''"))
}

fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T, SyncError> {
    serde_json::from_str(body).map_err(|err| SyncError::Decode(format!("graph response: {err}")))
}
