//! Azure Blob Storage REST client for manifest objects.
//!
//! Requests are authorized either with a SAS token appended to the query or
//! with a Shared Key signature over the canonicalized request.
use super::connection::{BlobCredential, ConnectionString};
use super::ManifestStore;
use crate::error::SyncError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::time::SystemTime;
use ureq::Agent;
use url::Url;

const API_VERSION: &str = "2021-08-06";
const MANIFEST_CONTENT_TYPE: &str = "application/xml";

type HmacSha256 = Hmac<Sha256>;

pub struct BlobStore {
    agent: Agent,
    blob_endpoint: String,
    container: String,
    credential: BlobCredential,
}

#[derive(Debug, Deserialize)]
struct EnumerationResults {
    #[serde(rename = "Blobs", default)]
    blobs: BlobList,
    #[serde(rename = "NextMarker", default)]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BlobList {
    #[serde(rename = "Blob", default)]
    items: Vec<BlobItem>,
}

#[derive(Debug, Deserialize)]
struct BlobItem {
    #[serde(rename = "Name")]
    name: String,
}

impl BlobStore {
    pub fn new(agent: Agent, connection: ConnectionString, container: &str) -> Self {
        Self {
            agent,
            blob_endpoint: connection.blob_endpoint,
            container: container.trim_matches('/').to_string(),
            credential: connection.credential,
        }
    }

    fn url(&self, blob: Option<&str>, query: &[(&str, &str)]) -> Result<Url, SyncError> {
        let base = format!("{}/{}", self.blob_endpoint, self.container);
        let mut url = Url::parse(&base)
            .map_err(|err| SyncError::ConnectionString(format!("blob endpoint {base}: {err}")))?;
        if let Some(blob) = blob {
            url.path_segments_mut()
                .map_err(|()| SyncError::ConnectionString(format!("blob endpoint {base}")))?
                .extend(blob.split('/'));
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter().copied());
        }
        if let BlobCredential::Sas(sas) = &self.credential {
            let combined = match url.query() {
                Some(existing) => format!("{existing}&{sas}"),
                None => sas.clone(),
            };
            url.set_query(Some(&combined));
        }
        Ok(url)
    }

    /// Headers to send, including `Authorization` for Shared Key access.
    fn signed_headers(
        &self,
        method: &str,
        url: &Url,
        query: &[(&str, &str)],
        mut headers: Vec<(String, String)>,
        content_length: usize,
        date: &str,
    ) -> Result<Vec<(String, String)>, SyncError> {
        headers.push(("x-ms-date".to_string(), date.to_string()));
        headers.push(("x-ms-version".to_string(), API_VERSION.to_string()));
        if let BlobCredential::SharedKey { account, key } = &self.credential {
            let text = string_to_sign(method, account, url.path(), query, &headers, content_length);
            let mut mac = HmacSha256::new_from_slice(key)
                .map_err(|err| SyncError::ConnectionString(format!("account key: {err}")))?;
            mac.update(text.as_bytes());
            let signature = STANDARD.encode(mac.finalize().into_bytes());
            headers.push((
                "Authorization".to_string(),
                format!("SharedKey {account}:{signature}"),
            ));
        }
        Ok(headers)
    }

    fn list_page(
        &self,
        prefix: &str,
        marker: Option<&str>,
    ) -> Result<(Vec<String>, Option<String>), SyncError> {
        let mut query = vec![("restype", "container"), ("comp", "list"), ("prefix", prefix)];
        if let Some(marker) = marker {
            query.push(("marker", marker));
        }
        let url = self.url(None, &query)?;
        let headers = self.signed_headers("GET", &url, &query, Vec::new(), 0, &now_http_date())?;
        let mut request = self.agent.get(url.as_str());
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let mut response = request.call()?;
        let status = response.status().as_u16();
        let body = response.body_mut().read_to_string()?;
        if status != 200 {
            return Err(SyncError::request(&self.container, status, body));
        }
        parse_list(&body)
    }
}

impl ManifestStore for BlobStore {
    fn list_names(&self, prefix: &str) -> Result<Vec<String>, SyncError> {
        let mut names = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let (mut page, next) = self.list_page(prefix, marker.as_deref())?;
            names.append(&mut page);
            match next {
                Some(next) => marker = Some(next),
                None => break,
            }
        }
        tracing::debug!(container = %self.container, prefix, count = names.len(), "listed blobs");
        Ok(names)
    }

    fn get(&self, name: &str) -> Result<Vec<u8>, SyncError> {
        let url = self.url(Some(name), &[])?;
        let headers = self.signed_headers("GET", &url, &[], Vec::new(), 0, &now_http_date())?;
        let mut request = self.agent.get(url.as_str());
        for (key, value) in &headers {
            request = request.header(key.as_str(), value.as_str());
        }
        let mut response = request.call()?;
        match response.status().as_u16() {
            200 => Ok(response.body_mut().read_to_vec()?),
            404 => Err(SyncError::NotFound(name.to_string())),
            status => {
                let body = response.body_mut().read_to_string().unwrap_or_default();
                Err(SyncError::request(name, status, body))
            }
        }
    }

    fn put(&self, name: &str, bytes: &[u8], overwrite: bool) -> Result<(), SyncError> {
        let url = self.url(Some(name), &[])?;
        let mut extra = vec![
            ("Content-Type".to_string(), MANIFEST_CONTENT_TYPE.to_string()),
            ("x-ms-blob-type".to_string(), "BlockBlob".to_string()),
        ];
        if !overwrite {
            extra.push(("If-None-Match".to_string(), "*".to_string()));
        }
        let headers = self.signed_headers("PUT", &url, &[], extra, bytes.len(), &now_http_date())?;
        let mut request = self.agent.put(url.as_str());
        for (key, value) in &headers {
            request = request.header(key.as_str(), value.as_str());
        }
        let mut response = request.send(bytes)?;
        match response.status().as_u16() {
            200 | 201 => Ok(()),
            409 | 412 => Err(SyncError::AlreadyExists(name.to_string())),
            status => {
                let body = response.body_mut().read_to_string().unwrap_or_default();
                Err(SyncError::request(name, status, body))
            }
        }
    }

    fn delete(&self, name: &str) -> Result<(), SyncError> {
        let url = self.url(Some(name), &[])?;
        let headers = self.signed_headers("DELETE", &url, &[], Vec::new(), 0, &now_http_date())?;
        let mut request = self.agent.delete(url.as_str());
        for (key, value) in &headers {
            request = request.header(key.as_str(), value.as_str());
        }
        let mut response = request.call()?;
        match response.status().as_u16() {
            200 | 202 => Ok(()),
            404 => {
                tracing::debug!(name, "blob already absent");
                Ok(())
            }
            status => {
                let body = response.body_mut().read_to_string().unwrap_or_default();
                Err(SyncError::request(name, status, body))
            }
        }
    }
}

fn now_http_date() -> String {
    httpdate::fmt_http_date(SystemTime::now())
}

fn parse_list(body: &str) -> Result<(Vec<String>, Option<String>), SyncError> {
    let results: EnumerationResults = quick_xml::de::from_str(body)
        .map_err(|err| SyncError::Decode(format!("blob listing: {err}")))?;
    let names = results.blobs.items.into_iter().map(|item| item.name).collect();
    let next = results.next_marker.filter(|marker| !marker.trim().is_empty());
    Ok((names, next))
}

/// Shared Key string-to-sign for the Blob service.
fn string_to_sign(
    method: &str,
    account: &str,
    path: &str,
    query: &[(&str, &str)],
    headers: &[(String, String)],
    content_length: usize,
) -> String {
    let header = |name: &str| {
        headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
            .unwrap_or("")
    };
    let length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };
    let mut lines = vec![
        method.to_string(),
        header("content-encoding").to_string(),
        header("content-language").to_string(),
        length,
        header("content-md5").to_string(),
        header("content-type").to_string(),
        header("date").to_string(),
        header("if-modified-since").to_string(),
        header("if-match").to_string(),
        header("if-none-match").to_string(),
        header("if-unmodified-since").to_string(),
        header("range").to_string(),
    ];

    let mut ms_headers: Vec<(String, &str)> = headers
        .iter()
        .map(|(key, value)| (key.to_ascii_lowercase(), value.trim()))
        .filter(|(key, _)| key.starts_with("x-ms-"))
        .collect();
    ms_headers.sort();
    lines.extend(ms_headers.into_iter().map(|(key, value)| format!("{key}:{value}")));

    let mut resource = format!("/{account}{path}");
    let mut params: Vec<(String, &str)> = query
        .iter()
        .map(|(key, value)| (key.to_ascii_lowercase(), *value))
        .collect();
    params.sort();
    for (key, value) in params {
        resource.push('\n');
        resource.push_str(&key);
        resource.push(':');
        resource.push_str(value);
    }
    lines.push(resource);
    lines.join("\n")
}
