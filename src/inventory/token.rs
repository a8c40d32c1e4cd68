//! OAuth2 client-credentials token acquisition for Microsoft Graph.
use crate::error::SyncError;
use serde::Deserialize;
use std::fmt;
use ureq::Agent;

const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Bearer token; the secret is never printed.
#[derive(Clone)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TokenError {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

/// Exchange client credentials for a Graph access token.
pub fn acquire_token(
    agent: &Agent,
    login_endpoint: &str,
    tenant: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<AccessToken, SyncError> {
    let url = format!(
        "{}/{}/oauth2/v2.0/token",
        login_endpoint.trim_end_matches('/'),
        tenant
    );
    let mut response = agent
        .post(&url)
        .send_form([
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("scope", GRAPH_SCOPE),
        ])
        .map_err(|err| SyncError::Authentication(err.to_string()))?;
    let status = response.status().as_u16();
    let body = response
        .body_mut()
        .read_to_string()
        .map_err(|err| SyncError::Authentication(err.to_string()))?;
    if status != 200 {
        return Err(SyncError::Authentication(describe_token_error(status, &body)));
    }
    let token: TokenResponse = serde_json::from_str(&body)
        .map_err(|err| SyncError::Authentication(format!("parse token response: {err}")))?;
    if token.access_token.is_empty() {
        return Err(SyncError::Authentication(
            "token response carried an empty access_token".to_string(),
        ));
    }
    tracing::debug!(tenant, expires_in = ?token.expires_in, "acquired graph token");
    Ok(AccessToken::new(token.access_token))
}

fn describe_token_error(status: u16, body: &str) -> String {
    match serde_json::from_str::<TokenError>(body) {
        Ok(err) if !err.error.is_empty() => {
            format!("status {status}: {} {}", err.error, err.error_description.trim())
        }
        _ => format!("status {status}: {}", body.trim()),
    }
}
