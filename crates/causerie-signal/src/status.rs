//! Group status lookup and endpoint resolution.
//!
//! The server publishes a per-group status document at
//! `/group/{group}/.status` carrying the signaling endpoint. When the
//! document is unavailable the endpoint is derived from the server URL.

use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct GroupStatus {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Signaling endpoint URL.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(rename = "authServer", default)]
    pub auth_server: Option<String>,
    #[serde(default)]
    pub locked: bool,
    #[serde(rename = "clientCount", default)]
    pub client_count: Option<u32>,
}

/// Derives the signaling endpoint from the server base URL:
/// `http` becomes `ws`, `https` becomes `wss`, path `/ws`.
pub fn fallback_endpoint(base: &str) -> String {
    let trimmed = base.trim_end_matches('/');
    let ws = if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        trimmed.to_string()
    };
    format!("{ws}/ws")
}

/// Fetches the group status and resolves the endpoint to connect to.
/// Lookup failures are not fatal: the fallback endpoint is used.
pub async fn resolve_endpoint(http: &reqwest::Client, base: &str, group: &str) -> String {
    let url = format!("{}/group/{}/.status", base.trim_end_matches('/'), group);
    match fetch_status(http, &url).await {
        Ok(status) => {
            if let Some(endpoint) = status.endpoint {
                debug!(%endpoint, "Resolved endpoint from group status");
                return endpoint;
            }
            warn!(%url, "Group status has no endpoint, using fallback");
            fallback_endpoint(base)
        }
        Err(e) => {
            warn!(%url, error = %e, "Group status lookup failed, using fallback");
            fallback_endpoint(base)
        }
    }
}

async fn fetch_status(http: &reqwest::Client, url: &str) -> Result<GroupStatus, reqwest::Error> {
    http.get(url)
        .send()
        .await?
        .error_for_status()?
        .json::<GroupStatus>()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_maps_schemes() {
        assert_eq!(
            fallback_endpoint("https://sfu.example.org"),
            "wss://sfu.example.org/ws"
        );
        assert_eq!(
            fallback_endpoint("http://localhost:8443/"),
            "ws://localhost:8443/ws"
        );
    }

    #[test]
    fn status_deserializes_partial_documents() {
        let status: GroupStatus =
            serde_json::from_str(r#"{"name":"lobby","clientCount":3}"#).unwrap();
        assert_eq!(status.name.as_deref(), Some("lobby"));
        assert_eq!(status.client_count, Some(3));
        assert!(status.endpoint.is_none());
        assert!(!status.locked);
    }

    #[test]
    fn status_carries_endpoint() {
        let status: GroupStatus =
            serde_json::from_str(r#"{"endpoint":"wss://sfu.example.org/ws"}"#).unwrap();
        assert_eq!(status.endpoint.as_deref(), Some("wss://sfu.example.org/ws"));
    }
}
