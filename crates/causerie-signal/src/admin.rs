//! Administrative HTTP API: token issuance.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use causerie_shared::AdminApiError;

/// Template for a group invitation token.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TokenTemplate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub permissions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(rename = "not-before", skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
}

impl Default for TokenTemplate {
    fn default() -> Self {
        Self {
            username: None,
            permissions: vec!["present".to_string()],
            expires: None,
            not_before: None,
        }
    }
}

/// Creates a group invitation token through the admin API. Requires
/// administrator credentials; the server answers with the token location
/// in a `Location` header.
pub async fn create_token(
    http: &reqwest::Client,
    base: &str,
    group: &str,
    admin_user: &str,
    admin_password: &str,
    template: &TokenTemplate,
) -> Result<String, AdminApiError> {
    let url = format!(
        "{}/galene-api/v0/.groups/{}/.tokens/",
        base.trim_end_matches('/'),
        group
    );
    debug!(%url, "Requesting invitation token");

    let auth = base64::engine::general_purpose::STANDARD
        .encode(format!("{admin_user}:{admin_password}"));

    let response = http
        .post(&url)
        .header("Authorization", format!("Basic {auth}"))
        .json(template)
        .send()
        .await
        .map_err(|e| AdminApiError::Http(e.to_string()))?;

    if !response.status().is_success() {
        return Err(AdminApiError::BadStatus(response.status().to_string()));
    }

    let location = response
        .headers()
        .get("Location")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or(AdminApiError::MissingLocation)?;

    info!(group, "Invitation token created");
    Ok(location)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_serializes_sparse_fields() {
        let template = TokenTemplate::default();
        let json = serde_json::to_value(&template).unwrap();
        assert_eq!(json["permissions"][0], "present");
        assert!(json.get("username").is_none());
        assert!(json.get("expires").is_none());
    }

    #[test]
    fn template_serializes_not_before_with_wire_name() {
        let template = TokenTemplate {
            not_before: Some(Utc::now()),
            ..TokenTemplate::default()
        };
        let json = serde_json::to_value(&template).unwrap();
        assert!(json.get("not-before").is_some());
    }
}
