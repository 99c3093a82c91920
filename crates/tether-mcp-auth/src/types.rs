use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// How the token endpoint expects the exchange/refresh request body.
///
/// This is per-server configuration, not protocol: most servers take
/// form-url-encoded bodies, a few accept only JSON.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenBodyFormat {
    #[default]
    Form,
    Json,
}

/// Client metadata advertised during dynamic registration (RFC 7591).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthClientMetadata {
    pub redirect_uris: Vec<String>,
    pub token_endpoint_auth_method: String,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Registration result (RFC 7591): the client identifier plus whatever
/// metadata the server echoed back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInformation {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id_issued_at: Option<u64>,
    #[serde(flatten)]
    pub additional: HashMap<String, serde_json::Value>,
}

/// Stored token set. `expires_at` (epoch millis) is computed at save time
/// from `expires_in` when the server provides one; a set with neither field
/// never expires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenSet {
    /// Expired iff the absolute expiry lies in the past.
    pub fn is_expired(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(at) if at < now)
    }

    /// Stamp `expires_at` from `expires_in` relative to `now`.
    pub fn with_computed_expiry(mut self, now: u64) -> Self {
        if self.expires_at.is_none() {
            if let Some(expires_in) = self.expires_in {
                self.expires_at = Some(now + expires_in * 1000);
            }
        }
        self
    }
}

/// Authorization server metadata (RFC 8414).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes_supported: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response_types_supported: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub grant_types_supported: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub code_challenge_methods_supported: Vec<String>,
    #[serde(flatten)]
    pub additional: HashMap<String, serde_json::Value>,
}

/// Provider construction options carried into the pending-authorization
/// record, so the callback can rebuild an identical provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredProviderOptions {
    pub server_url: String,
    pub storage_key_prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_uri: Option<String>,
    pub callback_url: String,
    pub scopes: Vec<String>,
    #[serde(default)]
    pub token_body_format: TokenBodyFormat,
}

/// Transient record persisted per authorization attempt, keyed by the opaque
/// `state` value, so the callback page can finish the flow. Consumption is
/// destructive; expired records are discarded on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAuthorization {
    pub state: String,
    /// Origin of the authorization endpoint the popup navigated to.
    pub authorization_origin: String,
    pub metadata: AuthorizationServerMetadata,
    pub server_url_hash: String,
    pub provider_options: StoredProviderOptions,
    /// Epoch millis after which this record is dead.
    pub expires_at: u64,
}

impl PendingAuthorization {
    /// Expiry exactly at `now` counts as expired.
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_set_expiry_rules() {
        let eternal = TokenSet {
            access_token: "a".into(),
            token_type: "Bearer".into(),
            expires_in: None,
            expires_at: None,
            refresh_token: None,
            scope: None,
        };
        assert!(!eternal.is_expired(u64::MAX));

        let stamped = TokenSet {
            expires_in: Some(600),
            ..eternal.clone()
        }
        .with_computed_expiry(1_000);
        assert_eq!(stamped.expires_at, Some(601_000));
        assert!(!stamped.is_expired(601_000));
        assert!(stamped.is_expired(601_001));
    }

    #[test]
    fn pending_record_expiry_is_inclusive() {
        let record = PendingAuthorization {
            state: "s".into(),
            authorization_origin: "https://auth.example".into(),
            metadata: serde_json::from_value(serde_json::json!({
                "issuer": "https://auth.example",
                "authorization_endpoint": "https://auth.example/authorize",
                "token_endpoint": "https://auth.example/token"
            }))
            .unwrap(),
            server_url_hash: "0".repeat(16),
            provider_options: StoredProviderOptions {
                server_url: "https://mcp.example/v1".into(),
                storage_key_prefix: "mcp:auth".into(),
                client_name: None,
                client_uri: None,
                callback_url: "http://localhost:8080/oauth/callback".into(),
                scopes: vec!["openid".into()],
                token_body_format: TokenBodyFormat::Form,
            },
            expires_at: 5_000,
        };
        assert!(!record.is_expired(4_999));
        assert!(record.is_expired(5_000));
        assert!(record.is_expired(5_001));
    }

    #[test]
    fn token_set_defaults_bearer_type() {
        let parsed: TokenSet =
            serde_json::from_str(r#"{"access_token": "tok"}"#).unwrap();
        assert_eq!(parsed.token_type, "Bearer");
    }
}
