//! Connection configuration surface.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tether_mcp_auth::{
    AuthEventBus, KeyValueStorage, MemoryStorage, PopupLauncher, SystemBrowser, TokenBodyFormat,
    DEFAULT_POPUP_FEATURES, DEFAULT_STORAGE_KEY_PREFIX,
};
pub use tether_mcp_transport::TransportKind;

/// MCP client identity advertised during the initialize handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientIdentity {
    pub name: String,
    pub version: String,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            name: "tether-mcp-client".to_string(),
            version: "0.1.0".to_string(),
        }
    }
}

/// Delayed-repeat policy for connect retries and post-ready reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    Disabled,
    Delayed(Duration),
}

impl RetryPolicy {
    /// Enabled with the default connect-retry delay (5 s).
    pub fn retry_default() -> Self {
        Self::Delayed(Duration::from_millis(5000))
    }

    /// Enabled with the default reconnect delay (3 s).
    pub fn reconnect_default() -> Self {
        Self::Delayed(Duration::from_millis(3000))
    }

    pub fn delay(&self) -> Option<Duration> {
        match self {
            Self::Disabled => None,
            Self::Delayed(delay) => Some(*delay),
        }
    }
}

/// Everything a connection can be told about how to behave.
///
/// Only `url` is required; all other fields default to the values documented
/// on them. The trailing seams (`storage`, `popup_launcher`, `bus`) exist so
/// hosts and tests can substitute the environment; left alone they fall back
/// to a process-wide in-memory store, the system browser, and the global
/// auth event bus.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// MCP server URL. Identity for per-server credential namespacing.
    pub url: String,
    /// Name advertised at dynamic client registration.
    pub client_name: Option<String>,
    /// URI advertised at dynamic client registration.
    pub client_uri: Option<String>,
    /// OAuth redirect URI. Must exactly match the host's callback route.
    pub callback_url: String,
    /// Storage namespace root.
    pub storage_key_prefix: String,
    /// MCP client identity.
    pub client_config: ClientIdentity,
    /// OAuth scopes, emitted space-joined in the authorize request.
    pub scopes: Vec<String>,
    /// Transport selection; `Auto` falls back from streamable HTTP to SSE.
    pub transport_type: TransportKind,
    /// Window-features string for the authorization popup.
    pub popup_features: String,
    /// Mirror debug-level entries into the subscriber-visible log.
    pub debug: bool,
    /// Re-attempt failed connects. Off by default.
    pub auto_retry: RetryPolicy,
    /// Reconnect when a previously ready connection drops. On by default.
    pub auto_reconnect: RetryPolicy,
    /// Never open the popup; only surface the authorize URL.
    pub prevent_auto_auth: bool,
    /// Token endpoint body encoding (per-server configuration).
    pub token_body_format: TokenBodyFormat,
    /// Extra headers on every transport request.
    pub custom_headers: HashMap<String, String>,
    /// Per-request timeout for MCP calls.
    pub request_timeout: Duration,

    pub storage: Option<Arc<dyn KeyValueStorage>>,
    pub popup_launcher: Option<Arc<dyn PopupLauncher>>,
    pub bus: Option<AuthEventBus>,
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client_name: None,
            client_uri: None,
            callback_url: "http://localhost:8080/oauth/callback".to_string(),
            storage_key_prefix: DEFAULT_STORAGE_KEY_PREFIX.to_string(),
            client_config: ClientIdentity::default(),
            scopes: vec!["openid".to_string()],
            transport_type: TransportKind::Auto,
            popup_features: DEFAULT_POPUP_FEATURES.to_string(),
            debug: false,
            auto_retry: RetryPolicy::Disabled,
            auto_reconnect: RetryPolicy::reconnect_default(),
            prevent_auto_auth: false,
            token_body_format: TokenBodyFormat::Form,
            custom_headers: HashMap::new(),
            request_timeout: Duration::from_secs(30),
            storage: None,
            popup_launcher: None,
            bus: None,
        }
    }

    pub(crate) fn storage(&self) -> Arc<dyn KeyValueStorage> {
        self.storage.clone().unwrap_or_else(default_storage)
    }

    pub(crate) fn popup_launcher(&self) -> Arc<dyn PopupLauncher> {
        self.popup_launcher
            .clone()
            .unwrap_or_else(|| Arc::new(SystemBrowser))
    }

    pub(crate) fn bus(&self) -> AuthEventBus {
        self.bus.clone().unwrap_or_else(|| AuthEventBus::global().clone())
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("url", &self.url)
            .field("callback_url", &self.callback_url)
            .field("scopes", &self.scopes)
            .field("transport_type", &self.transport_type)
            .field("auto_retry", &self.auto_retry)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("prevent_auto_auth", &self.prevent_auto_auth)
            .finish_non_exhaustive()
    }
}

/// Process-wide fallback store, shared by every connection that does not
/// bring its own.
fn default_storage() -> Arc<dyn KeyValueStorage> {
    static STORAGE: OnceLock<Arc<MemoryStorage>> = OnceLock::new();
    STORAGE.get_or_init(|| Arc::new(MemoryStorage::new())).clone()
}
