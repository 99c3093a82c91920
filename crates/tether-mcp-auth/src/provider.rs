//! OAuth client provider: the capability surface the authorization flow
//! drives. It owns the per-server store, advertises client metadata,
//! persists tokens and PKCE state, and opens the authorization popup.

use crate::error::{AuthError, AuthResult};
use crate::storage::KeyValueStorage;
use crate::store::{AuthStore, Slot};
use crate::types::{
    now_millis, AuthorizationServerMetadata, ClientInformation, OAuthClientMetadata,
    PendingAuthorization, StoredProviderOptions, TokenBodyFormat, TokenSet,
};
use async_trait::async_trait;
use std::sync::Arc;
use tether_mcp_core::utils::generate_state;
use tracing::{debug, warn};
use url::Url;

/// Pending authorizations die after ten minutes.
const PENDING_AUTH_TTL_MS: u64 = 10 * 60 * 1000;

/// Default window features for the authorization popup.
pub const DEFAULT_POPUP_FEATURES: &str = "width=600,height=700,resizable=yes,scrollbars=yes";

/// Default storage namespace root.
pub const DEFAULT_STORAGE_KEY_PREFIX: &str = "mcp:auth";

/// Snapshot of a just-opened authorization window.
#[derive(Debug, Clone, Copy)]
pub struct PopupHandle {
    /// Whether the window was already closed immediately after opening.
    pub closed: bool,
}

/// Host seam for opening the authorization window.
///
/// Returning `None`, or a handle that is already closed, means the popup was
/// blocked; the host is then expected to surface the persisted authorize URL
/// as a manual link.
pub trait PopupLauncher: Send + Sync {
    fn open(&self, url: &str, features: &str) -> Option<PopupHandle>;
}

/// Opens the system browser. The window-features string has no meaning for
/// an external browser and is ignored.
#[derive(Debug, Default)]
pub struct SystemBrowser;

impl PopupLauncher for SystemBrowser {
    fn open(&self, url: &str, _features: &str) -> Option<PopupHandle> {
        match webbrowser::open(url) {
            Ok(()) => Some(PopupHandle { closed: false }),
            Err(e) => {
                warn!(error = %e, "failed to open system browser");
                None
            }
        }
    }
}

/// Never opens anything. Used when the host drives navigation itself and on
/// the callback page, where no popup is ever needed.
#[derive(Debug, Default)]
pub struct NoPopup;

impl PopupLauncher for NoPopup {
    fn open(&self, _url: &str, _features: &str) -> Option<PopupHandle> {
        None
    }
}

/// Result of an authorization redirect attempt.
#[derive(Debug, Clone)]
pub struct RedirectResult {
    /// The popup opened and is believed to be showing the consent page.
    pub success: bool,
    /// The popup was blocked; the URL below should be offered manually.
    pub popup_blocked: bool,
    /// The final authorize URL, state included.
    pub url: String,
}

/// Provider construction options.
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    pub storage_key_prefix: String,
    pub client_name: Option<String>,
    pub client_uri: Option<String>,
    pub callback_url: String,
    pub scopes: Vec<String>,
    pub popup_features: String,
    /// When set, the authorize step never opens a window; the URL is only
    /// surfaced for the host to open.
    pub prevent_auto_auth: bool,
    pub token_body_format: TokenBodyFormat,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            storage_key_prefix: DEFAULT_STORAGE_KEY_PREFIX.to_string(),
            client_name: None,
            client_uri: None,
            callback_url: "http://localhost:8080/oauth/callback".to_string(),
            scopes: vec!["openid".to_string()],
            popup_features: DEFAULT_POPUP_FEATURES.to_string(),
            prevent_auto_auth: false,
            token_body_format: TokenBodyFormat::Form,
        }
    }
}

impl ProviderOptions {
    fn to_stored(&self, server_url: &str) -> StoredProviderOptions {
        StoredProviderOptions {
            server_url: server_url.to_string(),
            storage_key_prefix: self.storage_key_prefix.clone(),
            client_name: self.client_name.clone(),
            client_uri: self.client_uri.clone(),
            callback_url: self.callback_url.clone(),
            scopes: self.scopes.clone(),
            token_body_format: self.token_body_format,
        }
    }

    fn from_stored(stored: &StoredProviderOptions) -> Self {
        Self {
            storage_key_prefix: stored.storage_key_prefix.clone(),
            client_name: stored.client_name.clone(),
            client_uri: stored.client_uri.clone(),
            callback_url: stored.callback_url.clone(),
            scopes: stored.scopes.clone(),
            popup_features: DEFAULT_POPUP_FEATURES.to_string(),
            prevent_auto_auth: false,
            token_body_format: stored.token_body_format,
        }
    }
}

/// OAuth 2.0 client provider for one MCP server.
pub struct OAuthProvider {
    server_url: String,
    options: ProviderOptions,
    store: AuthStore,
    launcher: Arc<dyn PopupLauncher>,
}

impl OAuthProvider {
    pub fn new(
        server_url: &str,
        options: ProviderOptions,
        storage: Arc<dyn KeyValueStorage>,
        launcher: Arc<dyn PopupLauncher>,
    ) -> Self {
        let store = AuthStore::new(server_url, &options.storage_key_prefix, storage);
        Self {
            server_url: server_url.to_string(),
            options,
            store,
            launcher,
        }
    }

    /// Rebuild the provider a pending-authorization record was created with.
    /// The callback page never opens popups, so none is wired.
    pub fn from_stored_options(
        stored: &StoredProviderOptions,
        storage: Arc<dyn KeyValueStorage>,
    ) -> Self {
        Self::new(
            &stored.server_url,
            ProviderOptions::from_stored(stored),
            storage,
            Arc::new(NoPopup),
        )
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn server_url_hash(&self) -> &str {
        self.store.server_hash()
    }

    pub fn scopes(&self) -> &[String] {
        &self.options.scopes
    }

    pub fn callback_url(&self) -> &str {
        &self.options.callback_url
    }

    pub fn token_body_format(&self) -> TokenBodyFormat {
        self.options.token_body_format
    }

    /// Client metadata advertised at dynamic registration.
    pub fn client_metadata(&self) -> OAuthClientMetadata {
        OAuthClientMetadata {
            redirect_uris: vec![self.options.callback_url.clone()],
            token_endpoint_auth_method: "none".to_string(),
            grant_types: vec![
                "authorization_code".to_string(),
                "refresh_token".to_string(),
            ],
            response_types: vec!["code".to_string()],
            client_name: self.options.client_name.clone(),
            client_uri: self.options.client_uri.clone(),
            scope: Some(self.options.scopes.join(" ")),
        }
    }

    pub fn client_information(&self) -> Option<ClientInformation> {
        self.store.get_json(Slot::ClientInfo)
    }

    pub fn save_client_information(&self, info: &ClientInformation) -> AuthResult<()> {
        self.store.put_json(Slot::ClientInfo, info)
    }

    /// Current tokens; a set whose absolute expiry has passed reads as
    /// absent.
    pub fn tokens(&self) -> Option<TokenSet> {
        let tokens: TokenSet = self.store.get_json(Slot::Tokens)?;
        if tokens.is_expired(now_millis()) {
            debug!(server = %self.server_url, "stored tokens have expired");
            return None;
        }
        Some(tokens)
    }

    /// Stored tokens regardless of expiry, for the silent-refresh path.
    pub(crate) fn stored_tokens_any(&self) -> Option<TokenSet> {
        self.store.get_json(Slot::Tokens)
    }

    pub fn save_tokens(&self, tokens: &TokenSet) -> AuthResult<()> {
        let stamped = tokens.clone().with_computed_expiry(now_millis());
        self.store.put_json(Slot::Tokens, &stamped)
    }

    /// Mark the stored access token as expired while keeping the rest of
    /// the set. Used when the server rejects a token that looks valid
    /// locally: the refresh token (if any) stays usable for a silent
    /// refresh, and the authorization flow stops short-circuiting on the
    /// dead access token.
    pub fn invalidate_access_token(&self) {
        if let Some(mut tokens) = self.stored_tokens_any() {
            tokens.expires_at = Some(0);
            if let Err(e) = self.save_tokens(&tokens) {
                warn!(server = %self.server_url, error = %e, "failed to invalidate tokens");
            }
        }
    }

    /// The PKCE verifier of the in-flight authorization. Absence means the
    /// flow state is corrupt.
    pub fn code_verifier(&self) -> AuthResult<String> {
        self.store
            .get_raw(Slot::CodeVerifier)
            .ok_or_else(|| AuthError::CorruptFlow("code verifier missing".to_string()))
    }

    pub fn save_code_verifier(&self, verifier: &str) -> AuthResult<()> {
        self.store.put_raw(Slot::CodeVerifier, verifier)
    }

    /// Attach a fresh `state`, persist the pending-authorization record and
    /// the final URL, then try to open the popup.
    pub fn redirect_to_authorization(
        &self,
        auth_url: &Url,
        metadata: &AuthorizationServerMetadata,
    ) -> AuthResult<RedirectResult> {
        let state = generate_state();

        let mut url = auth_url.clone();
        url.query_pairs_mut().append_pair("state", &state);
        let final_url = url.to_string();

        let record = PendingAuthorization {
            state: state.clone(),
            authorization_origin: url.origin().ascii_serialization(),
            metadata: metadata.clone(),
            server_url_hash: self.store.server_hash().to_string(),
            provider_options: self.options.to_stored(&self.server_url),
            expires_at: now_millis() + PENDING_AUTH_TTL_MS,
        };
        self.store.save_pending(&record)?;
        self.store.put_raw(Slot::AuthUrl, &final_url)?;

        if self.options.prevent_auto_auth {
            debug!(server = %self.server_url, "auto-authorization suppressed");
            return Ok(RedirectResult {
                success: false,
                popup_blocked: false,
                url: final_url,
            });
        }

        let handle = self.launcher.open(&final_url, &self.options.popup_features);
        let popup_blocked = match handle {
            Some(handle) => handle.closed,
            None => true,
        };
        if popup_blocked {
            warn!(server = %self.server_url, "authorization popup was blocked");
        }

        Ok(RedirectResult {
            success: !popup_blocked,
            popup_blocked,
            url: final_url,
        })
    }

    /// The last fully built authorize URL, for a manual "open in new window"
    /// link when the popup was blocked.
    pub fn last_attempted_auth_url(&self) -> Option<String> {
        self.store.get_raw(Slot::AuthUrl)
    }

    /// Wipe everything persisted for this server. Returns removed key count.
    pub fn clear_storage(&self) -> usize {
        self.store.clear_all_for_server()
    }

    pub(crate) fn store(&self) -> &AuthStore {
        &self.store
    }
}

/// Live source of bearer tokens for outbound transport requests.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn bearer_token(&self) -> Option<String>;
}

#[async_trait]
impl TokenSource for OAuthProvider {
    async fn bearer_token(&self) -> Option<String> {
        self.tokens().map(|t| t.access_token)
    }
}
