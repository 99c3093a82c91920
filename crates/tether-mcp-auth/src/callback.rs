//! Authorization-callback handling.
//!
//! Runs on the redirect URI. Parses the authorization response, consumes the
//! pending-authorization record, rebuilds the provider it was created with,
//! exchanges the code for tokens, and announces the outcome on the auth
//! event bus.

use crate::bus::{AuthCallbackMessage, AuthEventBus};
use crate::error::{AuthError, AuthResult};
use crate::oauth::OAuthClient;
use crate::provider::{OAuthProvider, DEFAULT_STORAGE_KEY_PREFIX};
use crate::storage::KeyValueStorage;
use crate::store::{AuthStore, Slot};
use std::sync::Arc;
use tracing::{info, warn};

/// Query parameters of the authorization redirect.
#[derive(Debug, Clone, Default)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parse from a raw query string (no leading `?`).
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = value.into_owned();
            match key.as_ref() {
                "code" => params.code = Some(value),
                "state" => params.state = Some(value),
                "error" => params.error = Some(value),
                "error_description" => params.error_description = Some(value),
                _ => {}
            }
        }
        params
    }
}

/// Environment of the callback page.
#[derive(Debug, Clone)]
pub struct CallbackOptions {
    pub storage_key_prefix: String,
    /// Origin the completion message is posted under. Receivers compare it
    /// against their own callback origin.
    pub origin: String,
    /// Where a full-page redirect flow navigates after success, when no
    /// opener was listening.
    pub post_auth_redirect: String,
}

impl Default for CallbackOptions {
    fn default() -> Self {
        Self {
            storage_key_prefix: DEFAULT_STORAGE_KEY_PREFIX.to_string(),
            origin: "http://localhost:8080".to_string(),
            post_auth_redirect: "/".to_string(),
        }
    }
}

/// What happened, for the callback page to act on.
#[derive(Debug, Clone)]
pub struct CallbackOutcome {
    pub server_url_hash: String,
    /// An opener was listening and has been messaged; the page should close.
    pub opener_notified: bool,
    /// No opener: navigate here instead.
    pub redirect_to: Option<String>,
}

/// Finish an authorization attempt from the redirect parameters.
///
/// Safe to call twice with the same parameters: the pending record is
/// consumed destructively, so the second call fails with
/// [`AuthError::InvalidOrExpiredState`] without touching stored tokens.
/// Failures are posted to the bus *and* returned, so a directly opened
/// callback page can render them.
pub async fn handle_authorization_callback(
    params: &CallbackParams,
    storage: Arc<dyn KeyValueStorage>,
    bus: &AuthEventBus,
    options: &CallbackOptions,
) -> AuthResult<CallbackOutcome> {
    match complete_authorization(params, storage, bus, options).await {
        Ok(outcome) => Ok(outcome),
        Err(error) => {
            warn!(error = %error, "authorization callback failed");
            bus.post(AuthCallbackMessage::failure(
                &error.to_string(),
                &options.origin,
            ));
            Err(error)
        }
    }
}

async fn complete_authorization(
    params: &CallbackParams,
    storage: Arc<dyn KeyValueStorage>,
    bus: &AuthEventBus,
    options: &CallbackOptions,
) -> AuthResult<CallbackOutcome> {
    if let Some(error) = &params.error {
        let description = params
            .error_description
            .as_deref()
            .unwrap_or("no further detail");
        return Err(AuthError::AuthorizationFailed(format!(
            "{error}: {description}"
        )));
    }

    let code = params
        .code
        .as_deref()
        .ok_or_else(|| AuthError::MalformedCallback("missing code parameter".to_string()))?;
    let state = params
        .state
        .as_deref()
        .ok_or_else(|| AuthError::MalformedCallback("missing state parameter".to_string()))?;

    let record = AuthStore::take_pending(&storage, &options.storage_key_prefix, state)
        .ok_or(AuthError::InvalidOrExpiredState)?;

    let provider = OAuthProvider::from_stored_options(&record.provider_options, storage);

    let client_info = provider
        .client_information()
        .ok_or_else(|| AuthError::CorruptFlow("client registration missing".to_string()))?;
    let code_verifier = provider.code_verifier()?;

    let tokens = OAuthClient::new()
        .exchange_code(
            &record.metadata.token_endpoint,
            &client_info.client_id,
            provider.callback_url(),
            code,
            &code_verifier,
            provider.token_body_format(),
        )
        .await?;

    provider.save_tokens(&tokens)?;
    // The verifier is single-use; drop it only after the exchange went
    // through, together with the no-longer-needed manual URL.
    provider.store().remove(Slot::CodeVerifier);
    provider.store().remove(Slot::AuthUrl);

    info!(server = %provider.server_url(), "authorization complete, tokens stored");

    let opener_notified = bus.post(AuthCallbackMessage::success(
        provider.server_url_hash(),
        &options.origin,
    ));
    let redirect_to = (!opener_notified).then(|| options.post_auth_redirect.clone());

    Ok(CallbackOutcome {
        server_url_hash: provider.server_url_hash().to_string(),
        opener_notified,
        redirect_to,
    })
}
