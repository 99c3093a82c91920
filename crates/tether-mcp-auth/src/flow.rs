//! Authorization flow driver.
//!
//! Given a provider, decide whether the connection is already authorized
//! (stored or silently refreshed tokens) or whether the user has to be sent
//! through the consent flow.

use crate::error::{AuthError, AuthResult};
use crate::oauth::{AuthorizationUrlParams, OAuthClient};
use crate::pkce::generate_pkce;
use crate::provider::OAuthProvider;
use tracing::{debug, warn};

/// Result of driving the authorization flow one step.
#[derive(Debug, Clone)]
pub enum AuthFlowOutcome {
    /// Usable tokens are in place; reconnect and carry on.
    Authorized,
    /// The consent flow was started. The connection stays in its
    /// authenticating state until the callback reports back.
    Redirect { url: String, popup_blocked: bool },
}

/// Drive authorization for `provider`'s server.
///
/// Order of attack: stored unexpired tokens, then a silent refresh when a
/// refresh token is on hand, then the interactive authorization-code flow
/// (discovery, registration if needed, PKCE, popup).
pub async fn authorize(provider: &OAuthProvider) -> AuthResult<AuthFlowOutcome> {
    if provider.tokens().is_some() {
        debug!(server = %provider.server_url(), "stored tokens still valid");
        return Ok(AuthFlowOutcome::Authorized);
    }

    let oauth = OAuthClient::new();

    if let Some(outcome) = try_silent_refresh(provider, &oauth).await {
        return Ok(outcome);
    }

    let metadata = oauth.discover_metadata(provider.server_url()).await?;

    let client_info = match provider.client_information() {
        Some(info) => info,
        None => {
            let endpoint = metadata.registration_endpoint.as_deref().ok_or_else(|| {
                AuthError::RegistrationFailed(
                    "server supports neither dynamic registration nor a stored client"
                        .to_string(),
                )
            })?;
            let info = oauth
                .register_client(endpoint, &provider.client_metadata())
                .await?;
            provider.save_client_information(&info)?;
            info
        }
    };

    let pkce = generate_pkce();
    provider.save_code_verifier(&pkce.code_verifier)?;

    let auth_url = oauth.build_authorization_url(&AuthorizationUrlParams {
        authorization_endpoint: metadata.authorization_endpoint.clone(),
        client_id: client_info.client_id.clone(),
        redirect_uri: provider.callback_url().to_string(),
        scopes: provider.scopes().to_vec(),
        code_challenge: pkce.code_challenge.clone(),
        code_challenge_method: pkce.code_challenge_method.clone(),
    })?;

    let redirect = provider.redirect_to_authorization(&auth_url, &metadata)?;
    Ok(AuthFlowOutcome::Redirect {
        url: redirect.url,
        popup_blocked: redirect.popup_blocked,
    })
}

/// Try to refresh expired tokens without user interaction. Any failure here
/// falls through to the interactive flow.
async fn try_silent_refresh(
    provider: &OAuthProvider,
    oauth: &OAuthClient,
) -> Option<AuthFlowOutcome> {
    let stored = provider.stored_tokens_any()?;
    let refresh_token = stored.refresh_token.as_deref()?;
    let client_info = provider.client_information()?;

    let metadata = match oauth.discover_metadata(provider.server_url()).await {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!(error = %e, "metadata discovery failed before refresh");
            return None;
        }
    };

    match oauth
        .refresh_token(
            &metadata.token_endpoint,
            &client_info.client_id,
            refresh_token,
            provider.token_body_format(),
        )
        .await
    {
        Ok(tokens) => {
            if let Err(e) = provider.save_tokens(&tokens) {
                warn!(error = %e, "failed to persist refreshed tokens");
                return None;
            }
            debug!(server = %provider.server_url(), "tokens silently refreshed");
            Some(AuthFlowOutcome::Authorized)
        }
        Err(e) => {
            warn!(error = %e, "silent token refresh failed, falling back to consent flow");
            None
        }
    }
}
