//! OAuth 2.0 wire operations: metadata discovery, dynamic registration,
//! authorize-URL construction, code exchange, and token refresh.

use crate::error::{AuthError, AuthResult};
use crate::types::{
    now_millis, AuthorizationServerMetadata, ClientInformation, OAuthClientMetadata,
    TokenBodyFormat, TokenSet,
};
use reqwest::Client;
use tracing::{debug, info};
use url::Url;

/// Parameters for building the authorization URL. The opaque `state` is
/// appended later, when the pending-authorization record is created.
#[derive(Debug, Clone)]
pub struct AuthorizationUrlParams {
    pub authorization_endpoint: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub code_challenge: String,
    pub code_challenge_method: String,
}

/// HTTP client for the authorization server.
#[derive(Debug, Clone, Default)]
pub struct OAuthClient {
    http: Client,
}

impl OAuthClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discover authorization server metadata (RFC 8414) for the origin of
    /// `server_url`. Falls back to the OpenID Connect discovery document for
    /// servers that only publish that.
    pub async fn discover_metadata(
        &self,
        server_url: &str,
    ) -> AuthResult<AuthorizationServerMetadata> {
        let base = Url::parse(server_url)?;
        let origin = base.origin().ascii_serialization();

        for suffix in ["oauth-authorization-server", "openid-configuration"] {
            let discovery_url = format!("{origin}/.well-known/{suffix}");
            debug!(url = %discovery_url, "fetching authorization server metadata");

            let response = self
                .http
                .get(&discovery_url)
                .header("Accept", "application/json")
                .send()
                .await?;

            if response.status().is_success() {
                let metadata: AuthorizationServerMetadata = response.json().await?;
                info!(issuer = %metadata.issuer, "discovered authorization server");
                return Ok(metadata);
            }
            debug!(url = %discovery_url, status = %response.status(), "discovery miss");
        }

        Err(AuthError::AuthorizationServerError(format!(
            "no authorization server metadata published at {origin}"
        )))
    }

    /// Dynamic client registration (RFC 7591).
    pub async fn register_client(
        &self,
        registration_endpoint: &str,
        metadata: &OAuthClientMetadata,
    ) -> AuthResult<ClientInformation> {
        debug!(endpoint = %registration_endpoint, "registering OAuth client");

        let response = self
            .http
            .post(registration_endpoint)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(metadata)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(AuthError::RegistrationFailed(error_body));
        }

        let info: ClientInformation = response.json().await?;
        info!(client_id = %info.client_id, "registered OAuth client");
        Ok(info)
    }

    /// Build the user-facing authorization URL with PKCE.
    pub fn build_authorization_url(&self, params: &AuthorizationUrlParams) -> AuthResult<Url> {
        let mut url = Url::parse(&params.authorization_endpoint)?;
        let scope = params.scopes.join(" ");
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &params.client_id)
            .append_pair("redirect_uri", &params.redirect_uri)
            .append_pair("scope", &scope)
            .append_pair("code_challenge", &params.code_challenge)
            .append_pair("code_challenge_method", &params.code_challenge_method);
        Ok(url)
    }

    /// Exchange an authorization code for tokens. The returned set already
    /// carries a computed `expires_at` when the server reports `expires_in`.
    pub async fn exchange_code(
        &self,
        token_endpoint: &str,
        client_id: &str,
        redirect_uri: &str,
        code: &str,
        code_verifier: &str,
        body_format: TokenBodyFormat,
    ) -> AuthResult<TokenSet> {
        let fields = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", client_id),
            ("code_verifier", code_verifier),
        ];
        self.token_request(token_endpoint, &fields, body_format).await
    }

    /// Refresh an access token with a refresh token.
    pub async fn refresh_token(
        &self,
        token_endpoint: &str,
        client_id: &str,
        refresh_token: &str,
        body_format: TokenBodyFormat,
    ) -> AuthResult<TokenSet> {
        let fields = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
        ];
        self.token_request(token_endpoint, &fields, body_format).await
    }

    async fn token_request(
        &self,
        token_endpoint: &str,
        fields: &[(&str, &str)],
        body_format: TokenBodyFormat,
    ) -> AuthResult<TokenSet> {
        debug!(endpoint = %token_endpoint, grant = %fields[0].1, "token request");

        let request = self
            .http
            .post(token_endpoint)
            .header("Accept", "application/json");
        let request = match body_format {
            TokenBodyFormat::Form => request.form(fields),
            TokenBodyFormat::Json => {
                let body: std::collections::HashMap<&str, &str> =
                    fields.iter().copied().collect();
                request.json(&body)
            }
        };

        let response = request.send().await?;
        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenExchangeFailed(error_body));
        }

        let tokens: TokenSet = response.json().await?;
        Ok(tokens.with_computed_expiry(now_millis()))
    }
}
