use thiserror::Error;

/// Authentication and authorization errors.
#[derive(Error, Debug)]
pub enum AuthError {
    /// The authorization server reported an error on the redirect.
    #[error("Authorization failed: {0}")]
    AuthorizationFailed(String),

    /// Redirect arrived without `code` or `state`.
    #[error("Malformed authorization callback: {0}")]
    MalformedCallback(String),

    /// No pending authorization matches the `state`, or it has expired.
    #[error("Authorization state is invalid or has expired")]
    InvalidOrExpiredState,

    /// Client registration or PKCE verifier went missing mid-flow.
    #[error("Authorization flow state is corrupt: {0}")]
    CorruptFlow(String),

    /// Non-2xx from the token endpoint; the body is preserved verbatim.
    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("Authorization server error: {0}")]
    AuthorizationServerError(String),

    #[error("Client registration failed: {0}")]
    RegistrationFailed(String),

    /// Persistent storage rejected a write.
    #[error("Storage write failed: {0}")]
    StorageFull(String),

    #[error("Network error during authentication: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    #[error("Invalid URL: {source}")]
    Url {
        #[from]
        source: url::ParseError,
    },
}

/// Result type for authorization operations.
pub type AuthResult<T> = Result<T, AuthError>;
