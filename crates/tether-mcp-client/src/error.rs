use tether_mcp_core::JsonRpcError;
use tether_mcp_transport::TransportError;
use thiserror::Error;

/// Errors surfaced by connection operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The server wants (re)authorization. Operations that can trigger the
    /// authentication branch intercept this before callers see it.
    #[error("Unauthorized")]
    Unauthorized,

    /// Operation invoked while the connection is not ready.
    #[error("Connection is not ready")]
    NotReady,

    #[error("Request timed out")]
    Timeout,

    /// JSON-RPC error from the server, passed through verbatim.
    #[error("Server error: {0}")]
    Rpc(JsonRpcError),

    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

impl From<TransportError> for ClientError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Unauthorized => ClientError::Unauthorized,
            other => ClientError::Transport(other),
        }
    }
}

/// Result type for connection operations.
pub type ClientResult<T> = Result<T, ClientError>;
