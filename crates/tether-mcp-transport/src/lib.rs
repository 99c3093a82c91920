//! # Tether MCP Transport
//!
//! Client transports carrying JSON-RPC 2.0 messages to remote MCP servers.
//!
//! Two transports are provided:
//!
//! - **[`StreamableHttpTransport`]**: the current MCP Streamable HTTP
//!   transport: every message is an HTTP POST to the MCP endpoint; the
//!   response is either a single JSON message or a server-sent-event stream
//!   that is drained into the incoming queue.
//! - **[`SseTransport`]**: the legacy HTTP+SSE transport, one long-lived
//!   GET event stream for server-to-client messages, with client-to-server
//!   messages POSTed to the endpoint announced on that stream.
//!
//! Both transports are bound to an optional [`TokenSource`] so every
//! outbound request carries the *current* access token, and both surface an
//! HTTP 401 as [`TransportError::Unauthorized`] for the connection layer to
//! turn into an authorization round-trip. A 404/405/406 during streamable
//! HTTP negotiation is reported as [`TransportError::ProtocolMismatch`],
//! which drives the automatic fallback to SSE.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tether_mcp_auth::TokenSource;
use tether_mcp_core::JsonRpcMessage;
use thiserror::Error;

pub mod sse;
pub mod streamable;

pub use sse::SseTransport;
pub use streamable::StreamableHttpTransport;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Transport errors.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The server rejected the request with HTTP 401.
    #[error("Unauthorized")]
    Unauthorized,

    /// The endpoint exists but does not speak this transport.
    #[error("Protocol mismatch: {message}")]
    ProtocolMismatch { message: String },

    #[error("Connection error: {message}")]
    ConnectionError { message: String },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Serialization error: {message}")]
    SerializationError { message: String },

    #[error("Initialization error: {message}")]
    InitializationError { message: String },
}

/// Transport trait for MCP communication.
///
/// `send` and `receive` are independent: sending never blocks on the
/// incoming queue, and the receive side is drained by a single reader task.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a message to the server.
    async fn send(&self, message: JsonRpcMessage) -> Result<()>;

    /// Await the next server-to-client message, in receive order.
    /// Returns [`TransportError::ConnectionClosed`] once the transport is
    /// closed and the queue is drained.
    async fn receive(&self) -> Result<JsonRpcMessage>;

    /// Close the transport. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Shared configuration for the HTTP transports.
#[derive(Clone, Default)]
pub struct TransportOptions {
    /// Live source of bearer tokens; consulted per request.
    pub token_source: Option<Arc<dyn TokenSource>>,
    /// Extra headers injected into every request.
    pub custom_headers: HashMap<String, String>,
    /// Per-request timeout. `None` uses the client default (30 s).
    pub timeout: Option<std::time::Duration>,
}

impl std::fmt::Debug for TransportOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportOptions")
            .field("token_source", &self.token_source.is_some())
            .field("custom_headers", &self.custom_headers)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Which transport(s) to try when connecting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportKind {
    /// Streamable HTTP first, SSE on protocol mismatch.
    #[default]
    Auto,
    /// Streamable HTTP only.
    Http,
    /// Legacy HTTP+SSE only.
    Sse,
}

pub(crate) async fn auth_headers(
    options: &TransportOptions,
) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = options
        .custom_headers
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if let Some(source) = &options.token_source {
        if let Some(token) = source.bearer_token().await {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
    }
    headers
}
