//! # Tether MCP Client
//!
//! A reconnecting, user-authorized connection to a remote Model Context
//! Protocol server, exposed as a subscribable state view.
//!
//! ## Overview
//!
//! [`McpConnection::connect`] takes a [`ConnectionConfig`] (only the server
//! URL is required) and immediately returns a handle while the connection
//! machinery works in the background:
//!
//! 1. discover how to reach the server and construct the OAuth provider,
//! 2. open a transport (streamable HTTP, falling back to SSE), perform the
//!    MCP initialize handshake,
//! 3. detour through the authorization-code + PKCE consent flow whenever the
//!    server answers 401, resuming automatically once the callback page
//!    reports success,
//! 4. list tools, resources, resource templates and prompts, then go ready,
//! 5. recover from transport drops (auto-reconnect), failed attempts
//!    (opt-in auto-retry) and token expiry mid-call.
//!
//! Hosts observe everything through [`McpConnection::subscribe`]: each
//! received [`ConnectionSnapshot`] is a consistent view of phase, discovered
//! collections, last error, manual authorization URL, and a bounded
//! diagnostic log.
//!
//! ```no_run
//! use tether_mcp_client::{ConnectionConfig, ConnectionPhase, McpConnection};
//!
//! # async fn demo() -> Result<(), tether_mcp_client::ClientError> {
//! let connection = McpConnection::connect(ConnectionConfig::new(
//!     "https://mcp.example/v1",
//! ))
//! .await?;
//!
//! let mut updates = connection.subscribe();
//! while updates.changed().await.is_ok() {
//!     let snapshot = updates.borrow().clone();
//!     if snapshot.phase == ConnectionPhase::Ready {
//!         break;
//!     }
//!     if let Some(url) = &snapshot.auth_url {
//!         println!("authorize at: {url}");
//!     }
//! }
//!
//! let result = connection
//!     .call_tool("search", Some(serde_json::json!({"q": "tether"})))
//!     .await?;
//! # let _ = result;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod log;
pub mod session;

pub use config::{ClientIdentity, ConnectionConfig, RetryPolicy, TransportKind};
pub use connection::{
    ConnectionPhase, ConnectionSnapshot, LogEntry, McpConnection, AUTH_TIMEOUT,
};
pub use error::{ClientError, ClientResult};
pub use log::{LogLevel, LOG_CAPACITY};
pub use session::McpSession;
