//! MCP protocol layer: JSON-RPC 2.0 framing types and the session lifecycle.

pub mod jsonrpc;
pub mod lifecycle;

/// Protocol revision this client speaks.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// JSON-RPC version string.
pub const JSONRPC_VERSION: &str = "2.0";
