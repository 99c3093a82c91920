//! # Tether MCP Core
//!
//! Protocol types and shared utilities for the Tether MCP client stack.
//!
//! This crate holds the pieces every other Tether crate composes:
//!
//! - **[`protocol`]**: JSON-RPC 2.0 message types and the MCP lifecycle
//!   (initialize handshake, capability structures).
//! - **[`types`]**: MCP entity types (tools, resources, resource templates,
//!   prompts) with the wire-exact camelCase field names.
//! - **[`utils`]**: identifier generation (OAuth `state` values, PKCE
//!   verifier material) and the stable server-URL fingerprint used to
//!   namespace per-server persisted data.
//!
//! The crate deliberately contains no I/O: transports, storage, and OAuth
//! wire calls live in the sibling crates. Error types live with the code
//! that raises them, in the sibling crates as well.

pub mod protocol;
pub mod types;
pub mod utils;

pub use protocol::jsonrpc::{
    JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, RequestId,
};
pub use protocol::lifecycle::{ClientInfo, InitializeRequest, InitializeResponse, ServerInfo};
pub use protocol::PROTOCOL_VERSION;
