//! # Tether MCP Authorization
//!
//! OAuth 2.0 authorization-code + PKCE client for public (user-facing) MCP
//! clients, together with the credential storage and cross-window plumbing
//! the flow needs.
//!
//! ## Overview
//!
//! Remote MCP servers that require user authorization expect an OAuth 2.0
//! public client: no client secret, PKCE (RFC 7636), authorization-server
//! metadata discovery (RFC 8414), and usually dynamic client registration
//! (RFC 7591). This crate implements that client and the persistence around
//! it:
//!
//! - **[`storage`]**: the host-supplied key/value seam plus in-memory and
//!   file-backed implementations.
//! - **[`store`]**: the namespaced per-server store of client registration,
//!   tokens, PKCE verifier, last authorize URL, and the transient
//!   pending-authorization records that let the callback page finish a flow
//!   started elsewhere.
//! - **[`oauth`]**: wire operations against the authorization server.
//! - **[`provider`]**: the [`OAuthProvider`] capability surface the
//!   connection machinery drives, including popup handling.
//! - **[`flow`]**: the decision driver picking between stored tokens,
//!   silent refresh, or interactive consent.
//! - **[`callback`]**: the redirect-URI handler.
//! - **[`bus`]**: the same-origin completion messaging between the callback
//!   page and the page waiting on it.
//!
//! The crate performs no MCP traffic itself; transports consume it through
//! the [`TokenSource`] trait.

pub mod bus;
pub mod callback;
pub mod error;
pub mod flow;
pub mod oauth;
pub mod pkce;
pub mod provider;
pub mod storage;
pub mod store;
pub mod types;

pub use bus::{AuthCallbackMessage, AuthEventBus, AUTH_CALLBACK_MESSAGE_TYPE};
pub use callback::{
    handle_authorization_callback, CallbackOptions, CallbackOutcome, CallbackParams,
};
pub use error::{AuthError, AuthResult};
pub use flow::{authorize, AuthFlowOutcome};
pub use oauth::{AuthorizationUrlParams, OAuthClient};
pub use pkce::{derive_challenge, generate_pkce, PkceParams};
pub use provider::{
    NoPopup, OAuthProvider, PopupHandle, PopupLauncher, ProviderOptions, RedirectResult,
    SystemBrowser, TokenSource, DEFAULT_POPUP_FEATURES, DEFAULT_STORAGE_KEY_PREFIX,
};
pub use storage::{FileStorage, KeyValueStorage, MemoryStorage};
pub use store::{AuthStore, Slot};
pub use types::{
    AuthorizationServerMetadata, ClientInformation, OAuthClientMetadata, PendingAuthorization,
    StoredProviderOptions, TokenBodyFormat, TokenSet,
};
