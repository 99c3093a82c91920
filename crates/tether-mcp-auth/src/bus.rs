//! Cross-window authorization messaging.
//!
//! The callback page and the page that opened it are different documents
//! sharing one origin. Completion is announced as an [`AuthCallbackMessage`]
//! on a broadcast bus; receivers must check `origin` against their own
//! callback origin before trusting the payload.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tokio::sync::broadcast;

/// Message type discriminator on the wire.
pub const AUTH_CALLBACK_MESSAGE_TYPE: &str = "mcp_auth_callback";

/// Posted by the callback handler when an authorization attempt finishes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthCallbackMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "serverUrlHash", skip_serializing_if = "Option::is_none")]
    pub server_url_hash: Option<String>,
    /// Origin the message was posted to. Receivers drop messages whose
    /// origin differs from their own.
    pub origin: String,
}

impl AuthCallbackMessage {
    pub fn success(server_url_hash: &str, origin: &str) -> Self {
        Self {
            message_type: AUTH_CALLBACK_MESSAGE_TYPE.to_string(),
            success: true,
            error: None,
            server_url_hash: Some(server_url_hash.to_string()),
            origin: origin.to_string(),
        }
    }

    pub fn failure(error: &str, origin: &str) -> Self {
        Self {
            message_type: AUTH_CALLBACK_MESSAGE_TYPE.to_string(),
            success: false,
            error: Some(error.to_string()),
            server_url_hash: None,
            origin: origin.to_string(),
        }
    }
}

/// Broadcast channel connecting callback pages to waiting connections.
#[derive(Debug, Clone)]
pub struct AuthEventBus {
    sender: broadcast::Sender<AuthCallbackMessage>,
}

impl AuthEventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self { sender }
    }

    /// Process-wide bus, for hosts that do not wire their own.
    pub fn global() -> &'static AuthEventBus {
        static GLOBAL: OnceLock<AuthEventBus> = OnceLock::new();
        GLOBAL.get_or_init(AuthEventBus::new)
    }

    /// Post a message. Returns whether anybody was listening, which the
    /// callback handler uses to decide between "notify opener" and
    /// "navigate back to the application".
    pub fn post(&self, message: AuthCallbackMessage) -> bool {
        self.sender.send(message).is_ok()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthCallbackMessage> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for AuthEventBus {
    fn default() -> Self {
        Self::new()
    }
}
