//! Namespaced persistent store for per-server authorization state.
//!
//! Every entry for one MCP server lives under `<prefix>_<server-hash>_<slot>`
//! where the hash is a stable fingerprint of the server URL, so multiple
//! servers can share one underlying key/value store without leaking
//! credentials across namespaces. Pending-authorization records are global
//! (`<prefix>:state_<state>`) because the callback page only knows the
//! `state` value when it starts.

use crate::error::AuthResult;
use crate::storage::KeyValueStorage;
use crate::types::{now_millis, PendingAuthorization};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tether_mcp_core::utils::server_url_hash;
use tracing::{debug, warn};

/// Named slots of the per-server namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    ClientInfo,
    Tokens,
    CodeVerifier,
    AuthUrl,
}

impl Slot {
    fn name(self) -> &'static str {
        match self {
            Slot::ClientInfo => "client_info",
            Slot::Tokens => "tokens",
            Slot::CodeVerifier => "code_verifier",
            Slot::AuthUrl => "auth_url",
        }
    }
}

/// Namespaced view over a shared [`KeyValueStorage`].
#[derive(Clone)]
pub struct AuthStore {
    prefix: String,
    server_hash: String,
    storage: Arc<dyn KeyValueStorage>,
}

impl AuthStore {
    pub fn new(server_url: &str, prefix: &str, storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            prefix: prefix.to_string(),
            server_hash: server_url_hash(server_url),
            storage,
        }
    }

    pub fn server_hash(&self) -> &str {
        &self.server_hash
    }

    fn slot_key(&self, slot: Slot) -> String {
        format!("{}_{}_{}", self.prefix, self.server_hash, slot.name())
    }

    fn state_key(prefix: &str, state: &str) -> String {
        format!("{prefix}:state_{state}")
    }

    /// Read and parse a JSON slot. A malformed value is logged, evicted, and
    /// reported as absent; it never propagates.
    pub fn get_json<T: DeserializeOwned>(&self, slot: Slot) -> Option<T> {
        let key = self.slot_key(slot);
        let raw = self.storage.get(&key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "evicting unparseable stored value");
                self.storage.remove(&key);
                None
            }
        }
    }

    pub fn put_json<T: Serialize>(&self, slot: Slot, value: &T) -> AuthResult<()> {
        let raw = serde_json::to_string(value)?;
        self.storage.set(&self.slot_key(slot), &raw)
    }

    /// Read a raw string slot (PKCE verifier, authorize URL).
    pub fn get_raw(&self, slot: Slot) -> Option<String> {
        self.storage.get(&self.slot_key(slot))
    }

    pub fn put_raw(&self, slot: Slot, value: &str) -> AuthResult<()> {
        self.storage.set(&self.slot_key(slot), value)
    }

    pub fn remove(&self, slot: Slot) {
        self.storage.remove(&self.slot_key(slot));
    }

    /// Persist a pending-authorization record under its `state` value.
    pub fn save_pending(&self, record: &PendingAuthorization) -> AuthResult<()> {
        let key = Self::state_key(&self.prefix, &record.state);
        let raw = serde_json::to_string(record)?;
        self.storage.set(&key, &raw)
    }

    /// Consume the pending-authorization record for `state`.
    ///
    /// Consumption is destructive: the record is removed before it is
    /// returned, so a second call for the same `state` finds nothing. An
    /// expired record is removed and reported absent.
    pub fn take_pending(
        storage: &Arc<dyn KeyValueStorage>,
        prefix: &str,
        state: &str,
    ) -> Option<PendingAuthorization> {
        let key = Self::state_key(prefix, state);
        let raw = storage.get(&key)?;
        storage.remove(&key);

        let record: PendingAuthorization = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(key = %key, error = %e, "evicting unparseable pending authorization");
                return None;
            }
        };
        if record.is_expired(now_millis()) {
            debug!(state = %state, "discarding expired pending authorization");
            return None;
        }
        Some(record)
    }

    /// Remove every per-server entry plus every pending-authorization record
    /// that points at this server. Returns the number of removed keys.
    pub fn clear_all_for_server(&self) -> usize {
        let server_prefix = format!("{}_{}_", self.prefix, self.server_hash);
        let state_prefix = format!("{}:state_", self.prefix);
        let mut removed = 0;

        for key in self.storage.keys() {
            if key.starts_with(&server_prefix) {
                self.storage.remove(&key);
                removed += 1;
            } else if key.starts_with(&state_prefix) {
                let Some(raw) = self.storage.get(&key) else {
                    continue;
                };
                match serde_json::from_str::<PendingAuthorization>(&raw) {
                    Ok(record) if record.server_url_hash == self.server_hash => {
                        self.storage.remove(&key);
                        removed += 1;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(key = %key, error = %e, "evicting unparseable pending authorization");
                        self.storage.remove(&key);
                        removed += 1;
                    }
                }
            }
        }

        debug!(
            server_hash = %self.server_hash,
            removed, "cleared per-server authorization state"
        );
        removed
    }
}
