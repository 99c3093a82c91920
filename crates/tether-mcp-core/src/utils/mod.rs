//! Shared utilities.

pub mod identifiers;

pub use identifiers::{generate_secure_random, generate_state, server_url_hash};
