//! Identifier generation and server fingerprinting.

/// Generate an opaque `state` parameter for authorization requests.
pub fn generate_state() -> String {
    generate_secure_random(32)
}

/// Generate a random alphanumeric string of the given length.
pub fn generate_secure_random(length: usize) -> String {
    use rand::Rng;
    let charset = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..length)
        .map(|_| {
            let idx = rng.random_range(0..charset.len());
            charset[idx] as char
        })
        .collect()
}

/// Stable, non-cryptographic fingerprint of a server URL, rendered as
/// lowercase hex. Used to namespace per-server persisted entries within a
/// shared key/value store: distinct URLs get distinct namespaces, and the
/// same URL maps to the same namespace across restarts.
///
/// FNV-1a over the raw URL bytes; collision resistance beyond namespacing
/// is not a goal.
pub fn server_url_hash(server_url: &str) -> String {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = FNV_OFFSET;
    for byte in server_url.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    format!("{hash:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_is_unique_and_alphanumeric() {
        let state1 = generate_state();
        let state2 = generate_state();
        assert_ne!(state1, state2);
        assert_eq!(state1.len(), 32);
        assert!(state1.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn secure_random_respects_length() {
        let random1 = generate_secure_random(64);
        let random2 = generate_secure_random(64);
        assert_ne!(random1, random2);
        assert_eq!(random1.len(), 64);
    }

    #[test]
    fn server_hash_is_deterministic() {
        let a = server_url_hash("https://mcp.example/v1");
        let b = server_url_hash("https://mcp.example/v1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn distinct_urls_hash_differently() {
        let a = server_url_hash("https://mcp.example/v1");
        let b = server_url_hash("https://mcp.example/v2");
        let c = server_url_hash("https://other.example/v1");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }
}
