//! PKCE (Proof Key for Code Exchange) parameter generation.

use base64::Engine;
use sha2::Digest;
use tether_mcp_core::utils::generate_secure_random;

/// PKCE parameters for one authorization attempt.
#[derive(Debug, Clone)]
pub struct PkceParams {
    pub code_verifier: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
}

/// Generate a fresh verifier (128 chars, within the RFC 7636 43-128 range)
/// and its S256 challenge.
pub fn generate_pkce() -> PkceParams {
    let code_verifier = generate_secure_random(128);
    let code_challenge = derive_challenge(&code_verifier);

    PkceParams {
        code_verifier,
        code_challenge,
        code_challenge_method: "S256".to_string(),
    }
}

/// Re-derive the S256 challenge committed to at authorize time.
pub fn derive_challenge(code_verifier: &str) -> String {
    let digest = sha2::Sha256::digest(code_verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_params_are_well_formed() {
        let params = generate_pkce();
        assert_eq!(params.code_verifier.len(), 128);
        assert!(!params.code_challenge.is_empty());
        assert_eq!(params.code_challenge_method, "S256");
        // base64url alphabet, no padding
        assert!(params
            .code_challenge
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn challenge_round_trips_from_verifier() {
        let params = generate_pkce();
        assert_eq!(derive_challenge(&params.code_verifier), params.code_challenge);
    }

    #[test]
    fn params_are_unique_per_attempt() {
        let a = generate_pkce();
        let b = generate_pkce();
        assert_ne!(a.code_verifier, b.code_verifier);
        assert_ne!(a.code_challenge, b.code_challenge);
    }

    #[test]
    fn known_vector_matches_rfc_7636_appendix() {
        // Appendix B of RFC 7636.
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            derive_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }
}
