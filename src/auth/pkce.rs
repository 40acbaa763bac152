//! CSRF state and PKCE generation.
//!
//! The state parameter protects the callback against CSRF; the PKCE pair
//! is used only by the headless flow, where the authorization code travels
//! back through the user instead of a local redirect.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

/// A PKCE verifier/challenge pair.
///
/// The verifier is the secret half, sent only during token exchange; the
/// challenge is derived as `base64url(SHA-256(verifier))` and travels in
/// the authorization URL.
#[derive(Debug, Clone)]
pub struct PkcePair {
    /// Secret verifier (43 URL-safe characters).
    pub verifier: String,
    /// Public challenge derived from the verifier.
    pub challenge: String,
}

impl PkcePair {
    /// Generate a fresh verifier/challenge pair.
    ///
    /// The verifier is 32 cryptographically random bytes, base64url
    /// encoded without padding (43 characters).
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill(&mut bytes);
        let verifier = URL_SAFE_NO_PAD.encode(bytes);

        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

        Self {
            verifier,
            challenge,
        }
    }
}

/// Generate a random state parameter for CSRF protection.
///
/// 16 random bytes, base64url encoded (22 characters). Uniqueness relies
/// on entropy plus single-attempt scope, not global tracking.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pkce_verifier_length() {
        let pair = PkcePair::generate();
        // 32 bytes base64url encoded = 43 characters
        assert_eq!(pair.verifier.len(), 43);
    }

    #[test]
    fn test_pkce_url_safe() {
        let pair = PkcePair::generate();
        for value in [&pair.verifier, &pair.challenge] {
            assert!(
                value
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
                "non-URL-safe characters in {}",
                value
            );
        }
    }

    #[test]
    fn test_pkce_challenge_matches_verifier() {
        let pair = PkcePair::generate();

        let mut hasher = Sha256::new();
        hasher.update(pair.verifier.as_bytes());
        let expected = URL_SAFE_NO_PAD.encode(hasher.finalize());

        assert_eq!(pair.challenge, expected);
    }

    #[test]
    fn test_pkce_unique() {
        let a = PkcePair::generate();
        let b = PkcePair::generate();
        assert_ne!(a.verifier, b.verifier);
        assert_ne!(a.challenge, b.challenge);
    }

    #[test]
    fn test_state_length_and_uniqueness() {
        let state = generate_state();
        // 16 bytes = 22 base64url characters (no padding)
        assert_eq!(state.len(), 22);
        assert_ne!(state, generate_state());
    }
}
