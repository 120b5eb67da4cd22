//! Per-attempt login secrets: the anti-forgery state nonce and the PKCE pair.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Secrets for one authorization attempt. Never persisted.
pub struct AuthSession {
    pub state: String,
    pub code_verifier: String,
    pub code_challenge: String,
    pub redirect_uri: String,
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("redirect_uri", &self.redirect_uri)
            .field("code_challenge", &self.code_challenge)
            .finish_non_exhaustive()
    }
}

impl AuthSession {
    pub fn new(redirect_uri: impl Into<String>) -> Self {
        let code_verifier = random_token::<64>();
        let code_challenge = challenge_for(&code_verifier);
        Self {
            state: random_token::<32>(),
            code_verifier,
            code_challenge,
            redirect_uri: redirect_uri.into(),
        }
    }

    /// Constant-time comparison against the nonce issued for this attempt.
    pub fn state_matches(&self, candidate: &str) -> bool {
        let expected = self.state.as_bytes();
        let candidate = candidate.as_bytes();
        expected.len() == candidate.len()
            && expected
                .iter()
                .zip(candidate)
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }
}

fn random_token<const N: usize>() -> String {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// S256 code challenge: base64url(sha256(verifier)).
pub fn challenge_for(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
