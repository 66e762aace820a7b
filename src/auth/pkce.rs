//! PKCE verifier, challenge and anti-CSRF state generation.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Random bytes behind a code verifier (43 base64url characters).
pub const DEFAULT_VERIFIER_BYTES: usize = 32;
/// Random bytes behind an anti-CSRF state token.
pub const DEFAULT_STATE_BYTES: usize = 16;

// A verifier must encode to 43..=128 characters.
const MIN_VERIFIER_BYTES: usize = 32;
const MAX_VERIFIER_BYTES: usize = 96;
const MIN_STATE_BYTES: usize = 16;

/// Per-attempt PKCE material. Single use: consumed by the callback step.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PkceSession {
    pub code_verifier: String,
    pub code_challenge: String,
    pub state: String,
}

impl PkceSession {
    /// Generate a fresh verifier, its S256 challenge and an independent state.
    pub fn generate() -> Self {
        Self::generate_with(DEFAULT_VERIFIER_BYTES, DEFAULT_STATE_BYTES)
    }

    pub fn generate_with(verifier_bytes: usize, state_bytes: usize) -> Self {
        let code_verifier = generate_verifier_with(verifier_bytes);
        let code_challenge = derive_challenge(&code_verifier);
        Self {
            code_verifier,
            code_challenge,
            state: generate_state_with(state_bytes),
        }
    }
}

impl fmt::Debug for PkceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PkceSession")
            .field("code_verifier", &"[redacted]")
            .field("code_challenge", &self.code_challenge)
            .field("state", &self.state)
            .finish()
    }
}

pub fn generate_verifier() -> String {
    generate_verifier_with(DEFAULT_VERIFIER_BYTES)
}

pub fn generate_verifier_with(byte_count: usize) -> String {
    random_url_safe(byte_count.clamp(MIN_VERIFIER_BYTES, MAX_VERIFIER_BYTES))
}

/// `BASE64URL(SHA256(verifier))`, unpadded.
pub fn derive_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

pub fn generate_state() -> String {
    generate_state_with(DEFAULT_STATE_BYTES)
}

pub fn generate_state_with(byte_count: usize) -> String {
    random_url_safe(byte_count.max(MIN_STATE_BYTES))
}

fn random_url_safe(byte_count: usize) -> String {
    let mut buf = vec![0u8; byte_count];
    OsRng.fill_bytes(&mut buf);
    let encoded = URL_SAFE_NO_PAD.encode(&buf);
    buf.zeroize();
    encoded
}
