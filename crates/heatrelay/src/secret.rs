//! Peppered hashing and generation of short codes, tokens and elder codes.
//!
//! Plaintext secrets pass through this module exactly once: when they are
//! generated and handed back to the issuer, or when a caller presents them for
//! verification. Only the hex digest is ever stored or logged.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Random bytes in a pairing token.
const TOKEN_BYTES: usize = 16;

/// Random bytes in an elder code.
const ELDER_CODE_BYTES: usize = 8;

/// Keyed hasher for every secret the pairing protocol handles.
///
/// The pepper is fixed at construction and shared cheaply between clones.
#[derive(Clone)]
pub struct SecretHasher {
    pepper: Arc<str>,
}

impl std::fmt::Debug for SecretHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretHasher")
            .field("pepper", &"<redacted>")
            .finish()
    }
}

impl SecretHasher {
    /// Create a hasher with the given pepper.
    #[must_use]
    pub fn new(pepper: impl AsRef<str>) -> Self {
        Self {
            pepper: Arc::from(pepper.as_ref()),
        }
    }

    /// `hex(SHA-256(value || pepper))`.
    #[must_use]
    pub fn hash(&self, value: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(value.as_bytes());
        hasher.update(self.pepper.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Check `value` against a stored digest in constant time.
    ///
    /// Empty inputs never verify.
    #[must_use]
    pub fn verify(&self, value: &str, stored_hash: &str) -> bool {
        if value.is_empty() || stored_hash.is_empty() {
            return false;
        }
        let computed = self.hash(value);
        computed.as_bytes().ct_eq(stored_hash.as_bytes()).into()
    }
}

/// A zero-padded numeric short code with `digits` digits.
#[must_use]
pub fn generate_short_code(digits: u32) -> String {
    let upper = 10_u64.pow(digits);
    let value = OsRng.gen_range(0..upper);
    format!("{value:0width$}", width = digits as usize)
}

/// A URL-safe random token for the second half of a pair link.
#[must_use]
pub fn generate_token() -> String {
    random_url_safe(TOKEN_BYTES)
}

/// A URL-safe random identifier for a durable pair.
#[must_use]
pub fn generate_elder_code() -> String {
    random_url_safe(ELDER_CODE_BYTES)
}

fn random_url_safe(len: usize) -> String {
    let mut bytes = vec![0_u8; len];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
