//! PKCE S256 verifier and challenge derivation
//!
//! The broker always acts as the PKCE client towards the upstream
//! authorization server (RFC 7636). A verifier is kept in memory for the
//! lifetime of one [`AuthorizationAttempt`](crate::auth::flow::AuthorizationAttempt)
//! and only its S256 challenge ever leaves the process before the code
//! exchange.
//!
//! # References
//!
//! - RFC 7636 <https://www.rfc-editor.org/rfc/rfc7636>

use base64::Engine as _;
use sha2::{Digest, Sha256};

/// Challenge method sent as `code_challenge_method`.
pub const CHALLENGE_METHOD: &str = "S256";

/// Number of random bytes behind each verifier (yields 43 base64url chars).
const VERIFIER_BYTES: usize = 32;

/// A freshly generated verifier together with its derived challenge.
///
/// # Examples
///
/// ```
/// use vitalgate::auth::pkce;
///
/// let pair = pkce::generate();
/// assert_eq!(pair.verifier.len(), 43);
/// assert_eq!(pkce::challenge_for(&pair.verifier), pair.challenge);
/// ```
#[derive(Clone)]
pub struct PkcePair {
    /// Secret sent only to the token endpoint as `code_verifier`
    pub verifier: String,
    /// `BASE64URL(SHA256(verifier))`, sent to the authorization endpoint
    pub challenge: String,
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"[redacted]")
            .field("challenge", &self.challenge)
            .finish()
    }
}

/// Generates a new verifier from 32 random bytes and derives its challenge.
pub fn generate() -> PkcePair {
    let verifier = random_urlsafe(VERIFIER_BYTES);
    let challenge = challenge_for(&verifier);
    PkcePair {
        verifier,
        challenge,
    }
}

/// Computes the S256 challenge for `verifier`.
///
/// `ASCII(BASE64URL(SHA256(ASCII(code_verifier))))` per RFC 7636 section 4.2.
pub fn challenge_for(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_slice())
}

/// Returns `len` random bytes encoded as unpadded base64url.
///
/// Also used for `state` values and session ids.
pub fn random_urlsafe(len: usize) -> String {
    use rand::RngCore as _;

    let mut bytes = vec![0u8; len];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
