//! Encrypted OAuth state tokens.
//!
//! The `state` parameter carried through the provider round trip is an
//! AES-256-GCM encrypted blob holding the origin that started the flow. The
//! broker never stores anything — the token itself is the state. Decryption
//! is authenticated, so a token minted under a different secret (or bit-flipped
//! in transit) is rejected rather than decrypted into garbage.
//!
//! Format:  base64( nonce || ciphertext || tag )
//!
//! Standard base64 rather than base64url: these tokens predate this service
//! and travel through query strings where an upstream URL-decode can turn `+`
//! into a space. [`normalize`] undoes that before decryption.
//!
//! The plaintext is JSON:
//! ```json
//! {
//!   "target": "https://app.example.com",
//!   "provider": "gitlab"
//! }
//! ```

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Default provider applied when the payload omits the field. Older tokens
/// were minted before multi-provider support and carry only `target`.
const DEFAULT_PROVIDER: &str = "github";

/// The plaintext payload carried inside an encrypted state token.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatePayload {
    /// Origin to redirect back to, e.g. `https://app.example.com`.
    pub target: String,
    /// OAuth provider identifier, embedded in the callback path.
    pub provider: String,
}

/// Raw wire shape of the payload. `target` is kept loose so that a missing or
/// non-string value surfaces as [`StateError::MissingTarget`] instead of a
/// generic deserialization failure.
#[derive(Deserialize)]
struct RawPayload {
    #[serde(default)]
    target: Option<serde_json::Value>,
    #[serde(default)]
    provider: Option<String>,
}

/// Why a state token was rejected. Kinds are logged for operator diagnosis;
/// clients only ever see a generic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// Decryption produced an empty string.
    #[error("decryption produced an empty payload")]
    EmptyPlaintext,
    /// Token could not be decoded/decrypted, or the plaintext is not JSON.
    /// Wrong-secret and tampered tokens land here via the GCM auth check.
    #[error("state token could not be decrypted or parsed")]
    MalformedPayload,
    /// JSON parsed but `target` is missing, empty, or not a string.
    #[error("state payload has no target origin")]
    MissingTarget,
}

/// Derive a 256-bit AES key from the shared secret passphrase using SHA-256.
/// The secret is operator-chosen free text; hashing gives a clean 32-byte key
/// regardless of its length.
fn derive_key(secret: &str) -> [u8; 32] {
    let hash = Sha256::digest(secret.as_bytes());
    hash.into()
}

/// Undo lossy URL decoding: a `+` in the base64 token may arrive as a space
/// when an upstream layer decoded the query string with form semantics.
pub fn normalize(token: &str) -> String {
    token.replace(' ', "+")
}

/// Encrypt a payload into a state token under the shared secret.
///
/// This is the producer side. The broker itself only decrypts — tokens are
/// normally minted by the upstream application before the OAuth redirect —
/// but the `mint` subcommand and the round-trip tests live here too.
pub fn encrypt(payload: &StatePayload, secret: &str) -> Result<String, String> {
    let plaintext =
        serde_json::to_vec(payload).map_err(|e| format!("failed to serialize payload: {e}"))?;
    seal(&plaintext, secret)
}

/// Encrypt arbitrary plaintext bytes into the token wire format.
fn seal(plaintext: &[u8], secret: &str) -> Result<String, String> {
    let key = derive_key(secret);
    let cipher =
        Aes256Gcm::new_from_slice(&key).map_err(|e| format!("failed to create cipher: {e}"))?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| format!("encryption failed: {e}"))?;

    // Wire format: nonce (12 bytes) || ciphertext+tag
    let mut blob = Vec::with_capacity(12 + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);

    Ok(STANDARD.encode(&blob))
}

/// Decrypt and validate a state token.
///
/// Deterministic and side-effect free: the same `(token, secret)` pair always
/// yields the same payload or the same [`StateError`] kind. `provider`
/// defaults to `"github"` when absent; a missing `target` is always an error.
pub fn decrypt(token: &str, secret: &str) -> Result<StatePayload, StateError> {
    let token = normalize(token);

    let blob = STANDARD
        .decode(&token)
        .map_err(|_| StateError::MalformedPayload)?;

    if blob.len() < 13 {
        // 12 bytes nonce + at least 1 byte ciphertext
        return Err(StateError::MalformedPayload);
    }

    let (nonce_bytes, ciphertext) = blob.split_at(12);
    let nonce = Nonce::from_slice(nonce_bytes);

    let key = derive_key(secret);
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| StateError::MalformedPayload)?;
    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| StateError::MalformedPayload)?;

    if plaintext.is_empty() {
        return Err(StateError::EmptyPlaintext);
    }

    let raw: RawPayload =
        serde_json::from_slice(&plaintext).map_err(|_| StateError::MalformedPayload)?;

    let target = match raw.target {
        Some(serde_json::Value::String(s)) if !s.is_empty() => s,
        _ => return Err(StateError::MissingTarget),
    };

    Ok(StatePayload {
        target,
        provider: raw.provider.unwrap_or_else(|| DEFAULT_PROVIDER.to_string()),
    })
}
