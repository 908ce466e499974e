//! Update envelope — confidentiality and integrity
//!
//! Wraps a canonical serialization of model weights in a symmetric AEAD
//! transform under a key held only by the aggregation authority, and tags the
//! resulting payload with a SHA-256 digest. `verify` is cheap and
//! constant-time; `open` is the expensive path. Callers must verify first
//! and never open a payload that failed verification.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{FedError, Result};
use crate::tensor::ModelWeights;

/// AEAD nonce length in bytes
const NONCE_LEN: usize = 12;

/// Sealed weight update: opaque payload plus integrity tag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedPayload {
    /// nonce || ciphertext
    pub payload: Vec<u8>,
    /// Hex SHA-256 digest of `payload`
    pub tag: String,
}

impl SealedPayload {
    /// Recomputes the tag over the payload and compares in constant time.
    /// Any mismatch or malformed tag yields `false`, never an error.
    pub fn verify(&self) -> bool {
        let expected = match hex::decode(&self.tag) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let actual = Sha256::digest(&self.payload);
        if expected.len() != actual.len() {
            return false;
        }
        actual.as_slice().ct_eq(expected.as_slice()).into()
    }
}

/// Symmetric envelope key held by the aggregation authority
#[derive(Clone)]
pub struct EnvelopeKey {
    key: [u8; 32],
}

impl std::fmt::Debug for EnvelopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeKey").field("key", &"[REDACTED]").finish()
    }
}

impl EnvelopeKey {
    /// Generates a fresh random key
    pub fn generate() -> Self {
        Self {
            key: rand::random(),
        }
    }

    /// Key from raw bytes (e.g. loaded from a key management service)
    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.key))
    }

    /// Seals weights: canonical serialization, AEAD encryption under a fresh
    /// nonce, SHA-256 tag over the resulting payload.
    pub fn seal(&self, weights: &ModelWeights) -> Result<SealedPayload> {
        // BTreeMap keys serialize in order, so equal weights always produce
        // equal plaintext
        let plaintext = serde_json::to_vec(weights)?;

        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let ciphertext = self
            .cipher()
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_slice())
            .map_err(|e| FedError::DecryptionError(format!("seal failed: {e}")))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);

        let tag = hex::encode(Sha256::digest(&payload));
        Ok(SealedPayload { payload, tag })
    }

    /// Opens a sealed payload back into weights. Fails with
    /// `DecryptionError` on any malformed input.
    pub fn open(&self, sealed: &SealedPayload) -> Result<ModelWeights> {
        if sealed.payload.len() < NONCE_LEN {
            return Err(FedError::DecryptionError("payload too short".into()));
        }
        let (nonce_bytes, ciphertext) = sealed.payload.split_at(NONCE_LEN);

        let plaintext = self
            .cipher()
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| FedError::DecryptionError("AEAD decryption failed".into()))?;

        let weights: ModelWeights = serde_json::from_slice(&plaintext)
            .map_err(|e| FedError::DecryptionError(format!("invalid plaintext: {e}")))?;
        Ok(weights)
    }
}
