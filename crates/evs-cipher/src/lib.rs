#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **evs-cipher** – optional authenticated symmetric encryption stage.
//!
//! Ciphertext embeds its nonce and authentication tag (AES-GCM); tampering
//! is detected on decrypt and surfaces as
//! [`evs_types::EventSourcingError::Integrity`], never a silent corruption.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use evs_types::EventSourcingError;
use rand::rngs::OsRng;
use rand::Rng;

/// Length, in bytes, of a generated cipher key.
pub const DEFAULT_KEY_LEN: usize = 32;

/// Length, in bytes, of the random nonce prepended to every ciphertext.
const NONCE_LEN: usize = 12;

/// Topic under which [`AesGcmCipher`] registers itself.
pub const AES_GCM_TOPIC: &str = "cipher:aes256gcm";

/// Authenticated symmetric encryption with a configured key.
pub trait Cipher: Send + Sync {
    /// Stable topic identifying this cipher implementation.
    fn topic(&self) -> &'static str;

    /// Encrypt `plaintext`. The returned ciphertext embeds everything
    /// [`Cipher::decrypt`] needs (nonce, authentication tag).
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EventSourcingError>;

    /// Decrypt a prior [`Cipher::encrypt`] call's output. Returns
    /// [`EventSourcingError::Integrity`] if the ciphertext was tampered
    /// with or truncated.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, EventSourcingError>;
}

/// Identity cipher, used when no `CIPHER_TOPIC` is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCipher;

impl Cipher for NoopCipher {
    fn topic(&self) -> &'static str {
        "cipher:noop"
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EventSourcingError> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, EventSourcingError> {
        Ok(ciphertext.to_vec())
    }
}

/// AES-256-GCM cipher. Ciphertext layout is `nonce (12 bytes) || ciphertext
/// || tag (16 bytes)`, matching the layout used elsewhere in this codebase's
/// secrets vault.
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    /// Build a cipher from a raw 32-byte key.
    pub fn new(key: &[u8; DEFAULT_KEY_LEN]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Build a cipher from a base64-encoded key, as supplied via the
    /// `CIPHER_KEY` configuration value.
    pub fn from_base64_key(encoded: &str) -> Result<Self, EventSourcingError> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| EventSourcingError::Programming(format!("invalid CIPHER_KEY: {e}")))?;
        if bytes.len() != DEFAULT_KEY_LEN {
            return Err(EventSourcingError::Programming(format!(
                "CIPHER_KEY must decode to {DEFAULT_KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; DEFAULT_KEY_LEN];
        key.copy_from_slice(&bytes);
        Ok(Self::new(&key))
    }
}

impl Cipher for AesGcmCipher {
    fn topic(&self) -> &'static str {
        AES_GCM_TOPIC
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EventSourcingError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| EventSourcingError::Integrity(format!("encryption failed: {e}")))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, EventSourcingError> {
        if ciphertext.len() < NONCE_LEN {
            return Err(EventSourcingError::Integrity(
                "ciphertext shorter than nonce".to_string(),
            ));
        }
        let (nonce_bytes, body) = ciphertext.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, body)
            .map_err(|_| EventSourcingError::Integrity("authentication tag mismatch".to_string()))
    }
}

/// Generate a random key of `len` bytes (defaults to [`DEFAULT_KEY_LEN`]).
pub fn generate_key(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill(bytes.as_mut_slice());
    bytes
}

/// Resolve a cipher by its `CIPHER_TOPIC` configuration value plus a
/// base64-encoded `CIPHER_KEY`. Unknown topics are a
/// [`EventSourcingError::Programming`] error, not a silent fallback.
pub fn resolve(topic: Option<&str>, key: Option<&str>) -> Result<Box<dyn Cipher>, EventSourcingError> {
    match topic {
        None => Ok(Box::new(NoopCipher)),
        Some(AES_GCM_TOPIC) => {
            let key = key.ok_or_else(|| {
                EventSourcingError::Programming("CIPHER_KEY required for AES-GCM".to_string())
            })?;
            Ok(Box::new(AesGcmCipher::from_base64_key(key)?))
        }
        Some(other) => Err(EventSourcingError::Programming(format!(
            "unknown cipher topic {other:?}"
        ))),
    }
}
