//! Encrypted-at-rest storage for live-mode credentials (AES-256-GCM).
//!
//! Format on disk/DB: `base64(nonce(12) || ciphertext || tag(16))`. The master key comes
//! from `MASTER_ENCRYPTION_KEY` (base64, 32 bytes) and is never logged.

use aes_gcm::aead::rand_core::{OsRng, RngCore};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::errors::MartinError;

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;

pub trait Vault: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, MartinError>;
    fn decrypt(&self, encrypted: &str) -> Result<String, MartinError>;
}

pub struct AesGcmVault {
    cipher: Aes256Gcm,
}

impl AesGcmVault {
    /// Builds a vault from a base64-encoded 32-byte key, as produced by
    /// `MASTER_ENCRYPTION_KEY`. Fails closed if the key is absent or malformed —
    /// live mode must not run with a degraded or missing vault.
    pub fn from_base64_key(key_b64: &str) -> Result<Self, MartinError> {
        let key_bytes = BASE64
            .decode(key_b64.trim())
            .map_err(|e| MartinError::Security(format!("invalid MASTER_ENCRYPTION_KEY encoding: {e}")))?;
        if key_bytes.len() != KEY_SIZE {
            return Err(MartinError::Security(format!(
                "MASTER_ENCRYPTION_KEY must decode to {KEY_SIZE} bytes, got {}",
                key_bytes.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(&key_bytes).map_err(|e| MartinError::Security(e.to_string()))?;
        Ok(Self { cipher })
    }

    pub fn from_env() -> Result<Self, MartinError> {
        let key_b64 = std::env::var("MASTER_ENCRYPTION_KEY")
            .map_err(|_| MartinError::Security("MASTER_ENCRYPTION_KEY not set; required for live mode".to_string()))?;
        Self::from_base64_key(&key_b64)
    }
}

impl Vault for AesGcmVault {
    fn encrypt(&self, plaintext: &str) -> Result<String, MartinError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| MartinError::Security(format!("encryption failed: {e}")))?;
        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(combined))
    }

    fn decrypt(&self, encrypted: &str) -> Result<String, MartinError> {
        let combined = BASE64.decode(encrypted).map_err(|e| MartinError::Security(format!("invalid ciphertext encoding: {e}")))?;
        if combined.len() < NONCE_SIZE {
            return Err(MartinError::Security("ciphertext too short".to_string()));
        }
        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self.cipher.decrypt(nonce, ciphertext).map_err(|e| MartinError::Security(format!("decryption failed: {e}")))?;
        String::from_utf8(plaintext).map_err(|e| MartinError::Security(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vault() -> AesGcmVault {
        let key = BASE64.encode([7u8; KEY_SIZE]);
        AesGcmVault::from_base64_key(&key).unwrap()
    }

    #[test]
    fn round_trips_plaintext() {
        let vault = test_vault();
        let encrypted = vault.encrypt("super-secret-api-key").unwrap();
        assert_ne!(encrypted, "super-secret-api-key");
        let decrypted = vault.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted, "super-secret-api-key");
    }

    #[test]
    fn rejects_wrong_key_length() {
        let key = BASE64.encode([1u8; 16]);
        let result = AesGcmVault::from_base64_key(&key);
        assert!(matches!(result, Err(MartinError::Security(_))));
    }

    #[test]
    fn rejects_tampered_ciphertext() {
        let vault = test_vault();
        let mut encrypted = vault.encrypt("value").unwrap();
        encrypted.push('A');
        assert!(vault.decrypt(&encrypted).is_err());
    }

    #[test]
    fn each_encryption_uses_a_fresh_nonce() {
        let vault = test_vault();
        let a = vault.encrypt("value").unwrap();
        let b = vault.encrypt("value").unwrap();
        assert_ne!(a, b);
    }
}
