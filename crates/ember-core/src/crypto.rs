//! Token-at-rest encryption and overlay URL signing.
//!
//! Platform bearer/refresh tokens are AES-256-GCM ciphertext everywhere
//! outside the stack frame performing a request. Overlay URLs carry a
//! compact HMAC-signed token instead of a database lookup.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::types::TenantId;

type HmacSha256 = Hmac<Sha256>;

/// AES-GCM nonce length in bytes, prepended to every ciphertext.
const NONCE_LEN: usize = 12;

/// Errors from the crypto box.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    EncryptFailed(String),
    #[error("decryption failed: {0}")]
    DecryptFailed(String),
    #[error("ciphertext is not valid base64")]
    BadEncoding,
    #[error("ciphertext too short to contain nonce")]
    TooShort,
}

/// Symmetric cipher for credentials at rest.
///
/// The key is SHA-256 of SESSION_SECRET, so one configured secret covers
/// every tenant without a key table.
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    pub fn from_secret(secret: &str) -> Self {
        let key = Sha256::digest(secret.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&key).expect("SHA-256 output is a valid key");
        Self { cipher }
    }

    /// Encrypt plaintext. Returns base64(nonce ‖ ciphertext).
    ///
    /// A fresh random nonce per call means encrypting the same token twice
    /// yields different ciphertext.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::EncryptFailed(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(B64.encode(out))
    }

    /// Decrypt base64(nonce ‖ ciphertext) back to the plaintext token.
    pub fn decrypt(&self, encoded: &str) -> Result<String, CryptoError> {
        let raw = B64.decode(encoded).map_err(|_| CryptoError::BadEncoding)?;
        if raw.len() <= NONCE_LEN {
            return Err(CryptoError::TooShort);
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| CryptoError::DecryptFailed(e.to_string()))?;
        String::from_utf8(plaintext).map_err(|e| CryptoError::DecryptFailed(e.to_string()))
    }
}

/// HMAC-SHA256 signer for opaque overlay URL tokens.
///
/// Token format: `{tenant}.{expires_unix}.{hex mac}`. Verification is
/// constant-time via the hmac crate.
pub struct OverlaySigner {
    key: Vec<u8>,
}

impl OverlaySigner {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            key: secret.as_bytes().to_vec(),
        }
    }

    pub fn sign(&self, tenant: &TenantId, expires_unix: i64) -> String {
        let body = format!("{}.{}", tenant, expires_unix);
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.key).expect("hmac accepts any key length");
        mac.update(body.as_bytes());
        let tag = mac.finalize().into_bytes();
        format!("{}.{}", body, hex::encode(tag))
    }

    /// Returns the tenant the token was issued for, or `None` when the
    /// signature is wrong, the token is malformed, or it has expired.
    pub fn verify(&self, token: &str, now_unix: i64) -> Option<TenantId> {
        let mut parts = token.rsplitn(2, '.');
        let mac_hex = parts.next()?;
        let body = parts.next()?;

        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.key).ok()?;
        mac.update(body.as_bytes());
        let sig = hex::decode(mac_hex).ok()?;
        mac.verify_slice(&sig).ok()?;

        let (tenant, expires) = body.rsplit_once('.')?;
        let expires_unix: i64 = expires.parse().ok()?;
        if expires_unix <= now_unix {
            return None;
        }
        Some(TenantId::from(tenant))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> TokenCipher {
        TokenCipher::from_secret("0123456789abcdef0123456789abcdef")
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let c = cipher();
        let token = "oauth:abc123-very-secret";
        let ct = c.encrypt(token).unwrap();
        assert_ne!(ct, token);
        assert_eq!(c.decrypt(&ct).unwrap(), token);
    }

    #[test]
    fn ciphertext_never_equals_plaintext() {
        let c = cipher();
        for token in ["x", "short", "a-much-longer-refresh-token-value"] {
            assert_ne!(c.encrypt(token).unwrap(), token);
        }
    }

    #[test]
    fn fresh_nonce_per_encryption() {
        let c = cipher();
        let a = c.encrypt("same-token").unwrap();
        let b = c.encrypt("same-token").unwrap();
        assert_ne!(a, b);
        assert_eq!(c.decrypt(&a).unwrap(), c.decrypt(&b).unwrap());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let c = cipher();
        let ct = c.encrypt("token").unwrap();
        let mut raw = B64.decode(&ct).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        assert!(c.decrypt(&B64.encode(raw)).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let ct = cipher().encrypt("token").unwrap();
        let other = TokenCipher::from_secret("ffffffffffffffffffffffffffffffff");
        assert!(other.decrypt(&ct).is_err());
    }

    #[test]
    fn garbage_input_fails_cleanly() {
        let c = cipher();
        assert!(c.decrypt("not base64 at all!!").is_err());
        assert!(c.decrypt("QUJD").is_err()); // valid base64, too short
    }

    #[test]
    fn overlay_token_round_trip() {
        let signer = OverlaySigner::from_secret("secret-key-material");
        let tenant = TenantId::from("t-42");
        let token = signer.sign(&tenant, 2_000_000_000);
        assert_eq!(signer.verify(&token, 1_000_000_000), Some(tenant));
    }

    #[test]
    fn overlay_token_expires() {
        let signer = OverlaySigner::from_secret("secret-key-material");
        let token = signer.sign(&TenantId::from("t-42"), 1_000);
        assert_eq!(signer.verify(&token, 2_000), None);
    }

    #[test]
    fn overlay_token_tamper_rejected() {
        let signer = OverlaySigner::from_secret("secret-key-material");
        let token = signer.sign(&TenantId::from("t-42"), 2_000_000_000);
        let forged = token.replace("t-42", "t-43");
        assert_eq!(signer.verify(&forged, 0), None);
    }
}
