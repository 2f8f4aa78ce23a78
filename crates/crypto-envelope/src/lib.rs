//! Envelope encryption for persisted browser session state.
//!
//! Every blob is sealed with a fresh 256-bit data key under AES-256-GCM; the
//! data key itself is wrapped with RSA-OAEP-SHA256 under the keyring's public
//! key. Sealing only needs the public half, so edge deployments can encrypt
//! without ever holding the private key. Private keys stay server-side and
//! are never sent over any channel.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

const DATA_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("private key not available for kid {kid}")]
    KeyMissing { kid: String },
    #[error("key id mismatch: blob sealed under {blob_kid}, keyring holds {keyring_kid}")]
    KidMismatch {
        blob_kid: String,
        keyring_kid: String,
    },
    #[error("payload decryption failed")]
    DecryptFailed,
    #[error("payload parse failed: {0}")]
    ParseFailed(String),
}

/// Sealed envelope as persisted and as carried in API bodies.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SealedBlob {
    pub ciphertext: String,
    pub nonce: String,
    pub wrapped_key: String,
    pub kid: String,
}

/// A key pair identified by `kid`. The private half is optional: keyrings
/// built from a public key alone can seal but not open.
pub struct EnvelopeKeyring {
    kid: String,
    public: RsaPublicKey,
    private: Option<RsaPrivateKey>,
}

impl fmt::Debug for EnvelopeKeyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeKeyring")
            .field("kid", &self.kid)
            .field("private", &self.private.is_some())
            .finish_non_exhaustive()
    }
}

impl EnvelopeKeyring {
    pub fn from_public_pem(kid: impl Into<String>, public_pem: &str) -> Result<Self, CryptoError> {
        let public = RsaPublicKey::from_public_key_pem(public_pem)
            .map_err(|err| CryptoError::ParseFailed(err.to_string()))?;
        Ok(Self {
            kid: kid.into(),
            public,
            private: None,
        })
    }

    pub fn from_private_pem(
        kid: impl Into<String>,
        private_pem: &str,
    ) -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::from_pkcs8_pem(private_pem)
            .map_err(|err| CryptoError::ParseFailed(err.to_string()))?;
        Ok(Self {
            kid: kid.into(),
            public: private.to_public_key(),
            private: Some(private),
        })
    }

    /// Generate a throwaway key pair. Intended for tests and local bring-up.
    pub fn generate(kid: impl Into<String>) -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::new(&mut OsRng, 2048)
            .map_err(|err| CryptoError::ParseFailed(err.to_string()))?;
        Ok(Self {
            kid: kid.into(),
            public: private.to_public_key(),
            private: Some(private),
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn can_open(&self) -> bool {
        self.private.is_some()
    }

    /// Seal a plaintext under a fresh data key.
    pub fn seal(&self, plaintext: &[u8]) -> Result<SealedBlob, CryptoError> {
        let mut data_key = [0u8; DATA_KEY_LEN];
        OsRng.fill_bytes(&mut data_key);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&data_key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| CryptoError::DecryptFailed)?;

        let wrapped_key = self
            .public
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &data_key)
            .map_err(|_| CryptoError::DecryptFailed)?;

        Ok(SealedBlob {
            ciphertext: BASE64.encode(ciphertext),
            nonce: BASE64.encode(nonce_bytes),
            wrapped_key: BASE64.encode(wrapped_key),
            kid: self.kid.clone(),
        })
    }

    /// Reverse of [`seal`]: unwrap the data key with the private half, then
    /// decrypt the payload.
    pub fn open(&self, blob: &SealedBlob) -> Result<Vec<u8>, CryptoError> {
        if blob.kid != self.kid {
            return Err(CryptoError::KidMismatch {
                blob_kid: blob.kid.clone(),
                keyring_kid: self.kid.clone(),
            });
        }
        let private = self.private.as_ref().ok_or_else(|| CryptoError::KeyMissing {
            kid: self.kid.clone(),
        })?;

        let wrapped = BASE64
            .decode(&blob.wrapped_key)
            .map_err(|_| CryptoError::DecryptFailed)?;
        let nonce = BASE64
            .decode(&blob.nonce)
            .map_err(|_| CryptoError::DecryptFailed)?;
        let ciphertext = BASE64
            .decode(&blob.ciphertext)
            .map_err(|_| CryptoError::DecryptFailed)?;
        if nonce.len() != NONCE_LEN {
            return Err(CryptoError::DecryptFailed);
        }

        let data_key = private
            .decrypt(Oaep::new::<Sha256>(), &wrapped)
            .map_err(|_| CryptoError::DecryptFailed)?;
        if data_key.len() != DATA_KEY_LEN {
            return Err(CryptoError::DecryptFailed);
        }

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&data_key));
        cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| CryptoError::DecryptFailed)
    }

    pub fn seal_json<T: Serialize>(&self, value: &T) -> Result<SealedBlob, CryptoError> {
        let plaintext = serde_json::to_vec(value)
            .map_err(|err| CryptoError::ParseFailed(err.to_string()))?;
        self.seal(&plaintext)
    }

    pub fn open_json<T: DeserializeOwned>(&self, blob: &SealedBlob) -> Result<T, CryptoError> {
        let plaintext = self.open(blob)?;
        serde_json::from_slice(&plaintext).map_err(|err| CryptoError::ParseFailed(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keyring() -> EnvelopeKeyring {
        EnvelopeKeyring::generate("test-kid").expect("generate keyring")
    }

    #[test]
    fn round_trips_arbitrary_json() {
        let ring = keyring();
        let value = json!({"cookies": [{"name": "SID"}], "nested": {"a": [1, 2, 3]}});
        let sealed = ring.seal_json(&value).unwrap();
        assert_eq!(sealed.kid, "test-kid");
        let opened: serde_json::Value = ring.open_json(&sealed).unwrap();
        assert_eq!(opened, value);
    }

    #[test]
    fn rejects_kid_mismatch() {
        let ring = keyring();
        let mut sealed = ring.seal(b"payload").unwrap();
        sealed.kid = "other".into();
        match ring.open(&sealed) {
            Err(CryptoError::KidMismatch { blob_kid, .. }) => assert_eq!(blob_kid, "other"),
            other => panic!("expected kid mismatch, got {other:?}"),
        }
    }

    #[test]
    fn public_only_keyring_cannot_open() {
        let ring = keyring();
        let sealed = ring.seal(b"payload").unwrap();
        let public_pem = rsa::pkcs8::EncodePublicKey::to_public_key_pem(
            &ring.public,
            rsa::pkcs8::LineEnding::LF,
        )
        .unwrap();
        let public_only = EnvelopeKeyring::from_public_pem("test-kid", &public_pem).unwrap();
        assert!(!public_only.can_open());
        assert!(matches!(
            public_only.open(&sealed),
            Err(CryptoError::KeyMissing { .. })
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_decrypt() {
        let ring = keyring();
        let mut sealed = ring.seal(b"payload").unwrap();
        let mut raw = BASE64.decode(&sealed.ciphertext).unwrap();
        raw[0] ^= 0xff;
        sealed.ciphertext = BASE64.encode(raw);
        assert!(matches!(ring.open(&sealed), Err(CryptoError::DecryptFailed)));
    }

    #[test]
    fn non_json_plaintext_reports_parse_failure() {
        let ring = keyring();
        let sealed = ring.seal(b"\xff\xfe not json").unwrap();
        let result: Result<serde_json::Value, _> = ring.open_json(&sealed);
        assert!(matches!(result, Err(CryptoError::ParseFailed(_))));
    }
}
