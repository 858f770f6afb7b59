//! Ed25519 key backend

use ed25519_dalek::pkcs8::EncodePrivateKey;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::Zeroize;

use crate::error::{DpkiError, Result};

use super::KeyOpts;

/// Ed25519 key material
#[derive(Debug, Clone)]
pub struct Ed25519Key {
    inner: Inner,
    opts: KeyOpts,
}

#[derive(Debug, Clone)]
enum Inner {
    Private(SigningKey),
    Public(VerifyingKey),
}

impl Ed25519Key {
    /// Generate a fresh keypair
    pub fn generate(opts: KeyOpts) -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self {
            inner: Inner::Private(signing_key),
            opts: KeyOpts { private: true, ..opts },
        }
    }

    /// Import from raw bytes: the first 32 bytes of a private seed, or 32
    /// public key bytes when `opts.private` is false
    pub fn import(raw: &[u8], opts: KeyOpts) -> Result<Self> {
        if raw.len() < 32 {
            return Err(DpkiError::Unsupported(format!(
                "ed25519 key material must hold at least 32 bytes, got {}",
                raw.len()
            )));
        }
        let inner = if opts.private {
            let mut seed = [0u8; 32];
            seed.copy_from_slice(&raw[..32]);
            let signing_key = SigningKey::from_bytes(&seed);
            seed.zeroize();
            Inner::Private(signing_key)
        } else {
            let mut public = [0u8; 32];
            public.copy_from_slice(&raw[..32]);
            Inner::Public(VerifyingKey::from_bytes(&public)?)
        };
        Ok(Self { inner, opts })
    }

    /// Options used during creation
    pub fn opts(&self) -> &KeyOpts {
        &self.opts
    }

    /// The public half (self if already public)
    pub fn public_key(&self) -> Ed25519Key {
        match &self.inner {
            Inner::Private(signing_key) => Ed25519Key {
                inner: Inner::Public(signing_key.verifying_key()),
                opts: self.opts.clone().public(),
            },
            Inner::Public(_) => self.clone(),
        }
    }

    /// Raw bytes: private seed or public key
    pub fn to_bytes(&self) -> Vec<u8> {
        match &self.inner {
            Inner::Private(signing_key) => signing_key.to_bytes().to_vec(),
            Inner::Public(verifying_key) => verifying_key.to_bytes().to_vec(),
        }
    }

    /// Sign a message; fails on public-only keys
    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>> {
        match &self.inner {
            Inner::Private(signing_key) => Ok(signing_key.sign(msg).to_bytes().to_vec()),
            Inner::Public(_) => Err(DpkiError::Unsupported(
                "cannot sign with a public-only key".to_string(),
            )),
        }
    }

    /// Verify a signature against a message; false on any failure
    pub fn verify(&self, signature: &[u8], msg: &[u8]) -> bool {
        let verifying_key = match &self.inner {
            Inner::Private(signing_key) => signing_key.verifying_key(),
            Inner::Public(verifying_key) => *verifying_key,
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        verifying_key.verify(msg, &signature).is_ok()
    }

    /// PKCS#8 v2 DER export of the private key
    pub fn to_pkcs8_der(&self) -> Result<Vec<u8>> {
        match &self.inner {
            Inner::Private(signing_key) => {
                let document = signing_key.to_pkcs8_der().map_err(|err| {
                    DpkiError::Unsupported(format!("pkcs8 export: {err}"))
                })?;
                Ok(document.as_bytes().to_vec())
            }
            Inner::Public(_) => Err(DpkiError::Unsupported(
                "cannot export a public-only key as pkcs8".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_uses_first_32_bytes_of_seed() {
        let key = Ed25519Key::generate(KeyOpts::ed25519());
        let mut padded = key.to_bytes();
        padded.extend_from_slice(&[0xAA; 32]);

        let restored = Ed25519Key::import(&padded, KeyOpts::ed25519()).unwrap();
        assert_eq!(key.public_key().to_bytes(), restored.public_key().to_bytes());
    }

    #[test]
    fn test_public_key_cannot_sign() {
        let key = Ed25519Key::generate(KeyOpts::ed25519());
        assert!(key.public_key().sign(b"msg").is_err());
    }

    #[test]
    fn test_public_key_verifies() {
        let key = Ed25519Key::generate(KeyOpts::ed25519());
        let signature = key.sign(b"block").unwrap();
        assert!(key.public_key().verify(&signature, b"block"));
    }
}
