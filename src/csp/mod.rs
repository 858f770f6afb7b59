//! Crypto service provider
//!
//! Backends are selected by the string algorithm id carried in the options
//! value; unknown ids yield [`DpkiError::Unsupported`]. Ed25519 keys and
//! SHA-256 hashing are the only backends the PKI needs.

use crate::error::{DpkiError, Result};

pub mod ed25519;
pub mod sha256;

pub use ed25519::Ed25519Key;

/// Algorithm id for Ed25519 keys
pub const ED25519: &str = "ed25519";
/// Algorithm id for SHA-256 hashing
pub const SHA256: &str = "sha256";

/// Options used when generating or importing a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyOpts {
    /// String id of the key algorithm
    pub algorithm: String,
    /// True for private keys
    pub private: bool,
    /// Informational: the key is not meant to be persisted
    pub ephemeral: bool,
}

impl Default for KeyOpts {
    fn default() -> Self {
        Self {
            algorithm: ED25519.to_string(),
            private: true,
            ephemeral: false,
        }
    }
}

impl KeyOpts {
    /// Options for an Ed25519 private key
    pub fn ed25519() -> Self {
        Self::default()
    }

    /// Same options for the public half
    pub fn public(mut self) -> Self {
        self.private = false;
        self
    }
}

/// Options selecting a hash backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashOpts {
    /// String id of the hash algorithm
    pub algorithm: String,
}

impl Default for HashOpts {
    fn default() -> Self {
        Self {
            algorithm: SHA256.to_string(),
        }
    }
}

/// Options for signing; the signer hashes the digest with `hash` first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignOpts {
    /// Hash applied to the input before signing
    pub hash: HashOpts,
}

/// Streaming hasher
pub trait Hasher {
    /// Digest size in bytes
    fn size(&self) -> usize;
    /// Internal block size in bytes
    fn block_size(&self) -> usize;
    /// Feed a block; returns the number of bytes consumed
    fn write(&mut self, block: &[u8]) -> usize;
    /// Finish, returning `prefix || digest`
    fn sum(self: Box<Self>, prefix: Option<&[u8]>) -> Vec<u8>;
}

/// A key handle produced by the provider
#[derive(Debug, Clone)]
pub enum Key {
    /// Ed25519 keypair or public key
    Ed25519(Ed25519Key),
}

impl Key {
    /// Options the key was created with
    pub fn opts(&self) -> &KeyOpts {
        match self {
            Key::Ed25519(key) => key.opts(),
        }
    }

    /// True if the key holds private material
    pub fn is_private(&self) -> bool {
        self.opts().private
    }

    /// The public half (self if already public)
    pub fn public_key(&self) -> Key {
        match self {
            Key::Ed25519(key) => Key::Ed25519(key.public_key()),
        }
    }

    /// Raw bytes: the private seed, or the public key bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Key::Ed25519(key) => key.to_bytes(),
        }
    }

    /// Raw public key bytes
    pub fn public_bytes(&self) -> Vec<u8> {
        self.public_key().to_bytes()
    }

    /// PKCS#8 DER export of the private key, as consumed by the cert builder
    pub fn to_pkcs8_der(&self) -> Result<Vec<u8>> {
        match self {
            Key::Ed25519(key) => key.to_pkcs8_der(),
        }
    }
}

/// Crypto service provider
///
/// Stateless dispatcher over the registered backends.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsProvider;

impl CsProvider {
    /// Create a provider
    pub fn new() -> Self {
        Self
    }

    /// Generate a keypair according to `opts`
    pub fn key_gen(&self, opts: &KeyOpts) -> Result<Key> {
        match opts.algorithm.as_str() {
            ED25519 => Ok(Key::Ed25519(Ed25519Key::generate(opts.clone()))),
            other => Err(DpkiError::Unsupported(format!(
                "key_gen for algorithm `{other}`"
            ))),
        }
    }

    /// Import a key from its raw representation
    ///
    /// For Ed25519 private keys the first 32 bytes of `raw` are the seed;
    /// public keys are exactly 32 bytes.
    pub fn key_import(&self, raw: &[u8], opts: &KeyOpts) -> Result<Key> {
        match opts.algorithm.as_str() {
            ED25519 => Ok(Key::Ed25519(Ed25519Key::import(raw, opts.clone())?)),
            other => Err(DpkiError::Unsupported(format!(
                "key_import for algorithm `{other}`"
            ))),
        }
    }

    /// Hash a message in one shot
    pub fn hash(&self, msg: &[u8], opts: &HashOpts) -> Result<Vec<u8>> {
        match opts.algorithm.as_str() {
            SHA256 => Ok(sha256::digest(msg, None)),
            other => Err(DpkiError::Unsupported(format!(
                "hash for algorithm `{other}`"
            ))),
        }
    }

    /// Obtain a streaming hasher
    pub fn get_hash(&self, opts: &HashOpts) -> Result<Box<dyn Hasher>> {
        match opts.algorithm.as_str() {
            SHA256 => Ok(Box::new(sha256::Sha256Hasher::new())),
            other => Err(DpkiError::Unsupported(format!(
                "get_hash for algorithm `{other}`"
            ))),
        }
    }

    /// Sign `digest` with `key`
    ///
    /// The signer contract hashes the input with `opts.hash` before signing.
    pub fn sign(&self, key: &Key, digest: &[u8], opts: &SignOpts) -> Result<Vec<u8>> {
        let hashed = self.hash(digest, &opts.hash)?;
        match key {
            Key::Ed25519(key) => key.sign(&hashed),
        }
    }

    /// Verify a signature; returns false on any failure, never errors
    pub fn verify(&self, pub_key: &Key, signature: &[u8], digest: &[u8], opts: &SignOpts) -> bool {
        let hashed = match self.hash(digest, &opts.hash) {
            Ok(hashed) => hashed,
            Err(_) => return false,
        };
        match pub_key {
            Key::Ed25519(key) => key.verify(signature, &hashed),
        }
    }
}
