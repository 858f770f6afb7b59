//! Error types for the distributed PKI

use thiserror::Error;

/// Result type alias for PKI operations
pub type Result<T> = std::result::Result<T, DpkiError>;

/// Main error type for the certificate state machine and CA service
#[derive(Error, Debug)]
pub enum DpkiError {
    /// Transaction bytes are neither a CSR nor a certificate
    #[error("Unrecognized tx")]
    UnknownTx,

    /// CSR failed validation
    #[error("Wrong CSR: {0}")]
    WrongCsr(String),

    /// Certificate failed validation
    #[error("Wrong certificate: {0}")]
    WrongCert(String),

    /// A different key already holds a valid certificate for this subject
    #[error("Subject conflict: {0}")]
    SubjectConflict(String),

    /// The certificate's issuer is not present in the store
    #[error("Unknown issuer: {0}")]
    IssuerUnknown(String),

    /// A valid certificate already exists (advisory for CSRs, fatal for certs)
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Unsupported cryptographic algorithm or key type
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Unique-constraint violation in the certificate store
    #[error("Store conflict: {0}")]
    StoreConflict(String),

    /// Chain RPC broadcast failure
    #[error("RPC failure: {0}")]
    RpcFailure(String),

    /// Invalid node configuration
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Distinguished name parsing errors
    #[error("Wrong distinguished name: {0}")]
    WrongName(String),

    /// Certificate generation errors
    #[error("Certificate generation error: {0}")]
    CertGen(#[from] rcgen::Error),

    /// Ed25519 errors
    #[error("Ed25519 error: {0}")]
    Ed25519(#[from] ed25519_dalek::SignatureError),

    /// PEM parsing errors
    #[error("PEM error: {0}")]
    Pem(#[from] pem::PemError),

    /// X.509 parsing errors
    #[error("X.509 error: {0}")]
    X509(String),

    /// Database errors
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parse errors
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Base64 decoding errors
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl<E: std::fmt::Debug> From<x509_parser::nom::Err<E>> for DpkiError {
    fn from(err: x509_parser::nom::Err<E>) -> Self {
        DpkiError::X509(err.to_string())
    }
}

impl From<x509_parser::error::PEMError> for DpkiError {
    fn from(err: x509_parser::error::PEMError) -> Self {
        DpkiError::X509(err.to_string())
    }
}
