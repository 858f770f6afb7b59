//! X.509 templates, CSR creation, and CA signing
//!
//! Received PEM material is parsed with `x509-parser`; new CSRs and
//! certificates are produced with `rcgen`. [`inspect_cert`] and
//! [`inspect_csr`] reduce parsed objects to the facts the transaction
//! pipeline and the CA service act on.

use chrono::{DateTime, Utc};
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::prelude::FromDer;

use crate::error::{DpkiError, Result};
use crate::names::DistinguishedName;

pub mod builder;
pub mod template;

pub use builder::{apply_csr, create_csr, IssueParams, IssuerPair};
pub use template::{Template, TemplateArgs};

use template::ExtensionSummary;

/// PEM tag opening a certificate transaction
pub const CERT_PEM_TAG: &str = "CERTIFICATE";
/// PEM tag opening a certificate-request transaction
pub const CSR_PEM_TAG: &str = "CERTIFICATE REQUEST";

/// Facts extracted from a parsed certificate
#[derive(Debug, Clone)]
pub struct CertInfo {
    /// Subject name in RFC 4514 order
    pub subject: DistinguishedName,
    /// Issuer name in RFC 4514 order
    pub issuer: DistinguishedName,
    /// Raw subject public key bytes (32 bytes for ed25519)
    pub public_key: Vec<u8>,
    /// Raw serial number bytes
    pub sn: Vec<u8>,
    /// Start of the validity window
    pub not_before: DateTime<Utc>,
    /// End of the validity window
    pub not_after: DateTime<Utc>,
    /// Recognized role template, if any
    pub template: Option<Template>,
    /// BasicConstraints path length, when present
    pub path_length: Option<u32>,
}

impl CertInfo {
    /// True for self-issued (root) certificates
    pub fn self_issued(&self) -> bool {
        self.subject == self.issuer
    }
}

/// Facts extracted from a parsed certificate signing request
#[derive(Debug, Clone)]
pub struct CsrInfo {
    /// Requested subject name in RFC 4514 order
    pub subject: DistinguishedName,
    /// Raw subject public key bytes
    pub public_key: Vec<u8>,
    /// Complete SubjectPublicKeyInfo DER, as the signer consumes it
    pub spki_der: Vec<u8>,
    /// Recognized role template, if any
    pub template: Option<Template>,
    /// Requested BasicConstraints path length, when present
    pub path_length: Option<u32>,
    /// Requested DNS subject alternative names
    pub dns_sans: Vec<String>,
    /// Whether the embedded self-signature verifies
    pub signature_valid: bool,
}

/// Parse a certificate PEM and reduce it to [`CertInfo`]
pub fn inspect_cert(pem_src: &str) -> Result<CertInfo> {
    let block = pem::parse(pem_src)?;
    if block.tag() != CERT_PEM_TAG {
        return Err(DpkiError::WrongCert(format!(
            "unexpected PEM tag `{}`",
            block.tag()
        )));
    }
    let (_, cert) = x509_parser::parse_x509_certificate(block.contents())?;

    let subject = DistinguishedName::from_x509_name(cert.subject())?;
    let issuer = DistinguishedName::from_x509_name(cert.issuer())?;
    let summary = ExtensionSummary::from_extensions(
        cert.extensions().iter().map(|ext| ext.parsed_extension()),
    );
    let not_before = timestamp(cert.validity().not_before.timestamp())?;
    let not_after = timestamp(cert.validity().not_after.timestamp())?;
    let template = template::matches_to(&subject, &summary);

    Ok(CertInfo {
        public_key: cert.public_key().subject_public_key.data.as_ref().to_vec(),
        sn: cert.raw_serial().to_vec(),
        path_length: summary.basic_constraints.and_then(|(_, path_len)| path_len),
        subject,
        issuer,
        not_before,
        not_after,
        template,
    })
}

/// Parse a CSR PEM and reduce it to [`CsrInfo`]
pub fn inspect_csr(pem_src: &str) -> Result<CsrInfo> {
    let block = pem::parse(pem_src)?;
    if block.tag() != CSR_PEM_TAG {
        return Err(DpkiError::WrongCsr(format!(
            "unexpected PEM tag `{}`",
            block.tag()
        )));
    }
    let (_, csr) = X509CertificationRequest::from_der(block.contents())?;

    let info = &csr.certification_request_info;
    let subject = DistinguishedName::from_x509_name(&info.subject)?;
    let summary = match csr.requested_extensions() {
        Some(extensions) => ExtensionSummary::from_extensions(extensions),
        None => ExtensionSummary::default(),
    };
    let template = template::matches_to(&subject, &summary);

    Ok(CsrInfo {
        public_key: info.subject_pki.subject_public_key.data.as_ref().to_vec(),
        spki_der: info.subject_pki.raw.to_vec(),
        path_length: summary.basic_constraints.and_then(|(_, path_len)| path_len),
        dns_sans: summary.dns_names.clone(),
        signature_valid: csr.verify_signature().is_ok(),
        subject,
        template,
    })
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| DpkiError::X509(format!("timestamp {secs} out of range")))
}
