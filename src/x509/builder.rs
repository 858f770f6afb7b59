//! CSR creation and CA signing
//!
//! Subjects are written in DER order (the reverse of their RFC 4514 string
//! form). A signed certificate takes its subject, extensions, and public
//! key from the request; the extensions are re-synthesized through the
//! recognized template, which yields the same set the request carried.

use rand::RngCore;
use rcgen::{
    CertificateParams, DistinguishedName as RcgenName, DnType, Issuer as RcgenIssuer, KeyPair,
    SerialNumber, SubjectPublicKeyInfo,
};
use time::macros::time;
use time::{Date, OffsetDateTime};

use crate::csp::Key;
use crate::error::{DpkiError, Result};
use crate::names::DistinguishedName;

use super::template::{Template, TemplateArgs};
use super::{inspect_cert, inspect_csr};

/// Validity window and signing knobs for [`apply_csr`]
#[derive(Debug, Clone)]
pub struct IssueParams {
    /// Last valid day; the certificate expires at its 23:59:59 UTC
    pub not_after: Date,
    /// First valid day at 00:00:00 UTC; today when absent
    pub not_before: Option<Date>,
    /// Path length granted to CA certificates whose request carries none
    pub path_length: Option<u32>,
}

impl IssueParams {
    /// Sign from `not_after` with the remaining knobs defaulted
    pub fn until(not_after: Date) -> Self {
        Self {
            not_after,
            not_before: None,
            path_length: None,
        }
    }
}

/// The signing side of [`apply_csr`]
#[derive(Debug, Clone, Copy)]
pub enum IssuerPair<'a> {
    /// Root bootstrap: the request's own key signs, subject == issuer
    SelfIssued {
        /// Private key that produced the request
        key: &'a Key,
    },
    /// A CA certificate and its private key
    Ca {
        /// PEM of the issuing CA certificate
        cert_pem: &'a str,
        /// The CA private key
        key: &'a Key,
    },
}

/// Build a PKCS#10 request for `subject`, extensions per `template`,
/// signed with `key`; returns the request PEM
pub fn create_csr(
    subject: &DistinguishedName,
    key: &Key,
    template: Template,
    args: &TemplateArgs,
) -> Result<String> {
    let mut params = CertificateParams::new(Vec::new())?;
    params.distinguished_name = rcgen_name(subject)?;
    template.apply(&mut params, subject, args)?;

    let key_pair = rcgen_key_pair(key)?;
    let csr = params.serialize_request(&key_pair)?;
    Ok(csr.pem()?)
}

/// Sign a certificate from a request; returns the certificate PEM
///
/// Subject, extensions, and public key come from the request; the issuer
/// name from the signing certificate; the serial is 20 random bytes.
pub fn apply_csr(csr_pem: &str, issuer: IssuerPair<'_>, opts: &IssueParams) -> Result<String> {
    let info = inspect_csr(csr_pem)?;
    let template = info
        .template
        .ok_or_else(|| DpkiError::WrongCsr("no role template matches the request".to_string()))?;

    let mut args = TemplateArgs {
        path_length: info.path_length.or(opts.path_length),
        san: Vec::new(),
    };
    if template == Template::Host {
        let auto = Template::host_auto_sans(&info.subject);
        args.san = info
            .dns_sans
            .iter()
            .filter(|name| !auto.contains(*name))
            .cloned()
            .collect();
    }

    let mut params = CertificateParams::new(Vec::new())?;
    params.distinguished_name = rcgen_name(&info.subject)?;
    template.apply(&mut params, &info.subject, &args)?;

    let today = OffsetDateTime::now_utc().date();
    params.not_before = opts
        .not_before
        .unwrap_or(today)
        .with_time(time!(0:00:00))
        .assume_utc();
    params.not_after = opts.not_after.with_time(time!(23:59:59)).assume_utc();
    params.serial_number = Some(random_serial());

    let cert = match issuer {
        IssuerPair::SelfIssued { key } => {
            let key_pair = rcgen_key_pair(key)?;
            params.self_signed(&key_pair)?
        }
        IssuerPair::Ca { cert_pem, key } => {
            let issuer_info = inspect_cert(cert_pem)?;
            let mut issuer_params = CertificateParams::new(Vec::new())?;
            issuer_params.distinguished_name = rcgen_name(&issuer_info.subject)?;
            Template::Ca.apply(
                &mut issuer_params,
                &issuer_info.subject,
                &TemplateArgs {
                    path_length: issuer_info.path_length,
                    san: Vec::new(),
                },
            )?;
            let signer = RcgenIssuer::new(issuer_params, rcgen_key_pair(key)?);
            let public_key = SubjectPublicKeyInfo::from_der(&info.spki_der)?;
            params.signed_by(&public_key, &signer)?
        }
    };
    Ok(cert.pem())
}

fn random_serial() -> SerialNumber {
    SerialNumber::from(random_serial_bytes().to_vec())
}

/// 20 random serial bytes; the leading byte stays in 0x01..=0x7f so the
/// DER integer is positive and keeps its full width
fn random_serial_bytes() -> [u8; 20] {
    let mut sn = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut sn);
    sn[0] = (sn[0] & 0x7f).max(1);
    sn
}

fn rcgen_key_pair(key: &Key) -> Result<KeyPair> {
    let der = key.to_pkcs8_der()?;
    Ok(KeyPair::try_from(der.as_slice())?)
}

/// Write the subject in DER order; multi-valued RDNs are flattened, one
/// attribute per RDN
fn rcgen_name(subject: &DistinguishedName) -> Result<RcgenName> {
    let mut name = RcgenName::new();
    for rdn in subject.rdns().iter().rev() {
        for (key, value) in rdn.atoms() {
            name.push(dn_type(key)?, value.as_str());
        }
    }
    Ok(name)
}

fn dn_type(key: &str) -> Result<DnType> {
    Ok(match key {
        "C" => DnType::CountryName,
        "ST" => DnType::StateOrProvinceName,
        "L" => DnType::LocalityName,
        "O" => DnType::OrganizationName,
        "OU" => DnType::OrganizationalUnitName,
        "CN" => DnType::CommonName,
        "STREET" => DnType::CustomDnType(vec![2, 5, 4, 9]),
        "DC" => DnType::CustomDnType(vec![0, 9, 2342, 19200300, 100, 1, 25]),
        "UID" => DnType::CustomDnType(vec![0, 9, 2342, 19200300, 100, 1, 1]),
        dotted => {
            let arcs = dotted
                .split('.')
                .map(str::parse)
                .collect::<std::result::Result<Vec<u64>, _>>()
                .map_err(|_| DpkiError::WrongName(format!("unknown attribute type `{key}`")))?;
            DnType::CustomDnType(arcs)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dn_type_accepts_dotted_oids() {
        assert!(dn_type("2.5.4.12").is_ok());
        assert!(dn_type("TITLE").is_err());
    }

    #[test]
    fn test_random_serial_is_20_bytes_positive() {
        for _ in 0..64 {
            let sn = random_serial_bytes();
            assert_eq!(sn.len(), 20);
            assert_eq!(sn[0] & 0x80, 0);
            assert_ne!(sn[0], 0);
        }
    }
}
