//! Shared fixtures: wonderland PKI material built with the crate's own
//! builder, plus literal PEM transactions.

#![allow(dead_code)]

use dpki::csp::{CsProvider, Key, KeyOpts};
use dpki::names::DistinguishedName;
use dpki::x509::{apply_csr, create_csr, IssueParams, IssuerPair, Template, TemplateArgs};
use time::macros::date;

pub const ROOT_SUBJECT: &str = "CN=Root Wonderland CA, C=WN";
pub const FIRST_CA_SUBJECT: &str = "CN=First Wonderland CA, OU=Data center, C=WN, O=The Corporation";

/// A literal signed ed25519 CSR for `CN=Alesh+UID=alesh, C=WN` (User role)
pub const ALESH_CSR_PEM: &str = "-----BEGIN CERTIFICATE REQUEST-----
MIH5MIGsAgEAMDIxCzAJBgNVBAYTAldOMSMwDAYDVQQDDAVBbGVzaDATBgoJkiaJ
k/IsZAEBDAVhbGVzaDAqMAUGAytlcAMhAOiHZR7V+fFgzApaZM9Qt0zjzM91+IZy
30VhYY5iexOKoEcwRQYJKoZIhvcNAQkOMTgwNjAMBgNVHRMBAf8EAjAAMA4GA1Ud
DwEB/wQEAwIE8DAWBgNVHSUBAf8EDDAKBggrBgEFBQcDAjAFBgMrZXADQQC4PA0C
l3UQmBhUEay/WrpJRCa9hxcGaaZG5CcVbw+E9Eb0HVgOhh1UlQxGjg4LAydqWvuS
d9JXAIDcMAnQuvsL
-----END CERTIFICATE REQUEST-----
";

/// Route pipeline logs through `RUST_LOG` during tests
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

pub fn dn(src: &str) -> DistinguishedName {
    DistinguishedName::parse(src).unwrap()
}

pub fn gen_key() -> Key {
    CsProvider::new().key_gen(&KeyOpts::ed25519()).unwrap()
}

/// Self-issued root CA: returns the key and the certificate PEM
pub fn root_ca(subject: &str) -> (Key, String) {
    let key = gen_key();
    let csr = create_csr(
        &dn(subject),
        &key,
        Template::Ca,
        &TemplateArgs {
            path_length: Some(7),
            san: Vec::new(),
        },
    )
    .unwrap();
    let pem = apply_csr(
        &csr,
        IssuerPair::SelfIssued { key: &key },
        &IssueParams {
            not_after: date!(2070 - 01 - 01),
            not_before: None,
            path_length: Some(7),
        },
    )
    .unwrap();
    (key, pem)
}

/// CSR for any template, fresh key; returns the key and the request PEM
pub fn csr_for(subject: &str, template: Template, args: &TemplateArgs) -> (Key, String) {
    let key = gen_key();
    let pem = create_csr(&dn(subject), &key, template, args).unwrap();
    (key, pem)
}

/// Sign a CSR with a CA pair
pub fn sign(csr_pem: &str, ca_cert_pem: &str, ca_key: &Key) -> String {
    apply_csr(
        csr_pem,
        IssuerPair::Ca {
            cert_pem: ca_cert_pem,
            key: ca_key,
        },
        &IssueParams {
            not_after: date!(2069 - 01 - 01),
            not_before: None,
            path_length: Some(3),
        },
    )
    .unwrap()
}
