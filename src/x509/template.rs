//! Certificate templates for the three PKI roles
//!
//! A template synthesizes the extension set for a role and recognizes the
//! role on parsed material. The KeyUsage bit-set is unique per template and
//! is the primary discriminator; BasicConstraints is checked when present
//! (certificate requests may legitimately omit it).

use rcgen::string::Ia5String;
use rcgen::{
    BasicConstraints, CertificateParams, ExtendedKeyUsagePurpose, IsCa,
    KeyUsagePurpose, SanType,
};
use x509_parser::extensions::{GeneralName, ParsedExtension};

use crate::error::Result;
use crate::names::{DistinguishedName, Hierarchy};

/// Certificate role templates, in match order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    /// Certificate authority
    Ca,
    /// Server (network node) with server-auth support
    Host,
    /// End user with client-auth support
    User,
}

/// Caller-supplied template arguments
#[derive(Debug, Clone, Default)]
pub struct TemplateArgs {
    /// BasicConstraints path length for CA certificates
    pub path_length: Option<u32>,
    /// Extra DNS subject alternative names for Host certificates
    pub san: Vec<String>,
}

/// KeyUsage bits in extension order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct KeyUsageBits {
    pub digital_signature: bool,
    pub content_commitment: bool,
    pub key_encipherment: bool,
    pub data_encipherment: bool,
    pub key_agreement: bool,
    pub key_cert_sign: bool,
    pub crl_sign: bool,
}

/// Extension facts shared by certificate and CSR recognition
#[derive(Debug, Clone, Default)]
pub struct ExtensionSummary {
    /// `(ca, path_len)` when a BasicConstraints extension is present
    pub basic_constraints: Option<(bool, Option<u32>)>,
    /// KeyUsage bits when the extension is present
    pub key_usage: Option<KeyUsageBits>,
    /// ExtendedKeyUsage includes serverAuth
    pub server_auth: bool,
    /// ExtendedKeyUsage includes clientAuth
    pub client_auth: bool,
    /// A SubjectAlternativeName extension is present
    pub has_san: bool,
    /// DNS entries of the SubjectAlternativeName
    pub dns_names: Vec<String>,
    /// RFC 822 entries of the SubjectAlternativeName
    pub email_names: Vec<String>,
}

impl ExtensionSummary {
    /// Reduce parsed extensions to the facts recognition needs
    pub fn from_extensions<'a>(
        extensions: impl Iterator<Item = &'a ParsedExtension<'a>>,
    ) -> Self {
        let mut summary = Self::default();
        for extension in extensions {
            match extension {
                ParsedExtension::BasicConstraints(bc) => {
                    summary.basic_constraints = Some((bc.ca, bc.path_len_constraint));
                }
                ParsedExtension::KeyUsage(ku) => {
                    summary.key_usage = Some(KeyUsageBits {
                        digital_signature: ku.digital_signature(),
                        content_commitment: ku.non_repudiation(),
                        key_encipherment: ku.key_encipherment(),
                        data_encipherment: ku.data_encipherment(),
                        key_agreement: ku.key_agreement(),
                        key_cert_sign: ku.key_cert_sign(),
                        crl_sign: ku.crl_sign(),
                    });
                }
                ParsedExtension::ExtendedKeyUsage(eku) => {
                    summary.server_auth = eku.server_auth;
                    summary.client_auth = eku.client_auth;
                }
                ParsedExtension::SubjectAlternativeName(san) => {
                    summary.has_san = true;
                    for name in &san.general_names {
                        match name {
                            GeneralName::DNSName(dns) => {
                                summary.dns_names.push((*dns).to_string());
                            }
                            GeneralName::RFC822Name(email) => {
                                summary.email_names.push((*email).to_string());
                            }
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }
        summary
    }
}

impl Template {
    /// All templates, in match order
    pub const ALL: [Template; 3] = [Template::Ca, Template::Host, Template::User];

    /// Role name stored alongside certificate records
    pub fn name(&self) -> &'static str {
        match self {
            Template::Ca => "CA",
            Template::Host => "Host",
            Template::User => "User",
        }
    }

    /// Resolve a configured template name; `Node` is a legacy alias for Host
    pub fn from_name(name: &str) -> Option<Template> {
        match name {
            "CA" => Some(Template::Ca),
            "Host" | "Node" => Some(Template::Host),
            "User" => Some(Template::User),
            _ => None,
        }
    }

    fn key_usage(&self) -> KeyUsageBits {
        match self {
            Template::Ca => KeyUsageBits {
                digital_signature: true,
                key_cert_sign: true,
                crl_sign: true,
                ..KeyUsageBits::default()
            },
            Template::Host => KeyUsageBits {
                digital_signature: true,
                key_encipherment: true,
                key_agreement: true,
                content_commitment: true,
                ..KeyUsageBits::default()
            },
            Template::User => KeyUsageBits {
                digital_signature: true,
                key_encipherment: true,
                content_commitment: true,
                data_encipherment: true,
                ..KeyUsageBits::default()
            },
        }
    }

    /// DNS names a Host certificate always carries: localhost plus the
    /// dot-joined DC atoms of the subject's base Domain projection
    pub fn host_auto_sans(subject: &DistinguishedName) -> Vec<String> {
        let mut sans = vec!["localhost".to_string()];
        if let Some(domain) = subject.extract(Hierarchy::Domain, true) {
            let joined = domain
                .rdns()
                .iter()
                .map(|rdn| rdn.first_value())
                .collect::<Vec<_>>()
                .join(".");
            if !joined.is_empty() {
                sans.push(joined);
            }
        }
        sans
    }

    /// Mailbox a User certificate carries when its Domain projection leads
    /// with a UID atom: `UID@dot-join(DCs)`
    pub fn user_mailbox(subject: &DistinguishedName) -> Option<String> {
        let domain = subject.extract(Hierarchy::Domain, false)?;
        let head = domain.rdns().first()?;
        if head.atoms()[0].0 != "UID" {
            return None;
        }
        // the projection is DC-anchored, so at least one DC follows the UID
        let joined = domain.rdns()[1..]
            .iter()
            .map(|rdn| rdn.first_value())
            .collect::<Vec<_>>()
            .join(".");
        Some(format!("{}@{joined}", head.first_value()))
    }

    /// Apply the template's extension set to a certificate builder
    pub fn apply(
        &self,
        params: &mut CertificateParams,
        subject: &DistinguishedName,
        args: &TemplateArgs,
    ) -> Result<()> {
        match self {
            Template::Ca => {
                params.is_ca = IsCa::Ca(match args.path_length {
                    Some(path_len) => BasicConstraints::Constrained(path_len as u8),
                    None => BasicConstraints::Unconstrained,
                });
                params.key_usages = vec![
                    KeyUsagePurpose::DigitalSignature,
                    KeyUsagePurpose::KeyCertSign,
                    KeyUsagePurpose::CrlSign,
                ];
            }
            Template::Host => {
                params.is_ca = IsCa::ExplicitNoCa;
                params.key_usages = vec![
                    KeyUsagePurpose::DigitalSignature,
                    KeyUsagePurpose::KeyEncipherment,
                    KeyUsagePurpose::KeyAgreement,
                    KeyUsagePurpose::ContentCommitment,
                ];
                params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
                let mut sans = Self::host_auto_sans(subject);
                for extra in &args.san {
                    if !sans.contains(extra) {
                        sans.push(extra.clone());
                    }
                }
                params.subject_alt_names = sans
                    .iter()
                    .map(|name| Ok(SanType::DnsName(Ia5String::try_from(name.as_str())?)))
                    .collect::<Result<Vec<_>>>()?;
            }
            Template::User => {
                params.is_ca = IsCa::ExplicitNoCa;
                params.key_usages = vec![
                    KeyUsagePurpose::DigitalSignature,
                    KeyUsagePurpose::KeyEncipherment,
                    KeyUsagePurpose::ContentCommitment,
                    KeyUsagePurpose::DataEncipherment,
                ];
                params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
                if let Some(mailbox) = Self::user_mailbox(subject) {
                    params.subject_alt_names = vec![SanType::Rfc822Name(Ia5String::try_from(
                        mailbox.as_str(),
                    )?)];
                }
            }
        }
        Ok(())
    }

    /// True when the target's extensions match what this template would
    /// produce for the target's own subject
    pub fn matches(&self, subject: &DistinguishedName, summary: &ExtensionSummary) -> bool {
        if summary.key_usage != Some(self.key_usage()) {
            return false;
        }
        if let Some((ca, _)) = summary.basic_constraints {
            if ca != matches!(self, Template::Ca) {
                return false;
            }
        }
        match self {
            Template::Ca => true,
            Template::Host => summary.server_auth && summary.has_san,
            Template::User => {
                summary.client_auth
                    && (Self::user_mailbox(subject).is_none() || summary.has_san)
            }
        }
    }
}

/// First template, in {CA, Host, User} order, matching the target
pub fn matches_to(
    subject: &DistinguishedName,
    summary: &ExtensionSummary,
) -> Option<Template> {
    Template::ALL
        .into_iter()
        .find(|template| template.matches(subject, summary))
}
