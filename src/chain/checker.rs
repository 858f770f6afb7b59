//! Transaction validation
//!
//! One pure path shared by `check_tx` and `deliver_tx`: errors become
//! `(code, log)` verdicts and never propagate out of the pipeline.

use rusqlite::Connection;

use crate::ca::CaService;
use crate::store::CertEntity;
use crate::x509::{inspect_cert, inspect_csr, CertInfo, CsrInfo};

use super::types::ResultCode;

const CSR_PREFIX: &[u8] = b"-----BEGIN CERTIFICATE REQUEST-----";
const CERT_PREFIX: &[u8] = b"-----BEGIN CERTIFICATE-----";

/// What an accepted transaction carries into the keeper
#[derive(Debug, Clone)]
pub enum TxPayload {
    /// Nothing to apply (e.g. a CSR on a node without issuing authority)
    None,
    /// A verified signing request and its PEM
    Csr(CsrInfo, String),
    /// A verified certificate and its PEM
    Cert(CertInfo, String),
}

/// Outcome of validating one transaction
#[derive(Debug, Clone)]
pub struct Verdict {
    /// Result code for the host
    pub code: ResultCode,
    /// Rejection reason, when not accepted
    pub log: Option<String>,
    /// Accepted payload
    pub payload: TxPayload,
}

impl Verdict {
    fn ok(payload: TxPayload) -> Verdict {
        Verdict {
            code: ResultCode::Ok,
            log: None,
            payload,
        }
    }

    fn reject(code: ResultCode, log: impl Into<String>) -> Verdict {
        Verdict {
            code,
            log: Some(log.into()),
            payload: TxPayload::None,
        }
    }
}

/// Validate raw transaction bytes against committed state
pub fn validate(conn: &Connection, ca: &CaService, tx: &[u8]) -> Verdict {
    if tx.starts_with(CSR_PREFIX) {
        match std::str::from_utf8(tx) {
            Ok(pem) => check_csr(conn, ca, pem),
            Err(_) => Verdict::reject(ResultCode::Error, "Wrong CSR"),
        }
    } else if tx.starts_with(CERT_PREFIX) {
        match std::str::from_utf8(tx) {
            Ok(pem) => check_cert(conn, pem),
            Err(_) => Verdict::reject(ResultCode::Error, "Wrong certificate"),
        }
    } else {
        Verdict::reject(ResultCode::Error, "Unrecognized tx")
    }
}

fn check_csr(conn: &Connection, ca: &CaService, pem: &str) -> Verdict {
    let csr = match inspect_csr(pem) {
        Ok(csr) => csr,
        Err(err) => return Verdict::reject(ResultCode::Error, format!("Wrong CSR: {err}")),
    };
    if !csr.signature_valid {
        return Verdict::reject(ResultCode::Error, "Wrong CSR: invalid signature");
    }
    if csr.template.is_none() {
        return Verdict::reject(ResultCode::Error, "Wrong CSR: no matching template");
    }
    // a node with issuing authority only relays requests it could serve
    let local_ca = ca.cert().is_some();
    if local_ca && ca.can_issue(&csr.subject) < 1 {
        return Verdict::reject(ResultCode::Error, "Wrong CSR: subject out of namespace");
    }
    let subject = csr.subject.to_string();
    match CertEntity::get_by_subject(conn, &subject) {
        Ok(Some(existing_pem)) => match inspect_cert(&existing_pem) {
            Ok(existing) if existing.public_key == csr.public_key => Verdict::reject(
                ResultCode::AlreadyExists,
                format!("Already exists: {subject}"),
            ),
            Ok(_) => Verdict::reject(
                ResultCode::Error,
                format!("Subject conflict: {subject}"),
            ),
            Err(err) => Verdict::reject(ResultCode::Error, format!("Store error: {err}")),
        },
        Ok(None) if local_ca => Verdict::ok(TxPayload::Csr(csr, pem.to_string())),
        Ok(None) => Verdict::ok(TxPayload::None),
        Err(err) => Verdict::reject(ResultCode::Error, format!("Store error: {err}")),
    }
}

fn check_cert(conn: &Connection, pem: &str) -> Verdict {
    let cert = match inspect_cert(pem) {
        Ok(cert) => cert,
        Err(err) => return Verdict::reject(ResultCode::Error, format!("Wrong certificate: {err}")),
    };
    if cert.template.is_none() {
        return Verdict::reject(ResultCode::Error, "Wrong certificate: no matching template");
    }
    match CertEntity::get_by_public_key(conn, &cert.public_key) {
        Ok(Some(_)) => {
            return Verdict::reject(
                ResultCode::Error,
                format!("Already exists: {}", cert.subject),
            )
        }
        Ok(None) => {}
        Err(err) => return Verdict::reject(ResultCode::Error, format!("Store error: {err}")),
    }
    match CertEntity::get_by_subject(conn, &cert.issuer.to_string()) {
        Ok(Some(_)) => Verdict::ok(TxPayload::Cert(cert, pem.to_string())),
        Ok(None) => Verdict::reject(
            ResultCode::Error,
            format!("Unknown issuer: {}", cert.issuer),
        ),
        Err(err) => Verdict::reject(ResultCode::Error, format!("Store error: {err}")),
    }
}
