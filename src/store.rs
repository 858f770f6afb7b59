//! Persistent certificate and application state
//!
//! Repository operations take a caller-supplied [`rusqlite::Connection`] so
//! that transaction scope belongs to the block pipeline: the keeper opens a
//! transaction at `begin_block` and commits it with the block. Every read
//! applies the validity filter (`not_valid_after > now` and not revoked).

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::error::{DpkiError, Result};
use crate::x509;

/// Database location when `DATABASE_URL` is unset
pub const DEFAULT_DATABASE_PATH: &str = ".data/database.db";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS app_state (
    created_at TEXT PRIMARY KEY,
    block_height INTEGER NOT NULL,
    app_hash BLOB NOT NULL
);
CREATE TABLE IF NOT EXISTS cert_entities (
    sn BLOB PRIMARY KEY,
    subject_name TEXT NOT NULL,
    public_key BLOB NOT NULL,
    pem TEXT NOT NULL,
    not_valid_before TEXT NOT NULL,
    not_valid_after TEXT NOT NULL,
    revoked_at TEXT,
    role TEXT
);
CREATE INDEX IF NOT EXISTS idx_cert_entities_subject_name ON cert_entities (subject_name);
CREATE INDEX IF NOT EXISTS idx_cert_entities_public_key ON cert_entities (public_key);
";

/// Handle on the node database
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open the database named by `DATABASE_URL` (a sqlite file path,
    /// optionally prefixed with `sqlite:` or `sqlite://`)
    pub fn connect() -> Result<Store> {
        let url = std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_PATH.to_string());
        let path = url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");
        Self::open(path)
    }

    /// Open a database file, creating it and its schema if needed
    pub fn open(path: impl AsRef<Path>) -> Result<Store> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.as_ref().display(), "opened certificate store");
        Ok(Store { conn: Mutex::new(conn) })
    }

    /// In-memory database, used by tests
    pub fn open_in_memory() -> Result<Store> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Store { conn: Mutex::new(conn) })
    }

    /// Borrow the connection
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    /// Open the block transaction
    pub fn begin(&self) -> Result<()> {
        self.conn().execute_batch("BEGIN")?;
        Ok(())
    }

    /// Commit the block transaction
    pub fn commit(&self) -> Result<()> {
        self.conn().execute_batch("COMMIT")?;
        Ok(())
    }

    /// Abandon the block transaction
    pub fn rollback(&self) -> Result<()> {
        self.conn().execute_batch("ROLLBACK")?;
        Ok(())
    }
}

/// One certificate record, unique by serial number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertEntity {
    /// Serial number (20 bytes)
    pub sn: Vec<u8>,
    /// Subject distinguished name, RFC 4514 string
    pub subject_name: String,
    /// Raw subject public key bytes
    pub public_key: Vec<u8>,
    /// Full certificate PEM
    pub pem: String,
    /// Certificate valid from this instant
    pub not_valid_before: DateTime<Utc>,
    /// Certificate valid until this instant
    pub not_valid_after: DateTime<Utc>,
    /// Set when the certificate has been revoked
    pub revoked_at: Option<DateTime<Utc>>,
    /// Role assigned by template recognition at insert time
    pub role: Option<String>,
}

impl CertEntity {
    /// Build a record from a certificate PEM; the role comes from template
    /// recognition and never changes afterwards
    pub fn from_pem(pem_src: &str) -> Result<CertEntity> {
        let info = x509::inspect_cert(pem_src)?;
        Ok(CertEntity {
            sn: info.sn,
            subject_name: info.subject.to_string(),
            public_key: info.public_key,
            pem: pem_src.to_string(),
            not_valid_before: info.not_before,
            not_valid_after: info.not_after,
            revoked_at: None,
            role: info.template.map(|template| template.name().to_string()),
        })
    }

    /// Atomic bulk insert; any serial collision fails the whole batch
    pub fn insert(conn: &Connection, items: &[CertEntity]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        conn.execute_batch("SAVEPOINT cert_insert")?;
        let result = (|| -> Result<()> {
            let mut stmt = conn.prepare_cached(
                "INSERT INTO cert_entities
                 (sn, subject_name, public_key, pem, not_valid_before, not_valid_after, revoked_at, role)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for item in items {
                stmt.execute(params![
                    item.sn,
                    item.subject_name,
                    item.public_key,
                    item.pem,
                    item.not_valid_before,
                    item.not_valid_after,
                    item.revoked_at,
                    item.role,
                ])
                .map_err(conflict_error)?;
            }
            Ok(())
        })();
        match result {
            Ok(()) => {
                conn.execute_batch("RELEASE cert_insert")?;
                Ok(())
            }
            Err(err) => {
                conn.execute_batch("ROLLBACK TO cert_insert; RELEASE cert_insert")?;
                Err(err)
            }
        }
    }

    /// PEM of the unique non-revoked, currently-valid record for a public key
    pub fn get_by_public_key(conn: &Connection, public_key: &[u8]) -> Result<Option<String>> {
        let pem = conn
            .query_row(
                "SELECT pem FROM cert_entities
                 WHERE not_valid_after > ?1 AND revoked_at IS NULL AND public_key = ?2
                 LIMIT 1",
                params![Utc::now(), public_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(pem)
    }

    /// PEM of the unique non-revoked, currently-valid record for a subject
    pub fn get_by_subject(conn: &Connection, subject_name: &str) -> Result<Option<String>> {
        let pem = conn
            .query_row(
                "SELECT pem FROM cert_entities
                 WHERE not_valid_after > ?1 AND revoked_at IS NULL AND subject_name = ?2
                 LIMIT 1",
                params![Utc::now(), subject_name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(pem)
    }

    /// Valid records with a role, in insertion order
    pub fn list_by_role(
        conn: &Connection,
        role: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<CertEntity>> {
        let mut stmt = conn.prepare_cached(
            "SELECT sn, subject_name, public_key, pem, not_valid_before, not_valid_after, revoked_at, role
             FROM cert_entities
             WHERE not_valid_after > ?1 AND revoked_at IS NULL AND role = ?2
             ORDER BY rowid LIMIT ?3 OFFSET ?4",
        )?;
        let rows = stmt.query_map(params![Utc::now(), role, limit, offset], |row| {
            Ok(CertEntity {
                sn: row.get(0)?,
                subject_name: row.get(1)?,
                public_key: row.get(2)?,
                pem: row.get(3)?,
                not_valid_before: row.get(4)?,
                not_valid_after: row.get(5)?,
                revoked_at: row.get(6)?,
                role: row.get(7)?,
            })
        })?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }
}

/// Application state at one committed height
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppState {
    /// Committed block height
    pub block_height: i64,
    /// State digest returned to the consensus engine at that height
    pub app_hash: Vec<u8>,
}

impl AppState {
    /// The most recently appended state, if any
    pub fn head(conn: &Connection) -> Result<Option<AppState>> {
        let head = conn
            .query_row(
                "SELECT block_height, app_hash FROM app_state
                 ORDER BY created_at DESC LIMIT 1",
                [],
                |row| {
                    Ok(AppState {
                        block_height: row.get(0)?,
                        app_hash: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(head)
    }

    /// Append the state committed at `block_height`
    pub fn append(
        conn: &Connection,
        block_height: i64,
        app_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<()> {
        conn.execute(
            "INSERT INTO app_state (created_at, block_height, app_hash) VALUES (?1, ?2, ?3)",
            params![now, block_height, app_hash],
        )
        .map_err(conflict_error)?;
        Ok(())
    }
}

fn conflict_error(err: rusqlite::Error) -> DpkiError {
    match err {
        rusqlite::Error::SqliteFailure(code, ref message)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DpkiError::StoreConflict(message.clone().unwrap_or_else(|| err.to_string()))
        }
        other => DpkiError::Store(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(sn: u8, subject: &str) -> CertEntity {
        CertEntity {
            sn: vec![sn; 20],
            subject_name: subject.to_string(),
            public_key: vec![sn ^ 0xFF; 32],
            pem: format!("-----BEGIN CERTIFICATE-----\n{sn}\n-----END CERTIFICATE-----\n"),
            not_valid_before: Utc::now() - Duration::days(1),
            not_valid_after: Utc::now() + Duration::days(30),
            revoked_at: None,
            role: Some("Host".to_string()),
        }
    }

    #[test]
    fn test_serial_collision_rolls_back_batch() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.conn();

        CertEntity::insert(&conn, &[sample(1, "CN=a, C=WN")]).unwrap();
        let err = CertEntity::insert(
            &conn,
            &[sample(2, "CN=b, C=WN"), sample(1, "CN=dup, C=WN")],
        )
        .unwrap_err();
        assert!(matches!(err, DpkiError::StoreConflict(_)));

        // the batch must not partially land
        assert!(CertEntity::get_by_subject(&conn, "CN=b, C=WN").unwrap().is_none());
    }

    #[test]
    fn test_expired_and_revoked_are_invisible() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.conn();

        let mut expired = sample(3, "CN=expired, C=WN");
        expired.not_valid_after = Utc::now() - Duration::hours(1);
        let mut revoked = sample(4, "CN=revoked, C=WN");
        revoked.revoked_at = Some(Utc::now());
        CertEntity::insert(&conn, &[expired, revoked]).unwrap();

        assert!(CertEntity::get_by_subject(&conn, "CN=expired, C=WN").unwrap().is_none());
        assert!(CertEntity::get_by_subject(&conn, "CN=revoked, C=WN").unwrap().is_none());
    }

    #[test]
    fn test_app_state_head_is_latest() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.conn();

        assert_eq!(AppState::head(&conn).unwrap(), None);
        AppState::append(&conn, 1, b"h1", Utc::now()).unwrap();
        AppState::append(&conn, 2, b"h2", Utc::now() + Duration::seconds(1)).unwrap();

        let head = AppState::head(&conn).unwrap().unwrap();
        assert_eq!(head.block_height, 2);
        assert_eq!(head.app_hash, b"h2");
    }
}
