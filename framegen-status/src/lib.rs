//! UID-keyed request lifecycle: `ABSENT → PENDING → {SUCCESS, FAILED}`, and `FAILED → ABSENT`
//! once the failure has been reported.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod retry;
pub use retry::{retry_with_backoff, RetryPolicy};

/// Status of a completed build whose ROP matched the request.
pub const STATUS_OK: u16 = 200;
/// Status of a completed build where the packer changed at least one ROP.
pub const STATUS_ROP_CHANGED: u16 = 209;
/// Status stored with a failure message.
pub const STATUS_FAILED: u16 = 406;
/// Prefix marking the stored content as a failure message.
pub const FAILED_PREFIX: &str = "FAILED | ";

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("status store error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("status store lock poisoned")]
    Poisoned,
    #[error("status store task failed: {0}")]
    Task(String),
    #[error("malformed status row for {uid}: {reason}")]
    Malformed { uid: String, reason: String },
}

impl StatusError {
    pub fn is_lock_contention(&self) -> bool {
        matches!(self, StatusError::Sqlite(err) if is_lock_contention(err))
    }
}

/// Busy and locked failures are the only ones worth waiting out.
pub fn is_lock_contention(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Stored row for one request identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestRecord {
    pub uid: String,
    pub content: String,
    pub status: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestState {
    /// Accepted, build not finished (or crashed).
    Pending,
    Success { document: String, status: u16 },
    Failed { message: String },
}

impl RequestRecord {
    pub fn state(&self) -> RequestState {
        if self.content.is_empty() {
            RequestState::Pending
        } else if let Some(message) = self.content.strip_prefix(FAILED_PREFIX) {
            RequestState::Failed {
                message: message.to_string(),
            }
        } else {
            RequestState::Success {
                document: self.content.clone(),
                status: self.status,
            }
        }
    }
}

/// Durable request state. The only writer of [`RequestRecord`]s.
pub trait RequestLifecycleStore: Send + Sync {
    fn get(&self, uid: &str) -> Result<Option<RequestRecord>, StatusError>;

    /// Creates the PENDING row unless one already exists.
    fn ensure_pending(&self, uid: &str) -> Result<(), StatusError>;

    /// Moves a PENDING row to SUCCESS. Absent and terminal rows are left alone.
    fn finalize_success(&self, uid: &str, document: &str, status: u16) -> Result<(), StatusError>;

    /// Moves a PENDING row to FAILED. Absent and terminal rows are left alone.
    fn finalize_failed(&self, uid: &str, message: &str) -> Result<(), StatusError>;

    /// Deletes the row so the identifier can be submitted again.
    fn clear(&self, uid: &str) -> Result<(), StatusError>;
}

const FINALIZE: &str = "UPDATE XmlStorage SET xml_content = ?2, status = ?3
    WHERE uid = ?1 AND (xml_content IS NULL OR xml_content = '')";

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS XmlStorage (
    uid TEXT PRIMARY KEY,
    xml_content TEXT,
    status INTEGER
)";

/// SQLite-backed lifecycle store.
pub struct SqliteLifecycleStore {
    conn: Mutex<Connection>,
    retry: RetryPolicy,
}

impl SqliteLifecycleStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StatusError> {
        let conn = Connection::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "status store opened");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StatusError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StatusError> {
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_busy_timeout(self, timeout: Duration) -> Result<Self, StatusError> {
        self.lock()?.busy_timeout(timeout)?;
        Ok(self)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StatusError> {
        self.conn.lock().map_err(|_| StatusError::Poisoned)
    }

    fn write(&self, sql: &str, uid: &str, content: Option<&str>, status: Option<u16>) -> Result<usize, StatusError> {
        let conn = self.lock()?;
        let changed = retry_with_backoff(&self.retry, is_lock_contention, || match (content, status) {
            (Some(content), Some(status)) => conn.execute(sql, params![uid, content, status]),
            _ => conn.execute(sql, params![uid]),
        })?;
        Ok(changed)
    }
}

impl RequestLifecycleStore for SqliteLifecycleStore {
    fn get(&self, uid: &str) -> Result<Option<RequestRecord>, StatusError> {
        let conn = self.lock()?;
        let row = retry_with_backoff(&self.retry, is_lock_contention, || {
            conn.query_row(
                "SELECT xml_content, status FROM XmlStorage WHERE uid = ?1",
                params![uid],
                |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<i64>>(1)?)),
            )
            .optional()
        })?;
        let Some((content, status)) = row else {
            return Ok(None);
        };
        let status = u16::try_from(status.unwrap_or(i64::from(STATUS_OK))).map_err(|e| StatusError::Malformed {
            uid: uid.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(RequestRecord {
            uid: uid.to_string(),
            content: content.unwrap_or_default(),
            status,
        }))
    }

    fn ensure_pending(&self, uid: &str) -> Result<(), StatusError> {
        let inserted = self.write(
            "INSERT OR IGNORE INTO XmlStorage (uid, xml_content, status) VALUES (?1, ?2, ?3)",
            uid,
            Some(""),
            Some(STATUS_OK),
        )?;
        debug!(uid, inserted = inserted > 0, "request pending");
        Ok(())
    }

    fn finalize_success(&self, uid: &str, document: &str, status: u16) -> Result<(), StatusError> {
        if self.write(FINALIZE, uid, Some(document), Some(status))? == 0 {
            warn!(uid, "no pending row, document not stored");
            return Ok(());
        }
        info!(uid, status, "request finalized");
        Ok(())
    }

    fn finalize_failed(&self, uid: &str, message: &str) -> Result<(), StatusError> {
        let content = format!("{FAILED_PREFIX}{message}");
        if self.write(FINALIZE, uid, Some(&content), Some(STATUS_FAILED))? == 0 {
            warn!(uid, "no pending row, failure not stored");
            return Ok(());
        }
        info!(uid, "request failed");
        Ok(())
    }

    fn clear(&self, uid: &str) -> Result<(), StatusError> {
        let removed = self.write("DELETE FROM XmlStorage WHERE uid = ?1", uid, None, None)?;
        debug!(uid, removed, "request cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn store() -> SqliteLifecycleStore {
        SqliteLifecycleStore::open_in_memory().unwrap()
    }

    fn temp_db(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("framegen-status-{name}-{}.db", std::process::id()));
        let _ = fs::remove_file(&path);
        path
    }

    #[test]
    fn absent_uid_has_no_record() {
        assert_eq!(store().get("missing").unwrap(), None);
    }

    #[test]
    fn pending_then_success() {
        let store = store();
        store.ensure_pending("u1").unwrap();
        assert_eq!(store.get("u1").unwrap().unwrap().state(), RequestState::Pending);

        store.finalize_success("u1", "<Run/>", STATUS_ROP_CHANGED).unwrap();
        let record = store.get("u1").unwrap().unwrap();
        assert_eq!(
            record.state(),
            RequestState::Success {
                document: "<Run/>".into(),
                status: STATUS_ROP_CHANGED
            }
        );
    }

    #[test]
    fn ensure_pending_never_overwrites_a_terminal_row() {
        let store = store();
        store.ensure_pending("u1").unwrap();
        store.finalize_success("u1", "<Run/>", STATUS_OK).unwrap();
        store.ensure_pending("u1").unwrap();
        assert_eq!(store.get("u1").unwrap().unwrap().content, "<Run/>");
    }

    #[test]
    fn finalize_only_moves_pending_rows() {
        let store = store();
        store.finalize_success("gone", "<Run/>", STATUS_OK).unwrap();
        store.finalize_failed("gone", "late").unwrap();
        assert_eq!(store.get("gone").unwrap(), None);

        store.ensure_pending("u1").unwrap();
        store.finalize_success("u1", "<Run/>", STATUS_OK).unwrap();
        store.finalize_failed("u1", "late").unwrap();
        store.finalize_success("u1", "<Other/>", STATUS_ROP_CHANGED).unwrap();
        let record = store.get("u1").unwrap().unwrap();
        assert_eq!(record.content, "<Run/>");
        assert_eq!(record.status, STATUS_OK);
    }

    #[test]
    fn failure_is_prefixed_and_clearable() {
        let store = store();
        store.ensure_pending("u2").unwrap();
        store.finalize_failed("u2", "FSL1: too many points").unwrap();

        let record = store.get("u2").unwrap().unwrap();
        assert_eq!(record.status, STATUS_FAILED);
        assert_eq!(record.content, "FAILED | FSL1: too many points");
        assert_eq!(
            record.state(),
            RequestState::Failed {
                message: "FSL1: too many points".into()
            }
        );

        store.clear("u2").unwrap();
        assert_eq!(store.get("u2").unwrap(), None);
        store.clear("u2").unwrap();
    }

    #[test]
    fn rows_survive_reopen() {
        let path = temp_db("reopen");
        {
            let store = SqliteLifecycleStore::open(&path).unwrap();
            store.ensure_pending("u3").unwrap();
            store.finalize_success("u3", "<Run/>", STATUS_OK).unwrap();
        }
        let store = SqliteLifecycleStore::open(&path).unwrap();
        assert_eq!(store.get("u3").unwrap().unwrap().status, STATUS_OK);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn lock_contention_is_retried_then_reported() {
        let path = temp_db("locked");
        let store = SqliteLifecycleStore::open(&path)
            .unwrap()
            .with_busy_timeout(Duration::ZERO)
            .unwrap()
            .with_retry_policy(RetryPolicy {
                attempts: 3,
                base_delay: Duration::from_millis(1),
            });

        let holder = Connection::open(&path).unwrap();
        holder.execute_batch("BEGIN EXCLUSIVE;").unwrap();
        let err = store.ensure_pending("u4").unwrap_err();
        assert!(err.is_lock_contention(), "unexpected error: {err}");

        holder.execute_batch("COMMIT;").unwrap();
        store.ensure_pending("u4").unwrap();
        assert_eq!(store.get("u4").unwrap().unwrap().state(), RequestState::Pending);
        let _ = fs::remove_file(&path);
    }
}
