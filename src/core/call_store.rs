//! SQLite-backed record store for accounts and call records.
//!
//! The session id is the only correlation key between artifacts. Every
//! write that touches a call record goes through a single
//! `INSERT ... ON CONFLICT(session_id) DO UPDATE ... RETURNING` statement,
//! so two reconciliations of the same session (even from separate
//! connections) can never produce two rows or lose each other's fields.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row, ToSql};
use serde::Serialize;
use thiserror::Error;

use crate::domain::{Account, CallFacts, CallRecord};

/// How long a connection waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default page size for record listings
pub const DEFAULT_PAGE_SIZE: usize = 20;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    caller_id   TEXT NOT NULL UNIQUE,
    is_verified INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS call_records (
    id                           INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id                   TEXT NOT NULL UNIQUE,
    caller_id                    TEXT NOT NULL,
    account_id                   INTEGER REFERENCES accounts(id) ON DELETE SET NULL,
    wav_path                     TEXT,
    txt_path                     TEXT,
    conversation_path            TEXT,
    wav_size                     INTEGER,
    txt_size                     INTEGER,
    transfer_reasons             TEXT,
    transfer_reason_descriptions TEXT,
    created_at                   TEXT,
    last_reconciled_at           TEXT NOT NULL,
    revision                     INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_call_records_caller ON call_records(caller_id);
CREATE INDEX IF NOT EXISTS idx_call_records_created ON call_records(created_at);
"#;

const CALL_COLUMNS: &str = "id, session_id, caller_id, account_id, wav_path, txt_path, \
     conversation_path, wav_size, txt_size, transfer_reasons, transfer_reason_descriptions, \
     created_at, last_reconciled_at";

/// `revision` starts at 0 on insert and is bumped by every merge, which lets
/// one statement report whether it created the row.
const UPSERT_CALL: &str = r#"
INSERT INTO call_records (
    session_id, caller_id, account_id, wav_path, txt_path, conversation_path,
    wav_size, txt_size, transfer_reasons, transfer_reason_descriptions,
    created_at, last_reconciled_at, revision
)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0)
ON CONFLICT(session_id) DO UPDATE SET
    account_id                   = COALESCE(excluded.account_id, call_records.account_id),
    wav_path                     = COALESCE(excluded.wav_path, call_records.wav_path),
    txt_path                     = COALESCE(excluded.txt_path, call_records.txt_path),
    conversation_path            = COALESCE(excluded.conversation_path, call_records.conversation_path),
    wav_size                     = COALESCE(excluded.wav_size, call_records.wav_size),
    txt_size                     = COALESCE(excluded.txt_size, call_records.txt_size),
    transfer_reasons             = COALESCE(excluded.transfer_reasons, call_records.transfer_reasons),
    transfer_reason_descriptions = COALESCE(excluded.transfer_reason_descriptions, call_records.transfer_reason_descriptions),
    created_at                   = COALESCE(excluded.created_at, call_records.created_at),
    last_reconciled_at           = excluded.last_reconciled_at,
    revision                     = call_records.revision + 1
RETURNING id, session_id, caller_id, account_id, wav_path, txt_path,
    conversation_path, wav_size, txt_size, transfer_reasons, transfer_reason_descriptions,
    created_at, last_reconciled_at, revision
"#;

/// Errors from the record store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Account already exists: {0}")]
    AccountExists(String),

    #[error("Failed to create database directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Store connection lock poisoned")]
    Poisoned,
}

/// Filter for record listings
#[derive(Debug, Clone, Default)]
pub struct CallFilter {
    /// Only records owned by this account
    pub account_id: Option<i64>,

    /// Only records for this exact caller id
    pub caller_id: Option<String>,

    /// Case-insensitive substring over caller and session ids
    pub query: Option<String>,
}

/// One page of a record listing, newest first
#[derive(Debug, Clone, Serialize)]
pub struct CallPage {
    pub records: Vec<CallRecord>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
}

impl CallPage {
    /// Number of pages needed for `total` records
    pub fn num_pages(&self) -> usize {
        if self.per_page == 0 {
            return 0;
        }
        self.total.div_ceil(self.per_page)
    }
}

/// SQLite record store
pub struct CallStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl CallStore {
    /// Open (or create) the store at a file path
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::CreateDir(parent.to_path_buf(), e))?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Open a private in-memory store
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Database file backing this store (`None` when in memory)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    // ------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------

    /// Look up an account by caller id
    pub fn find_account(&self, caller_id: &str) -> Result<Option<Account>, StoreError> {
        let conn = self.conn()?;
        let account = conn
            .query_row(
                "SELECT id, caller_id, is_verified, created_at FROM accounts WHERE caller_id = ?1",
                params![caller_id],
                row_to_account,
            )
            .optional()?;
        Ok(account)
    }

    /// Register a new account. Fails if the caller id is taken.
    pub fn create_account(&self, caller_id: &str, is_verified: bool) -> Result<Account, StoreError> {
        let conn = self.conn()?;
        let inserted = conn.query_row(
            "INSERT INTO accounts (caller_id, is_verified, created_at) VALUES (?1, ?2, ?3)
             RETURNING id, caller_id, is_verified, created_at",
            params![caller_id, is_verified, format_ts(Utc::now())],
            row_to_account,
        );

        match inserted {
            Ok(account) => Ok(account),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(StoreError::AccountExists(caller_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Idempotently get-or-create an account with default fields.
    ///
    /// Returns the account and whether this call created it.
    pub fn ensure_account(&self, caller_id: &str) -> Result<(Account, bool), StoreError> {
        let conn = self.conn()?;
        let created = conn.execute(
            "INSERT INTO accounts (caller_id, is_verified, created_at) VALUES (?1, 0, ?2)
             ON CONFLICT(caller_id) DO NOTHING",
            params![caller_id, format_ts(Utc::now())],
        )? == 1;

        let account = conn.query_row(
            "SELECT id, caller_id, is_verified, created_at FROM accounts WHERE caller_id = ?1",
            params![caller_id],
            row_to_account,
        )?;
        Ok((account, created))
    }

    /// Caller ids of every registered account, sorted
    pub fn registered_caller_ids(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT caller_id FROM accounts ORDER BY caller_id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Give every ownerless record for `caller_id` to `account_id`.
    ///
    /// Returns the number of records attached.
    pub fn attach_orphans(&self, caller_id: &str, account_id: i64) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let attached = conn.execute(
            "UPDATE call_records SET account_id = ?1, last_reconciled_at = ?2
             WHERE caller_id = ?3 AND account_id IS NULL",
            params![account_id, format_ts(Utc::now()), caller_id],
        )?;
        Ok(attached)
    }

    // ------------------------------------------------------------------
    // Call records
    // ------------------------------------------------------------------

    /// Atomically insert or merge a call record keyed by session id.
    ///
    /// Only fields present in `facts` are written; absent fields keep
    /// their stored value. Returns the merged record and whether it was
    /// created by this call.
    pub fn upsert_call_record(&self, facts: &CallFacts) -> Result<(CallRecord, bool), StoreError> {
        let conn = self.conn()?;
        let (record, revision) = conn.query_row(
            UPSERT_CALL,
            params![
                facts.session_id,
                facts.caller_id,
                facts.account_id,
                facts.wav_path,
                facts.txt_path,
                facts.conversation_path,
                facts.wav_size.map(to_sql_size),
                facts.txt_size.map(to_sql_size),
                facts.transfer_reasons,
                facts.transfer_reason_descriptions,
                facts.created_at.map(format_ts),
                format_ts(Utc::now()),
            ],
            |row| Ok((row_to_record(row)?, row.get::<_, i64>(13)?)),
        )?;
        Ok((record, revision == 0))
    }

    /// Fetch a record by row id
    pub fn get_call_record(&self, id: i64) -> Result<Option<CallRecord>, StoreError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {CALL_COLUMNS} FROM call_records WHERE id = ?1");
        Ok(conn.query_row(&sql, params![id], row_to_record).optional()?)
    }

    /// Fetch a record by session id
    pub fn find_call_by_session(&self, session_id: &str) -> Result<Option<CallRecord>, StoreError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {CALL_COLUMNS} FROM call_records WHERE session_id = ?1");
        Ok(conn.query_row(&sql, params![session_id], row_to_record).optional()?)
    }

    /// Total number of call records
    pub fn count_call_records(&self) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM call_records", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// List records matching `filter`, newest first, one page at a time.
    ///
    /// `page` is 1-based. Records without a primary recording (and thus
    /// without `created_at`) sort after everything else.
    pub fn list_call_records(
        &self,
        filter: &CallFilter,
        page: usize,
        per_page: usize,
    ) -> Result<CallPage, StoreError> {
        let page = page.max(1);
        let per_page = if per_page == 0 { DEFAULT_PAGE_SIZE } else { per_page };

        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(account_id) = filter.account_id {
            clauses.push("account_id = ?");
            args.push(Box::new(account_id));
        }
        if let Some(caller_id) = &filter.caller_id {
            clauses.push("caller_id = ?");
            args.push(Box::new(caller_id.clone()));
        }
        if let Some(query) = filter.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            let pattern = format!("%{}%", escape_like(query));
            clauses.push(r"(caller_id LIKE ? ESCAPE '\' OR session_id LIKE ? ESCAPE '\')");
            args.push(Box::new(pattern.clone()));
            args.push(Box::new(pattern));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let conn = self.conn()?;

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM call_records{where_sql}"),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT {CALL_COLUMNS} FROM call_records{where_sql}
             ORDER BY created_at IS NULL, created_at DESC, id DESC
             LIMIT {per_page} OFFSET {offset}",
            offset = (page - 1) * per_page,
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(args.iter()), row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CallPage {
            records,
            total: total as usize,
            page,
            per_page,
        })
    }
}

/// Fixed-width UTC timestamps sort lexicographically in SQL
fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn to_sql_size(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn row_to_account(row: &Row<'_>) -> rusqlite::Result<Account> {
    let created_at: String = row.get(3)?;
    Ok(Account {
        id: row.get(0)?,
        caller_id: row.get(1)?,
        is_verified: row.get(2)?,
        created_at: parse_ts(3, &created_at)?,
    })
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<CallRecord> {
    let created_at: Option<String> = row.get(11)?;
    let last_reconciled_at: String = row.get(12)?;

    Ok(CallRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        caller_id: row.get(2)?,
        account_id: row.get(3)?,
        wav_path: row.get(4)?,
        txt_path: row.get(5)?,
        conversation_path: row.get(6)?,
        wav_size: row.get::<_, Option<i64>>(7)?.map(|v| v.max(0) as u64),
        txt_size: row.get::<_, Option<i64>>(8)?.map(|v| v.max(0) as u64),
        transfer_reasons: row.get(9)?,
        transfer_reason_descriptions: row.get(10)?,
        created_at: created_at.as_deref().map(|v| parse_ts(11, v)).transpose()?,
        last_reconciled_at: parse_ts(12, &last_reconciled_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ArtifactKind, TransferMetadata};
    use chrono::TimeZone;

    fn primary_facts(session: &str, caller: &str) -> CallFacts {
        let modified = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        CallFacts::new(session, caller, ArtifactKind::PrimaryRecording).with_primary(
            format!("{caller}/{caller}_{session}_full.wav"),
            1024,
            modified,
        )
    }

    #[test]
    fn test_upsert_creates_then_updates() {
        let store = CallStore::open_in_memory().unwrap();
        let facts = primary_facts("s1", "5551234");

        let (first, created) = store.upsert_call_record(&facts).unwrap();
        assert!(created);
        assert_eq!(first.wav_size, Some(1024));

        let (second, created) = store.upsert_call_record(&facts).unwrap();
        assert!(!created);
        assert_eq!(second.id, first.id);
        assert_eq!(store.count_call_records().unwrap(), 1);
    }

    #[test]
    fn test_merge_keeps_fields_absent_from_facts() {
        let store = CallStore::open_in_memory().unwrap();

        let conversation = CallFacts::new("s1", "5551234", ArtifactKind::ConversationRecording)
            .with_conversation("../5551234_s1/full_conversation.wav");
        let (partial, created) = store.upsert_call_record(&conversation).unwrap();
        assert!(created);
        assert!(partial.wav_path.is_none());
        assert!(partial.created_at.is_none());

        let metadata = TransferMetadata {
            transfer_reasons: "busy".to_string(),
            transfer_reason_descriptions: "caller busy".to_string(),
        };
        let primary = primary_facts("s1", "5551234").with_transcript(
            "5551234/5551234_s1_full.txt",
            10,
            Some(metadata),
        );
        let (merged, created) = store.upsert_call_record(&primary).unwrap();
        assert!(!created);
        assert_eq!(merged.conversation_path.as_deref(), Some("../5551234_s1/full_conversation.wav"));
        assert_eq!(merged.wav_path.as_deref(), Some("5551234/5551234_s1_full.wav"));
        assert_eq!(merged.transfer_reasons.as_deref(), Some("busy"));

        // A later conversation event must not blank the primary fields.
        let (again, _) = store.upsert_call_record(&conversation).unwrap();
        assert_eq!(again.wav_size, Some(1024));
        assert_eq!(again.txt_size, Some(10));
        assert_eq!(again.created_at, merged.created_at);
    }

    #[test]
    fn test_ensure_account_is_idempotent() {
        let store = CallStore::open_in_memory().unwrap();

        let (first, created) = store.ensure_account("5551234").unwrap();
        assert!(created);
        assert!(!first.is_verified);

        let (second, created) = store.ensure_account("5551234").unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn test_create_account_rejects_duplicate() {
        let store = CallStore::open_in_memory().unwrap();
        store.create_account("5551234", true).unwrap();

        let err = store.create_account("5551234", false).unwrap_err();
        assert!(matches!(err, StoreError::AccountExists(id) if id == "5551234"));
    }

    #[test]
    fn test_attach_orphans_only_touches_ownerless() {
        let store = CallStore::open_in_memory().unwrap();
        let other = store.create_account("5550000", false).unwrap();

        store.upsert_call_record(&primary_facts("s1", "5551234")).unwrap();
        store.upsert_call_record(&primary_facts("s2", "5551234")).unwrap();
        store
            .upsert_call_record(&primary_facts("s3", "5551234").with_account(other.id))
            .unwrap();

        let account = store.create_account("5551234", false).unwrap();
        assert_eq!(store.attach_orphans("5551234", account.id).unwrap(), 2);

        let s3 = store.find_call_by_session("s3").unwrap().unwrap();
        assert_eq!(s3.account_id, Some(other.id));
    }

    #[test]
    fn test_list_filters_orders_and_pages() {
        let store = CallStore::open_in_memory().unwrap();

        for day in 1..=5u32 {
            let modified = Utc.with_ymd_and_hms(2024, 3, day, 9, 0, 0).unwrap();
            let facts = CallFacts::new(format!("sess{day}"), "5551234", ArtifactKind::PrimaryRecording)
                .with_primary(format!("5551234/5551234_sess{day}_full.wav"), 1, modified);
            store.upsert_call_record(&facts).unwrap();
        }
        let orphan = CallFacts::new("orphan", "5559999", ArtifactKind::ConversationRecording)
            .with_conversation("../5559999_orphan/full_conversation.wav");
        store.upsert_call_record(&orphan).unwrap();

        let page = store.list_call_records(&CallFilter::default(), 1, 4).unwrap();
        assert_eq!(page.total, 6);
        assert_eq!(page.num_pages(), 2);
        let sessions: Vec<_> = page.records.iter().map(|r| r.session_id.as_str()).collect();
        assert_eq!(sessions, vec!["sess5", "sess4", "sess3", "sess2"]);

        let last = store.list_call_records(&CallFilter::default(), 2, 4).unwrap();
        assert_eq!(last.records.last().unwrap().session_id, "orphan");

        let filter = CallFilter {
            query: Some("SESS3".to_string()),
            ..Default::default()
        };
        let found = store.list_call_records(&filter, 1, 20).unwrap();
        assert_eq!(found.total, 1);
        assert_eq!(found.records[0].session_id, "sess3");

        let filter = CallFilter {
            caller_id: Some("5559999".to_string()),
            ..Default::default()
        };
        assert_eq!(store.list_call_records(&filter, 1, 20).unwrap().total, 1);
    }

    #[test]
    fn test_query_treats_wildcards_literally() {
        let store = CallStore::open_in_memory().unwrap();
        store.upsert_call_record(&primary_facts("abc", "5551234")).unwrap();

        let filter = CallFilter {
            query: Some("%".to_string()),
            ..Default::default()
        };
        assert_eq!(store.list_call_records(&filter, 1, 20).unwrap().total, 0);
    }
}
