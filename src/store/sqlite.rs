//! SQLite-backed store.
//!
//! IDs are stored as hyphenated UUID text and timestamps as RFC 3339 text,
//! so the database stays readable with the `sqlite3` shell. Rows are read
//! into plain `*Row` structs first and converted afterwards, so a bad value
//! becomes [`StoreError::CorruptRecord`] instead of a rusqlite type error.
//! Timestamps always carry nine fractional digits so text order is time order.

use super::{Claim, ExtractionStore, FileStore, RunStore};
use crate::error::StoreError;
use crate::model::{ExtractionRecord, FileRecord, Run, RunStatus};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS files (
    file_id     TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    mime_type   TEXT NOT NULL,
    size        INTEGER NOT NULL,
    storage_uri TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS runs (
    run_id       TEXT PRIMARY KEY,
    file_id      TEXT NOT NULL,
    status       TEXT NOT NULL,
    started_at   TEXT,
    completed_at TEXT,
    error        TEXT
);
CREATE TABLE IF NOT EXISTS extractions (
    run_id         TEXT PRIMARY KEY,
    document_type  TEXT NOT NULL,
    result_json    TEXT NOT NULL,
    avg_confidence REAL NOT NULL,
    created_at     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_extractions_created ON extractions(created_at);
";

/// All three stores in one SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        debug!("Opening SQLite store at {}", path.display());
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

// ── Row mapping ──────────────────────────────────────────────────────────

fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(table: &'static str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRecord {
            table,
            detail: format!("bad timestamp '{raw}': {e}"),
        })
}

fn parse_id(table: &'static str, raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| StoreError::CorruptRecord {
        table,
        detail: format!("bad id '{raw}': {e}"),
    })
}

struct RunRow {
    run_id: String,
    file_id: String,
    status: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    error: Option<String>,
}

impl RunRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: row.get(0)?,
            file_id: row.get(1)?,
            status: row.get(2)?,
            started_at: row.get(3)?,
            completed_at: row.get(4)?,
            error: row.get(5)?,
        })
    }
}

fn run_from_row(row: RunRow) -> Result<Run, StoreError> {
    const T: &str = "runs";
    let status: RunStatus = row
        .status
        .parse()
        .map_err(|detail| StoreError::CorruptRecord { table: T, detail })?;
    Ok(Run {
        run_id: parse_id(T, &row.run_id)?,
        file_id: parse_id(T, &row.file_id)?,
        status,
        started_at: row.started_at.as_deref().map(|s| parse_ts(T, s)).transpose()?,
        completed_at: row.completed_at.as_deref().map(|s| parse_ts(T, s)).transpose()?,
        error: row.error,
    })
}

struct ExtractionRow {
    run_id: String,
    document_type: String,
    result_json: String,
    avg_confidence: f64,
    created_at: String,
}

impl ExtractionRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: row.get(0)?,
            document_type: row.get(1)?,
            result_json: row.get(2)?,
            avg_confidence: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

fn extraction_from_row(row: ExtractionRow) -> Result<ExtractionRecord, StoreError> {
    const T: &str = "extractions";
    Ok(ExtractionRecord {
        run_id: parse_id(T, &row.run_id)?,
        document_type: row.document_type,
        result_json: row.result_json,
        avg_confidence: row.avg_confidence,
        created_at: parse_ts(T, &row.created_at)?,
    })
}

struct FileRow {
    file_id: String,
    name: String,
    mime_type: String,
    size: i64,
    storage_uri: String,
    created_at: String,
}

impl FileRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            file_id: row.get(0)?,
            name: row.get(1)?,
            mime_type: row.get(2)?,
            size: row.get(3)?,
            storage_uri: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

fn file_from_row(row: FileRow) -> Result<FileRecord, StoreError> {
    const T: &str = "files";
    Ok(FileRecord {
        file_id: parse_id(T, &row.file_id)?,
        name: row.name,
        mime_type: row.mime_type,
        size: u64::try_from(row.size).map_err(|_| StoreError::CorruptRecord {
            table: T,
            detail: format!("negative size {}", row.size),
        })?,
        storage_uri: row.storage_uri,
        created_at: parse_ts(T, &row.created_at)?,
    })
}

const RUN_COLUMNS: &str = "run_id, file_id, status, started_at, completed_at, error";
const EXTRACTION_COLUMNS: &str = "run_id, document_type, result_json, avg_confidence, created_at";

fn select_run(conn: &Connection, run_id: Uuid) -> Result<Option<Run>, StoreError> {
    conn.query_row(
        &format!("SELECT {RUN_COLUMNS} FROM runs WHERE run_id = ?1"),
        params![run_id.to_string()],
        RunRow::read,
    )
    .optional()?
    .map(run_from_row)
    .transpose()
}

// ── Trait impls ──────────────────────────────────────────────────────────

impl RunStore for SqliteStore {
    fn get_run(&self, run_id: Uuid) -> Result<Option<Run>, StoreError> {
        select_run(&*self.conn()?, run_id)
    }

    fn save_run(&self, run: &Run) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO runs (run_id, file_id, status, started_at, completed_at, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(run_id) DO UPDATE SET
                file_id = excluded.file_id,
                status = excluded.status,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                error = excluded.error",
            params![
                run.run_id.to_string(),
                run.file_id.to_string(),
                run.status.as_str(),
                run.started_at.as_ref().map(ts),
                run.completed_at.as_ref().map(ts),
                run.error,
            ],
        )?;
        Ok(())
    }

    fn claim_run(&self, run_id: Uuid, started_at: DateTime<Utc>) -> Result<Claim, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE runs SET status = ?1, started_at = ?2 WHERE run_id = ?3 AND status = ?4",
            params![
                RunStatus::Processing.as_str(),
                ts(&started_at),
                run_id.to_string(),
                RunStatus::Queued.as_str(),
            ],
        )?;

        let Some(run) = select_run(&conn, run_id)? else {
            return Ok(Claim::NotFound);
        };
        Ok(if changed == 1 {
            Claim::Claimed(run)
        } else {
            Claim::Unavailable(run.status)
        })
    }
}

impl ExtractionStore for SqliteStore {
    fn get_extraction(&self, run_id: Uuid) -> Result<Option<ExtractionRecord>, StoreError> {
        self.conn()?
            .query_row(
                &format!("SELECT {EXTRACTION_COLUMNS} FROM extractions WHERE run_id = ?1"),
                params![run_id.to_string()],
                ExtractionRow::read,
            )
            .optional()?
            .map(extraction_from_row)
            .transpose()
    }

    fn save_extraction(&self, record: &ExtractionRecord) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO extractions (run_id, document_type, result_json, avg_confidence, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(run_id) DO UPDATE SET
                document_type = excluded.document_type,
                result_json = excluded.result_json,
                avg_confidence = excluded.avg_confidence,
                created_at = excluded.created_at",
            params![
                record.run_id.to_string(),
                record.document_type,
                record.result_json,
                record.avg_confidence,
                ts(&record.created_at),
            ],
        )?;
        Ok(())
    }

    fn list_extractions(&self) -> Result<Vec<ExtractionRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EXTRACTION_COLUMNS} FROM extractions ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map([], ExtractionRow::read)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(extraction_from_row(row?)?);
        }
        Ok(records)
    }

    fn delete_extraction(&self, run_id: Uuid) -> Result<bool, StoreError> {
        let removed = self
            .conn()?
            .execute("DELETE FROM extractions WHERE run_id = ?1", params![run_id.to_string()])?;
        Ok(removed > 0)
    }
}

impl FileStore for SqliteStore {
    fn get_file(&self, file_id: Uuid) -> Result<Option<FileRecord>, StoreError> {
        self.conn()?
            .query_row(
                "SELECT file_id, name, mime_type, size, storage_uri, created_at FROM files WHERE file_id = ?1",
                params![file_id.to_string()],
                FileRow::read,
            )
            .optional()?
            .map(file_from_row)
            .transpose()
    }

    fn save_file(&self, file: &FileRecord) -> Result<(), StoreError> {
        let size = i64::try_from(file.size).map_err(|_| StoreError::CorruptRecord {
            table: "files",
            detail: format!("size {} exceeds storage range", file.size),
        })?;
        self.conn()?.execute(
            "INSERT INTO files (file_id, name, mime_type, size, storage_uri, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(file_id) DO UPDATE SET
                name = excluded.name,
                mime_type = excluded.mime_type,
                size = excluded.size,
                storage_uri = excluded.storage_uri",
            params![
                file.file_id.to_string(),
                file.name,
                file.mime_type,
                size,
                file.storage_uri,
                ts(&file.created_at),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;

    #[test]
    fn runs() {
        let store = SqliteStore::open_in_memory().unwrap();
        contract::run_round_trip(&store);
        contract::claim_is_exclusive(&store);
    }

    #[test]
    fn extractions() {
        contract::extraction_crud(&SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn files() {
        contract::file_round_trip(&SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn reopening_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("runs.db");
        let mut run = Run::queued(Uuid::new_v4());
        run.begin(Utc::now()).unwrap();
        run.fail(Utc::now(), "Tesseract OCR failed: x").unwrap();

        SqliteStore::open(&db).unwrap().save_run(&run).unwrap();
        let reopened = SqliteStore::open(&db).unwrap();
        assert_eq!(reopened.get_run(run.run_id).unwrap(), Some(run));
    }

    #[test]
    fn corrupt_status_is_reported() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        store
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO runs (run_id, file_id, status) VALUES (?1, ?2, 'DONE')",
                params![id.to_string(), Uuid::new_v4().to_string()],
            )
            .unwrap();
        let err = store.get_run(id).unwrap_err();
        assert!(matches!(err, StoreError::CorruptRecord { table: "runs", .. }), "got: {err}");
    }
}
