//! Persistence for runs, extraction records and uploaded-file metadata.
//!
//! Three small traits, one per table, so the orchestrator can depend on just
//! the runs and extractions while the service layer also needs files.
//! Two implementations ship:
//!
//! * [`SqliteStore`]: durable, one SQLite file (or in-memory database).
//! * [`MemoryStore`]: `HashMap`s behind a mutex, for tests and one-shot CLI
//!   runs that don't need history.
//!
//! Calls are synchronous. Both backends answer from local memory or a local
//! file, so a call never blocks long enough to matter to the runtime.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::StoreError;
use crate::model::{ExtractionRecord, FileRecord, Run, RunStatus};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Outcome of trying to claim a run for processing.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// The run was `QUEUED` and is now `PROCESSING`, owned by the caller.
    Claimed(Run),
    NotFound,
    /// The run exists but was not `QUEUED`; it carries the status seen.
    Unavailable(RunStatus),
}

pub trait RunStore: Send + Sync {
    fn get_run(&self, run_id: Uuid) -> Result<Option<Run>, StoreError>;

    /// Insert or replace a run.
    fn save_run(&self, run: &Run) -> Result<(), StoreError>;

    /// Atomically move a `QUEUED` run to `PROCESSING`, stamping `started_at`.
    ///
    /// At most one caller can ever get [`Claim::Claimed`] for a given run.
    fn claim_run(&self, run_id: Uuid, started_at: DateTime<Utc>) -> Result<Claim, StoreError>;
}

pub trait ExtractionStore: Send + Sync {
    fn get_extraction(&self, run_id: Uuid) -> Result<Option<ExtractionRecord>, StoreError>;

    /// Insert or replace the record for `record.run_id`.
    fn save_extraction(&self, record: &ExtractionRecord) -> Result<(), StoreError>;

    /// All records, newest first.
    fn list_extractions(&self) -> Result<Vec<ExtractionRecord>, StoreError>;

    /// Remove the record for `run_id`. Returns whether one existed.
    fn delete_extraction(&self, run_id: Uuid) -> Result<bool, StoreError>;
}

pub trait FileStore: Send + Sync {
    fn get_file(&self, file_id: Uuid) -> Result<Option<FileRecord>, StoreError>;

    fn save_file(&self, file: &FileRecord) -> Result<(), StoreError>;
}
