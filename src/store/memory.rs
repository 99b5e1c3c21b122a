//! In-memory store.

use super::{Claim, ExtractionStore, FileStore, RunStore};
use crate::error::StoreError;
use crate::model::{ExtractionRecord, FileRecord, Run, RunStatus};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// All three stores in process memory. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    runs: Mutex<HashMap<Uuid, Run>>,
    extractions: Mutex<HashMap<Uuid, ExtractionRecord>>,
    files: Mutex<HashMap<Uuid, FileRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    m.lock().map_err(|_| StoreError::LockPoisoned)
}

impl RunStore for MemoryStore {
    fn get_run(&self, run_id: Uuid) -> Result<Option<Run>, StoreError> {
        Ok(lock(&self.runs)?.get(&run_id).cloned())
    }

    fn save_run(&self, run: &Run) -> Result<(), StoreError> {
        lock(&self.runs)?.insert(run.run_id, run.clone());
        Ok(())
    }

    fn claim_run(&self, run_id: Uuid, started_at: DateTime<Utc>) -> Result<Claim, StoreError> {
        let mut runs = lock(&self.runs)?;
        let Some(run) = runs.get_mut(&run_id) else {
            return Ok(Claim::NotFound);
        };
        if run.status != RunStatus::Queued {
            return Ok(Claim::Unavailable(run.status));
        }
        run.status = RunStatus::Processing;
        run.started_at = Some(started_at);
        Ok(Claim::Claimed(run.clone()))
    }
}

impl ExtractionStore for MemoryStore {
    fn get_extraction(&self, run_id: Uuid) -> Result<Option<ExtractionRecord>, StoreError> {
        Ok(lock(&self.extractions)?.get(&run_id).cloned())
    }

    fn save_extraction(&self, record: &ExtractionRecord) -> Result<(), StoreError> {
        lock(&self.extractions)?.insert(record.run_id, record.clone());
        Ok(())
    }

    fn list_extractions(&self) -> Result<Vec<ExtractionRecord>, StoreError> {
        let mut all: Vec<ExtractionRecord> = lock(&self.extractions)?.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    fn delete_extraction(&self, run_id: Uuid) -> Result<bool, StoreError> {
        Ok(lock(&self.extractions)?.remove(&run_id).is_some())
    }
}

impl FileStore for MemoryStore {
    fn get_file(&self, file_id: Uuid) -> Result<Option<FileRecord>, StoreError> {
        Ok(lock(&self.files)?.get(&file_id).cloned())
    }

    fn save_file(&self, file: &FileRecord) -> Result<(), StoreError> {
        lock(&self.files)?.insert(file.file_id, file.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;

    #[test]
    fn runs() {
        let store = MemoryStore::new();
        contract::run_round_trip(&store);
        contract::claim_is_exclusive(&store);
    }

    #[test]
    fn extractions() {
        contract::extraction_crud(&MemoryStore::new());
    }

    #[test]
    fn files() {
        contract::file_round_trip(&MemoryStore::new());
    }

    #[test]
    fn concurrent_claims_have_one_winner() {
        use std::sync::Arc;

        let store = Arc::new(MemoryStore::new());
        let run = Run::queued(Uuid::new_v4());
        store.save_run(&run).unwrap();
        let run_id = run.run_id;

        let winners: usize = tokio_test::block_on(async {
            let mut handles = Vec::new();
            for _ in 0..8 {
                let store = Arc::clone(&store);
                handles.push(tokio::task::spawn_blocking(move || {
                    matches!(store.claim_run(run_id, Utc::now()), Ok(Claim::Claimed(_)))
                }));
            }
            let mut n = 0;
            for h in handles {
                if h.await.unwrap() {
                    n += 1;
                }
            }
            n
        });
        assert_eq!(winners, 1);
    }
}
