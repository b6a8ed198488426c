//! In-memory fakes for storage traits (testing and embedded use)
//!
//! Provides `MemoryBackupStore` and `MemoryRunJournal` that satisfy the
//! trait contracts without any external dependencies.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryBackupStore
// ---------------------------------------------------------------------------

/// In-memory backup store partitioned by `(device, source)` key.
///
/// Backed by a `DashMap`, so concurrent pipeline runs for different devices
/// never contend on a shared lock.
#[derive(Debug, Default)]
pub struct MemoryBackupStore {
    snapshots: DashMap<(String, SnapshotSource), DeviceSnapshot>,
}

impl MemoryBackupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BackupStore for MemoryBackupStore {
    async fn save(&self, snapshot: DeviceSnapshot) -> StorageResult<()> {
        self.snapshots
            .insert((snapshot.device.clone(), snapshot.source), snapshot);
        Ok(())
    }

    async fn latest(
        &self,
        device: &str,
        source: SnapshotSource,
    ) -> StorageResult<DeviceSnapshot> {
        self.snapshots
            .get(&(device.to_string(), source))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::SnapshotNotFound {
                device: device.to_string(),
                snapshot_source: source.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// MemoryRunJournal
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct JournalEntry {
    record: RunRecord,
    steps: Vec<StepRecord>,
}

/// In-memory run journal backed by a `HashMap<RunId, JournalEntry>`.
#[derive(Debug, Default)]
pub struct MemoryRunJournal {
    runs: Mutex<HashMap<String, JournalEntry>>,
}

impl MemoryRunJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_terminal(record: &RunRecord, run_id: &RunId) -> StorageResult<()> {
    if record.state.is_terminal() {
        return Err(StorageError::InvalidRunState {
            run_id: run_id.0.clone(),
            state: record.state.to_string(),
            expected: "non-terminal".to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl RunJournal for MemoryRunJournal {
    async fn create_run(&self, metadata: RunMetadata) -> StorageResult<RunId> {
        let run_id = RunId::new();
        let record = RunRecord {
            run_id: run_id.clone(),
            metadata,
            state: RunState::Accepted,
            result: None,
            failure: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        let mut runs = self.runs.lock().unwrap();
        runs.insert(
            run_id.0.clone(),
            JournalEntry {
                record,
                steps: Vec::new(),
            },
        );
        Ok(run_id)
    }

    async fn record_step(&self, run_id: &RunId, step: StepRecord) -> StorageResult<()> {
        let mut runs = self.runs.lock().unwrap();
        let entry = runs
            .get_mut(&run_id.0)
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })?;
        not_terminal(&entry.record, run_id)?;
        entry.steps.push(step);
        Ok(())
    }

    async fn advance_state(&self, run_id: &RunId, state: RunState) -> StorageResult<()> {
        if state.is_terminal() {
            return Err(StorageError::InvalidRunState {
                run_id: run_id.0.clone(),
                state: state.to_string(),
                expected: "non-terminal (use finalize_run)".to_string(),
            });
        }
        let mut runs = self.runs.lock().unwrap();
        let entry = runs
            .get_mut(&run_id.0)
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })?;
        not_terminal(&entry.record, run_id)?;
        entry.record.state = state;
        Ok(())
    }

    async fn finalize_run(
        &self,
        run_id: &RunId,
        state: RunState,
        result: TerminalResult,
        failure: Option<FailureDetail>,
    ) -> StorageResult<()> {
        if !state.is_terminal() {
            return Err(StorageError::InvalidRunState {
                run_id: run_id.0.clone(),
                state: state.to_string(),
                expected: "terminal".to_string(),
            });
        }
        let mut runs = self.runs.lock().unwrap();
        let entry = runs
            .get_mut(&run_id.0)
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })?;
        not_terminal(&entry.record, run_id)?;
        entry.record.state = state;
        entry.record.result = Some(result);
        entry.record.failure = failure;
        entry.record.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        let runs = self.runs.lock().unwrap();
        runs.get(&run_id.0)
            .map(|e| e.record.clone())
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })
    }

    async fn get_steps(&self, run_id: &RunId) -> StorageResult<Vec<StepRecord>> {
        let runs = self.runs.lock().unwrap();
        let entry = runs
            .get(&run_id.0)
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })?;
        let mut steps = entry.steps.clone();
        steps.sort_by_key(|s| s.seq);
        Ok(steps)
    }

    async fn list_runs(&self, device: Option<&str>) -> StorageResult<Vec<RunRecord>> {
        let runs = self.runs.lock().unwrap();
        let records: Vec<RunRecord> = runs
            .values()
            .filter(|e| device.map(|d| e.record.metadata.device == d).unwrap_or(true))
            .map(|e| e.record.clone())
            .collect();
        Ok(records)
    }

    async fn active_run_for(&self, device: &str) -> StorageResult<Option<RunRecord>> {
        let runs = self.runs.lock().unwrap();
        Ok(runs
            .values()
            .filter(|e| e.record.metadata.device == device)
            .find(|e| !e.record.state.is_terminal())
            .map(|e| e.record.clone()))
    }
}
