//! SurrealDB-backed RunJournal implementation
//!
//! Uses `schema::RunRow` and `schema::StepRow` for persistence, converting
//! to/from `storage_traits` types at the boundary.

use async_trait::async_trait;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::{StateError, StorageError};
use crate::migrations;
use crate::schema::{RunRow, StepRow};
use crate::storage_traits::{
    FailureDetail, RunId, RunJournal, RunMetadata, RunRecord, RunState, StepRecord, StorageResult,
    TerminalResult,
};

/// SurrealDB-backed implementation of [`RunJournal`].
///
/// This is the durable journal: a run interrupted by a crash can be resumed
/// by reading its row, inspecting the last recorded step, and re-entering
/// the state machine at the recorded state.
pub struct SurrealRunJournal {
    db: Surreal<Any>,
}

impl SurrealRunJournal {
    /// Create an in-memory instance for testing.
    ///
    /// Connects to `mem://`, selects `synapse/main`, and runs `init_schema`.
    pub async fn in_memory() -> crate::Result<Self> {
        let db = surrealdb::engine::any::connect("mem://")
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        db.use_ns("synapse")
            .use_db("main")
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;

        info!("SurrealRunJournal connected (in-memory)");
        Ok(Self { db })
    }

    /// Create from environment.
    ///
    /// Honors `SURREALDB_URL` when set; otherwise falls back to local
    /// persistence under `.synapse/db`.
    pub async fn from_env() -> crate::Result<Self> {
        if let Ok(url) = std::env::var("SURREALDB_URL") {
            let db = surrealdb::engine::any::connect(&url)
                .await
                .map_err(|e| StateError::Connection(e.to_string()))?;

            db.use_ns("synapse")
                .use_db("main")
                .await
                .map_err(|e| StateError::Connection(e.to_string()))?;

            migrations::init_schema(&db).await?;
            info!("SurrealRunJournal connected ({})", url);
            return Ok(Self { db });
        }

        // Default to local persistence in .synapse/db
        let path = ".synapse/db";
        std::fs::create_dir_all(path).map_err(|e| {
            StateError::Connection(format!(
                "Failed to create database directory {}: {}",
                path, e
            ))
        })?;
        let url = format!("surrealkv://{}", path);
        info!(
            "No SURREALDB_URL found, using local persistence: {}",
            url
        );

        let db = surrealdb::engine::any::connect(&url)
            .await
            .map_err(|e| StateError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

        db.use_ns("synapse")
            .use_db("main")
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        Ok(Self { db })
    }

    // -- private helpers -----------------------------------------------------

    /// Fetch a run row by ID, returning the DB row or RunNotFound.
    async fn fetch_run(&self, rid: &str) -> StorageResult<RunRow> {
        let rid_owned = rid.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM pipeline_runs WHERE run_id = $rid")
            .bind(("rid", rid_owned))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<RunRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter()
            .next()
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: rid.to_string(),
            })
    }

    /// Fetch a run row and verify it has not reached a terminal state.
    async fn fetch_active(&self, rid: &str) -> StorageResult<RunRow> {
        let row = self.fetch_run(rid).await?;
        if row.state.is_terminal() {
            return Err(StorageError::InvalidRunState {
                run_id: rid.to_string(),
                state: row.state.to_string(),
                expected: "non-terminal".to_string(),
            });
        }
        Ok(row)
    }

    async fn update_row(&self, rid: &str, row: RunRow) -> StorageResult<()> {
        let rid_owned = rid.to_string();
        self.db
            .query("UPDATE pipeline_runs CONTENT $row WHERE run_id = $rid")
            .bind(("row", row))
            .bind(("rid", rid_owned))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl RunJournal for SurrealRunJournal {
    async fn create_run(&self, metadata: RunMetadata) -> StorageResult<RunId> {
        let run_id = RunId::new();
        let row = RunRow::new(run_id.0.clone(), metadata);

        debug!(run_id = %run_id, "creating pipeline run");

        let _created: Option<RunRow> = self
            .db
            .create("pipeline_runs")
            .content(row)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(run_id)
    }

    async fn record_step(&self, run_id: &RunId, step: StepRecord) -> StorageResult<()> {
        self.fetch_active(&run_id.0).await?;

        let row = StepRow::new(run_id.0.clone(), step);

        let _created: Option<StepRow> = self
            .db
            .create("run_steps")
            .content(row)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

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
        let row = self.fetch_active(&run_id.0).await?;
        self.update_row(&run_id.0, row.advance(state)).await
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
        let row = self.fetch_active(&run_id.0).await?;
        self.update_row(&run_id.0, row.finalize(state, result, failure))
            .await
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        let row = self.fetch_run(&run_id.0).await?;
        Ok(row.into_record())
    }

    async fn get_steps(&self, run_id: &RunId) -> StorageResult<Vec<StepRecord>> {
        // Verify run exists
        self.fetch_run(&run_id.0).await?;

        let rid_owned = run_id.0.clone();
        let mut res = self
            .db
            .query("SELECT * FROM run_steps WHERE run_id = $rid ORDER BY seq ASC")
            .bind(("rid", rid_owned))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<StepRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(rows.into_iter().map(StepRow::into_record).collect())
    }

    async fn list_runs(&self, device: Option<&str>) -> StorageResult<Vec<RunRecord>> {
        let rows: Vec<RunRow> = if let Some(device) = device {
            let dev = device.to_string();
            let mut res = self
                .db
                .query("SELECT * FROM pipeline_runs WHERE device = $dev ORDER BY created_at DESC")
                .bind(("dev", dev))
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            res.take(0)
                .map_err(|e| StorageError::Backend(e.to_string()))?
        } else {
            let mut res = self
                .db
                .query("SELECT * FROM pipeline_runs ORDER BY created_at DESC")
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            res.take(0)
                .map_err(|e| StorageError::Backend(e.to_string()))?
        };

        Ok(rows.into_iter().map(RunRow::into_record).collect())
    }

    async fn active_run_for(&self, device: &str) -> StorageResult<Option<RunRecord>> {
        let dev = device.to_string();
        let mut res = self
            .db
            .query(
                "SELECT * FROM pipeline_runs \
                 WHERE device = $dev AND state NOT IN ['succeeded', 'failed', 'rolled-back']",
            )
            .bind(("dev", dev))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<RunRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(rows.into_iter().next().map(RunRow::into_record))
    }
}
