//! SurrealDB schema migrations and initialization
//!
//! Sets up the run journal tables with their indexes. Safe to call multiple
//! times (idempotent).

use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all netsynapse tables in SurrealDB
///
/// This should be called once on first connection to set up the schema.
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing netsynapse SurrealDB schema");

    init_pipeline_runs_table(db).await?;
    init_run_steps_table(db).await?;

    info!("netsynapse schema initialization complete");
    Ok(())
}

/// Initialize `pipeline_runs` table with constraints and indexes
///
/// Schema:
/// ```text
/// TABLE pipeline_runs {
///   run_id:          STRING (primary key, unique)
///   device:          STRING (indexed)
///   management_addr: STRING
///   correlation_id:  STRING (indexed)
///   tags:            OBJECT
///   state:           STRING (state-machine state)
///   result:          STRING? (succeeded | failed | rolled_back)
///   failure:         OBJECT?
///   created_at:      DATETIME (indexed)
///   completed_at:    DATETIME?
/// }
/// ```
///
/// Constraints:
/// - `run_id` is unique
/// - terminal-state immutability is enforced via app logic
/// - at-most-one non-terminal run per device is enforced via app logic
///   (the orchestrator's lease map plus the `active_run_for` query)
async fn init_pipeline_runs_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing pipeline_runs table");

    let sql = r#"
        DEFINE TABLE pipeline_runs AS
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update FULL
                FOR delete NONE;

        -- Ensure run_id is unique
        DEFINE INDEX idx_run_id ON TABLE pipeline_runs COLUMNS run_id UNIQUE;

        -- Index device for per-device history and the in-flight query
        DEFINE INDEX idx_device ON TABLE pipeline_runs COLUMNS device;

        -- Index correlation_id for caller-side idempotency lookups
        DEFINE INDEX idx_correlation_id ON TABLE pipeline_runs COLUMNS correlation_id;

        -- Index created_at for time-range queries
        DEFINE INDEX idx_created_at ON TABLE pipeline_runs COLUMNS created_at DESC;

        -- Composite index (device, state) for the active-run lookup
        DEFINE INDEX idx_device_state ON TABLE pipeline_runs COLUMNS device, state;
    "#;

    db.query(sql).await?;
    info!("✓ pipeline_runs table initialized");
    Ok(())
}

/// Initialize `run_steps` table with constraints and indexes
///
/// Schema:
/// ```text
/// TABLE run_steps {
///   run_id:      STRING (foreign key to pipeline_runs.run_id)
///   seq:         INT (monotonic sequence within run)
///   step:        STRING (pipeline step name)
///   status:      STRING (completed | failed | cancelled)
///   error:       OBJECT? (classification + message + attempts)
///   detail:      OBJECT (step payload)
///   recorded_at: DATETIME
/// }
/// ```
///
/// Constraints:
/// - `(run_id, seq)` is unique (prevents duplicate sequence numbers)
/// - rows are append-only; the step log is the audit trail
async fn init_run_steps_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing run_steps table");

    let sql = r#"
        DEFINE TABLE run_steps AS
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update NONE
                FOR delete NONE;

        -- Composite unique index: (run_id, seq) ensures no duplicate sequences per run
        DEFINE INDEX idx_run_id_seq ON TABLE run_steps COLUMNS run_id, seq UNIQUE;

        -- Index run_id for fast step retrieval by run
        DEFINE INDEX idx_run_id ON TABLE run_steps COLUMNS run_id;

        -- Index step name for filtering by pipeline step
        DEFINE INDEX idx_step ON TABLE run_steps COLUMNS step;
    "#;

    db.query(sql).await?;
    info!("✓ run_steps table initialized");
    Ok(())
}
