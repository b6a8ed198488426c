//! Schema definitions for netsynapse SurrealDB tables
//!
//! Tables:
//! - pipeline_runs: one row per change-pipeline run
//! - run_steps: ordered step-outcome log, one row per recorded step

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage_traits::{
    FailureDetail, RunId, RunMetadata, RunRecord, RunState, StepFailure, StepName, StepRecord,
    StepStatus, TerminalResult,
};

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Module for serializing optional chrono DateTime to SurrealDB datetime format
mod surreal_datetime_opt {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(d) => {
                let sd = SurrealDatetime::from(*d);
                serde::Serialize::serialize(&Some(sd), serializer)
            }
            None => serde::Serialize::serialize(&None::<SurrealDatetime>, serializer),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = Option::<SurrealDatetime>::deserialize(deserializer)?;
        Ok(sd.map(DateTime::from))
    }
}

/// Pipeline run row stored in SurrealDB
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRow {
    /// SurrealDB record ID
    pub id: Option<surrealdb::sql::Thing>,
    /// Unique run ID (UUID string)
    pub run_id: String,
    /// Device identity (opaque hostname key)
    pub device: String,
    /// Device management address
    pub management_addr: String,
    /// Correlation identifier from the change request
    pub correlation_id: String,
    /// Arbitrary tags (JSON)
    pub tags: serde_json::Value,
    /// Current state of the run's state machine
    pub state: RunState,
    /// Terminal result (if terminal)
    pub result: Option<TerminalResult>,
    /// Failure detail (if the run left the happy path)
    pub failure: Option<FailureDetail>,
    /// Created timestamp
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    /// Completed timestamp (if terminal)
    #[serde(default, with = "surreal_datetime_opt")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunRow {
    /// Create a new run row in the `Accepted` state
    pub fn new(run_id: String, metadata: RunMetadata) -> Self {
        RunRow {
            id: None,
            run_id,
            device: metadata.device,
            management_addr: metadata.management_addr,
            correlation_id: metadata.correlation_id,
            tags: metadata.tags,
            state: RunState::Accepted,
            result: None,
            failure: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Move the row to a new non-terminal state
    pub fn advance(mut self, state: RunState) -> Self {
        self.state = state;
        self
    }

    /// Move the row to a terminal state
    pub fn finalize(
        mut self,
        state: RunState,
        result: TerminalResult,
        failure: Option<FailureDetail>,
    ) -> Self {
        self.state = state;
        self.result = Some(result);
        self.failure = failure;
        self.completed_at = Some(Utc::now());
        self
    }

    /// Convert the DB row into a `storage_traits::RunRecord`
    pub fn into_record(self) -> RunRecord {
        RunRecord {
            run_id: RunId(self.run_id),
            metadata: RunMetadata {
                device: self.device,
                management_addr: self.management_addr,
                correlation_id: self.correlation_id,
                tags: self.tags,
            },
            state: self.state,
            result: self.result,
            failure: self.failure,
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }
}

/// Step-outcome row - single entry in a run's step log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRow {
    /// SurrealDB record ID
    pub id: Option<surrealdb::sql::Thing>,
    /// Run ID this step belongs to
    pub run_id: String,
    /// Monotonic sequence number within the run (1-indexed)
    pub seq: u64,
    /// Which pipeline step this outcome belongs to
    pub step: StepName,
    /// Step outcome
    pub status: StepStatus,
    /// Failure classification and message (if failed)
    pub error: Option<StepFailure>,
    /// Step-specific payload (e.g. the hygiene report)
    pub detail: serde_json::Value,
    /// When the outcome was recorded
    #[serde(with = "surreal_datetime")]
    pub recorded_at: DateTime<Utc>,
}

impl StepRow {
    /// Create a row from a step record
    pub fn new(run_id: String, record: StepRecord) -> Self {
        StepRow {
            id: None,
            run_id,
            seq: record.seq,
            step: record.step,
            status: record.status,
            error: record.error,
            detail: record.detail,
            recorded_at: record.recorded_at,
        }
    }

    /// Convert the DB row into a `storage_traits::StepRecord`
    pub fn into_record(self) -> StepRecord {
        StepRecord {
            seq: self.seq,
            step: self.step,
            status: self.status,
            error: self.error,
            detail: self.detail,
            recorded_at: self.recorded_at,
        }
    }
}
