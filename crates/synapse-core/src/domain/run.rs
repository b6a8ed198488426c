//! Pipeline run aggregate view.

use serde::{Deserialize, Serialize};
use synapse_state::{RunRecord, StepName, StepRecord, StepStatus};

use crate::hygiene::HygieneReport;

/// The aggregate record of one change request's progress through the state
/// machine: the persisted run record plus its ordered step-outcome log.
///
/// Assembled from the journal on demand; retained there for audit after
/// completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub record: RunRecord,
    pub steps: Vec<StepRecord>,
}

impl PipelineRun {
    pub fn new(record: RunRecord, steps: Vec<StepRecord>) -> Self {
        Self { record, steps }
    }

    /// Whether the run has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.record.state.is_terminal()
    }

    /// Step names in recorded order.
    pub fn step_names(&self) -> Vec<StepName> {
        self.steps.iter().map(|s| s.step).collect()
    }

    /// The recorded outcome for a given step, if any.
    pub fn step(&self, name: StepName) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.step == name)
    }

    /// The hygiene report recorded at the gate step, if the run got there.
    pub fn hygiene_report(&self) -> Option<HygieneReport> {
        self.step(StepName::HygieneGate)
            .and_then(|s| serde_json::from_value(s.detail.clone()).ok())
    }

    /// The last failed step, if any.
    pub fn last_failure(&self) -> Option<&StepRecord> {
        self.steps
            .iter()
            .rev()
            .find(|s| s.status == StepStatus::Failed)
    }
}
