use serde::{Deserialize, Serialize};

use crate::jobs::{JobError, JobRecord, JobResult, JobStatus};

/// A job state change pushed to subscribers.
///
/// Every event carries the full state, so the attach-time snapshot and the
/// per-transition events share one shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: String,
    /// Registry revision this event reflects.
    pub revision: u64,
    pub status: JobStatus,
    pub result: Option<JobResult>,
    pub error: Option<JobError>,
}

impl JobEvent {
    /// Build an event from a registry snapshot.
    pub fn snapshot(record: &JobRecord) -> Self {
        Self {
            job_id: record.id.clone(),
            revision: record.revision,
            status: record.status,
            result: record.result.clone(),
            error: record.error.clone(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl From<&JobRecord> for JobEvent {
    fn from(record: &JobRecord) -> Self {
        Self::snapshot(record)
    }
}
