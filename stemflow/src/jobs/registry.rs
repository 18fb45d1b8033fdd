//! In-memory job registry.
//!
//! Single source of truth for job status. The map is sharded (`DashMap`) so
//! submissions, orchestrator writes and readers on different jobs never wait
//! on each other; a given job only ever has one writer, its orchestrator run.

use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::model::{JobMutation, JobParams, JobRecord};
use crate::{Error, Result};

struct JobEntry {
    record: JobRecord,
    cancel: CancellationToken,
}

/// Registry mapping job ids to their current state.
#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<String, JobEntry>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh, unguessable job id and store the job at `Queued`.
    pub fn create(&self, params: JobParams) -> String {
        let id = new_job_id();
        self.insert(JobRecord::new(id.clone(), params));
        id
    }

    /// Store a record under an id allocated by the caller with [`new_job_id`].
    pub fn insert(&self, record: JobRecord) {
        debug!(job_id = %record.id, "Registering job");
        self.jobs.insert(
            record.id.clone(),
            JobEntry {
                record,
                cancel: CancellationToken::new(),
            },
        );
    }

    /// Get a snapshot of a job.
    pub fn get(&self, job_id: &str) -> Result<JobRecord> {
        self.jobs
            .get(job_id)
            .map(|entry| entry.record.clone())
            .ok_or_else(|| Error::unknown_job(job_id))
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.jobs.contains_key(job_id)
    }

    /// Atomically apply a single mutation and return the updated snapshot.
    pub fn update(&self, job_id: &str, mutation: JobMutation) -> Result<JobRecord> {
        let mut entry = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::unknown_job(job_id))?;
        entry.record.apply(mutation)?;
        Ok(entry.record.clone())
    }

    /// Remove a job. Returns the last known record.
    pub fn remove(&self, job_id: &str) -> Option<JobRecord> {
        self.jobs.remove(job_id).map(|(_, entry)| {
            entry.cancel.cancel();
            entry.record
        })
    }

    /// Trip the job's cancellation token. The run observes it before its next stage.
    pub fn request_cancel(&self, job_id: &str) -> Result<JobRecord> {
        let entry = self
            .jobs
            .get(job_id)
            .ok_or_else(|| Error::unknown_job(job_id))?;
        if entry.record.status.is_terminal() {
            return Err(Error::InvalidStateTransition {
                from: entry.record.status.to_string(),
                to: "cancelled".to_string(),
            });
        }
        entry.cancel.cancel();
        Ok(entry.record.clone())
    }

    pub fn cancel_token(&self, job_id: &str) -> Result<CancellationToken> {
        self.jobs
            .get(job_id)
            .map(|entry| entry.cancel.clone())
            .ok_or_else(|| Error::unknown_job(job_id))
    }

    /// Ids of terminal jobs whose last update is older than `retention`.
    pub fn expired(&self, retention: Duration) -> Vec<String> {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return Vec::new();
        };
        let cutoff = Utc::now() - retention;

        self.jobs
            .iter()
            .filter(|entry| entry.record.status.is_terminal() && entry.record.updated_at <= cutoff)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Allocate an opaque job id (128 random bits).
pub fn new_job_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
