//! Job Submission Service.
//!
//! Validates a request, stores the uploaded media, registers the job and hands
//! it to the orchestrator without waiting for any stage.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::jobs::{JobParams, JobRecord, JobRegistry, StemCount, new_job_id};
use crate::pipeline::{Orchestrator, WorkDirAllocator};
use crate::utils::filename::upload_filename;
use crate::{Error, Result};

/// An uploaded media blob, only available for the lifetime of the request.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Bytes,
}

/// Raw submission parameters, validated by [`SubmissionService::submit`].
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    pub stem_count: i64,
    pub source_url: Option<String>,
    pub upload: Option<Upload>,
}

enum Source {
    Url(String),
    Upload(Upload),
}

/// Accepts new jobs.
pub struct SubmissionService {
    registry: Arc<JobRegistry>,
    orchestrator: Arc<Orchestrator>,
    workdirs: Arc<WorkDirAllocator>,
}

impl SubmissionService {
    pub fn new(
        registry: Arc<JobRegistry>,
        orchestrator: Arc<Orchestrator>,
        workdirs: Arc<WorkDirAllocator>,
    ) -> Self {
        Self {
            registry,
            orchestrator,
            workdirs,
        }
    }

    /// Validate and enqueue a job, returning its id.
    ///
    /// Validation errors are returned before anything is stored. The pipeline
    /// run is spawned; this call never waits on a stage.
    pub async fn submit(&self, request: SubmitRequest) -> Result<String> {
        let stem_count = StemCount::new(request.stem_count)?;
        let source = validate_source(request.source_url, request.upload)?;

        let job_id = new_job_id();
        let params = match source {
            Source::Url(url) => JobParams::from_url(stem_count, url),
            Source::Upload(upload) => {
                let path = match self.store_upload(&job_id, &upload).await {
                    Ok(path) => path,
                    Err(e) => {
                        warn!(job_id = %job_id, error = %e, "Failed to store upload");
                        let _ = self.workdirs.release(&job_id).await;
                        return Err(e);
                    }
                };
                JobParams::from_file(stem_count, path)
            }
        };

        info!(
            job_id = %job_id,
            stems = %stem_count,
            source = ?params.source,
            "Job submitted"
        );
        self.registry.insert(JobRecord::new(job_id.clone(), params));
        self.orchestrator.spawn(job_id.clone());

        Ok(job_id)
    }

    async fn store_upload(&self, job_id: &str, upload: &Upload) -> Result<std::path::PathBuf> {
        let dir = self.workdirs.allocate(job_id, "upload").await?;
        let path = dir.join(upload_filename(&upload.filename));
        tokio::fs::write(&path, &upload.bytes).await?;
        debug!(job_id, path = %path.display(), size = upload.bytes.len(), "Stored upload");
        Ok(path)
    }
}

/// Exactly one of URL and upload, with blank URLs treated as absent.
fn validate_source(url: Option<String>, upload: Option<Upload>) -> Result<Source> {
    let url = url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty());

    match (url, upload) {
        (Some(_), Some(_)) => Err(Error::invalid_parameter(
            "provide either a source URL or a file, not both",
        )),
        (None, None) => Err(Error::invalid_parameter(
            "provide either a source URL or a file",
        )),
        (Some(url), None) => {
            validate_url(&url)?;
            Ok(Source::Url(url))
        }
        (None, Some(upload)) => {
            if upload.filename.trim().is_empty() {
                return Err(Error::invalid_parameter("uploaded file has no filename"));
            }
            if upload.bytes.is_empty() {
                return Err(Error::invalid_parameter("uploaded file is empty"));
            }
            Ok(Source::Upload(upload))
        }
    }
}

fn validate_url(raw: &str) -> Result<()> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| Error::invalid_parameter(format!("invalid source URL '{}': {}", raw, e)))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(()),
        scheme => Err(Error::invalid_parameter(format!(
            "source URL must be http(s), got '{}'",
            scheme
        ))),
    }
}
