//! Pipeline orchestrator.
//!
//! One run drives one job through its stages:
//!
//! ```text
//! Queued -> Downloading ------\
//! Queued -> ConvertingMedia ---+-> ExtractingStems -> DetectingKey
//! Queued ---------------------/      -> [ExtractingChords] -> [ExtractingMelody]
//!                                    -> Archiving -> Done
//! any non-terminal -> Failed
//! ```
//!
//! Every transition is written to the registry before it is published, so a
//! client that polls right after a push never reads older state.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::instrumental::{VOCALS_STEM, build_instrumental};
use super::stages::{ReportContent, StageResult, StageSet, WorkDirAllocator};
use crate::error::{FailureKind, StageError};
use crate::jobs::{
    JobError, JobMutation, JobParams, JobRegistry, JobResult, JobSource, JobStatus,
};
use crate::notify::{JobEvent, NotificationHub};

/// Container extensions routed through media conversion.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "avi", "webm", "flv", "m4v"];

/// Orchestrator tuning.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    /// Wall clock limit per stage. Zero disables the limit.
    pub stage_timeout: Duration,
}

/// Whether a local file needs conversion before separation.
pub fn is_video_container(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            VIDEO_EXTENSIONS
                .iter()
                .any(|video| video.eq_ignore_ascii_case(ext))
        })
}

/// Drives jobs through the stage pipeline.
pub struct Orchestrator {
    registry: Arc<JobRegistry>,
    hub: Arc<NotificationHub>,
    stages: StageSet,
    workdirs: Arc<WorkDirAllocator>,
    config: OrchestratorConfig,
    /// Jobs with a run in progress.
    active: DashSet<String>,
}

/// Removes the job from the active set when the run ends, panics included.
struct ActiveGuard<'a> {
    active: &'a DashSet<String>,
    job_id: &'a str,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.remove(self.job_id);
    }
}

impl Orchestrator {
    pub fn new(
        registry: Arc<JobRegistry>,
        hub: Arc<NotificationHub>,
        stages: StageSet,
        workdirs: Arc<WorkDirAllocator>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            hub,
            stages,
            workdirs,
            config,
            active: DashSet::new(),
        }
    }

    /// Start a run in the background and return immediately.
    ///
    /// The run is supervised: if it panics the job is marked `Failed` with
    /// kind `internal` instead of staying in its last stage.
    pub fn spawn(self: &Arc<Self>, job_id: impl Into<String>) -> JoinHandle<()> {
        let job_id = job_id.into();
        let this = Arc::clone(self);

        tokio::spawn(async move {
            let run = {
                let this = Arc::clone(&this);
                let job_id = job_id.clone();
                tokio::spawn(async move { this.run(&job_id).await })
            };

            if let Err(e) = run.await {
                error!(job_id = %job_id, error = %e, "Pipeline run aborted");
                let message = if e.is_panic() {
                    "pipeline run panicked"
                } else {
                    "pipeline run was aborted"
                };
                this.finish_failed(&job_id, JobError::new(FailureKind::Internal, message))
                    .await;
            }
        })
    }

    /// Run a queued job to completion. Errors are recorded on the job.
    pub async fn run(&self, job_id: &str) {
        if !self.active.insert(job_id.to_string()) {
            warn!(job_id, "Pipeline run already in progress, ignoring");
            return;
        }
        let _guard = ActiveGuard {
            active: &self.active,
            job_id,
        };

        let (params, cancel) = match (self.registry.get(job_id), self.registry.cancel_token(job_id))
        {
            (Ok(record), Ok(cancel)) if record.status == JobStatus::Queued => {
                (record.params, cancel)
            }
            (Ok(record), Ok(_)) => {
                warn!(job_id, status = %record.status, "Job is not queued, not running");
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(job_id, error = %e, "Cannot start pipeline run");
                return;
            }
        };

        info!(job_id, stems = %params.stem_count, "Pipeline run started");
        let started = std::time::Instant::now();

        match self.execute(job_id, &params, &cancel).await {
            Ok(result) => {
                self.finish_done(job_id, result).await;
                info!(
                    job_id,
                    elapsed_secs = started.elapsed().as_secs_f64(),
                    "Pipeline run completed"
                );
            }
            Err(err) => {
                match err.kind {
                    FailureKind::Cancelled => info!(job_id, "Pipeline run cancelled"),
                    kind => error!(job_id, kind = %kind, error = %err.message, "Pipeline run failed"),
                }
                self.finish_failed(job_id, err).await;
            }
        }
    }

    async fn execute(
        &self,
        job_id: &str,
        params: &JobParams,
        cancel: &CancellationToken,
    ) -> Result<JobResult, JobError> {
        let stages = &self.stages;

        let audio = match &params.source {
            JobSource::Url(url) => {
                self.transition(job_id, JobStatus::Downloading, cancel).await?;
                let dir = self.allocate(job_id, "download").await?;
                self.stage(FailureKind::Download, cancel, stages.downloader.download(url, &dir))
                    .await?
            }
            JobSource::File(path) if is_video_container(path) => {
                self.transition(job_id, JobStatus::ConvertingMedia, cancel)
                    .await?;
                let dir = self.allocate(job_id, "convert").await?;
                self.stage(
                    FailureKind::Conversion,
                    cancel,
                    stages.converter.convert(path, &dir),
                )
                .await?
            }
            JobSource::File(path) => path.clone(),
        };

        self.transition(job_id, JobStatus::ExtractingStems, cancel)
            .await?;
        let dir = self.allocate(job_id, "stems").await?;
        let folder = self
            .stage(
                FailureKind::Separation,
                cancel,
                stages.separator.separate(&audio, params.stem_count, &dir),
            )
            .await?;

        self.transition(job_id, JobStatus::DetectingKey, cancel).await?;
        let instrumental = self
            .stage(
                FailureKind::Io,
                cancel,
                build_instrumental(&folder, params.stem_count, stages.combiner.as_ref()),
            )
            .await?;
        let key = self
            .stage(
                FailureKind::Analysis,
                cancel,
                stages.key_detector.detect_key(&instrumental),
            )
            .await?;
        debug!(job_id, key = %key, "Key detected");

        let chords = match &stages.chord_extractor {
            Some(extractor) => {
                self.transition(job_id, JobStatus::ExtractingChords, cancel)
                    .await?;
                let chords = contained(
                    FailureKind::Analysis,
                    self.stage(
                        FailureKind::Analysis,
                        cancel,
                        extractor.extract_chords(&instrumental),
                    ),
                );
                optional(job_id, "chords", chords.await)?
            }
            None => None,
        };

        let melody = match &stages.melody_extractor {
            Some(extractor) => {
                self.transition(job_id, JobStatus::ExtractingMelody, cancel)
                    .await?;
                let vocals = folder.join(VOCALS_STEM);
                let melody = contained(
                    FailureKind::Analysis,
                    self.stage(
                        FailureKind::Analysis,
                        cancel,
                        extractor.extract_melody(&vocals),
                    ),
                );
                optional(job_id, "melody", melody.await)?
            }
            None => None,
        };

        self.transition(job_id, JobStatus::Archiving, cancel).await?;

        // Written into the stems folder so the archive carries it too.
        let report = match &stages.report_writer {
            Some(writer) => {
                let content = ReportContent {
                    key: &key,
                    chords: chords.as_deref(),
                    melody: melody.as_deref(),
                };
                let report = contained(
                    FailureKind::Io,
                    self.stage(FailureKind::Io, cancel, writer.write_report(content, &folder)),
                );
                optional(job_id, "report", report.await)?
            }
            None => None,
        };

        let dir = self.allocate(job_id, "archive").await?;
        let stems_archive = self
            .stage(FailureKind::Io, cancel, stages.archiver.archive(&folder, &dir))
            .await?;

        Ok(JobResult {
            key,
            chords,
            melody,
            stems_archive,
            report,
        })
    }

    /// Cancellation checkpoint, then registry write, then publish.
    async fn transition(
        &self,
        job_id: &str,
        status: JobStatus,
        cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        let record = self
            .registry
            .update(job_id, JobMutation::Status(status))
            .map_err(|e| JobError::new(FailureKind::Internal, e.to_string()))?;
        info!(job_id, status = %status, "Job status changed");
        self.hub.publish(JobEvent::snapshot(&record)).await;
        Ok(())
    }

    /// Await one stage call under the stage timeout and the job's cancellation.
    async fn stage<T, F>(
        &self,
        kind: FailureKind,
        cancel: &CancellationToken,
        call: F,
    ) -> Result<T, JobError>
    where
        F: Future<Output = StageResult<T>>,
    {
        let limit = self.config.stage_timeout;
        let timed = async {
            if limit.is_zero() {
                return call.await;
            }
            match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(StageError::with_kind(
                    kind,
                    format!("timed out after {:?}", limit),
                )),
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(cancelled()),
            result = timed => result.map_err(|e| JobError::new(e.kind(), e.to_string())),
        }
    }

    async fn allocate(&self, job_id: &str, label: &str) -> Result<PathBuf, JobError> {
        self.workdirs.allocate(job_id, label).await.map_err(|e| {
            JobError::new(
                FailureKind::Io,
                format!("failed to create working directory: {}", e),
            )
        })
    }

    async fn finish_done(&self, job_id: &str, result: JobResult) {
        match self.registry.update(job_id, JobMutation::Complete(result)) {
            Ok(record) => self.hub.publish(JobEvent::snapshot(&record)).await,
            Err(e) => warn!(job_id, error = %e, "Could not record job completion"),
        }
    }

    async fn finish_failed(&self, job_id: &str, err: JobError) {
        match self.registry.update(job_id, JobMutation::Fail(err)) {
            Ok(record) => self.hub.publish(JobEvent::snapshot(&record)).await,
            Err(e) => warn!(job_id, error = %e, "Could not record job failure"),
        }
    }
}

fn cancelled() -> JobError {
    JobError::new(FailureKind::Cancelled, "job was cancelled")
}

/// Await an optional stage, turning a panic inside it into a failure of `kind`.
async fn contained<T, F>(kind: FailureKind, call: F) -> Result<T, JobError>
where
    F: Future<Output = Result<T, JobError>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => Err(JobError::new(
            kind,
            format!("stage panicked: {}", panic_message(panic.as_ref())),
        )),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Degrade an optional stage failure to a missing field. Cancellation still stops the run.
fn optional<T>(job_id: &str, field: &str, outcome: Result<T, JobError>) -> Result<Option<T>, JobError> {
    match outcome {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.kind == FailureKind::Cancelled => Err(err),
        Err(err) => {
            warn!(job_id, field, error = %err.message, "Optional stage failed, omitting result field");
            Ok(None)
        }
    }
}
