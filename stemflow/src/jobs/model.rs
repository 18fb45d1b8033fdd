//! Job data model.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FailureKind;
use crate::{Error, Result};

/// Job status.
///
/// Statuses are ordered by pipeline position; a job only ever moves forward,
/// except for the absorbing transition to `Failed`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    /// Job is registered and waiting for its run to start.
    Queued,
    Downloading,
    ConvertingMedia,
    ExtractingStems,
    DetectingKey,
    ExtractingChords,
    ExtractingMelody,
    Archiving,
    /// Job completed successfully.
    Done,
    /// Job failed.
    Failed,
}

impl JobStatus {
    /// Whether no further transition is allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Position in the pipeline order. `Failed` has no position.
    pub fn stage_index(&self) -> Option<u8> {
        match self {
            Self::Queued => Some(0),
            Self::Downloading => Some(1),
            Self::ConvertingMedia => Some(2),
            Self::ExtractingStems => Some(3),
            Self::DetectingKey => Some(4),
            Self::ExtractingChords => Some(5),
            Self::ExtractingMelody => Some(6),
            Self::Archiving => Some(7),
            Self::Done => Some(8),
            Self::Failed => None,
        }
    }

    /// Check a transition against the pipeline state machine.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Self::Failed {
            return true;
        }

        // Downloading and ConvertingMedia are alternative prefixes: neither may follow the other.
        if matches!(
            (self, next),
            (Self::Downloading, Self::ConvertingMedia) | (Self::ConvertingMedia, Self::Downloading)
        ) {
            return false;
        }

        match (self.stage_index(), next.stage_index()) {
            (Some(current), Some(next)) => next > current,
            _ => false,
        }
    }
}

/// Number of stems requested from the separator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct StemCount(u8);

impl StemCount {
    pub const TWO: StemCount = StemCount(2);
    pub const THREE: StemCount = StemCount(3);
    pub const FOUR: StemCount = StemCount(4);

    /// Accepts 2, 3 or 4.
    pub fn new(count: i64) -> Result<Self> {
        match count {
            2..=4 => Ok(Self(count as u8)),
            other => Err(Error::invalid_parameter(format!(
                "stems must be 2, 3, or 4 (got {})",
                other
            ))),
        }
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for StemCount {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Self::new(i64::from(value))
    }
}

impl From<StemCount> for u8 {
    fn from(value: StemCount) -> Self {
        value.0
    }
}

impl std::fmt::Display for StemCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where the job's media comes from. Exactly one source per job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSource {
    /// Remote streaming-site URL, fetched by the downloader.
    Url(String),
    /// Upload already saved into the job's working directory.
    File(PathBuf),
}

/// Parameters a job was submitted with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParams {
    pub stem_count: StemCount,
    pub source: JobSource,
}

impl JobParams {
    pub fn from_url(stem_count: StemCount, url: impl Into<String>) -> Self {
        Self {
            stem_count,
            source: JobSource::Url(url.into()),
        }
    }

    pub fn from_file(stem_count: StemCount, path: impl Into<PathBuf>) -> Self {
        Self {
            stem_count,
            source: JobSource::File(path.into()),
        }
    }
}

/// One detected chord.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChordEntry {
    pub bar: u32,
    pub chord: String,
}

/// Output of a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    /// Detected key, e.g. "C major".
    pub key: String,
    /// Absent when chord extraction is disabled or failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chords: Option<Vec<ChordEntry>>,
    /// Absent when melody extraction is disabled or failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub melody: Option<Vec<String>>,
    /// Location of the stems archive on the server.
    pub stems_archive: PathBuf,
    /// PDF analysis report; absent when not rendered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<PathBuf>,
}

/// Terminal failure of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: FailureKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Current state of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub status: JobStatus,
    pub params: JobParams,
    /// Present only when `status` is `Done`.
    pub result: Option<JobResult>,
    /// Present only when `status` is `Failed`.
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Incremented on every applied mutation.
    pub revision: u64,
}

impl JobRecord {
    pub fn new(id: impl Into<String>, params: JobParams) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: JobStatus::Queued,
            params,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    /// Apply a mutation, enforcing the state machine.
    pub fn apply(&mut self, mutation: JobMutation) -> Result<()> {
        let next = mutation.target_status();
        // Terminal statuses only arrive with their payload.
        let bare_terminal = matches!(mutation, JobMutation::Status(s) if s.is_terminal());
        if bare_terminal || !self.status.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        match mutation {
            JobMutation::Status(status) => self.status = status,
            JobMutation::Complete(result) => {
                self.status = JobStatus::Done;
                self.result = Some(result);
            }
            JobMutation::Fail(error) => {
                self.status = JobStatus::Failed;
                self.error = Some(error);
            }
        }

        self.updated_at = Utc::now();
        self.revision += 1;
        Ok(())
    }
}

/// A single change applied to a job record.
#[derive(Debug, Clone, PartialEq)]
pub enum JobMutation {
    /// Move to a non-terminal stage.
    Status(JobStatus),
    Complete(JobResult),
    Fail(JobError),
}

impl JobMutation {
    fn target_status(&self) -> JobStatus {
        match self {
            Self::Status(status) => *status,
            Self::Complete(_) => JobStatus::Done,
            Self::Fail(_) => JobStatus::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> JobRecord {
        JobRecord::new("job-1", JobParams::from_url(StemCount::TWO, "https://x"))
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&JobStatus::ConvertingMedia).unwrap();
        assert_eq!(json, "\"converting_media\"");
        assert_eq!(JobStatus::ExtractingStems.to_string(), "extracting_stems");
    }

    #[test]
    fn test_forward_transitions() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Downloading));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::ConvertingMedia));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::ExtractingStems));
        assert!(JobStatus::Downloading.can_transition_to(JobStatus::ExtractingStems));
        assert!(JobStatus::DetectingKey.can_transition_to(JobStatus::Archiving));
        assert!(JobStatus::ExtractingMelody.can_transition_to(JobStatus::Archiving));
        assert!(JobStatus::Archiving.can_transition_to(JobStatus::Done));
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(!JobStatus::ExtractingStems.can_transition_to(JobStatus::Downloading));
        assert!(!JobStatus::Downloading.can_transition_to(JobStatus::ConvertingMedia));
        assert!(!JobStatus::DetectingKey.can_transition_to(JobStatus::DetectingKey));
        assert!(!JobStatus::Done.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Queued));
    }

    #[test]
    fn test_failed_reachable_from_any_non_terminal() {
        for status in [
            JobStatus::Queued,
            JobStatus::Downloading,
            JobStatus::ConvertingMedia,
            JobStatus::ExtractingStems,
            JobStatus::DetectingKey,
            JobStatus::ExtractingChords,
            JobStatus::ExtractingMelody,
            JobStatus::Archiving,
        ] {
            assert!(status.can_transition_to(JobStatus::Failed), "{status}");
        }
    }

    #[test]
    fn test_stem_count_validation() {
        assert_eq!(StemCount::new(2).unwrap(), StemCount::TWO);
        assert_eq!(StemCount::new(4).unwrap().get(), 4);
        assert!(matches!(StemCount::new(1), Err(Error::InvalidParameter(_))));
        assert!(matches!(StemCount::new(5), Err(Error::InvalidParameter(_))));
        assert!(serde_json::from_str::<StemCount>("7").is_err());
        assert_eq!(serde_json::from_str::<StemCount>("3").unwrap(), StemCount::THREE);
    }

    #[test]
    fn test_apply_bumps_revision() {
        let mut job = record();
        job.apply(JobMutation::Status(JobStatus::Downloading)).unwrap();
        job.apply(JobMutation::Status(JobStatus::ExtractingStems))
            .unwrap();
        assert_eq!(job.status, JobStatus::ExtractingStems);
        assert_eq!(job.revision, 2);
        assert!(job.result.is_none());
        assert!(job.error.is_none());
    }

    #[test]
    fn test_terminal_record_is_immutable() {
        let mut job = record();
        job.apply(JobMutation::Fail(JobError::new(FailureKind::Download, "404")))
            .unwrap();
        assert_eq!(job.status, JobStatus::Failed);

        let err = job
            .apply(JobMutation::Status(JobStatus::ExtractingStems))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
        assert_eq!(job.revision, 1);
    }

    #[test]
    fn test_status_mutation_cannot_reach_terminal() {
        let mut job = record();
        let err = job.apply(JobMutation::Status(JobStatus::Done)).unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
        let err = job.apply(JobMutation::Status(JobStatus::Failed)).unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.revision, 0);
    }

    #[test]
    fn test_result_omits_missing_enrichments() {
        let result = JobResult {
            key: "C major".to_string(),
            chords: None,
            melody: Some(vec!["Do".to_string()]),
            stems_archive: PathBuf::from("/data/job/stems.zip"),
            report: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["key"], "C major");
        assert!(json.get("chords").is_none());
        assert_eq!(json["melody"][0], "Do");
        assert_eq!(json["stemsArchive"], "/data/job/stems.zip");
    }
}
