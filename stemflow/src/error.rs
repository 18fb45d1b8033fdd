//! Application-wide error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Caller error, rejected before any job is created.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error(transparent)]
    Stage(#[from] StageError),

    /// The subscriber's channel was closed or could not take the snapshot.
    #[error("Subscriber gone for job {0}")]
    SubscriberGone(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    pub fn unknown_job(id: impl Into<String>) -> Self {
        Self::UnknownJob(id.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

/// Failure raised by a pipeline stage adapter.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("download failed: {0}")]
    Download(String),

    #[error("media conversion failed: {0}")]
    Conversion(String),

    #[error("stem separation failed: {0}")]
    Separation(String),

    #[error("no input stems to combine")]
    EmptyInput,

    #[error("analysis failed: {0}")]
    Analysis(String),

    #[error("io failure: {0}")]
    Io(String),
}

impl StageError {
    /// Coarse failure category recorded on the job.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Download(_) => FailureKind::Download,
            Self::Conversion(_) => FailureKind::Conversion,
            Self::Separation(_) => FailureKind::Separation,
            Self::EmptyInput => FailureKind::EmptyInput,
            Self::Analysis(_) => FailureKind::Analysis,
            Self::Io(_) => FailureKind::Io,
        }
    }

    /// Build a failure of the given kind, used when a stage times out.
    pub fn with_kind(kind: FailureKind, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        match kind {
            FailureKind::Download => Self::Download(msg),
            FailureKind::Conversion => Self::Conversion(msg),
            FailureKind::Separation => Self::Separation(msg),
            FailureKind::EmptyInput => Self::EmptyInput,
            FailureKind::Analysis => Self::Analysis(msg),
            _ => Self::Io(msg),
        }
    }
}

impl From<std::io::Error> for StageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Failure category exposed to clients.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    Download,
    Conversion,
    Separation,
    EmptyInput,
    Analysis,
    Io,
    /// The run was stopped by a cancellation request.
    Cancelled,
    /// The run aborted unexpectedly.
    Internal,
}
