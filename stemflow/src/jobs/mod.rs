//! Job records and the registry that owns them.

mod model;
mod registry;

pub use model::{
    ChordEntry, JobError, JobMutation, JobParams, JobRecord, JobResult, JobSource, JobStatus,
    StemCount,
};
pub use registry::{JobRegistry, new_job_id};
