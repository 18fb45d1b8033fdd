//! Stem separation pipeline.
//!
//! - [`stages`]: stage adapter traits and their production backends
//! - [`Orchestrator`]: drives one job through the stages
//! - [`JobPurgeService`]: evicts finished jobs after their retention period

mod instrumental;
mod orchestrator;
mod purge;
pub mod stages;

pub use instrumental::{INSTRUMENTAL_FILE, VOCALS_STEM, build_instrumental, stems_for};
pub use orchestrator::{Orchestrator, OrchestratorConfig, is_video_container};
pub use purge::{JobPurgeService, PurgeConfig};
pub use stages::{ArchiveFormat, REPORT_FILE, StageSet, WorkDirAllocator};
