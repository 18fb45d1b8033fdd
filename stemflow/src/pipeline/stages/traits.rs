//! Stage adapter traits.
//!
//! Each stage is a single async call from input paths to output paths or
//! values. Implementations must not keep per-job state and must be safe to
//! call concurrently for different jobs.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::StageError;
use crate::jobs::{ChordEntry, StemCount};

/// Result type returned by stage adapters.
pub type StageResult<T> = std::result::Result<T, StageError>;

/// Fetches remote media as a local audio file.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download `url` into `dest_dir` and return the audio file path.
    async fn download(&self, url: &str, dest_dir: &Path) -> StageResult<PathBuf>;
}

/// Turns a video container into 16-bit PCM, 44.1 kHz, stereo WAV.
#[async_trait]
pub trait MediaConverter: Send + Sync {
    async fn convert(&self, video: &Path, dest_dir: &Path) -> StageResult<PathBuf>;
}

/// Splits an audio file into named stem files.
#[async_trait]
pub trait StemSeparator: Send + Sync {
    /// Returns the folder holding the stem files (`vocals.wav`, `drums.wav`, ...).
    async fn separate(
        &self,
        audio: &Path,
        stem_count: StemCount,
        dest_dir: &Path,
    ) -> StageResult<PathBuf>;
}

/// Mixes several stems into one waveform.
#[async_trait]
pub trait StemCombiner: Send + Sync {
    /// Overlay `stems` sample-wise into `output`. Zero inputs fail with
    /// [`StageError::EmptyInput`] without creating `output`.
    async fn combine(&self, stems: &[PathBuf], output: &Path) -> StageResult<PathBuf>;
}

#[async_trait]
pub trait KeyDetector: Send + Sync {
    /// Key label such as "C major".
    async fn detect_key(&self, wav: &Path) -> StageResult<String>;
}

#[async_trait]
pub trait ChordExtractor: Send + Sync {
    async fn extract_chords(&self, wav: &Path) -> StageResult<Vec<ChordEntry>>;
}

#[async_trait]
pub trait MelodyExtractor: Send + Sync {
    async fn extract_melody(&self, wav: &Path) -> StageResult<Vec<String>>;
}

/// Packs a stems folder into a single downloadable file.
#[async_trait]
pub trait Archiver: Send + Sync {
    /// Archive every file of `folder` into a new file under `dest_dir`.
    async fn archive(&self, folder: &Path, dest_dir: &Path) -> StageResult<PathBuf>;
}

/// Analysis results of one job, as rendered into a report.
#[derive(Debug, Clone, Copy)]
pub struct ReportContent<'a> {
    pub key: &'a str,
    pub chords: Option<&'a [ChordEntry]>,
    pub melody: Option<&'a [String]>,
}

/// Renders the analysis of a job as a printable document.
#[async_trait]
pub trait ReportWriter: Send + Sync {
    /// Write the report into `dest_dir` and return its path.
    async fn write_report(&self, content: ReportContent<'_>, dest_dir: &Path)
    -> StageResult<PathBuf>;
}
