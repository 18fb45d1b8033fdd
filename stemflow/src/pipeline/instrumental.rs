//! Instrumental track selection for analysis.

use std::path::{Path, PathBuf};

use super::stages::{StageResult, StemCombiner};
use crate::jobs::StemCount;

/// Stem carrying the lead vocal in every split.
pub const VOCALS_STEM: &str = "vocals.wav";

/// File name of the mixed instrumental inside the stems folder.
pub const INSTRUMENTAL_FILE: &str = "instrumental.wav";

/// Non-vocal stems making up the instrumental for a given split.
pub fn stems_for(stem_count: StemCount) -> &'static [&'static str] {
    match stem_count.get() {
        2 => &["accompaniment.wav"],
        3 => &["drums.wav", "other.wav"],
        _ => &["bass.wav", "drums.wav", "other.wav"],
    }
}

/// Produce the waveform fed to key and chord detection.
///
/// A 2-stem split already has the accompaniment as one file. Larger splits
/// are overlaid into `<folder>/instrumental.wav`, which then ships with the
/// archive.
pub async fn build_instrumental(
    folder: &Path,
    stem_count: StemCount,
    combiner: &dyn StemCombiner,
) -> StageResult<PathBuf> {
    let stems: Vec<PathBuf> = stems_for(stem_count)
        .iter()
        .map(|name| folder.join(name))
        .collect();

    if let [single] = stems.as_slice() {
        return Ok(single.clone());
    }
    combiner
        .combine(&stems, &folder.join(INSTRUMENTAL_FILE))
        .await
}
