//! Spleeter stem separation backend.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::process::run_command_with_logs;
use super::traits::{StageResult, StemSeparator};
use crate::error::StageError;
use crate::jobs::StemCount;

/// Runs `spleeter separate` with the pretrained `spleeter:{n}stems` model.
#[derive(Debug, Clone)]
pub struct SpleeterSeparator {
    binary: String,
}

impl SpleeterSeparator {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn build_args(&self, audio: &Path, stem_count: StemCount, dest_dir: &Path) -> Vec<String> {
        vec![
            "separate".to_string(),
            "-p".to_string(),
            format!("spleeter:{}stems", stem_count),
            "-o".to_string(),
            dest_dir.to_string_lossy().to_string(),
            audio.to_string_lossy().to_string(),
        ]
    }
}

#[async_trait]
impl StemSeparator for SpleeterSeparator {
    async fn separate(
        &self,
        audio: &Path,
        stem_count: StemCount,
        dest_dir: &Path,
    ) -> StageResult<PathBuf> {
        if !tokio::fs::try_exists(audio).await.unwrap_or(false) {
            return Err(StageError::Separation(format!(
                "input file does not exist: {}",
                audio.display()
            )));
        }

        info!(audio = %audio.display(), stems = %stem_count, "Separating stems");

        let mut cmd = Command::new(&self.binary);
        cmd.args(self.build_args(audio, stem_count, dest_dir));

        let output = run_command_with_logs(&mut cmd)
            .await
            .map_err(|e| StageError::Separation(format!("failed to run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            return Err(StageError::Separation(output.failure_message()));
        }

        let folder = stems_folder(dest_dir).await?;
        debug!(folder = %folder.display(), duration = output.duration, "Separation finished");
        Ok(folder)
    }
}

/// Spleeter writes `<dest>/<track name>/<stem>.wav`; take that sub-directory.
async fn stems_folder(dest_dir: &Path) -> StageResult<PathBuf> {
    let mut entries = tokio::fs::read_dir(dest_dir).await?;
    let mut dirs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs.into_iter().next().unwrap_or_else(|| dest_dir.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_args() {
        let separator = SpleeterSeparator::new("spleeter");
        let args = separator.build_args(
            Path::new("/in/song.wav"),
            StemCount::FOUR,
            Path::new("/out"),
        );
        assert_eq!(
            args,
            vec!["separate", "-p", "spleeter:4stems", "-o", "/out", "/in/song.wav"]
        );
    }

    #[tokio::test]
    async fn test_stems_folder_prefers_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(stems_folder(dir.path()).await.unwrap(), dir.path());

        std::fs::create_dir(dir.path().join("song")).unwrap();
        std::fs::write(dir.path().join("stray.txt"), b"x").unwrap();
        assert_eq!(
            stems_folder(dir.path()).await.unwrap(),
            dir.path().join("song")
        );
    }

    #[tokio::test]
    async fn test_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = SpleeterSeparator::new("spleeter")
            .separate(&dir.path().join("none.wav"), StemCount::TWO, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Separation(_)));
    }
}
