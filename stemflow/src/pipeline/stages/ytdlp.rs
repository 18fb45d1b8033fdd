//! yt-dlp download backend.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::process::run_command_with_logs;
use super::traits::{Downloader, StageResult};
use crate::error::StageError;

/// Downloads the best audio stream and extracts it to WAV.
#[derive(Debug, Clone)]
pub struct YtDlpDownloader {
    binary: String,
}

impl YtDlpDownloader {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn build_args(&self, url: &str, dest_dir: &Path) -> Vec<String> {
        let template = dest_dir.join("%(title)s.%(ext)s");
        vec![
            "-f".to_string(),
            "bestaudio/best".to_string(),
            "--no-playlist".to_string(),
            "-x".to_string(),
            "--audio-format".to_string(),
            "wav".to_string(),
            "-o".to_string(),
            template.to_string_lossy().to_string(),
            "--print".to_string(),
            "after_move:filepath".to_string(),
            url.to_string(),
        ]
    }
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    async fn download(&self, url: &str, dest_dir: &Path) -> StageResult<PathBuf> {
        info!(url, "Downloading audio");

        let mut cmd = Command::new(&self.binary);
        cmd.args(self.build_args(url, dest_dir));

        let output = run_command_with_logs(&mut cmd)
            .await
            .map_err(|e| StageError::Download(format!("failed to run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            return Err(StageError::Download(output.failure_message()));
        }

        if let Some(printed) = output.last_stdout_line() {
            let path = PathBuf::from(printed);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                debug!(path = %path.display(), duration = output.duration, "Download finished");
                return Ok(path);
            }
        }

        // Older yt-dlp builds do not support `--print after_move:...`.
        find_wav(dest_dir).await?.ok_or_else(|| {
            StageError::Download(format!("no audio file produced in {}", dest_dir.display()))
        })
    }
}

async fn find_wav(dir: &Path) -> StageResult<Option<PathBuf>> {
    let list_error =
        |e: std::io::Error| StageError::Download(format!("failed to list {}: {}", dir.display(), e));

    let mut entries = tokio::fs::read_dir(dir).await.map_err(list_error)?;
    let mut found = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(list_error)? {
        let path = entry.path();
        if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
        {
            found.push(path);
        }
    }
    found.sort();
    Ok(found.into_iter().next())
}
