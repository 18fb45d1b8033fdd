//! ffmpeg media conversion backend.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::process::run_command_with_logs;
use super::traits::{MediaConverter, StageResult};
use crate::error::StageError;

/// Output file name inside the destination directory.
const OUTPUT_NAME: &str = "audio.wav";

/// Extracts the audio track of a video container as PCM WAV.
#[derive(Debug, Clone)]
pub struct FfmpegConverter {
    binary: String,
}

impl FfmpegConverter {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Build ffmpeg arguments for a 16-bit, 44.1 kHz, stereo WAV.
    pub fn build_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let mut args = Vec::new();

        args.push("-y".to_string());
        args.push("-hide_banner".to_string());
        args.push("-nostats".to_string());
        args.extend(["-loglevel".to_string(), "warning".to_string()]);

        args.extend(["-i".to_string(), input.to_string_lossy().to_string()]);

        // No video output
        args.push("-vn".to_string());

        args.extend(["-acodec".to_string(), "pcm_s16le".to_string()]);
        args.extend(["-ar".to_string(), "44100".to_string()]);
        args.extend(["-ac".to_string(), "2".to_string()]);

        args.push(output.to_string_lossy().to_string());
        args
    }
}

#[async_trait]
impl MediaConverter for FfmpegConverter {
    async fn convert(&self, video: &Path, dest_dir: &Path) -> StageResult<PathBuf> {
        if !tokio::fs::try_exists(video).await.unwrap_or(false) {
            return Err(StageError::Conversion(format!(
                "input file does not exist: {}",
                video.display()
            )));
        }

        let output = dest_dir.join(OUTPUT_NAME);
        info!(input = %video.display(), output = %output.display(), "Converting media to WAV");

        let mut cmd = Command::new(&self.binary);
        cmd.args(self.build_args(video, &output));

        let result = run_command_with_logs(&mut cmd)
            .await
            .map_err(|e| StageError::Conversion(format!("failed to run {}: {}", self.binary, e)))?;

        if !result.status.success() {
            return Err(StageError::Conversion(result.failure_message()));
        }
        if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return Err(StageError::Conversion(
                "ffmpeg reported success but produced no output".to_string(),
            ));
        }

        debug!(duration = result.duration, "Conversion finished");
        Ok(output)
    }
}
