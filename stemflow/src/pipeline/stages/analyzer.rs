//! Feature analysis backend driven by an external analyzer binary.
//!
//! The analyzer is invoked as `<binary> <feature> <wav>` and prints one JSON
//! document on stdout:
//!
//! | feature  | output                          |
//! |----------|---------------------------------|
//! | `key`    | `"C major"`                     |
//! | `chords` | `[{"bar": 1, "chord": "C4"}]`   |
//! | `melody` | `["Do", "Re"]`                  |

use std::path::Path;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::process::Command;
use tracing::debug;

use super::process::run_command_with_logs;
use super::traits::{ChordExtractor, KeyDetector, MelodyExtractor, StageResult};
use crate::error::StageError;
use crate::jobs::ChordEntry;

#[derive(Debug, Clone)]
pub struct CommandAnalyzer {
    binary: String,
}

impl CommandAnalyzer {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run<T: DeserializeOwned>(&self, feature: &str, wav: &Path) -> StageResult<T> {
        if !tokio::fs::try_exists(wav).await.unwrap_or(false) {
            return Err(StageError::Analysis(format!(
                "input file does not exist: {}",
                wav.display()
            )));
        }

        let mut cmd = Command::new(&self.binary);
        cmd.arg(feature).arg(wav);

        let output = run_command_with_logs(&mut cmd)
            .await
            .map_err(|e| StageError::Analysis(format!("failed to run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            return Err(StageError::Analysis(format!(
                "{} failed: {}",
                feature,
                output.failure_message()
            )));
        }

        debug!(feature, duration = output.duration, "Analysis finished");
        parse_output(feature, &output.stdout.join("\n"))
    }
}

fn parse_output<T: DeserializeOwned>(feature: &str, stdout: &str) -> StageResult<T> {
    serde_json::from_str(stdout.trim())
        .map_err(|e| StageError::Analysis(format!("invalid {} output: {}", feature, e)))
}

#[async_trait]
impl KeyDetector for CommandAnalyzer {
    async fn detect_key(&self, wav: &Path) -> StageResult<String> {
        let key: String = self.run("key", wav).await?;
        if key.trim().is_empty() {
            return Err(StageError::Analysis("analyzer returned an empty key".to_string()));
        }
        Ok(key)
    }
}

#[async_trait]
impl ChordExtractor for CommandAnalyzer {
    async fn extract_chords(&self, wav: &Path) -> StageResult<Vec<ChordEntry>> {
        self.run("chords", wav).await
    }
}

#[async_trait]
impl MelodyExtractor for CommandAnalyzer {
    async fn extract_melody(&self, wav: &Path) -> StageResult<Vec<String>> {
        self.run("melody", wav).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_outputs() {
        let key: String = parse_output("key", "\"A minor\"\n").unwrap();
        assert_eq!(key, "A minor");

        let chords: Vec<ChordEntry> =
            parse_output("chords", r#"[{"bar":1,"chord":"C4"},{"bar":2,"chord":"G4"}]"#).unwrap();
        assert_eq!(chords.len(), 2);
        assert_eq!(chords[1].bar, 2);
        assert_eq!(chords[1].chord, "G4");

        let melody: Vec<String> = parse_output("melody", r#"["Do","Re"]"#).unwrap();
        assert_eq!(melody, vec!["Do", "Re"]);
    }

    #[test]
    fn test_parse_garbage() {
        let err = parse_output::<Vec<String>>("melody", "Traceback ...").unwrap_err();
        assert!(matches!(err, StageError::Analysis(_)));
    }

    #[tokio::test]
    async fn test_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = CommandAnalyzer::new("stemflow-analyzer");
        let err = analyzer
            .detect_key(&dir.path().join("instrumental.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Analysis(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("in.wav");
        std::fs::write(&wav, b"").unwrap();

        let err = CommandAnalyzer::new("false")
            .extract_melody(&wav)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Analysis(_)));
    }
}
