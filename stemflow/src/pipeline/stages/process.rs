//! Subprocess helper shared by the command-line stage backends.

use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Output from a command execution including captured lines.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub duration: f64,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl CommandOutput {
    /// Last non-empty stderr line, falling back to the exit status.
    pub fn failure_message(&self) -> String {
        self.stderr
            .iter()
            .rev()
            .find(|line| !line.trim().is_empty())
            .map(|line| line.trim().to_string())
            .unwrap_or_else(|| format!("process exited with {}", self.status))
    }

    /// Last non-empty stdout line.
    pub fn last_stdout_line(&self) -> Option<&str> {
        self.stdout
            .iter()
            .rev()
            .map(|line| line.trim())
            .find(|line| !line.is_empty())
    }
}

enum Line {
    Stdout(String),
    Stderr(String),
}

/// Run a command to completion, capturing stdout and stderr line by line.
///
/// The child is killed if the returned future is dropped, so a stage that
/// times out or is cancelled leaves no process behind.
pub async fn run_command_with_logs(command: &mut Command) -> std::io::Result<CommandOutput> {
    let start = std::time::Instant::now();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn()?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    if let Some(stdout) = child.stdout.take() {
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("stdout: {}", line);
                let _ = tx.send(Line::Stdout(line));
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.to_lowercase().contains("error") {
                    warn!("stderr: {}", line);
                } else {
                    debug!("stderr: {}", line);
                }
                let _ = tx.send(Line::Stderr(line));
            }
        });
    }

    // Readers hold the remaining senders; the channel closes once both hit EOF.
    drop(tx);

    let status = child.wait().await?;
    let duration = start.elapsed().as_secs_f64();

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    while let Some(line) = rx.recv().await {
        match line {
            Line::Stdout(line) => stdout.push(line),
            Line::Stderr(line) => stderr.push(line),
        }
    }

    Ok(CommandOutput {
        status,
        duration,
        stdout,
        stderr,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_both_streams() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo one; echo two; echo oops >&2"]);

        let output = run_command_with_logs(&mut cmd).await.unwrap();
        assert!(output.status.success());
        assert_eq!(output.stdout, vec!["one", "two"]);
        assert_eq!(output.last_stdout_line(), Some("two"));
        assert_eq!(output.failure_message(), "oops");
    }

    #[tokio::test]
    async fn test_failure_without_stderr() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "exit 3"]);

        let output = run_command_with_logs(&mut cmd).await.unwrap();
        assert!(!output.status.success());
        assert!(output.failure_message().starts_with("process exited with"));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let mut cmd = Command::new("definitely-not-a-real-binary-stemflow");
        assert!(run_command_with_logs(&mut cmd).await.is_err());
    }
}
