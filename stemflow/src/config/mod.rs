//! Service configuration.
//!
//! Everything is read from environment variables once at startup (a `.env`
//! file is honoured through `dotenvy` in `main`). Unset or unparseable values
//! fall back to defaults.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::pipeline::ArchiveFormat;

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server bind address
    pub bind_address: String,
    /// Server port
    pub port: u16,
    /// Request body size limit in bytes (uploads)
    pub body_limit: usize,
    /// Root of the per-job working directories.
    pub work_dir: PathBuf,
    /// Directory for rolling log files.
    pub log_dir: PathBuf,
    pub tools: ToolPaths,
    /// Run chord/melody extraction after key detection and render the PDF report.
    pub enrichment: bool,
    pub archive_format: ArchiveFormat,
    /// Bounded wait applied to each subscriber on publish.
    pub publish_timeout: Duration,
    /// Per-subscriber channel capacity.
    pub subscriber_buffer: usize,
    /// How long terminal jobs are kept. Zero keeps them forever.
    pub job_retention: Duration,
    pub purge_interval: Duration,
    /// Wall clock limit per stage. Zero disables the limit.
    pub stage_timeout: Duration,
}

/// Locations of the external binaries used by the stage adapters.
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub ffmpeg: String,
    pub ytdlp: String,
    pub spleeter: String,
    pub analyzer: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ytdlp: "yt-dlp".to_string(),
            spleeter: "spleeter".to_string(),
            analyzer: "stemflow-analyzer".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8000,
            body_limit: 512 * 1024 * 1024, // 512MB
            work_dir: PathBuf::from("./data"),
            log_dir: PathBuf::from("./logs"),
            tools: ToolPaths::default(),
            enrichment: true,
            archive_format: ArchiveFormat::Zip,
            publish_timeout: Duration::from_millis(250),
            subscriber_buffer: 32,
            job_retention: Duration::from_secs(24 * 60 * 60),
            purge_interval: Duration::from_secs(300),
            stage_timeout: Duration::from_secs(30 * 60),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `API_BIND_ADDRESS`, `API_PORT`, `API_BODY_LIMIT_MB`
    /// - `STEMFLOW_WORK_DIR`, `LOG_DIR`
    /// - `FFMPEG_PATH`, `YTDLP_PATH`, `SPLEETER_PATH`, `ANALYZER_PATH`
    /// - `STEMFLOW_ENRICHMENT`, `STEMFLOW_ARCHIVE_FORMAT`
    /// - `STEMFLOW_PUBLISH_TIMEOUT_MS`, `STEMFLOW_SUBSCRIBER_BUFFER`
    /// - `STEMFLOW_JOB_RETENTION_SECS`, `STEMFLOW_PURGE_INTERVAL_SECS`
    /// - `STEMFLOW_STAGE_TIMEOUT_SECS`
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(bind_address) = get("API_BIND_ADDRESS") {
            config.bind_address = bind_address;
        }
        if let Some(port) = parse_var(&get, "API_PORT") {
            config.port = port;
        }
        if let Some(mb) = parse_var::<usize, _>(&get, "API_BODY_LIMIT_MB") {
            config.body_limit = mb.saturating_mul(1024 * 1024);
        }
        if let Some(dir) = get("STEMFLOW_WORK_DIR") {
            config.work_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }

        if let Some(path) = get("FFMPEG_PATH") {
            config.tools.ffmpeg = path;
        }
        if let Some(path) = get("YTDLP_PATH") {
            config.tools.ytdlp = path;
        }
        if let Some(path) = get("SPLEETER_PATH") {
            config.tools.spleeter = path;
        }
        if let Some(path) = get("ANALYZER_PATH") {
            config.tools.analyzer = path;
        }

        if let Some(enabled) = parse_var(&get, "STEMFLOW_ENRICHMENT") {
            config.enrichment = enabled;
        }
        if let Some(format) = parse_var(&get, "STEMFLOW_ARCHIVE_FORMAT") {
            config.archive_format = format;
        }
        if let Some(ms) = parse_var(&get, "STEMFLOW_PUBLISH_TIMEOUT_MS") {
            config.publish_timeout = Duration::from_millis(ms);
        }
        if let Some(buffer) = parse_var::<usize, _>(&get, "STEMFLOW_SUBSCRIBER_BUFFER") {
            config.subscriber_buffer = buffer.max(1);
        }
        if let Some(secs) = parse_var(&get, "STEMFLOW_JOB_RETENTION_SECS") {
            config.job_retention = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&get, "STEMFLOW_PURGE_INTERVAL_SECS") {
            config.purge_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = parse_var(&get, "STEMFLOW_STAGE_TIMEOUT_SECS") {
            config.stage_timeout = Duration::from_secs(secs);
        }

        config
    }
}

fn parse_var<T, G>(get: &G, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    let raw = get(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, value = %raw, error = %e, "Ignoring invalid configuration value");
            None
        }
    }
}
