//! Working-directory allocator.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Hands out non-colliding scratch directories under one root.
///
/// Layout: `<root>/<job_id>/<label>-<uuid>`. Everything a job writes lives
/// below `<root>/<job_id>`, so releasing a job is a single tree removal.
#[derive(Debug, Clone)]
pub struct WorkDirAllocator {
    root: PathBuf,
}

impl WorkDirAllocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding all of a job's working directories.
    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id)
    }

    /// Create a fresh directory for one stage of a job.
    pub async fn allocate(&self, job_id: &str, label: &str) -> std::io::Result<PathBuf> {
        let dir = self
            .job_dir(job_id)
            .join(format!("{}-{}", label, uuid::Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&dir).await?;
        debug!(job_id, dir = %dir.display(), "Allocated working directory");
        Ok(dir)
    }

    /// Remove every directory allocated for a job. Missing trees are ignored.
    pub async fn release(&self, job_id: &str) -> std::io::Result<()> {
        let dir = self.job_dir(job_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(job_id, "Released working directories");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(job_id, error = %e, "Failed to release working directories");
                Err(e)
            }
        }
    }
}
