//! Job Purge Service for automatic cleanup of finished jobs.
//!
//! Jobs live in memory and their artifacts on disk. This service runs in the
//! background and periodically evicts terminal jobs that exceeded the
//! configured retention period, together with their subscribers and working
//! directories.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::stages::WorkDirAllocator;
use crate::jobs::JobRegistry;
use crate::notify::NotificationHub;

/// Configuration for job purging.
#[derive(Debug, Clone)]
pub struct PurgeConfig {
    /// How long finished jobs are retained. Zero retains them indefinitely.
    pub retention: Duration,
    /// Interval between purge checks.
    pub check_interval: Duration,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(24 * 60 * 60),
            check_interval: Duration::from_secs(300),
        }
    }
}

impl PurgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }
}

/// Evicts expired jobs from the registry, the hub and the disk.
pub struct JobPurgeService {
    config: PurgeConfig,
    registry: Arc<JobRegistry>,
    hub: Arc<NotificationHub>,
    workdirs: Arc<WorkDirAllocator>,
}

impl JobPurgeService {
    pub fn new(
        config: PurgeConfig,
        registry: Arc<JobRegistry>,
        hub: Arc<NotificationHub>,
        workdirs: Arc<WorkDirAllocator>,
    ) -> Self {
        Self {
            config,
            registry,
            hub,
            workdirs,
        }
    }

    /// Run a single purge pass. Returns the number of jobs removed.
    pub async fn run_purge(&self) -> usize {
        if self.config.retention.is_zero() {
            debug!("Job purging disabled (retention = 0)");
            return 0;
        }

        let expired = self.registry.expired(self.config.retention);
        let mut purged = 0;

        for job_id in expired {
            if self.registry.remove(&job_id).is_none() {
                continue;
            }
            self.hub.drop_job(&job_id);
            if let Err(e) = self.workdirs.release(&job_id).await {
                warn!(job_id = %job_id, error = %e, "Failed to delete job artifacts");
            }
            purged += 1;
        }

        if purged > 0 {
            info!(
                "Purged {} finished jobs (retention: {}s)",
                purged,
                self.config.retention.as_secs()
            );
        } else {
            debug!("No jobs to purge");
        }

        purged
    }

    /// Start the background purge task.
    pub fn start_background_task(
        self: &Arc<Self>,
        cancellation_token: CancellationToken,
    ) -> JoinHandle<()> {
        let service = Arc::clone(self);

        tokio::spawn(async move {
            let period = service.config.check_interval.max(Duration::from_millis(1));
            let mut check_interval = interval(period);
            check_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                "Job purge service started (retention: {}s, interval: {}s)",
                service.config.retention.as_secs(),
                service.config.check_interval.as_secs()
            );

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        info!("Job purge service shutting down");
                        break;
                    }
                    _ = check_interval.tick() => {
                        let purged = service.run_purge().await;
                        if purged > 0 {
                            debug!("Purge cycle completed: {} jobs removed", purged);
                        }
                    }
                }
            }
        })
    }

    pub fn config(&self) -> &PurgeConfig {
        &self.config
    }
}
