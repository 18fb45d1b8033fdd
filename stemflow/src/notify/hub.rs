//! Per-job subscriber fan-out.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::event::JobEvent;
use crate::jobs::JobRegistry;
use crate::{Error, Result};

/// Hub tuning.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Longest a publish waits on any single subscriber.
    pub publish_timeout: Duration,
    /// Capacity of channels created by [`NotificationHub::channel`].
    pub buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            publish_timeout: Duration::from_millis(250),
            buffer: 32,
        }
    }
}

/// Handle returned by [`NotificationHub::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub job_id: String,
    id: u64,
}

#[derive(Clone)]
struct Subscriber {
    id: u64,
    tx: mpsc::Sender<JobEvent>,
    /// Revision of the snapshot sent on attach; older events are not delivered.
    snapshot_revision: u64,
}

/// Pushes job state changes to live subscribers.
///
/// Delivery is best effort: a subscriber that is closed or does not drain its
/// channel within `publish_timeout` is dropped, and events published while no
/// one listens are lost. The registry stays the authoritative state.
pub struct NotificationHub {
    registry: Arc<JobRegistry>,
    config: HubConfig,
    subscribers: DashMap<String, Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl NotificationHub {
    pub fn new(registry: Arc<JobRegistry>, config: HubConfig) -> Self {
        Self {
            registry,
            config,
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a bounded channel sized for this hub.
    pub fn channel(&self) -> (mpsc::Sender<JobEvent>, mpsc::Receiver<JobEvent>) {
        mpsc::channel(self.config.buffer.max(1))
    }

    /// Register `tx` for `job_id`, sending the current snapshot first.
    ///
    /// The snapshot is read and sent while the job's subscriber list is locked,
    /// so a concurrent publish either sees this subscriber (and skips events the
    /// snapshot already covers) or happened before the snapshot was read.
    ///
    /// A job that is already terminal gets its snapshot and is not registered:
    /// the sender is dropped and the receiver ends after that one event.
    pub fn subscribe(&self, job_id: &str, tx: mpsc::Sender<JobEvent>) -> Result<Subscription> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let attached = {
            let mut entry = self.subscribers.entry(job_id.to_string()).or_default();
            self.attach(&mut entry, job_id, id, tx)
        };
        self.subscribers.remove_if(job_id, |_, subs| subs.is_empty());

        let revision = attached?;
        debug!(job_id, subscriber = id, revision, "Subscriber attached");

        Ok(Subscription {
            job_id: job_id.to_string(),
            id,
        })
    }

    /// Send the snapshot and register, with the job's list held by the caller.
    fn attach(
        &self,
        subs: &mut Vec<Subscriber>,
        job_id: &str,
        id: u64,
        tx: mpsc::Sender<JobEvent>,
    ) -> Result<u64> {
        let record = self.registry.get(job_id)?;
        let snapshot = JobEvent::snapshot(&record);
        let terminal = snapshot.is_terminal();

        if tx.try_send(snapshot).is_err() {
            return Err(Error::SubscriberGone(job_id.to_string()));
        }
        if !terminal {
            subs.push(Subscriber {
                id,
                tx,
                snapshot_revision: record.revision,
            });
        }
        Ok(record.revision)
    }

    /// Push `event` to every subscriber of its job.
    ///
    /// Subscribers are served concurrently, each with a bounded wait. Failed
    /// subscribers are removed. After a terminal event all subscribers of the
    /// job are released so their receivers end.
    pub async fn publish(&self, event: JobEvent) {
        let targets: Vec<Subscriber> = match self.subscribers.get(&event.job_id) {
            Some(subs) => subs
                .iter()
                .filter(|s| s.snapshot_revision < event.revision)
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        if !targets.is_empty() {
            let timeout = self.config.publish_timeout;
            let sends = targets.iter().map(|sub| {
                let event = event.clone();
                async move { (sub.id, sub.tx.send_timeout(event, timeout).await.is_ok()) }
            });
            let failed: Vec<u64> = join_all(sends)
                .await
                .into_iter()
                .filter_map(|(id, ok)| (!ok).then_some(id))
                .collect();

            if !failed.is_empty() {
                debug!(
                    job_id = %event.job_id,
                    dropped = failed.len(),
                    "Removing unresponsive subscribers"
                );
                if let Some(mut subs) = self.subscribers.get_mut(&event.job_id) {
                    subs.retain(|s| !failed.contains(&s.id));
                }
            }
        } else {
            trace!(job_id = %event.job_id, status = %event.status, "No subscribers for event");
        }

        if event.is_terminal() {
            self.drop_job(&event.job_id);
        } else {
            self.subscribers
                .remove_if(&event.job_id, |_, subs| subs.is_empty());
        }
    }

    /// Remove a subscription. Unknown or already removed handles are ignored.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        if let Some(mut subs) = self.subscribers.get_mut(&subscription.job_id) {
            subs.retain(|s| s.id != subscription.id);
        }
        self.subscribers
            .remove_if(&subscription.job_id, |_, subs| subs.is_empty());
    }

    /// Drop every subscriber of a job, closing their channels.
    pub fn drop_job(&self, job_id: &str) {
        self.subscribers.remove(job_id);
    }

    pub fn subscriber_count(&self, job_id: &str) -> usize {
        self.subscribers
            .get(job_id)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }
}
