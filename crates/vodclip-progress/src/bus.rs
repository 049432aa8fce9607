//! Job registry and snapshot fan-out.
//!
//! Every mutation goes through [`ProgressBus::update`], which applies the
//! change under the registry lock, serializes the resulting snapshot once
//! and pushes it to each subscriber with `try_send`. A subscriber whose
//! queue is full misses that snapshot; the next one supersedes it. The lock
//! is never held across an await.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use vodclip_models::{ClipJob, ClipStatus, JobId, WsMessage};

use crate::error::{ProgressError, ProgressResult};

/// Per-subscriber queue depth.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 16;

/// How long a finished, unobserved job stays pollable.
pub const DEFAULT_RETENTION_SECS: u64 = 60;

/// Progress bus configuration.
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub subscriber_buffer: usize,
    pub retention: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
        }
    }
}

impl BusConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            subscriber_buffer: std::env::var("PROGRESS_SUBSCRIBER_BUFFER")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(DEFAULT_SUBSCRIBER_BUFFER),
            retention: Duration::from_secs(
                std::env::var("JOB_RETENTION_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_RETENTION_SECS),
            ),
        }
    }
}

/// One serialized snapshot as handed to subscribers.
#[derive(Debug, Clone)]
pub struct SnapshotFrame {
    pub event_seq: u64,
    pub status: ClipStatus,
    /// JSON-encoded [`WsMessage::Snapshot`]
    pub payload: Arc<str>,
}

impl SnapshotFrame {
    fn encode(job: &ClipJob) -> serde_json::Result<Self> {
        let payload = serde_json::to_string(&WsMessage::snapshot(job.clone()))?;
        Ok(Self {
            event_seq: job.event_seq,
            status: job.status,
            payload: payload.into(),
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<SnapshotFrame>,
}

struct Entry {
    job: ClipJob,
    subscribers: Vec<Subscriber>,
    terminal_since: Option<Instant>,
}

impl Entry {
    fn new(job: ClipJob) -> Self {
        let terminal_since = job.is_terminal().then(Instant::now);
        Self {
            job,
            subscribers: Vec::new(),
            terminal_since,
        }
    }

    fn reclaimable(&self, retention: Duration) -> bool {
        self.subscribers.is_empty()
            && self
                .terminal_since
                .is_some_and(|since| since.elapsed() >= retention)
    }

    fn broadcast(&mut self) {
        if self.subscribers.is_empty() {
            return;
        }

        let frame = match SnapshotFrame::encode(&self.job) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(job_id = %self.job.job_id, "Failed to serialize snapshot: {}", e);
                return;
            }
        };

        let terminal = frame.is_terminal();
        let job_id = &self.job.job_id;
        self.subscribers.retain(|sub| match sub.tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) if terminal => {
                // Closing lets the subscriber fetch the final state itself.
                debug!(job_id = %job_id, subscriber = sub.id, "Lagging subscriber dropped at terminal state");
                false
            }
            Err(TrySendError::Full(_)) => {
                debug!(job_id = %job_id, subscriber = sub.id, "Subscriber lagging, snapshot skipped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }
}

struct Inner {
    entries: Mutex<HashMap<JobId, Entry>>,
    config: BusConfig,
    next_subscriber: AtomicU64,
    shut_down: AtomicBool,
}

impl Inner {
    fn unsubscribe(&self, job_id: &JobId, subscriber: u64) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(job_id) {
            entry.subscribers.retain(|s| s.id != subscriber);
            if entry.reclaimable(self.config.retention) {
                entries.remove(job_id);
                debug!(job_id = %job_id, "Evicted job on last unsubscribe");
            }
        }
    }
}

/// Registry of clip jobs with live snapshot fan-out.
#[derive(Clone)]
pub struct ProgressBus {
    inner: Arc<Inner>,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl ProgressBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                config,
                next_subscriber: AtomicU64::new(1),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Add a new job. Ids are never reused while an entry exists.
    pub fn register(&self, job: ClipJob) -> ProgressResult<()> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(ProgressError::ShutDown);
        }

        let mut entries = self.inner.entries.lock();
        if entries.contains_key(&job.job_id) {
            return Err(ProgressError::DuplicateJob(job.job_id.to_string()));
        }
        debug!(job_id = %job.job_id, asset_id = %job.asset_id, "Registered job");
        entries.insert(job.job_id.clone(), Entry::new(job));
        Ok(())
    }

    /// Mutate a job and notify subscribers if anything changed.
    pub fn update<R>(
        &self,
        job_id: &JobId,
        f: impl FnOnce(&mut ClipJob) -> R,
    ) -> ProgressResult<R> {
        let mut entries = self.inner.entries.lock();
        let entry = entries
            .get_mut(job_id)
            .ok_or_else(|| ProgressError::job_not_found(job_id.as_str()))?;

        let seq = entry.job.event_seq;
        let result = f(&mut entry.job);

        if entry.job.event_seq != seq {
            if entry.job.is_terminal() && entry.terminal_since.is_none() {
                entry.terminal_since = Some(Instant::now());
            }
            entry.broadcast();
        }

        Ok(result)
    }

    /// Move a job to `status`; illegal edges are rejected.
    pub fn transition(&self, job_id: &JobId, status: ClipStatus) -> ProgressResult<()> {
        self.update(job_id, |job| job.transition(status))?
            .map_err(|e| log_rejected(job_id, e))
    }

    /// Mark a job as failed.
    pub fn fail(&self, job_id: &JobId, message: impl Into<String>) -> ProgressResult<()> {
        let message = message.into();
        self.update(job_id, |job| job.fail(message))?
            .map_err(|e| log_rejected(job_id, e))
    }

    /// Mark a job as canceled.
    pub fn cancel(&self, job_id: &JobId) -> ProgressResult<()> {
        self.update(job_id, |job| job.cancel())?
            .map_err(|e| log_rejected(job_id, e))
    }

    /// Current snapshot of a job.
    pub fn snapshot(&self, job_id: &JobId) -> Option<ClipJob> {
        self.inner
            .entries
            .lock()
            .get(job_id)
            .map(|entry| entry.job.clone())
    }

    /// Attach a live subscriber; the current snapshot is queued first.
    pub fn subscribe(&self, job_id: &JobId) -> ProgressResult<Subscription> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(ProgressError::ShutDown);
        }

        let mut entries = self.inner.entries.lock();
        let entry = entries
            .get_mut(job_id)
            .ok_or_else(|| ProgressError::job_not_found(job_id.as_str()))?;

        let (tx, rx) = mpsc::channel(self.inner.config.subscriber_buffer.max(1));
        let frame = SnapshotFrame::encode(&entry.job)?;
        // Fresh channel with capacity >= 1 always has room.
        let _ = tx.try_send(frame);

        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        if !entry.job.is_terminal() {
            entry.subscribers.push(Subscriber { id, tx });
        }

        debug!(job_id = %job_id, subscriber = id, "Subscriber attached");

        Ok(Subscription {
            job_id: job_id.clone(),
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        })
    }

    /// Evict terminal jobs nobody watches once their retention has passed.
    pub fn sweep(&self) -> usize {
        let retention = self.inner.config.retention;
        let mut entries = self.inner.entries.lock();
        let before = entries.len();

        entries.retain(|_, entry| {
            entry.subscribers.retain(|s| !s.tx.is_closed());
            !entry.reclaimable(retention)
        });

        before - entries.len()
    }

    /// Number of registered jobs.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of jobs not yet terminal.
    pub fn active_count(&self) -> usize {
        self.inner
            .entries
            .lock()
            .values()
            .filter(|entry| !entry.job.is_terminal())
            .count()
    }

    /// Detach every subscriber and refuse new work.
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::Release);
        let mut entries = self.inner.entries.lock();
        for entry in entries.values_mut() {
            entry.subscribers.clear();
        }
        debug!(jobs = entries.len(), "Progress bus shut down");
    }
}

fn log_rejected(job_id: &JobId, e: vodclip_models::ModelError) -> ProgressError {
    debug!(job_id = %job_id, "Rejected job update: {}", e);
    ProgressError::Model(e)
}

/// Live feed of one job's snapshots.
///
/// The feed ends after a terminal snapshot or when the job is evicted.
pub struct Subscription {
    job_id: JobId,
    id: u64,
    rx: mpsc::Receiver<SnapshotFrame>,
    bus: Weak<Inner>,
}

impl Subscription {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Next snapshot, or `None` once the feed has ended.
    pub async fn recv(&mut self) -> Option<SnapshotFrame> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.unsubscribe(&self.job_id, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vodclip_models::{CodecProfile, DeliveryMode, RequestedWindow, SnappedWindow};

    fn job(id: &str) -> ClipJob {
        ClipJob::new(
            JobId::parse(id).unwrap(),
            "lecture-01",
            RequestedWindow {
                start: 12.0,
                end: 22.0,
            },
            DeliveryMode::Streamed,
            CodecProfile::Remux,
        )
    }

    fn decode(frame: &SnapshotFrame) -> ClipJob {
        match serde_json::from_str::<WsMessage>(&frame.payload).unwrap() {
            WsMessage::Snapshot { job } => job,
            other => panic!("unexpected message {:?}", other),
        }
    }

    fn bus_with_retention(retention: Duration) -> ProgressBus {
        ProgressBus::new(BusConfig {
            retention,
            ..Default::default()
        })
    }

    #[test]
    fn test_register_and_snapshot() {
        let bus = ProgressBus::default();
        bus.register(job("a")).unwrap();
        assert!(matches!(
            bus.register(job("a")),
            Err(ProgressError::DuplicateJob(_))
        ));
        assert_eq!(bus.len(), 1);
        assert_eq!(bus.active_count(), 1);

        let id = JobId::parse("a").unwrap();
        assert_eq!(bus.snapshot(&id).unwrap().status, ClipStatus::Starting);
        assert!(bus.snapshot(&JobId::parse("b").unwrap()).is_none());
    }

    #[test]
    fn test_terminal_state_is_final() {
        let bus = ProgressBus::default();
        bus.register(job("a")).unwrap();
        let id = JobId::parse("a").unwrap();

        bus.transition(&id, ClipStatus::Running).unwrap();
        bus.fail(&id, "upstream returned 404").unwrap();
        assert!(bus.cancel(&id).is_err());
        assert!(bus.transition(&id, ClipStatus::Done).is_err());

        let snap = bus.snapshot(&id).unwrap();
        assert_eq!(snap.status, ClipStatus::Error);
        assert_eq!(snap.error.as_deref(), Some("upstream returned 404"));
        assert_eq!(bus.active_count(), 0);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_current_snapshot() {
        let bus = ProgressBus::default();
        bus.register(job("a")).unwrap();
        let id = JobId::parse("a").unwrap();
        bus.transition(&id, ClipStatus::Running).unwrap();

        let mut sub = bus.subscribe(&id).unwrap();
        let first = decode(&sub.recv().await.unwrap());
        assert_eq!(first.status, ClipStatus::Running);
    }

    #[tokio::test]
    async fn test_snapshots_arrive_in_order() {
        let bus = ProgressBus::default();
        bus.register(job("a")).unwrap();
        let id = JobId::parse("a").unwrap();
        let mut sub = bus.subscribe(&id).unwrap();

        bus.update(&id, |j| j.set_snapped(SnappedWindow::new(10.0, 30.0).unwrap()))
            .unwrap();
        bus.transition(&id, ClipStatus::Running).unwrap();
        bus.update(&id, |j| j.record_progress(5_000)).unwrap();
        bus.update(&id, |j| j.record_progress(10_000)).unwrap();
        bus.transition(&id, ClipStatus::Done).unwrap();

        let mut seqs = Vec::new();
        let mut percents = Vec::new();
        while let Some(payload) = sub.recv().await {
            let job = decode(&payload);
            seqs.push(job.event_seq);
            percents.push(job.progress.percent);
            if job.is_terminal() {
                break;
            }
        }
        assert_eq!(seqs.len(), 6);
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(percents[4], 50);
    }

    #[tokio::test]
    async fn test_unchanged_update_does_not_broadcast() {
        let bus = ProgressBus::default();
        bus.register(job("a")).unwrap();
        let id = JobId::parse("a").unwrap();
        bus.cancel(&id).unwrap();

        let mut sub = bus.subscribe(&id).unwrap();
        assert!(sub.recv().await.is_some());
        // Terminal job: no-op mutator, subscriber was never attached.
        bus.update(&id, |j| j.add_bytes_sent(10)).unwrap();
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_slow_subscriber_skips_without_blocking() {
        let bus = ProgressBus::new(BusConfig {
            subscriber_buffer: 2,
            ..Default::default()
        });
        bus.register(job("a")).unwrap();
        let id = JobId::parse("a").unwrap();
        let mut slow = bus.subscribe(&id).unwrap();
        let mut fast = bus.subscribe(&id).unwrap();
        assert!(fast.recv().await.is_some());

        bus.transition(&id, ClipStatus::Running).unwrap();
        for i in 1..=5 {
            bus.update(&id, |j| j.add_bytes_sent(i)).unwrap();
            // Fast subscriber keeps draining.
            assert!(fast.recv().await.is_some());
        }
        assert_eq!(fast.recv().await.map(|p| decode(&p).transfer.bytes_sent), Some(15));

        // Slow subscriber holds the initial snapshot plus one update.
        let a = decode(&slow.recv().await.unwrap());
        let b = decode(&slow.recv().await.unwrap());
        assert!(a.event_seq < b.event_seq);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_closed_on_terminal() {
        let bus = ProgressBus::new(BusConfig {
            subscriber_buffer: 1,
            ..Default::default()
        });
        bus.register(job("a")).unwrap();
        let id = JobId::parse("a").unwrap();
        let mut sub = bus.subscribe(&id).unwrap();

        bus.transition(&id, ClipStatus::Running).unwrap();
        bus.cancel(&id).unwrap();

        assert_eq!(decode(&sub.recv().await.unwrap()).status, ClipStatus::Starting);
        assert!(sub.recv().await.is_none());
        assert_eq!(bus.snapshot(&id).unwrap().status, ClipStatus::Canceled);
    }

    #[test]
    fn test_sweep_respects_retention_and_subscribers() {
        let bus = bus_with_retention(Duration::ZERO);
        bus.register(job("done")).unwrap();
        bus.register(job("running")).unwrap();
        bus.register(job("watched")).unwrap();

        let done = JobId::parse("done").unwrap();
        let watched = JobId::parse("watched").unwrap();
        bus.cancel(&done).unwrap();

        let sub = bus.subscribe(&watched).unwrap();
        bus.cancel(&watched).unwrap();
        // Terminal broadcast went through, so the subscriber is still attached.
        assert_eq!(bus.sweep(), 1);
        assert!(bus.snapshot(&done).is_none());
        assert!(bus.snapshot(&watched).is_some());

        drop(sub);
        assert!(bus.snapshot(&watched).is_none());
        assert_eq!(bus.len(), 1);
    }

    #[test]
    fn test_sweep_keeps_recent_terminal_jobs() {
        let bus = bus_with_retention(Duration::from_secs(3600));
        bus.register(job("a")).unwrap();
        let id = JobId::parse("a").unwrap();
        bus.cancel(&id).unwrap();
        assert_eq!(bus.sweep(), 0);
        assert!(bus.snapshot(&id).is_some());
    }

    #[tokio::test]
    async fn test_shutdown_ends_feeds() {
        let bus = ProgressBus::default();
        bus.register(job("a")).unwrap();
        let id = JobId::parse("a").unwrap();
        let mut sub = bus.subscribe(&id).unwrap();
        assert!(sub.recv().await.is_some());

        bus.shutdown();
        assert!(sub.recv().await.is_none());
        assert!(matches!(bus.register(job("b")), Err(ProgressError::ShutDown)));
        assert!(matches!(bus.subscribe(&id), Err(ProgressError::ShutDown)));
    }
}
