//! Background service that evicts finished jobs from the registry.
//!
//! Terminal jobs stay queryable for the configured retention so late
//! pollers still see the outcome. Entries with a live subscriber are kept
//! until it detaches.

use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, info};

use vodclip_progress::ProgressBus;

use crate::metrics;

/// Interval between sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Registry sweeper.
pub struct JobReaper {
    bus: ProgressBus,
    enabled: bool,
}

impl JobReaper {
    pub fn new(bus: ProgressBus) -> Self {
        let enabled = std::env::var("ENABLE_JOB_REAPER")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true);

        Self { bus, enabled }
    }

    /// Start the sweep loop.
    ///
    /// This function runs indefinitely and should be spawned as a background task.
    pub async fn run(&self) {
        if !self.enabled {
            info!("Job reaper is disabled");
            return;
        }

        info!(
            "Starting job reaper (interval: {:?}, retention: {:?})",
            SWEEP_INTERVAL,
            self.bus.config().retention
        );

        let mut ticker = interval(SWEEP_INTERVAL);

        loop {
            ticker.tick().await;
            self.reap_once();
        }
    }

    /// Run a single sweep; returns the number of evicted jobs.
    pub fn reap_once(&self) -> usize {
        let evicted = self.bus.sweep();
        metrics::set_active_jobs(self.bus.active_count());

        if evicted > 0 {
            metrics::record_jobs_evicted(evicted);
            debug!(evicted, remaining = self.bus.len(), "Evicted finished jobs");
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vodclip_models::{ClipJob, ClipStatus, CodecProfile, DeliveryMode, JobId, RequestedWindow};
    use vodclip_progress::BusConfig;

    fn job(id: &str) -> ClipJob {
        ClipJob::new(
            JobId::parse(id).unwrap(),
            "lecture-01",
            RequestedWindow {
                start: 0.0,
                end: 10.0,
            },
            DeliveryMode::Streamed,
            CodecProfile::Remux,
        )
    }

    #[test]
    fn test_reap_evicts_only_finished_jobs() {
        let bus = ProgressBus::new(BusConfig {
            retention: Duration::ZERO,
            ..BusConfig::default()
        });
        bus.register(job("finished")).unwrap();
        bus.register(job("running")).unwrap();

        let finished = JobId::parse("finished").unwrap();
        bus.transition(&finished, ClipStatus::Running).unwrap();
        bus.transition(&finished, ClipStatus::Done).unwrap();

        let reaper = JobReaper::new(bus.clone());
        assert_eq!(reaper.reap_once(), 1);
        assert!(bus.snapshot(&finished).is_none());
        assert!(bus.snapshot(&JobId::parse("running").unwrap()).is_some());
    }
}
