//! Watcher Loop: polls the coordinator for pending jobs and dispatches
//! them to a [`JobRunner`], sequentially, with a configurable batch width.
//!
//! Grounded on `original_source/watcher.py`'s `Watcher`/`JobWatcher`.
//! Supplemented with a graceful-shutdown select, grounded on the
//! teacher's `daemon.rs` (`tokio::select! { _ = shutdown_rx.recv() => ... }`).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::coordinator::CoordinatorClient;
use crate::job_runner::JobRunner;

/// Signal broadcast to stop the watcher loop after the in-flight batch finishes.
#[derive(Debug, Clone)]
pub struct ShutdownSignal;

/// Polling cadence and per-iteration batch width.
#[derive(Debug, Clone, Copy)]
pub struct WatcherConfig {
    pub sleep_interval: Duration,
    pub batch_width: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            sleep_interval: Duration::from_secs(5),
            batch_width: 1,
        }
    }
}

/// Long-running poller driving one [`JobRunner`] per pending job.
pub struct Watcher {
    coordinator: Arc<CoordinatorClient>,
    job_runner: Arc<JobRunner>,
    config: WatcherConfig,
}

impl Watcher {
    pub fn new(coordinator: Arc<CoordinatorClient>, job_runner: Arc<JobRunner>, config: WatcherConfig) -> Self {
        Self {
            coordinator,
            job_runner,
            config,
        }
    }

    /// Run until `shutdown_rx` fires. Finishes the in-flight batch before
    /// returning rather than aborting mid-job, so a Runnable always
    /// reaches teardown.
    pub async fn watch(&self, mut shutdown_rx: broadcast::Receiver<ShutdownSignal>) {
        let mut more = false;
        loop {
            if !more {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.sleep_interval) => {}
                    _ = shutdown_rx.recv() => {
                        info!("shutdown signal received, stopping watcher");
                        return;
                    }
                }
            }

            match self.coordinator.pending_jobs().await {
                Ok(jobs) => {
                    more = self.handle(jobs).await;
                }
                Err(e) => {
                    warn!(error = %e, "failed to poll coordinator");
                    more = false;
                }
            }

            if let Ok(ShutdownSignal) = shutdown_rx.try_recv() {
                info!("shutdown signal received, stopping watcher");
                return;
            }
        }
    }

    /// Runs up to `batch_width` jobs sequentially; returns whether more
    /// jobs remained in the batch than were processed (signals immediate re-poll).
    async fn handle(&self, jobs: Vec<crate::model::Job>) -> bool {
        if jobs.is_empty() {
            return false;
        }

        let width = self.config.batch_width.max(1);
        let (batch, rest) = if jobs.len() > width {
            jobs.split_at(width)
        } else {
            (&jobs[..], &jobs[0..0])
        };

        for job in batch {
            self.job_runner.run(job.clone()).await;
        }

        !rest.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_source_constants() {
        let config = WatcherConfig::default();
        assert_eq!(config.sleep_interval, Duration::from_secs(5));
        assert_eq!(config.batch_width, 1);
    }
}
