//! PlateStatusPoller - Per-plate Task Status Polling
//!
//! ## Responsibilities
//!
//! - Query `/check_task_status/{plate}` for every tracked plate each cycle
//! - Reduce answers to inactive / active / running in the store
//! - Keep the previous status on transient failures
//!
//! Plates are queried concurrently; a slow or failing plate does not hold
//! back the others. Cycles never overlap, so a plate has at most one query
//! in flight.

use crate::reconciliation_store::{ReconciliationStore, WriteOutcome};
use crate::scheduled_task::ScheduledTask;
use crate::task_client::{PollResult, TaskApi};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

/// Per-cycle counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleStats {
    pub polled: u32,
    pub applied: u32,
    pub unchanged: u32,
    pub stale: u32,
    /// Plate dropped from the set while its query was in flight
    pub untracked: u32,
    /// Transient failures (network, 5xx, malformed body)
    pub failed: u32,
}

/// PlateStatusPoller instance
pub struct PlateStatusPoller {
    api: Arc<dyn TaskApi>,
    store: Arc<ReconciliationStore>,
    interval: Duration,
    refresh: Arc<Notify>,
    task: Mutex<Option<ScheduledTask>>,
}

impl PlateStatusPoller {
    /// Create new PlateStatusPoller
    pub fn new(api: Arc<dyn TaskApi>, store: Arc<ReconciliationStore>, interval: Duration) -> Self {
        Self {
            api,
            store,
            interval,
            refresh: Arc::new(Notify::new()),
            task: Mutex::new(None),
        }
    }

    /// Trigger that runs a cycle ahead of schedule (plate set changed)
    pub fn refresh_handle(&self) -> Arc<Notify> {
        self.refresh.clone()
    }

    pub fn request_refresh(&self) {
        self.refresh.notify_one();
    }

    /// Start polling loop
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            tracing::warn!("Plate status polling already running");
            return;
        }

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Starting plate status poller"
        );

        let api = self.api.clone();
        let store = self.store.clone();
        *task = Some(ScheduledTask::spawn(
            "plate_status_poller",
            self.interval,
            Some(self.refresh.clone()),
            move || {
                let api = api.clone();
                let store = store.clone();
                async move {
                    Self::poll_cycle(api.as_ref(), &store).await;
                }
            },
        ));
    }

    /// Stop polling loop; in-flight queries are dropped unapplied
    pub async fn stop(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.stop().await;
            tracing::info!("Plate status poller stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    /// Run one cycle over the current tracked set
    pub async fn poll_cycle(api: &dyn TaskApi, store: &ReconciliationStore) -> CycleStats {
        let plates = store.distinct_tracked_plates().await;
        if plates.is_empty() {
            tracing::debug!("No tracked plates to poll");
            return CycleStats::default();
        }

        let results = join_all(plates.iter().map(|plate| async move {
            let seq = store.next_seq();
            let result = api.check_task_status(plate).await;

            if let PollResult::TransientError(e) = &result {
                tracing::warn!(
                    plate = %plate,
                    error = %e,
                    "Plate status query failed, keeping previous status"
                );
            }

            let outcome = store.apply_plate_poll(plate, seq, &result).await;
            (result.is_transient(), outcome)
        }))
        .await;

        let mut stats = CycleStats {
            polled: plates.len() as u32,
            ..Default::default()
        };
        for (failed, outcome) in results {
            if failed {
                stats.failed += 1;
            }
            match outcome {
                WriteOutcome::Applied => stats.applied += 1,
                WriteOutcome::Unchanged => stats.unchanged += 1,
                WriteOutcome::Stale => stats.stale += 1,
                WriteOutcome::Untracked => stats.untracked += 1,
                WriteOutcome::Closed => {}
            }
        }

        tracing::debug!(
            polled = stats.polled,
            applied = stats.applied,
            failed = stats.failed,
            stale = stats.stale,
            "Plate status cycle complete"
        );

        stats
    }
}
