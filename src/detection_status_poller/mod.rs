//! DetectionStatusPoller - Global Detection Task Polling
//!
//! Confirms optimistic `pending` as `running` once the backend reports the
//! detection task, and `running` as `stopped` once it reports absence.
//! Transient failures leave the state alone.

use crate::reconciliation_store::{ReconciliationStore, WriteOutcome};
use crate::scheduled_task::ScheduledTask;
use crate::task_client::{PollResult, TaskApi};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// DetectionStatusPoller instance
pub struct DetectionStatusPoller {
    api: Arc<dyn TaskApi>,
    store: Arc<ReconciliationStore>,
    interval: Duration,
    pending_grace: chrono::Duration,
    task: Mutex<Option<ScheduledTask>>,
}

impl DetectionStatusPoller {
    /// Create new DetectionStatusPoller
    pub fn new(api: Arc<dyn TaskApi>, store: Arc<ReconciliationStore>, interval: Duration) -> Self {
        Self {
            api,
            store,
            interval,
            pending_grace: chrono::Duration::zero(),
            task: Mutex::new(None),
        }
    }

    /// Keep `pending` through absent polls for this long after the start command
    pub fn with_pending_grace(mut self, grace: Duration) -> Self {
        self.pending_grace =
            chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero());
        self
    }

    /// Start polling loop
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            tracing::warn!("Detection status polling already running");
            return;
        }

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Starting detection status poller"
        );

        let api = self.api.clone();
        let store = self.store.clone();
        let grace = self.pending_grace;
        *task = Some(ScheduledTask::spawn(
            "detection_status_poller",
            self.interval,
            None,
            move || {
                let api = api.clone();
                let store = store.clone();
                async move {
                    Self::poll_once(api.as_ref(), &store, grace).await;
                }
            },
        ));
    }

    /// Stop polling loop
    pub async fn stop(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.stop().await;
            tracing::info!("Detection status poller stopped");
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

    /// One detection status query
    pub async fn poll_once(
        api: &dyn TaskApi,
        store: &ReconciliationStore,
        pending_grace: chrono::Duration,
    ) -> WriteOutcome {
        let seq = store.next_seq();
        let result = api.detection_status().await;

        if let PollResult::TransientError(e) = &result {
            tracing::warn!(error = %e, "Detection status query failed, keeping previous state");
        }

        store
            .apply_detection_poll(seq, &result, Utc::now(), pending_grace)
            .await
    }
}
