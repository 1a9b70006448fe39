//! ActivePlatePoller - Status of the Designated Active Plate
//!
//! ## Responsibilities
//!
//! - Follow the store's active designation
//! - While a plate is designated, poll its parking status and remaining time
//! - Tear the timer down the moment the designation is cleared or moves
//!
//! Absence is reported as "not running"; the poller never clears the
//! designation itself. Only the user (through the dispatcher) does that.

use crate::error::Error;
use crate::reconciliation_store::{LicensePlate, ReconciliationStore, WriteOutcome};
use crate::scheduled_task::ScheduledTask;
use crate::task_client::{ParkingReport, PollResult, TaskApi};
use chrono::Utc;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Which endpoint reports the active plate's status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveStatusSource {
    /// `GET /check_task_status/{plate}`; no remaining time
    TaskStatus,
    /// `GET /parking_status?license_plate={plate}`; with remaining time
    ParkingStatus,
}

impl ActiveStatusSource {
    pub async fn fetch(&self, api: &dyn TaskApi, plate: &str) -> PollResult<ParkingReport> {
        match self {
            Self::TaskStatus => api.check_task_status(plate).await.map(ParkingReport::from),
            Self::ParkingStatus => api.parking_status(plate).await,
        }
    }
}

impl FromStr for ActiveStatusSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "task_status" => Ok(Self::TaskStatus),
            "parking_status" => Ok(Self::ParkingStatus),
            other => Err(Error::Config(format!(
                "Unknown active status source '{}' (expected task_status or parking_status)",
                other
            ))),
        }
    }
}

struct Supervisor {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// ActivePlatePoller instance
pub struct ActivePlatePoller {
    api: Arc<dyn TaskApi>,
    store: Arc<ReconciliationStore>,
    interval: Duration,
    source: ActiveStatusSource,
    supervisor: Mutex<Option<Supervisor>>,
}

impl ActivePlatePoller {
    /// Create new ActivePlatePoller
    pub fn new(
        api: Arc<dyn TaskApi>,
        store: Arc<ReconciliationStore>,
        interval: Duration,
        source: ActiveStatusSource,
    ) -> Self {
        Self {
            api,
            store,
            interval,
            source,
            supervisor: Mutex::new(None),
        }
    }

    /// Start following the active designation
    pub async fn start(&self) {
        let mut supervisor = self.supervisor.lock().await;
        if supervisor
            .as_ref()
            .map(|s| !s.handle.is_finished())
            .unwrap_or(false)
        {
            tracing::warn!("Active plate poller already running");
            return;
        }

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            source = ?self.source,
            "Starting active plate poller"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(supervise(
            self.api.clone(),
            self.store.clone(),
            self.interval,
            self.source,
            shutdown_rx,
        ));

        *supervisor = Some(Supervisor {
            shutdown_tx,
            handle,
        });
    }

    /// Stop following; any per-plate timer is torn down
    pub async fn stop(&self) {
        if let Some(supervisor) = self.supervisor.lock().await.take() {
            let _ = supervisor.shutdown_tx.send(true);
            if let Err(e) = supervisor.handle.await {
                if !e.is_cancelled() {
                    tracing::error!(error = %e, "Active plate supervisor panicked");
                }
            }
            tracing::info!("Active plate poller stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.supervisor
            .lock()
            .await
            .as_ref()
            .map(|s| !s.handle.is_finished())
            .unwrap_or(false)
    }

    /// One status query for `plate`
    pub async fn poll_once(
        api: &dyn TaskApi,
        store: &ReconciliationStore,
        source: ActiveStatusSource,
        plate: &str,
    ) -> WriteOutcome {
        let seq = store.next_seq();
        let result = source.fetch(api, plate).await;

        match &result {
            PollResult::TransientError(e) => {
                tracing::warn!(plate = %plate, error = %e, "Active plate status query failed");
            }
            PollResult::NotFound => {
                tracing::info!(plate = %plate, "No parking task for active plate");
            }
            PollResult::Ok(report) => {
                tracing::debug!(plate = %plate, status = ?report.status, remaining = ?report.remaining, "Active plate status");
            }
        }

        store
            .apply_active_poll(plate, seq, &result, Utc::now())
            .await
    }
}

/// Keep exactly one per-plate timer alive, matching the designation
async fn supervise(
    api: Arc<dyn TaskApi>,
    store: Arc<ReconciliationStore>,
    interval: Duration,
    source: ActiveStatusSource,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut active_rx = store.subscribe_active();
    let mut current: Option<(LicensePlate, ScheduledTask)> = None;

    loop {
        let designated = active_rx.borrow_and_update().clone();
        let watching = current.as_ref().map(|(plate, _)| plate.clone());

        if designated != watching {
            if let Some((plate, mut task)) = current.take() {
                task.cancel();
                tracing::debug!(plate = %plate, "Active plate timer torn down");
            }

            if let Some(plate) = designated {
                tracing::debug!(plate = %plate, "Active plate timer started");
                let task = {
                    let api = api.clone();
                    let store = store.clone();
                    let plate = plate.clone();
                    ScheduledTask::spawn("active_plate_poller", interval, None, move || {
                        let api = api.clone();
                        let store = store.clone();
                        let plate = plate.clone();
                        async move {
                            ActivePlatePoller::poll_once(api.as_ref(), &store, source, &plate)
                                .await;
                        }
                    })
                };
                current = Some((plate, task));
            }
        }

        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            changed = active_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    if let Some((_, mut task)) = current.take() {
        task.cancel();
    }
}
