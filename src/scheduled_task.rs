//! ScheduledTask - Cancellable Repeating Timer
//!
//! Runs an async tick function on a fixed period inside one spawned task.
//! Ticks never overlap: the next tick waits for the current one, and ticks
//! missed while a slow cycle was in flight are skipped, not queued.
//!
//! Cancellation races the in-flight tick, so a cancelled task never
//! completes a tick (and never writes its result) after `cancel()`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Handle to a running repeating task; dropping it cancels the task
pub struct ScheduledTask {
    name: &'static str,
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    /// Spawn the loop; the first tick runs immediately
    ///
    /// `trigger`, when given, runs a tick early; the period restarts after it.
    pub fn spawn<F, Fut>(
        name: &'static str,
        period: Duration,
        trigger: Option<Arc<Notify>>,
        mut tick: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            // interval() panics on a zero period
            let mut ticker = interval(period.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::debug!(task = name, period_ms = period.as_millis() as u64, "Scheduled task started");

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {}
                    _ = wait_for(&trigger) => {
                        ticker.reset();
                    }
                }

                if *shutdown_rx.borrow() {
                    break;
                }

                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = tick() => {}
                }
            }

            tracing::debug!(task = name, "Scheduled task stopped");
        });

        Self {
            name,
            shutdown_tx,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map(|h| h.is_finished()).unwrap_or(true)
    }

    /// Signal shutdown and abort the task; idempotent
    pub fn cancel(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Signal shutdown and wait for the loop to exit
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::error!(task = self.name, error = %e, "Scheduled task panicked");
                }
            }
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn wait_for(trigger: &Option<Arc<Notify>>) {
    match trigger {
        Some(notify) => notify.notified().await,
        None => std::future::pending::<()>().await,
    }
}
