//! ReconciliationStore - Shared Observable State
//!
//! ## Responsibilities
//!
//! - Hold the tracked plate set and one status per tracked plate
//! - Hold the singleton detection state and the active-plate snapshot
//! - Serialise writes per key with last-issued-wins sequence stamps
//! - Notify observers (UI, active-plate supervisor) on every change
//!
//! Pollers write here and never talk to each other. Every write carries a
//! `Seq`: a poll takes one when its query is issued, an optimistic write
//! takes one when it is applied. A completion whose `Seq` is not newer than
//! the key's current stamp is discarded.

mod reduce;
mod types;

pub use reduce::{reduce_detection, reduce_parking, reduce_plate};
pub use types::*;

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{watch, RwLock};

use crate::task_client::{DetectionReport, ParkingReport, PlateTaskReport, PollResult};

/// Per-plate slot; exists exactly while the plate is tracked
#[derive(Debug, Clone)]
struct PlateSlot {
    seq: Seq,
    status: Option<TrackedPlateStatus>,
}

#[derive(Debug, Clone)]
struct Stamped<T> {
    seq: Seq,
    value: T,
}

struct StoreInner {
    version: u64,
    tracked: Vec<LicensePlate>,
    plates: HashMap<LicensePlate, PlateSlot>,
    detection: Stamped<DetectionState>,
    active: Option<Stamped<ActivePlateSnapshot>>,
}

/// Process-local reconciliation store
pub struct ReconciliationStore {
    inner: RwLock<StoreInner>,
    seq: AtomicU64,
    closed: AtomicBool,
    version_tx: watch::Sender<u64>,
    active_tx: watch::Sender<Option<LicensePlate>>,
}

impl ReconciliationStore {
    /// Create empty store: nothing tracked, detection stopped, no active plate
    pub fn new() -> Self {
        let (version_tx, _) = watch::channel(0);
        let (active_tx, _) = watch::channel(None);

        Self {
            inner: RwLock::new(StoreInner {
                version: 0,
                tracked: Vec::new(),
                plates: HashMap::new(),
                detection: Stamped {
                    seq: Seq(0),
                    value: DetectionState::stopped(),
                },
                active: None,
            }),
            seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            version_tx,
            active_tx,
        }
    }

    /// Allocate the next write stamp
    pub fn next_seq(&self) -> Seq {
        Seq(self.seq.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Version counter, bumped on every applied write
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }

    /// Active designation (plate only, not its status)
    pub fn subscribe_active(&self) -> watch::Receiver<Option<LicensePlate>> {
        self.active_tx.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop accepting writes; late poll completions become `Closed`
    pub async fn close(&self) {
        let _guard = self.inner.write().await;
        self.closed.store(true, Ordering::SeqCst);
        tracing::info!("Reconciliation store closed");
    }

    fn bump(&self, inner: &mut StoreInner) {
        inner.version += 1;
        self.version_tx.send_replace(inner.version);
    }

    fn publish_active(&self, inner: &StoreInner) {
        let plate = inner.active.as_ref().map(|a| a.value.plate.clone());
        self.active_tx.send_if_modified(|current| {
            if *current != plate {
                *current = plate;
                true
            } else {
                false
            }
        });
    }

    // ========================================
    // Reads
    // ========================================

    pub async fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.read().await;
        let mut seen = Vec::new();
        let plates = inner
            .tracked
            .iter()
            .filter(|p| {
                if seen.contains(p) {
                    false
                } else {
                    seen.push(*p);
                    true
                }
            })
            .map(|p| PlateEntry {
                plate: p.clone(),
                status: inner.plates.get(p).and_then(|s| s.status.clone()),
            })
            .collect();

        StoreSnapshot {
            version: inner.version,
            tracked_plates: inner.tracked.clone(),
            plates,
            detection: inner.detection.value.clone(),
            active_plate: inner.active.as_ref().map(|a| a.value.clone()),
        }
    }

    /// Tracked plates in insertion order, duplicates included
    pub async fn tracked_plates(&self) -> Vec<LicensePlate> {
        self.inner.read().await.tracked.clone()
    }

    /// Tracked plates with duplicates collapsed (one query per plate)
    pub async fn distinct_tracked_plates(&self) -> Vec<LicensePlate> {
        let inner = self.inner.read().await;
        let mut out: Vec<LicensePlate> = Vec::with_capacity(inner.tracked.len());
        for plate in &inner.tracked {
            if !out.contains(plate) {
                out.push(plate.clone());
            }
        }
        out
    }

    pub async fn is_tracked(&self, plate: &str) -> bool {
        self.inner.read().await.plates.contains_key(plate)
    }

    pub async fn plate_status(&self, plate: &str) -> Option<TrackedPlateStatus> {
        self.inner
            .read()
            .await
            .plates
            .get(plate)
            .and_then(|s| s.status.clone())
    }

    pub async fn detection(&self) -> DetectionState {
        self.inner.read().await.detection.value.clone()
    }

    pub async fn active_plate(&self) -> Option<ActivePlateSnapshot> {
        self.inner
            .read()
            .await
            .active
            .as_ref()
            .map(|a| a.value.clone())
    }

    // ========================================
    // Tracked set
    // ========================================

    /// Replace the tracked set and the active designation (profile load)
    ///
    /// Slots of plates that stay tracked keep their status. A designation
    /// naming an untracked plate is dropped.
    pub async fn replace_tracked(
        &self,
        plates: Vec<LicensePlate>,
        active: Option<LicensePlate>,
    ) -> WriteOutcome {
        let mut inner = self.inner.write().await;
        if self.is_closed() {
            return WriteOutcome::Closed;
        }

        inner.plates.retain(|p, _| plates.contains(p));
        for plate in &plates {
            if !inner.plates.contains_key(plate) {
                let seq = self.next_seq();
                inner.plates.insert(plate.clone(), PlateSlot { seq, status: None });
            }
        }
        inner.tracked = plates;

        let active = match active {
            Some(plate) if inner.plates.contains_key(&plate) => Some(plate),
            Some(plate) => {
                tracing::warn!(
                    plate = %plate,
                    "Active plate is not in the plate set, dropping designation"
                );
                None
            }
            None => None,
        };

        let keep_current = matches!(
            (&inner.active, &active),
            (Some(current), Some(next)) if current.value.plate == *next
        );
        if !keep_current {
            inner.active = active.map(|plate| Stamped {
                seq: self.next_seq(),
                value: ActivePlateSnapshot::designated(plate),
            });
        }

        self.bump(&mut inner);
        self.publish_active(&inner);
        WriteOutcome::Applied
    }

    /// Start tracking a plate; a duplicate entry is kept as-is
    pub async fn track_plate(&self, plate: &str) -> WriteOutcome {
        let mut inner = self.inner.write().await;
        if self.is_closed() {
            return WriteOutcome::Closed;
        }

        inner.tracked.push(plate.to_string());
        if !inner.plates.contains_key(plate) {
            let seq = self.next_seq();
            inner
                .plates
                .insert(plate.to_string(), PlateSlot { seq, status: None });
        }

        self.bump(&mut inner);
        WriteOutcome::Applied
    }

    /// Stop tracking every occurrence of a plate
    ///
    /// If the plate is the active plate the designation is cleared in the
    /// same write; returns whether that happened.
    pub async fn untrack_plate(&self, plate: &str) -> (WriteOutcome, bool) {
        let mut inner = self.inner.write().await;
        if self.is_closed() {
            return (WriteOutcome::Closed, false);
        }
        if !inner.plates.contains_key(plate) {
            return (WriteOutcome::Untracked, false);
        }

        inner.tracked.retain(|p| p != plate);
        inner.plates.remove(plate);

        let cleared_active = matches!(&inner.active, Some(a) if a.value.plate == plate);
        if cleared_active {
            inner.active = None;
        }

        self.bump(&mut inner);
        self.publish_active(&inner);
        (WriteOutcome::Applied, cleared_active)
    }

    // ========================================
    // Plate status
    // ========================================

    /// Apply a plate poll issued with `seq`
    pub async fn apply_plate_poll(
        &self,
        plate: &str,
        seq: Seq,
        result: &PollResult<PlateTaskReport>,
    ) -> WriteOutcome {
        let mut inner = self.inner.write().await;
        if self.is_closed() {
            return WriteOutcome::Closed;
        }

        let Some(slot) = inner.plates.get_mut(plate) else {
            return WriteOutcome::Untracked;
        };
        if seq <= slot.seq {
            tracing::debug!(plate = %plate, seq = seq.0, current = slot.seq.0, "Discarding stale plate poll");
            return WriteOutcome::Stale;
        }

        let Some(next) = reduce_plate(slot.status.as_ref(), result) else {
            return WriteOutcome::Unchanged;
        };

        slot.seq = seq;
        slot.status = Some(next);
        self.bump(&mut inner);
        WriteOutcome::Applied
    }

    /// Optimistic plate status write ahead of the next poll
    pub async fn set_plate_status(&self, plate: &str, status: TrackedPlateStatus) -> WriteOutcome {
        let mut inner = self.inner.write().await;
        if self.is_closed() {
            return WriteOutcome::Closed;
        }

        let seq = self.next_seq();
        let Some(slot) = inner.plates.get_mut(plate) else {
            return WriteOutcome::Untracked;
        };
        slot.seq = seq;
        slot.status = Some(status);

        self.bump(&mut inner);
        WriteOutcome::Applied
    }

    // ========================================
    // Detection
    // ========================================

    /// Apply a detection poll issued with `seq`
    pub async fn apply_detection_poll(
        &self,
        seq: Seq,
        result: &PollResult<DetectionReport>,
        now: DateTime<Utc>,
        pending_grace: Duration,
    ) -> WriteOutcome {
        let mut inner = self.inner.write().await;
        if self.is_closed() {
            return WriteOutcome::Closed;
        }
        if seq <= inner.detection.seq {
            tracing::debug!(seq = seq.0, current = inner.detection.seq.0, "Discarding stale detection poll");
            return WriteOutcome::Stale;
        }

        let Some(next) = reduce_detection(&inner.detection.value, result, now, pending_grace)
        else {
            // A real answer that changes nothing still supersedes older queries
            if !result.is_transient() {
                inner.detection.seq = seq;
            }
            return WriteOutcome::Unchanged;
        };

        tracing::info!(
            from = ?inner.detection.value.phase,
            to = ?next.phase,
            task_id = ?next.task_id,
            "Detection state changed"
        );
        inner.detection = Stamped { seq, value: next };
        self.bump(&mut inner);
        WriteOutcome::Applied
    }

    /// Optimistic detection write; returns the stamp it was written with
    pub async fn set_detection(&self, state: DetectionState) -> (WriteOutcome, Seq) {
        let mut inner = self.inner.write().await;
        let seq = self.next_seq();
        if self.is_closed() {
            return (WriteOutcome::Closed, seq);
        }

        inner.detection = Stamped { seq, value: state };
        self.bump(&mut inner);
        (WriteOutcome::Applied, seq)
    }

    /// Undo an optimistic detection write, unless something newer landed
    pub async fn restore_detection(&self, expected: Seq, prior: DetectionState) -> WriteOutcome {
        let mut inner = self.inner.write().await;
        if self.is_closed() {
            return WriteOutcome::Closed;
        }
        if inner.detection.seq != expected {
            return WriteOutcome::Stale;
        }

        let seq = self.next_seq();
        inner.detection = Stamped { seq, value: prior };
        self.bump(&mut inner);
        WriteOutcome::Applied
    }

    // ========================================
    // Active plate
    // ========================================

    /// Designate the active plate; the plate must be tracked
    pub async fn designate_active(&self, plate: &str) -> WriteOutcome {
        let mut inner = self.inner.write().await;
        if self.is_closed() {
            return WriteOutcome::Closed;
        }
        if !inner.plates.contains_key(plate) {
            return WriteOutcome::Untracked;
        }
        if matches!(&inner.active, Some(a) if a.value.plate == plate) {
            return WriteOutcome::Unchanged;
        }

        inner.active = Some(Stamped {
            seq: self.next_seq(),
            value: ActivePlateSnapshot::designated(plate),
        });
        tracing::info!(plate = %plate, "Active plate designated");

        self.bump(&mut inner);
        self.publish_active(&inner);
        WriteOutcome::Applied
    }

    /// Tear down the active snapshot
    pub async fn clear_active(&self) -> WriteOutcome {
        let mut inner = self.inner.write().await;
        if self.is_closed() {
            return WriteOutcome::Closed;
        }
        let Some(previous) = inner.active.take() else {
            return WriteOutcome::Unchanged;
        };
        tracing::info!(plate = %previous.value.plate, "Active plate cleared");

        self.bump(&mut inner);
        self.publish_active(&inner);
        WriteOutcome::Applied
    }

    /// Apply an active-plate poll issued with `seq` for `plate`
    ///
    /// Discarded when the designation was cleared or moved meanwhile.
    pub async fn apply_active_poll(
        &self,
        plate: &str,
        seq: Seq,
        result: &PollResult<ParkingReport>,
        now: DateTime<Utc>,
    ) -> WriteOutcome {
        let mut inner = self.inner.write().await;
        if self.is_closed() {
            return WriteOutcome::Closed;
        }

        let Some(active) = inner.active.as_mut() else {
            return WriteOutcome::Untracked;
        };
        if active.value.plate != plate {
            return WriteOutcome::Untracked;
        }
        if seq <= active.seq {
            return WriteOutcome::Stale;
        }

        let Some(next) = reduce_parking(&active.value, result, now) else {
            return WriteOutcome::Unchanged;
        };
        active.seq = seq;
        active.value = next;

        self.bump(&mut inner);
        WriteOutcome::Applied
    }
}

impl Default for ReconciliationStore {
    fn default() -> Self {
        Self::new()
    }
}
