//! Reconciliation Store Type Definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task_client::ParkingStatus;

/// Opaque, case-preserved license plate identifier
pub type LicensePlate = String;

/// Monotonic write stamp
///
/// Polls take one at issuance; optimistic writes take one at write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Seq(pub u64);

/// Three-state plate status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlateStatus {
    /// Confirmed: no task exists
    Inactive,
    /// Task exists, not yet confirmed running
    Active,
    /// Task confirmed running
    Running,
}

/// Status of one tracked plate, replaced wholesale on every poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedPlateStatus {
    pub status: PlateStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl TrackedPlateStatus {
    pub fn inactive() -> Self {
        Self {
            status: PlateStatus::Inactive,
            task_id: None,
        }
    }

    pub fn active() -> Self {
        Self {
            status: PlateStatus::Active,
            task_id: None,
        }
    }

    pub fn running(task_id: Option<String>) -> Self {
        Self {
            status: PlateStatus::Running,
            task_id,
        }
    }
}

/// Global detection lifecycle: stopped -> pending -> running -> stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionPhase {
    Stopped,
    /// Set only by the start command
    Pending,
    Running,
}

impl Default for DetectionPhase {
    fn default() -> Self {
        Self::Stopped
    }
}

/// Singleton detection state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionState {
    pub phase: DetectionPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Lower-cased `state` string the backend reported with the task
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_since: Option<DateTime<Utc>>,
}

impl DetectionState {
    pub fn stopped() -> Self {
        Self::default()
    }

    pub fn pending(now: DateTime<Utc>) -> Self {
        Self {
            phase: DetectionPhase::Pending,
            task_id: None,
            server_state: None,
            pending_since: Some(now),
        }
    }

    pub fn running(task_id: Option<String>, server_state: Option<String>) -> Self {
        Self {
            phase: DetectionPhase::Running,
            task_id,
            server_state,
            pending_since: None,
        }
    }
}

/// The single designated active plate and what its poller last saw
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivePlateSnapshot {
    pub plate: LicensePlate,
    pub status: ParkingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_polled_at: Option<DateTime<Utc>>,
}

impl ActivePlateSnapshot {
    pub fn designated(plate: impl Into<LicensePlate>) -> Self {
        Self {
            plate: plate.into(),
            status: ParkingStatus::Unknown,
            remaining_secs: None,
            last_polled_at: None,
        }
    }
}

/// Result of a store write attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Value written and version bumped
    Applied,
    /// Reducer chose to keep the prior value (transient error)
    Unchanged,
    /// A newer write already landed for this key
    Stale,
    /// Key no longer exists (plate untracked / designation cleared or moved)
    Untracked,
    /// Store closed on teardown
    Closed,
}

/// Serialisable view of the whole store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u64,
    pub tracked_plates: Vec<LicensePlate>,
    pub plates: Vec<PlateEntry>,
    pub detection: DetectionState,
    pub active_plate: Option<ActivePlateSnapshot>,
}

/// One row of `StoreSnapshot::plates`; `status` is `None` until first poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlateEntry {
    pub plate: LicensePlate,
    pub status: Option<TrackedPlateStatus>,
}
