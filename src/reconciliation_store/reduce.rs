//! Pure reductions `(prior, poll result) -> new state`
//!
//! `None` means "leave the stored value as it is". Only transient errors
//! (and a few no-op cases) produce `None`; absence is a real answer.

use chrono::{DateTime, Duration, Utc};

use super::types::*;
use crate::task_client::{DetectionReport, ParkingReport, ParkingStatus, PlateTaskReport, PollResult};

/// Reduce a plate task poll
pub fn reduce_plate(
    _prior: Option<&TrackedPlateStatus>,
    result: &PollResult<PlateTaskReport>,
) -> Option<TrackedPlateStatus> {
    match result {
        PollResult::Ok(PlateTaskReport::Active) => Some(TrackedPlateStatus::active()),
        PollResult::Ok(PlateTaskReport::Running { task_id }) => {
            Some(TrackedPlateStatus::running(task_id.clone()))
        }
        PollResult::NotFound => Some(TrackedPlateStatus::inactive()),
        PollResult::TransientError(_) => None,
    }
}

/// Reduce a detection poll
///
/// - present -> running, from any phase
/// - absent while running -> stopped
/// - absent while pending -> stopped once `pending_grace` has elapsed
/// - absent while stopped -> no change
pub fn reduce_detection(
    prior: &DetectionState,
    result: &PollResult<DetectionReport>,
    now: DateTime<Utc>,
    pending_grace: Duration,
) -> Option<DetectionState> {
    let present = match result {
        PollResult::TransientError(_) => return None,
        PollResult::Ok(DetectionReport::Present {
            task_id,
            server_state,
        }) => Some((task_id, server_state)),
        PollResult::Ok(DetectionReport::Absent) | PollResult::NotFound => None,
    };

    match (prior.phase, present) {
        (_, Some((task_id, server_state))) => {
            let next = DetectionState::running(task_id.clone(), server_state.clone());
            (next != *prior).then_some(next)
        }
        (DetectionPhase::Running, None) => Some(DetectionState::stopped()),
        (DetectionPhase::Pending, None) => {
            let expired = prior
                .pending_since
                .map(|since| now - since >= pending_grace)
                .unwrap_or(true);
            expired.then(DetectionState::stopped)
        }
        (DetectionPhase::Stopped, None) => None,
    }
}

/// Reduce an active-plate poll into the existing snapshot
///
/// Absence reports "not running" but keeps the designation.
pub fn reduce_parking(
    prior: &ActivePlateSnapshot,
    result: &PollResult<ParkingReport>,
    now: DateTime<Utc>,
) -> Option<ActivePlateSnapshot> {
    let (status, remaining_secs) = match result {
        PollResult::Ok(report) => (report.status, report.remaining.map(|d| d.as_secs())),
        PollResult::NotFound => (ParkingStatus::NotRunning, None),
        PollResult::TransientError(_) => return None,
    };

    Some(ActivePlateSnapshot {
        plate: prior.plate.clone(),
        status,
        remaining_secs,
        last_polled_at: Some(now),
    })
}
