//! Task Client Type Definitions
//!
//! Wire shapes returned by the parking backend and the normalised reports
//! the pollers reduce into local state.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of one status query
///
/// Never persisted; only its reduction into a status type is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult<T> {
    /// Server answered with a recognised payload
    Ok(T),
    /// Authoritative absence (404, or a body that says "not found")
    NotFound,
    /// Network failure, timeout, unexpected status or malformed payload
    TransientError(String),
}

impl<T> PollResult<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> PollResult<U> {
        match self {
            PollResult::Ok(v) => PollResult::Ok(f(v)),
            PollResult::NotFound => PollResult::NotFound,
            PollResult::TransientError(e) => PollResult::TransientError(e),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, PollResult::TransientError(_))
    }
}

/// Plate task as reported by `GET /check_task_status/{plate}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlateTaskReport {
    /// Task exists, not yet confirmed running
    Active,
    /// Task confirmed running
    Running { task_id: Option<String> },
}

/// Normalised detection status
///
/// The backend answers `/detection_status` in two shapes
/// (`{status, task_id, state}` or `{detection_active}`); both land here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionReport {
    Present {
        task_id: Option<String>,
        server_state: Option<String>,
    },
    Absent,
}

/// Parking status of a single plate as shown for the active plate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParkingStatus {
    /// Not polled yet, or last poll failed before any answer
    Unknown,
    Active,
    Running,
    NotRunning,
}

impl Default for ParkingStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

/// Status + remaining time for the active plate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParkingReport {
    pub status: ParkingStatus,
    pub remaining: Option<Duration>,
}

impl From<PlateTaskReport> for ParkingReport {
    fn from(report: PlateTaskReport) -> Self {
        let status = match report {
            PlateTaskReport::Active => ParkingStatus::Active,
            PlateTaskReport::Running { .. } => ParkingStatus::Running,
        };
        Self {
            status,
            remaining: None,
        }
    }
}

/// User-issued command failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// Request never got a response (connect error, timeout)
    #[error("network error: {0}")]
    Network(String),
    /// Backend answered with a non-success status
    #[error("backend returned {status}: {message}")]
    Rejected { status: u16, message: String },
    /// Request could not be built (bad base URL, bad plate)
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl CommandError {
    /// Text shown to the user: the backend's message when it sent one
    pub fn user_message(&self) -> &str {
        match self {
            Self::Network(detail) | Self::InvalidRequest(detail) => detail,
            Self::Rejected { message, .. } => message,
        }
    }
}

// ============================================================
// Wire types
// ============================================================

/// `GET /check_task_status/{plate}` body
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TaskStatusResponse {
    pub status: String,
    #[serde(default)]
    pub task_id: Option<String>,
}

impl TaskStatusResponse {
    pub(crate) fn into_poll_result(self) -> PollResult<PlateTaskReport> {
        match self.status.as_str() {
            "active" => PollResult::Ok(PlateTaskReport::Active),
            "running" => PollResult::Ok(PlateTaskReport::Running {
                task_id: self.task_id,
            }),
            "not found" => PollResult::NotFound,
            other => PollResult::TransientError(format!("unrecognised task status '{}'", other)),
        }
    }
}

/// `GET /detection_status` body (union of both observed shapes)
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct DetectionStatusResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub detection_active: Option<bool>,
}

impl DetectionStatusResponse {
    pub(crate) fn normalize(self) -> PollResult<DetectionReport> {
        if let Some(status) = self.status {
            return if status == "active" {
                PollResult::Ok(DetectionReport::Present {
                    task_id: self.task_id,
                    server_state: self.state.map(|s| s.to_lowercase()),
                })
            } else {
                PollResult::Ok(DetectionReport::Absent)
            };
        }

        match self.detection_active {
            Some(true) => {
                tracing::debug!("Detection status answered in boolean shape");
                PollResult::Ok(DetectionReport::Present {
                    task_id: self.task_id,
                    server_state: None,
                })
            }
            Some(false) => {
                tracing::debug!("Detection status answered in boolean shape");
                PollResult::Ok(DetectionReport::Absent)
            }
            None => PollResult::TransientError(
                "detection status body has neither 'status' nor 'detection_active'".to_string(),
            ),
        }
    }
}

/// `GET /parking_status?license_plate=` body
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ParkingStatusResponse {
    pub status: String,
    /// Seconds
    #[serde(default)]
    pub remaining_time: Option<f64>,
}

impl ParkingStatusResponse {
    pub(crate) fn into_poll_result(self) -> PollResult<ParkingReport> {
        let status = match self.status.as_str() {
            "active" => ParkingStatus::Active,
            "running" => ParkingStatus::Running,
            "not running" | "inactive" => ParkingStatus::NotRunning,
            "not found" => return PollResult::NotFound,
            other => {
                return PollResult::TransientError(format!(
                    "unrecognised parking status '{}'",
                    other
                ))
            }
        };

        let remaining = self
            .remaining_time
            .and_then(|secs| Duration::try_from_secs_f64(secs.max(0.0)).ok());

        PollResult::Ok(ParkingReport { status, remaining })
    }
}

/// `POST /activate_parking` body
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ActivateParkingRequest<'a> {
    pub license_plate: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
}

/// Error body the backend attaches to failed commands
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct BackendErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_mapping() {
        let running: TaskStatusResponse =
            serde_json::from_str(r#"{"status":"running","task_id":"t1"}"#).unwrap();
        assert_eq!(
            running.into_poll_result(),
            PollResult::Ok(PlateTaskReport::Running {
                task_id: Some("t1".to_string())
            })
        );

        let absent: TaskStatusResponse = serde_json::from_str(r#"{"status":"not found"}"#).unwrap();
        assert_eq!(absent.into_poll_result(), PollResult::NotFound);

        let odd: TaskStatusResponse = serde_json::from_str(r#"{"status":"exploded"}"#).unwrap();
        assert!(odd.into_poll_result().is_transient());
    }

    #[test]
    fn test_detection_status_object_shape() {
        let body: DetectionStatusResponse =
            serde_json::from_str(r#"{"status":"active","task_id":"d1","state":"RUNNING"}"#)
                .unwrap();
        assert_eq!(
            body.normalize(),
            PollResult::Ok(DetectionReport::Present {
                task_id: Some("d1".to_string()),
                server_state: Some("running".to_string()),
            })
        );

        let idle: DetectionStatusResponse =
            serde_json::from_str(r#"{"status":"inactive"}"#).unwrap();
        assert_eq!(idle.normalize(), PollResult::Ok(DetectionReport::Absent));
    }

    #[test]
    fn test_detection_status_boolean_shape() {
        let on: DetectionStatusResponse =
            serde_json::from_str(r#"{"detection_active":true}"#).unwrap();
        assert!(matches!(
            on.normalize(),
            PollResult::Ok(DetectionReport::Present { .. })
        ));

        let off: DetectionStatusResponse =
            serde_json::from_str(r#"{"detection_active":false}"#).unwrap();
        assert_eq!(off.normalize(), PollResult::Ok(DetectionReport::Absent));
    }

    #[test]
    fn test_detection_status_neither_shape_is_malformed() {
        let body: DetectionStatusResponse = serde_json::from_str(r#"{"foo":1}"#).unwrap();
        assert!(body.normalize().is_transient());
    }

    #[test]
    fn test_parking_status_remaining_time() {
        let body: ParkingStatusResponse =
            serde_json::from_str(r#"{"status":"running","remaining_time":90}"#).unwrap();
        assert_eq!(
            body.into_poll_result(),
            PollResult::Ok(ParkingReport {
                status: ParkingStatus::Running,
                remaining: Some(Duration::from_secs(90)),
            })
        );

        let negative: ParkingStatusResponse =
            serde_json::from_str(r#"{"status":"active","remaining_time":-5}"#).unwrap();
        assert_eq!(
            negative.into_poll_result(),
            PollResult::Ok(ParkingReport {
                status: ParkingStatus::Active,
                remaining: Some(Duration::ZERO),
            })
        );
    }

    #[test]
    fn test_activate_request_omits_missing_duration() {
        let body = ActivateParkingRequest {
            license_plate: "AB123",
            duration_minutes: None,
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"license_plate":"AB123"}"#
        );
    }
}
