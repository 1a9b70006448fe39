//! TaskClient - Parking Backend Adapter
//!
//! ## Responsibilities
//!
//! - Typed calls to the backend task endpoints
//! - Classify every status answer as present / absent / transient
//! - Normalise the two detection-status response shapes
//!
//! ## Endpoints
//!
//! | Operation | Method & path |
//! |---|---|
//! | Plate task status | `GET /check_task_status/{plate}` |
//! | Activate parking | `POST /activate_parking` |
//! | Stop parking | `POST /stop_parking/{plate}` |
//! | Detection status | `GET /detection_status` |
//! | Start / stop detection | `POST /start_detection`, `POST /stop_detection` |
//! | Parking status | `GET /parking_status?license_plate={plate}` |

mod types;

pub use types::*;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

/// Backend operations the reconciliation engine depends on
#[async_trait]
pub trait TaskApi: Send + Sync {
    async fn check_task_status(&self, plate: &str) -> PollResult<PlateTaskReport>;

    async fn detection_status(&self) -> PollResult<DetectionReport>;

    async fn parking_status(&self, plate: &str) -> PollResult<ParkingReport>;

    async fn activate_parking(
        &self,
        plate: &str,
        duration_minutes: Option<u32>,
    ) -> Result<(), CommandError>;

    async fn stop_parking(&self, plate: &str) -> Result<(), CommandError>;

    async fn start_detection(&self) -> Result<(), CommandError>;

    async fn stop_detection(&self) -> Result<(), CommandError>;
}

/// reqwest-backed TaskApi
pub struct HttpTaskClient {
    client: Client,
    base_url: Url,
}

impl HttpTaskClient {
    /// Create new client
    ///
    /// `timeout` bounds every request, so a hung backend surfaces as a
    /// transient poll error instead of stalling a cycle.
    pub fn new(base_url: &str, timeout: Duration) -> crate::Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| crate::Error::Config(format!("Invalid backend URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(crate::Error::Config(format!(
                "Backend URL '{}' cannot be used as a base",
                base_url
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build `{base}/{segments...}`, percent-encoding each segment
    fn endpoint(&self, segments: &[&str]) -> Result<Url, String> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| format!("cannot append path to {}", self.base_url))?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    /// Issue a status query and classify the answer
    async fn query<T: DeserializeOwned>(&self, url: Url) -> PollResult<T> {
        debug!(url = %url, "Querying task status");

        let response = match self.client.get(url.clone()).send().await {
            Ok(r) => r,
            Err(e) => {
                return PollResult::TransientError(format!("request to {} failed: {}", url, e));
            }
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return PollResult::NotFound;
        }
        if !status.is_success() {
            return PollResult::TransientError(format!("{} returned {}", url, status));
        }

        match response.json::<T>().await {
            Ok(body) => PollResult::Ok(body),
            Err(e) => PollResult::TransientError(format!("malformed body from {}: {}", url, e)),
        }
    }

    /// Issue a command; any non-2xx answer is a rejection
    async fn command<B: serde::Serialize + ?Sized>(
        &self,
        segments: &[&str],
        body: Option<&B>,
    ) -> Result<(), CommandError> {
        let url = self.endpoint(segments).map_err(CommandError::InvalidRequest)?;

        let mut request = self.client.post(url.clone());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            warn!(url = %url, error = %e, "Backend command request failed");
            CommandError::Network(e.to_string())
        })?;

        let status = response.status();
        if status.is_success() {
            debug!(url = %url, status = %status, "Backend command accepted");
            return Ok(());
        }

        let message = response
            .json::<BackendErrorBody>()
            .await
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            });

        warn!(url = %url, status = %status, message = %message, "Backend command rejected");

        Err(CommandError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl TaskApi for HttpTaskClient {
    async fn check_task_status(&self, plate: &str) -> PollResult<PlateTaskReport> {
        let url = match self.endpoint(&["check_task_status", plate]) {
            Ok(u) => u,
            Err(e) => return PollResult::TransientError(e),
        };

        match self.query::<TaskStatusResponse>(url).await {
            PollResult::Ok(body) => body.into_poll_result(),
            PollResult::NotFound => PollResult::NotFound,
            PollResult::TransientError(e) => PollResult::TransientError(e),
        }
    }

    async fn detection_status(&self) -> PollResult<DetectionReport> {
        let url = match self.endpoint(&["detection_status"]) {
            Ok(u) => u,
            Err(e) => return PollResult::TransientError(e),
        };

        match self.query::<DetectionStatusResponse>(url).await {
            PollResult::Ok(body) => body.normalize(),
            PollResult::NotFound => PollResult::NotFound,
            PollResult::TransientError(e) => PollResult::TransientError(e),
        }
    }

    async fn parking_status(&self, plate: &str) -> PollResult<ParkingReport> {
        let mut url = match self.endpoint(&["parking_status"]) {
            Ok(u) => u,
            Err(e) => return PollResult::TransientError(e),
        };
        url.query_pairs_mut().append_pair("license_plate", plate);

        match self.query::<ParkingStatusResponse>(url).await {
            PollResult::Ok(body) => body.into_poll_result(),
            PollResult::NotFound => PollResult::NotFound,
            PollResult::TransientError(e) => PollResult::TransientError(e),
        }
    }

    async fn activate_parking(
        &self,
        plate: &str,
        duration_minutes: Option<u32>,
    ) -> Result<(), CommandError> {
        let body = ActivateParkingRequest {
            license_plate: plate,
            duration_minutes,
        };
        self.command(&["activate_parking"], Some(&body)).await
    }

    async fn stop_parking(&self, plate: &str) -> Result<(), CommandError> {
        self.command::<()>(&["stop_parking", plate], None).await
    }

    async fn start_detection(&self) -> Result<(), CommandError> {
        self.command::<()>(&["start_detection"], None).await
    }

    async fn stop_detection(&self) -> Result<(), CommandError> {
        self.command::<()>(&["stop_detection"], None).await
    }
}
