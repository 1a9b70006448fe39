//! Application state
//!
//! Holds configuration and the shared components handed to the web API

use crate::action_dispatcher::ActionDispatcher;
use crate::active_plate_poller::ActiveStatusSource;
use crate::notification_hub::NotificationHub;
use crate::reconciliation_store::ReconciliationStore;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Parking backend base URL
    pub backend_url: String,
    /// Per-request timeout for backend calls
    pub request_timeout: Duration,
    /// Plate status poll period
    pub plate_poll_interval: Duration,
    /// Detection status poll period
    pub detection_poll_interval: Duration,
    /// Active-plate status poll period
    pub active_poll_interval: Duration,
    /// How long `pending` survives absent detection polls (0 = not at all)
    pub detection_pending_grace: Duration,
    /// Endpoint the active-plate poller reads
    pub active_status_source: ActiveStatusSource,
    /// Notifications kept for polling clients
    pub notification_capacity: usize,
    /// MySQL profile database; in-memory profiles when unset
    pub database_url: Option<String>,
    /// Signed-in user
    pub user_id: Option<String>,
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8000".to_string(),
            request_timeout: Duration::from_secs(10),
            plate_poll_interval: Duration::from_secs(60),
            detection_poll_interval: Duration::from_secs(10),
            active_poll_interval: Duration::from_secs(60),
            detection_pending_grace: Duration::ZERO,
            active_status_source: ActiveStatusSource::TaskStatus,
            notification_capacity: 200,
            database_url: None,
            user_id: None,
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl AppConfig {
    /// Load from environment variables, falling back to defaults
    pub fn from_env() -> crate::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> crate::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let secs = |key: &str, default: Duration| -> crate::Result<Duration> {
            match lookup(key) {
                Some(v) => v
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|e| crate::Error::Config(format!("{}='{}': {}", key, v, e))),
                None => Ok(default),
            }
        };

        let config = Self {
            backend_url: lookup("BACKEND_URL").unwrap_or(defaults.backend_url),
            request_timeout: secs("REQUEST_TIMEOUT_SECS", defaults.request_timeout)?,
            plate_poll_interval: secs("PLATE_POLL_INTERVAL_SECS", defaults.plate_poll_interval)?,
            detection_poll_interval: secs(
                "DETECTION_POLL_INTERVAL_SECS",
                defaults.detection_poll_interval,
            )?,
            active_poll_interval: secs("ACTIVE_POLL_INTERVAL_SECS", defaults.active_poll_interval)?,
            detection_pending_grace: secs(
                "DETECTION_PENDING_GRACE_SECS",
                defaults.detection_pending_grace,
            )?,
            active_status_source: match lookup("ACTIVE_STATUS_SOURCE") {
                Some(v) => ActiveStatusSource::from_str(&v)?,
                None => defaults.active_status_source,
            },
            notification_capacity: match lookup("NOTIFICATION_CAPACITY") {
                Some(v) => v.trim().parse().map_err(|e| {
                    crate::Error::Config(format!("NOTIFICATION_CAPACITY='{}': {}", v, e))
                })?,
                None => defaults.notification_capacity,
            },
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            user_id: lookup("PARKWATCH_USER_ID").filter(|v| !v.trim().is_empty()),
            host: lookup("HOST").unwrap_or(defaults.host),
            port: match lookup("PORT") {
                Some(v) => v
                    .trim()
                    .parse()
                    .map_err(|e| crate::Error::Config(format!("PORT='{}': {}", v, e)))?,
                None => defaults.port,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the pollers cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        for (name, value) in [
            ("REQUEST_TIMEOUT_SECS", self.request_timeout),
            ("PLATE_POLL_INTERVAL_SECS", self.plate_poll_interval),
            ("DETECTION_POLL_INTERVAL_SECS", self.detection_poll_interval),
            ("ACTIVE_POLL_INTERVAL_SECS", self.active_poll_interval),
        ] {
            if value.is_zero() {
                return Err(crate::Error::Config(format!("{} must be greater than 0", name)));
            }
        }

        if self.detection_poll_interval >= self.plate_poll_interval {
            tracing::warn!(
                detection_secs = self.detection_poll_interval.as_secs(),
                plate_secs = self.plate_poll_interval.as_secs(),
                "Detection poll interval is not shorter than plate poll interval"
            );
        }

        Ok(())
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// ReconciliationStore (read side for the UI)
    pub store: Arc<ReconciliationStore>,
    /// ActionDispatcher (user intent)
    pub dispatcher: Arc<ActionDispatcher>,
    /// NotificationHub (user-visible outcomes)
    pub notifications: Arc<NotificationHub>,
    /// Engine construction time
    pub started_at: Instant,
}
