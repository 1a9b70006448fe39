//! ParkingEngine - Component Wiring and Lifecycle
//!
//! Builds the store, the three pollers and the dispatcher from `AppConfig`,
//! starts them together and tears them down together. After `shutdown()`
//! no timer is left running and the store rejects late writes.

use crate::action_dispatcher::ActionDispatcher;
use crate::active_plate_poller::ActivePlatePoller;
use crate::detection_status_poller::DetectionStatusPoller;
use crate::error::Result;
use crate::notification_hub::NotificationHub;
use crate::plate_status_poller::PlateStatusPoller;
use crate::profile_store::{InMemoryProfileStore, MySqlProfileStore, ProfileStore};
use crate::reconciliation_store::ReconciliationStore;
use crate::session::{SessionProvider, StaticSession};
use crate::state::{AppConfig, AppState};
use crate::task_client::{HttpTaskClient, TaskApi};
use sqlx::mysql::MySqlPoolOptions;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// ParkingEngine instance
pub struct ParkingEngine {
    config: AppConfig,
    store: Arc<ReconciliationStore>,
    notifications: Arc<NotificationHub>,
    dispatcher: Arc<ActionDispatcher>,
    plate_poller: PlateStatusPoller,
    detection_poller: DetectionStatusPoller,
    active_poller: ActivePlatePoller,
    started_at: Instant,
}

impl ParkingEngine {
    /// Build from configuration: HTTP backend client, MySQL profiles when
    /// `DATABASE_URL` is set (in-memory otherwise), static session
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let api: Arc<dyn TaskApi> = Arc::new(HttpTaskClient::new(
            &config.backend_url,
            config.request_timeout,
        )?);

        let profiles: Arc<dyn ProfileStore> = match &config.database_url {
            Some(url) => {
                let pool = MySqlPoolOptions::new()
                    .max_connections(5)
                    .acquire_timeout(Duration::from_secs(10))
                    .connect(url)
                    .await?;
                tracing::info!("Profile database connected");
                Arc::new(MySqlProfileStore::new(pool))
            }
            None => {
                tracing::warn!("DATABASE_URL not set, profiles are kept in memory");
                Arc::new(InMemoryProfileStore::new())
            }
        };

        let session: Arc<dyn SessionProvider> =
            Arc::new(StaticSession::new(config.user_id.clone()));

        Ok(Self::with_components(config, api, profiles, session))
    }

    /// Build around caller-supplied collaborators
    pub fn with_components(
        config: AppConfig,
        api: Arc<dyn TaskApi>,
        profiles: Arc<dyn ProfileStore>,
        session: Arc<dyn SessionProvider>,
    ) -> Self {
        let store = Arc::new(ReconciliationStore::new());
        let notifications = Arc::new(NotificationHub::new(config.notification_capacity));

        let plate_poller =
            PlateStatusPoller::new(api.clone(), store.clone(), config.plate_poll_interval);
        let detection_poller = DetectionStatusPoller::new(
            api.clone(),
            store.clone(),
            config.detection_poll_interval,
        )
        .with_pending_grace(config.detection_pending_grace);
        let active_poller = ActivePlatePoller::new(
            api.clone(),
            store.clone(),
            config.active_poll_interval,
            config.active_status_source,
        );

        let dispatcher = Arc::new(ActionDispatcher::new(
            api,
            profiles,
            session,
            store.clone(),
            notifications.clone(),
            plate_poller.refresh_handle(),
        ));

        Self {
            config,
            store,
            notifications,
            dispatcher,
            plate_poller,
            detection_poller,
            active_poller,
            started_at: Instant::now(),
        }
    }

    /// Load the user's profile and start all pollers
    ///
    /// A profile that cannot be loaded is logged; polling starts anyway
    /// with an empty plate set.
    pub async fn start(&self) -> Result<()> {
        if self.store.is_closed() {
            return Err(crate::Error::ShutDown("Engine is shut down".to_string()));
        }

        if let Err(e) = self.dispatcher.load_profile().await {
            tracing::warn!(error = %e, "Starting without a profile");
        }

        self.active_poller.start().await;
        self.plate_poller.start().await;
        self.detection_poller.start().await;

        tracing::info!(
            backend = %self.config.backend_url,
            plate_interval_secs = self.config.plate_poll_interval.as_secs(),
            detection_interval_secs = self.config.detection_poll_interval.as_secs(),
            active_interval_secs = self.config.active_poll_interval.as_secs(),
            "Parking engine started"
        );
        Ok(())
    }

    /// Stop every poller, then close the store
    pub async fn shutdown(&self) {
        self.plate_poller.stop().await;
        self.detection_poller.stop().await;
        self.active_poller.stop().await;
        self.store.close().await;
        tracing::info!("Parking engine shut down");
    }

    pub async fn is_running(&self) -> bool {
        self.plate_poller.is_running().await
            && self.detection_poller.is_running().await
            && self.active_poller.is_running().await
    }

    pub fn store(&self) -> Arc<ReconciliationStore> {
        self.store.clone()
    }

    pub fn dispatcher(&self) -> Arc<ActionDispatcher> {
        self.dispatcher.clone()
    }

    pub fn notifications(&self) -> Arc<NotificationHub> {
        self.notifications.clone()
    }

    /// State handed to the web API
    pub fn app_state(&self) -> AppState {
        AppState {
            config: self.config.clone(),
            store: self.store.clone(),
            dispatcher: self.dispatcher.clone(),
            notifications: self.notifications.clone(),
            started_at: self.started_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile_store::UserProfile;
    use crate::reconciliation_store::{PlateStatus, TrackedPlateStatus};
    use crate::task_client::{PlateTaskReport, PollResult};
    use crate::test_support::ScriptedTaskApi;

    async fn engine(api: Arc<ScriptedTaskApi>) -> ParkingEngine {
        let profiles = Arc::new(InMemoryProfileStore::new());
        profiles
            .insert(
                "u1",
                UserProfile {
                    license_plates: vec!["AB123".to_string(), "CD456".to_string()],
                    active_plate: Some("AB123".to_string()),
                },
            )
            .await;
        ParkingEngine::with_components(
            AppConfig::default(),
            api,
            profiles,
            Arc::new(StaticSession::new(Some("u1".to_string()))),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_polls_profile_plates() {
        let api = Arc::new(ScriptedTaskApi::new());
        api.plate(
            "AB123",
            PollResult::Ok(PlateTaskReport::Running {
                task_id: Some("t1".to_string()),
            }),
        );
        let engine = engine(api.clone()).await;

        engine.start().await.unwrap();
        assert!(engine.is_running().await);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let store = engine.store();
        assert_eq!(
            store.plate_status("AB123").await,
            Some(TrackedPlateStatus::running(Some("t1".to_string())))
        );
        assert_eq!(
            store.plate_status("CD456").await.map(|s| s.status),
            Some(PlateStatus::Inactive)
        );
        assert_eq!(api.call_count("detection_status"), 1);
        assert!(store.active_plate().await.is_some());

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_discards_in_flight_polls() {
        let api = Arc::new(ScriptedTaskApi::new());
        api.plate("AB123", PollResult::Ok(PlateTaskReport::Active));
        api.delay("AB123", Duration::from_secs(5));
        let engine = engine(api.clone()).await;

        engine.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        engine.shutdown().await;
        tokio::time::sleep(Duration::from_secs(600)).await;

        let store = engine.store();
        assert!(store.is_closed());
        assert_eq!(store.plate_status("AB123").await, None);
        assert!(!engine.is_running().await);
        assert!(engine.start().await.is_err());
    }

    #[tokio::test]
    async fn test_from_config_without_database_uses_memory() {
        let engine = ParkingEngine::from_config(AppConfig::default())
            .await
            .unwrap();
        assert!(engine.store().tracked_plates().await.is_empty());
        assert_eq!(engine.app_state().config.port, 8080);
    }
}
