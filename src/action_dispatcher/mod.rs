//! ActionDispatcher - User Intent to Backend Commands
//!
//! ## Responsibilities
//!
//! - Mutate the user's plate set and active plate in the profile store
//! - Issue parking / detection commands to the backend
//! - Apply optimistic store updates ahead of the next poll
//! - Publish one success or failure notification per operation
//!
//! Nothing is retried here. The pollers correct optimistic state on their
//! next cycle; the user retries failed commands by hand.

use crate::error::{Error, Result};
use crate::notification_hub::NotificationHub;
use crate::profile_store::{ProfileStore, ProfileUpdate};
use crate::reconciliation_store::{
    DetectionState, LicensePlate, ReconciliationStore, TrackedPlateStatus, WriteOutcome,
};
use crate::session::SessionProvider;
use crate::task_client::TaskApi;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// ActionDispatcher instance
pub struct ActionDispatcher {
    api: Arc<dyn TaskApi>,
    profiles: Arc<dyn ProfileStore>,
    session: Arc<dyn SessionProvider>,
    store: Arc<ReconciliationStore>,
    notifications: Arc<NotificationHub>,
    plate_refresh: Arc<Notify>,
    /// Serialises profile read-modify-write sequences
    profile_lock: Mutex<()>,
}

impl ActionDispatcher {
    /// Create new ActionDispatcher
    ///
    /// `plate_refresh` is the plate poller's early-cycle trigger.
    pub fn new(
        api: Arc<dyn TaskApi>,
        profiles: Arc<dyn ProfileStore>,
        session: Arc<dyn SessionProvider>,
        store: Arc<ReconciliationStore>,
        notifications: Arc<NotificationHub>,
        plate_refresh: Arc<Notify>,
    ) -> Self {
        Self {
            api,
            profiles,
            session,
            store,
            notifications,
            plate_refresh,
            profile_lock: Mutex::new(()),
        }
    }

    // ========================================
    // Profile
    // ========================================

    /// Seed the tracked set and active designation from the user's profile
    pub async fn load_profile(&self) -> Result<()> {
        let result = async {
            let user_id = self.require_user()?;
            self.ensure_open()?;
            let profile = self.profiles.get(&user_id).await?;
            let count = profile.license_plates.len();

            self.store
                .replace_tracked(profile.license_plates, profile.active_plate)
                .await;
            self.plate_refresh.notify_one();

            tracing::info!(user_id = %user_id, plates = count, "Profile loaded");
            Ok::<_, Error>(count)
        }
        .await;

        match result {
            Ok(count) => {
                self.notifications
                    .info(format!("Loaded {} license plate(s)", count))
                    .await;
                Ok(())
            }
            Err(e) => Err(self.fail("Error loading profile", e).await),
        }
    }

    /// Append a plate to the user's plate set
    pub async fn add_plate(&self, plate: &str) -> Result<()> {
        let result = async {
            if plate.trim().is_empty() {
                return Err(Error::Validation("License plate must not be empty".to_string()));
            }
            let user_id = self.require_user()?;
            self.ensure_open()?;

            let _guard = self.profile_lock.lock().await;
            let profile = self.profiles.get(&user_id).await?;
            let mut plates = profile.license_plates;
            plates.push(plate.to_string());

            self.profiles
                .merge(&user_id, ProfileUpdate::plates(plates.clone()))
                .await?;
            self.sync_tracked(plates, profile.active_plate).await;

            tracing::info!(plate = %plate, "License plate added");
            Ok::<_, Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                self.notifications.success("License plate added").await;
                Ok(())
            }
            Err(e) => Err(self.fail("Error adding license plate", e).await),
        }
    }

    /// Remove every occurrence of a plate; clears it as active plate too
    pub async fn remove_plate(&self, plate: &str) -> Result<()> {
        let result = async {
            let user_id = self.require_user()?;
            self.ensure_open()?;

            let _guard = self.profile_lock.lock().await;
            let profile = self.profiles.get(&user_id).await?;
            if !profile.license_plates.iter().any(|p| p == plate) {
                return Err(Error::NotFound(format!("License plate {} is not tracked", plate)));
            }

            let plates: Vec<LicensePlate> = profile
                .license_plates
                .into_iter()
                .filter(|p| p != plate)
                .collect();
            let store_active = self.store.active_plate().await.map(|a| a.plate);
            let is_active = store_active.as_deref() == Some(plate)
                || profile.active_plate.as_deref() == Some(plate);

            let mut update = ProfileUpdate::plates(plates.clone());
            if is_active {
                update.active_plate = Some(None);
            }
            self.profiles.merge(&user_id, update).await?;

            let active = profile.active_plate.filter(|p| p != plate);
            self.sync_tracked(plates, active).await;

            tracing::info!(plate = %plate, cleared_active = is_active, "License plate removed");
            Ok::<_, Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                self.notifications.success("License plate removed").await;
                Ok(())
            }
            Err(e) => Err(self.fail("Error removing license plate", e).await),
        }
    }

    // ========================================
    // Parking
    // ========================================

    /// Start parking for a tracked plate and make it the active plate
    ///
    /// Local state changes only after the backend accepted the command.
    pub async fn activate(&self, plate: &str, duration_minutes: Option<u32>) -> Result<()> {
        let result = async {
            self.ensure_open()?;
            if !self.store.is_tracked(plate).await {
                return Err(Error::NotFound(format!("License plate {} is not tracked", plate)));
            }

            self.api.activate_parking(plate, duration_minutes).await?;

            self.store.designate_active(plate).await;
            self.store
                .set_plate_status(plate, TrackedPlateStatus::active())
                .await;
            tracing::info!(plate = %plate, duration_minutes = ?duration_minutes, "Parking activated");

            // The backend already accepted the command; a profile write
            // failure is reported but leaves local state as is.
            Ok::<_, Error>(self.persist_active(Some(plate.to_string())).await.err())
        }
        .await;

        match result {
            Ok(None) => {
                self.notifications
                    .success("Parking activated successfully")
                    .await;
                Ok(())
            }
            Ok(Some(persist_err)) => {
                self.notifications
                    .error(format!(
                        "Parking activated, but saving the active plate failed: {}",
                        persist_err
                    ))
                    .await;
                Ok(())
            }
            Err(e) => Err(self.fail("Error activating parking", e).await),
        }
    }

    /// Stop parking for a plate
    ///
    /// The designation is cleared and the plate marked inactive whatever
    /// the command outcome; the next poll settles the real state.
    pub async fn deactivate(&self, plate: &str) -> Result<()> {
        if let Err(e) = self.ensure_open() {
            return Err(self.fail("Error deactivating parking", e).await);
        }

        let command = self.api.stop_parking(plate).await;

        let was_active = self
            .store
            .active_plate()
            .await
            .map(|a| a.plate == plate)
            .unwrap_or(false);
        if was_active {
            self.store.clear_active().await;
            if let Err(e) = self.persist_active(None).await {
                tracing::warn!(plate = %plate, error = %e, "Failed to clear active plate in profile");
            }
        }
        self.store
            .set_plate_status(plate, TrackedPlateStatus::inactive())
            .await;

        match command {
            Ok(()) => {
                tracing::info!(plate = %plate, "Parking deactivated");
                self.notifications
                    .success("Parking deactivated successfully")
                    .await;
                Ok(())
            }
            Err(e) => Err(self.fail("Error deactivating parking", e.into()).await),
        }
    }

    // ========================================
    // Detection
    // ========================================

    /// Start detection; `pending` is set before the command is sent
    pub async fn start_detection(&self) -> Result<()> {
        let prior = self.store.detection().await;
        let (outcome, seq) = self
            .store
            .set_detection(DetectionState::pending(Utc::now()))
            .await;
        if outcome == WriteOutcome::Closed {
            let e = Error::ShutDown("Engine is shut down".to_string());
            return Err(self.fail("Error starting detection", e).await);
        }

        match self.api.start_detection().await {
            Ok(()) => {
                tracing::info!("Detection start requested");
                self.notifications
                    .success("Detection started successfully")
                    .await;
                Ok(())
            }
            Err(e) => {
                let restored = self.store.restore_detection(seq, prior).await;
                tracing::debug!(outcome = ?restored, "Rolled back pending detection");
                Err(self.fail("Error starting detection", e.into()).await)
            }
        }
    }

    /// Stop detection; `stopped` is set only once the backend accepted it
    pub async fn stop_detection(&self) -> Result<()> {
        let result = async {
            self.ensure_open()?;
            self.api.stop_detection().await?;
            self.store.set_detection(DetectionState::stopped()).await;
            tracing::info!("Detection stopped");
            Ok::<_, Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                self.notifications
                    .success("Detection stopped successfully")
                    .await;
                Ok(())
            }
            Err(e) => Err(self.fail("Error stopping detection", e).await),
        }
    }

    // ========================================
    // Helpers
    // ========================================

    fn require_user(&self) -> Result<String> {
        self.session
            .current_user()
            .ok_or_else(|| Error::Unauthorized("User is not authenticated".to_string()))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.store.is_closed() {
            return Err(Error::ShutDown("Engine is shut down".to_string()));
        }
        Ok(())
    }

    /// Mirror the stored plate list into the store
    ///
    /// The store's own designation wins over the profile's, which can lag
    /// behind when saving it failed.
    async fn sync_tracked(&self, plates: Vec<LicensePlate>, profile_active: Option<LicensePlate>) {
        let active = match self.store.active_plate().await {
            Some(current) if plates.contains(&current.plate) => Some(current.plate),
            Some(_) => None,
            None => profile_active,
        };
        self.store.replace_tracked(plates, active).await;
        self.plate_refresh.notify_one();
    }

    async fn persist_active(&self, plate: Option<LicensePlate>) -> Result<()> {
        let user_id = self.require_user()?;
        let _guard = self.profile_lock.lock().await;
        self.profiles
            .merge(&user_id, ProfileUpdate::active(plate))
            .await
    }

    /// Log, notify and hand the error back
    async fn fail(&self, context: &str, err: Error) -> Error {
        tracing::warn!(error = %err, "{}", context);

        let message = match &err {
            Error::Unauthorized(msg) => msg.clone(),
            Error::Command(e) => format!("{}: {}", context, e.user_message()),
            other => format!("{}: {}", context, other),
        };
        self.notifications.error(message).await;
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification_hub::NotificationLevel;
    use crate::profile_store::{InMemoryProfileStore, UserProfile};
    use crate::reconciliation_store::{DetectionPhase, PlateStatus};
    use crate::session::StaticSession;
    use crate::task_client::{CommandError, DetectionReport, PollResult};
    use crate::test_support::ScriptedTaskApi;

    struct Fixture {
        api: Arc<ScriptedTaskApi>,
        profiles: Arc<InMemoryProfileStore>,
        session: Arc<StaticSession>,
        store: Arc<ReconciliationStore>,
        notifications: Arc<NotificationHub>,
        dispatcher: ActionDispatcher,
    }

    async fn fixture(plates: &[&str], active: Option<&str>) -> Fixture {
        let api = Arc::new(ScriptedTaskApi::new());
        let profiles = Arc::new(InMemoryProfileStore::new());
        profiles
            .insert(
                "u1",
                UserProfile {
                    license_plates: plates.iter().map(|p| p.to_string()).collect(),
                    active_plate: active.map(|p| p.to_string()),
                },
            )
            .await;
        let session = Arc::new(StaticSession::new(Some("u1".to_string())));
        let store = Arc::new(ReconciliationStore::new());
        let notifications = Arc::new(NotificationHub::new(50));

        let dispatcher = ActionDispatcher::new(
            api.clone(),
            profiles.clone(),
            session.clone(),
            store.clone(),
            notifications.clone(),
            Arc::new(Notify::new()),
        );
        dispatcher.load_profile().await.unwrap();

        Fixture {
            api,
            profiles,
            session,
            store,
            notifications,
            dispatcher,
        }
    }

    async fn last_notification(hub: &NotificationHub) -> (NotificationLevel, String) {
        let latest = hub.latest(1).await;
        let n = latest.first().unwrap();
        (n.level, n.message.clone())
    }

    #[tokio::test]
    async fn test_load_profile_seeds_store() {
        let f = fixture(&["AB123", "CD456"], Some("CD456")).await;
        assert_eq!(f.store.tracked_plates().await.len(), 2);
        assert_eq!(
            f.store.active_plate().await.map(|a| a.plate),
            Some("CD456".to_string())
        );
    }

    #[tokio::test]
    async fn test_activate_network_failure_changes_nothing() {
        let f = fixture(&["AB123"], None).await;
        f.store
            .set_plate_status("AB123", TrackedPlateStatus::inactive())
            .await;
        f.api.command(
            "activate_parking",
            Err(CommandError::Network("connection refused".into())),
        );

        let err = f.dispatcher.activate("AB123", Some(30)).await.unwrap_err();
        assert!(matches!(err, Error::Command(CommandError::Network(_))));

        assert!(f.store.active_plate().await.is_none());
        assert_eq!(
            f.store.plate_status("AB123").await,
            Some(TrackedPlateStatus::inactive())
        );
        let (level, message) = last_notification(&f.notifications).await;
        assert_eq!(level, NotificationLevel::Error);
        assert_eq!(message, "Error activating parking: connection refused");
        assert_eq!(f.api.calls().last().unwrap(), "activate_parking AB123 Some(30)");
    }

    #[tokio::test]
    async fn test_activate_success_designates_and_marks_active() {
        let f = fixture(&["AB123"], None).await;
        f.dispatcher.activate("AB123", None).await.unwrap();

        assert_eq!(
            f.store.active_plate().await.map(|a| a.plate),
            Some("AB123".to_string())
        );
        assert_eq!(
            f.store.plate_status("AB123").await.map(|s| s.status),
            Some(PlateStatus::Active)
        );
        assert_eq!(
            f.profiles.get("u1").await.unwrap().active_plate.as_deref(),
            Some("AB123")
        );
        let (level, _) = last_notification(&f.notifications).await;
        assert_eq!(level, NotificationLevel::Success);
    }

    #[tokio::test]
    async fn test_activate_untracked_plate_rejected() {
        let f = fixture(&["AB123"], None).await;
        let err = f.dispatcher.activate("ZZ999", None).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(f.api.call_count("activate_parking"), 0);
    }

    #[tokio::test]
    async fn test_rejected_command_surfaces_backend_message() {
        let f = fixture(&["AB123"], None).await;
        f.api.command(
            "activate_parking",
            Err(CommandError::Rejected {
                status: 409,
                message: "Parking already active".into(),
            }),
        );
        f.dispatcher.activate("AB123", None).await.unwrap_err();

        let (_, message) = last_notification(&f.notifications).await;
        assert_eq!(message, "Error activating parking: Parking already active");
    }

    #[tokio::test]
    async fn test_deactivate_clears_even_when_command_fails() {
        let f = fixture(&["AB123"], Some("AB123")).await;
        f.store
            .set_plate_status("AB123", TrackedPlateStatus::running(Some("t1".into())))
            .await;
        f.api.command(
            "stop_parking",
            Err(CommandError::Rejected {
                status: 500,
                message: "Internal Server Error".into(),
            }),
        );

        assert!(f.dispatcher.deactivate("AB123").await.is_err());
        assert!(f.store.active_plate().await.is_none());
        assert_eq!(
            f.store.plate_status("AB123").await,
            Some(TrackedPlateStatus::inactive())
        );
        assert_eq!(f.profiles.get("u1").await.unwrap().active_plate, None);
        let (level, _) = last_notification(&f.notifications).await;
        assert_eq!(level, NotificationLevel::Error);
    }

    #[tokio::test]
    async fn test_deactivate_other_plate_keeps_designation() {
        let f = fixture(&["AB123", "CD456"], Some("AB123")).await;
        f.dispatcher.deactivate("CD456").await.unwrap();
        assert_eq!(
            f.store.active_plate().await.map(|a| a.plate),
            Some("AB123".to_string())
        );
    }

    #[tokio::test]
    async fn test_start_detection_sets_pending() {
        let f = fixture(&[], None).await;
        f.dispatcher.start_detection().await.unwrap();
        assert_eq!(f.store.detection().await.phase, DetectionPhase::Pending);
    }

    #[tokio::test]
    async fn test_start_detection_failure_rolls_back() {
        let f = fixture(&[], None).await;
        f.api.command(
            "start_detection",
            Err(CommandError::Network("timeout".into())),
        );

        assert!(f.dispatcher.start_detection().await.is_err());
        assert_eq!(f.store.detection().await.phase, DetectionPhase::Stopped);
        let (_, message) = last_notification(&f.notifications).await;
        assert_eq!(message, "Error starting detection: timeout");
    }

    #[tokio::test]
    async fn test_start_detection_confirmed_by_poll() {
        let f = fixture(&[], None).await;
        f.dispatcher.start_detection().await.unwrap();

        f.api.detection(PollResult::Ok(DetectionReport::Present {
            task_id: None,
            server_state: None,
        }));
        crate::detection_status_poller::DetectionStatusPoller::poll_once(
            f.api.as_ref(),
            &f.store,
            chrono::Duration::zero(),
        )
        .await;
        assert_eq!(f.store.detection().await.phase, DetectionPhase::Running);
    }

    #[tokio::test]
    async fn test_stop_detection_failure_keeps_state() {
        let f = fixture(&[], None).await;
        f.store
            .set_detection(DetectionState::running(Some("d1".into()), None))
            .await;
        f.api.command(
            "stop_detection",
            Err(CommandError::Network("unreachable".into())),
        );

        assert!(f.dispatcher.stop_detection().await.is_err());
        assert_eq!(f.store.detection().await.phase, DetectionPhase::Running);

        f.api.command("stop_detection", Ok(()));
        f.dispatcher.stop_detection().await.unwrap();
        assert_eq!(f.store.detection().await.phase, DetectionPhase::Stopped);
    }

    #[tokio::test]
    async fn test_add_plate_persists_and_tracks() {
        let f = fixture(&["AB123"], None).await;
        f.dispatcher.add_plate("CD456").await.unwrap();

        assert!(f.store.is_tracked("CD456").await);
        assert_eq!(
            f.profiles.get("u1").await.unwrap().license_plates,
            vec!["AB123".to_string(), "CD456".to_string()]
        );
    }

    /// Profile store whose first read fails
    struct FlakyProfiles {
        inner: InMemoryProfileStore,
        failed_once: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl ProfileStore for FlakyProfiles {
        async fn get(&self, user_id: &str) -> Result<UserProfile> {
            if !self
                .failed_once
                .swap(true, std::sync::atomic::Ordering::SeqCst)
            {
                return Err(Error::Profile("profile store unavailable".to_string()));
            }
            self.inner.get(user_id).await
        }

        async fn merge(&self, user_id: &str, update: ProfileUpdate) -> Result<()> {
            self.inner.merge(user_id, update).await
        }
    }

    #[tokio::test]
    async fn test_add_plate_after_failed_load_keeps_stored_plates() {
        let inner = InMemoryProfileStore::new();
        inner
            .insert(
                "u1",
                UserProfile {
                    license_plates: vec!["AB123".to_string(), "CD456".to_string()],
                    active_plate: None,
                },
            )
            .await;
        let profiles = Arc::new(FlakyProfiles {
            inner,
            failed_once: std::sync::atomic::AtomicBool::new(false),
        });
        let store = Arc::new(ReconciliationStore::new());
        let dispatcher = ActionDispatcher::new(
            Arc::new(ScriptedTaskApi::new()),
            profiles.clone(),
            Arc::new(StaticSession::new(Some("u1".to_string()))),
            store.clone(),
            Arc::new(NotificationHub::new(10)),
            Arc::new(Notify::new()),
        );

        assert!(dispatcher.load_profile().await.is_err());
        assert!(store.tracked_plates().await.is_empty());

        dispatcher.add_plate("EF789").await.unwrap();

        let expected = vec!["AB123".to_string(), "CD456".to_string(), "EF789".to_string()];
        assert_eq!(profiles.get("u1").await.unwrap().license_plates, expected);
        assert_eq!(store.tracked_plates().await, expected);
    }

    #[tokio::test]
    async fn test_remove_plate_after_failed_load_keeps_other_plates() {
        let inner = InMemoryProfileStore::new();
        inner
            .insert(
                "u1",
                UserProfile {
                    license_plates: vec!["AB123".to_string(), "CD456".to_string()],
                    active_plate: Some("CD456".to_string()),
                },
            )
            .await;
        let profiles = Arc::new(FlakyProfiles {
            inner,
            failed_once: std::sync::atomic::AtomicBool::new(false),
        });
        let store = Arc::new(ReconciliationStore::new());
        let dispatcher = ActionDispatcher::new(
            Arc::new(ScriptedTaskApi::new()),
            profiles.clone(),
            Arc::new(StaticSession::new(Some("u1".to_string()))),
            store.clone(),
            Arc::new(NotificationHub::new(10)),
            Arc::new(Notify::new()),
        );
        assert!(dispatcher.load_profile().await.is_err());

        dispatcher.remove_plate("AB123").await.unwrap();

        let profile = profiles.get("u1").await.unwrap();
        assert_eq!(profile.license_plates, vec!["CD456".to_string()]);
        assert_eq!(profile.active_plate.as_deref(), Some("CD456"));
        assert_eq!(store.tracked_plates().await, vec!["CD456".to_string()]);
        assert_eq!(
            store.active_plate().await.map(|a| a.plate),
            Some("CD456".to_string())
        );
    }

    #[tokio::test]
    async fn test_add_plate_requires_user() {
        let f = fixture(&[], None).await;
        f.session.sign_out();

        let err = f.dispatcher.add_plate("AB123").await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
        assert!(!f.store.is_tracked("AB123").await);
        let (_, message) = last_notification(&f.notifications).await;
        assert_eq!(message, "User is not authenticated");
    }

    #[tokio::test]
    async fn test_add_blank_plate_rejected() {
        let f = fixture(&[], None).await;
        let err = f.dispatcher.add_plate("   ").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_remove_active_plate_clears_designation() {
        let f = fixture(&["AB123", "CD456", "AB123"], Some("AB123")).await;
        f.dispatcher.remove_plate("AB123").await.unwrap();

        assert!(f.store.active_plate().await.is_none());
        assert_eq!(f.store.tracked_plates().await, vec!["CD456".to_string()]);
        let profile = f.profiles.get("u1").await.unwrap();
        assert_eq!(profile.license_plates, vec!["CD456".to_string()]);
        assert_eq!(profile.active_plate, None);
    }

    #[tokio::test]
    async fn test_every_operation_notifies_once() {
        let f = fixture(&["AB123"], None).await;
        let before = f.notifications.count().await;

        f.dispatcher.add_plate("CD456").await.unwrap();
        f.dispatcher.activate("CD456", None).await.unwrap();
        f.dispatcher.deactivate("CD456").await.unwrap();
        f.dispatcher.remove_plate("CD456").await.unwrap();
        f.dispatcher.start_detection().await.unwrap();
        f.dispatcher.stop_detection().await.unwrap();
        let _ = f.dispatcher.remove_plate("NOPE").await;

        assert_eq!(f.notifications.count().await, before + 7);
    }

    #[tokio::test]
    async fn test_commands_rejected_after_close() {
        let f = fixture(&["AB123"], None).await;
        f.store.close().await;

        let err = f.dispatcher.activate("AB123", None).await.unwrap_err();
        assert!(matches!(err, Error::ShutDown(_)));
        assert_eq!(f.api.call_count("activate_parking"), 0);
    }
}
