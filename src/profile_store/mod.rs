//! ProfileStore - User Profile Persistence
//!
//! ## Responsibilities
//!
//! - Read the user's plate list and active plate
//! - Merge partial updates (only provided fields change)
//!
//! ## Backends
//! - `InMemoryProfileStore`: process-local, used when no database is configured
//! - `MySqlProfileStore`: `user_profiles` table

mod repository;
mod types;

pub use repository::MySqlProfileStore;
pub use types::*;

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Profile persistence seam
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fetch a profile; a user without a stored profile gets an empty one
    async fn get(&self, user_id: &str) -> Result<UserProfile>;

    /// Merge the provided fields into the stored profile
    async fn merge(&self, user_id: &str, update: ProfileUpdate) -> Result<()>;
}

/// Process-local profile store
#[derive(Default)]
pub struct InMemoryProfileStore {
    profiles: RwLock<HashMap<String, UserProfile>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a profile (startup fixtures, tests)
    pub async fn insert(&self, user_id: &str, profile: UserProfile) {
        self.profiles
            .write()
            .await
            .insert(user_id.to_string(), profile);
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn get(&self, user_id: &str) -> Result<UserProfile> {
        Ok(self
            .profiles
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn merge(&self, user_id: &str, update: ProfileUpdate) -> Result<()> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles.entry(user_id.to_string()).or_default();
        update.apply_to(profile);
        Ok(())
    }
}
