//! Profile Store Repository
//!
//! MySQL persistence for user profiles (`user_profiles` table, see
//! `migrations/001_user_profiles.sql`).

use super::types::*;
use super::ProfileStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use sqlx::{MySqlPool, Row};

/// MySQL-backed profile store
#[derive(Clone)]
pub struct MySqlProfileStore {
    pool: MySqlPool,
}

impl MySqlProfileStore {
    /// Create new repository
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileStore for MySqlProfileStore {
    async fn get(&self, user_id: &str) -> Result<UserProfile> {
        let row = sqlx::query(
            "SELECT license_plates, active_plate FROM user_profiles WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            tracing::debug!(user_id = %user_id, "No stored profile, using empty profile");
            return Ok(UserProfile::default());
        };

        let Json(license_plates): Json<Vec<String>> =
            row.try_get("license_plates").map_err(|e| {
                Error::Profile(format!("Unreadable license_plates for {}: {}", user_id, e))
            })?;
        let active_plate: Option<String> = row.try_get("active_plate")?;

        Ok(UserProfile {
            license_plates,
            active_plate,
        })
    }

    async fn merge(&self, user_id: &str, update: ProfileUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }

        let now = Utc::now().naive_utc();
        let mut tx = self.pool.begin().await?;

        if let Some(plates) = &update.license_plates {
            sqlx::query(
                r#"
                INSERT INTO user_profiles (user_id, license_plates, created_at, updated_at)
                VALUES (?, ?, ?, ?)
                ON DUPLICATE KEY UPDATE
                    license_plates = VALUES(license_plates),
                    updated_at = VALUES(updated_at)
                "#,
            )
            .bind(user_id)
            .bind(Json(plates))
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(active) = &update.active_plate {
            sqlx::query(
                r#"
                INSERT INTO user_profiles (user_id, license_plates, active_plate, created_at, updated_at)
                VALUES (?, JSON_ARRAY(), ?, ?, ?)
                ON DUPLICATE KEY UPDATE
                    active_plate = VALUES(active_plate),
                    updated_at = VALUES(updated_at)
                "#,
            )
            .bind(user_id)
            .bind(active.as_deref())
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(
            user_id = %user_id,
            plates_updated = update.license_plates.is_some(),
            active_updated = update.active_plate.is_some(),
            "Profile merged"
        );

        Ok(())
    }
}
