//! Profile Store Type Definitions

use serde::{Deserialize, Serialize};

use crate::reconciliation_store::LicensePlate;

/// Persisted user profile fields the engine reads
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub license_plates: Vec<LicensePlate>,
    #[serde(default)]
    pub active_plate: Option<LicensePlate>,
}

/// Partial update; `None` fields are left untouched
///
/// `active_plate: Some(None)` clears the active plate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub license_plates: Option<Vec<LicensePlate>>,
    pub active_plate: Option<Option<LicensePlate>>,
}

impl ProfileUpdate {
    pub fn plates(plates: Vec<LicensePlate>) -> Self {
        Self {
            license_plates: Some(plates),
            active_plate: None,
        }
    }

    pub fn active(plate: Option<LicensePlate>) -> Self {
        Self {
            license_plates: None,
            active_plate: Some(plate),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.license_plates.is_none() && self.active_plate.is_none()
    }

    /// Apply onto an in-memory profile
    pub fn apply_to(self, profile: &mut UserProfile) {
        if let Some(plates) = self.license_plates {
            profile.license_plates = plates;
        }
        if let Some(active) = self.active_plate {
            profile.active_plate = active;
        }
    }
}
