//! Parkwatch Library
//!
//! Parking task-status reconciliation engine
//!
//! ## Architecture (8 Components)
//!
//! 1. TaskClient - Backend task endpoints (HTTP)
//! 2. ReconciliationStore - Keyed, observable state with sequence stamps
//! 3. PlateStatusPoller - Per-plate task status
//! 4. DetectionStatusPoller - Global detection task
//! 5. ActivePlatePoller - Status of the active plate
//! 6. ActionDispatcher - User intent to backend commands
//! 7. NotificationHub - User-visible outcomes
//! 8. WebAPI - Local control API
//!
//! ## Design Principles
//!
//! - Pollers only write to the store; they never talk to each other
//! - Transient failures never overwrite known state
//! - The most recently issued query wins per key

pub mod action_dispatcher;
pub mod active_plate_poller;
pub mod detection_status_poller;
pub mod engine;
pub mod error;
pub mod models;
pub mod notification_hub;
pub mod plate_status_poller;
pub mod profile_store;
pub mod reconciliation_store;
pub mod scheduled_task;
pub mod session;
pub mod state;
pub mod task_client;
pub mod web_api;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
pub use state::AppState;
