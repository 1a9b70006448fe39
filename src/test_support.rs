//! Scripted TaskApi for unit tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::task_client::*;

#[derive(Default)]
pub(crate) struct ScriptedTaskApi {
    plates: Mutex<HashMap<String, PollResult<PlateTaskReport>>>,
    parking: Mutex<HashMap<String, PollResult<ParkingReport>>>,
    detection: Mutex<Option<PollResult<DetectionReport>>>,
    commands: Mutex<HashMap<&'static str, Result<(), CommandError>>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTaskApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plate(&self, plate: &str, result: PollResult<PlateTaskReport>) {
        self.plates.lock().unwrap().insert(plate.to_string(), result);
    }

    pub fn parking(&self, plate: &str, result: PollResult<ParkingReport>) {
        self.parking.lock().unwrap().insert(plate.to_string(), result);
    }

    pub fn detection(&self, result: PollResult<DetectionReport>) {
        *self.detection.lock().unwrap() = Some(result);
    }

    pub fn command(&self, name: &'static str, result: Result<(), CommandError>) {
        self.commands.lock().unwrap().insert(name, result);
    }

    /// Delay answers for a plate (or "detection")
    pub fn delay(&self, key: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(key.to_string(), delay);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    async fn pause(&self, key: &str) {
        let delay = self.delays.lock().unwrap().get(key).copied();
        if let Some(delay) = delay {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn command_result(&self, name: &'static str) -> Result<(), CommandError> {
        self.commands
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or(Ok(()))
    }
}

#[async_trait]
impl TaskApi for ScriptedTaskApi {
    async fn check_task_status(&self, plate: &str) -> PollResult<PlateTaskReport> {
        self.record(format!("check_task_status {}", plate));
        self.pause(plate).await;
        self.plates
            .lock()
            .unwrap()
            .get(plate)
            .cloned()
            .unwrap_or(PollResult::NotFound)
    }

    async fn detection_status(&self) -> PollResult<DetectionReport> {
        self.record("detection_status".to_string());
        self.pause("detection").await;
        self.detection
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(PollResult::Ok(DetectionReport::Absent))
    }

    async fn parking_status(&self, plate: &str) -> PollResult<ParkingReport> {
        self.record(format!("parking_status {}", plate));
        self.pause(plate).await;
        self.parking
            .lock()
            .unwrap()
            .get(plate)
            .cloned()
            .unwrap_or(PollResult::NotFound)
    }

    async fn activate_parking(
        &self,
        plate: &str,
        duration_minutes: Option<u32>,
    ) -> Result<(), CommandError> {
        self.record(format!("activate_parking {} {:?}", plate, duration_minutes));
        self.command_result("activate_parking")
    }

    async fn stop_parking(&self, plate: &str) -> Result<(), CommandError> {
        self.record(format!("stop_parking {}", plate));
        self.command_result("stop_parking")
    }

    async fn start_detection(&self) -> Result<(), CommandError> {
        self.record("start_detection".to_string());
        self.command_result("start_detection")
    }

    async fn stop_detection(&self) -> Result<(), CommandError> {
        self.record("stop_detection".to_string());
        self.command_result("stop_detection")
    }
}
