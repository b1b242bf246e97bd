//! Push notifications to riders, drivers and broadcast topics.
//!
//! Delivery is best-effort: sinks never report failure to the core.

use crate::domain::{DriverId, RideId, RiderId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use tracing::info;

pub mod notifier;

pub use notifier::RideNotifier;

pub const SURGE_UPDATES_TOPIC: &str = "surge-updates";

/// A status message pushed to one rider or driver channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub ride_id: RideId,
    pub status: String,
    pub message: String,
    pub details: serde_json::Value,
}

pub trait NotificationSink: Send + Sync + fmt::Debug {
    fn notify_rider(&self, rider_id: &RiderId, update: StatusUpdate);

    fn notify_driver(&self, driver_id: &DriverId, update: StatusUpdate);

    fn broadcast(&self, topic: &str, payload: serde_json::Value);
}

/// Writes every delivery to the log.
#[derive(Debug, Clone, Default)]
pub struct LoggingNotificationSink;

impl NotificationSink for LoggingNotificationSink {
    fn notify_rider(&self, rider_id: &RiderId, update: StatusUpdate) {
        info!(rider_id = %rider_id, ride_id = %update.ride_id, status = %update.status, "{}", update.message);
    }

    fn notify_driver(&self, driver_id: &DriverId, update: StatusUpdate) {
        info!(driver_id = %driver_id, ride_id = %update.ride_id, status = %update.status, "{}", update.message);
    }

    fn broadcast(&self, topic: &str, payload: serde_json::Value) {
        info!(topic, payload = %payload, "Broadcast");
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Rider(RiderId, StatusUpdate),
    Driver(DriverId, StatusUpdate),
    Broadcast(String, serde_json::Value),
}

/// Keeps every delivery in memory for inspection.
#[derive(Debug, Default)]
pub struct RecordingNotificationSink {
    deliveries: Mutex<Vec<Delivery>>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.lock().clone()
    }

    pub fn rider_updates(&self, rider_id: &RiderId) -> Vec<StatusUpdate> {
        self.lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::Rider(id, update) if id == rider_id => Some(update.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn driver_updates(&self, driver_id: &DriverId) -> Vec<StatusUpdate> {
        self.lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::Driver(id, update) if id == driver_id => Some(update.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn broadcasts(&self, topic: &str) -> Vec<serde_json::Value> {
        self.lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::Broadcast(t, payload) if t == topic => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Delivery>> {
        self.deliveries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl NotificationSink for RecordingNotificationSink {
    fn notify_rider(&self, rider_id: &RiderId, update: StatusUpdate) {
        self.lock().push(Delivery::Rider(rider_id.clone(), update));
    }

    fn notify_driver(&self, driver_id: &DriverId, update: StatusUpdate) {
        self.lock().push(Delivery::Driver(driver_id.clone(), update));
    }

    fn broadcast(&self, topic: &str, payload: serde_json::Value) {
        self.lock()
            .push(Delivery::Broadcast(topic.to_string(), payload));
    }
}
