//! Lifecycle event publication.
//!
//! Publication is fire-and-forget: the state change that triggered an event is
//! already committed, so a failed publish is logged and never surfaces to the
//! caller.

use crate::domain::{Decimal, DriverId, DriverStatus, GeoPoint, Ride, RideId, RiderId, TimeMs};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

pub mod broadcast;

pub use broadcast::{BroadcastEventPublisher, PublishedEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "ride-events")]
    RideEvents,
    #[serde(rename = "driver-locations")]
    DriverLocations,
    #[serde(rename = "ride-assignments")]
    RideAssignments,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::RideEvents => "ride-events",
            Topic::DriverLocations => "driver-locations",
            Topic::RideAssignments => "ride-assignments",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event bus publisher.
pub trait EventPublisher: Send + Sync + fmt::Debug {
    fn publish(
        &self,
        topic: Topic,
        key: &str,
        payload: serde_json::Value,
    ) -> Result<(), EventPublishError>;
}

#[derive(Debug, Clone)]
pub enum EventPublishError {
    Serialization(String),
}

impl fmt::Display for EventPublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventPublishError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for EventPublishError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideEventType {
    RideRequested,
    RideAccepted,
    RideStarted,
    RideCompleted,
    RideCancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideEvent {
    pub event_type: RideEventType,
    pub ride_id: RideId,
    pub rider_id: RiderId,
    pub driver_id: Option<DriverId>,
    pub pickup: GeoPoint,
    pub destination: Option<GeoPoint>,
    pub fare_amount: Option<Decimal>,
    pub estimated_duration_minutes: Option<i64>,
    pub actual_duration_minutes: Option<i64>,
    pub initiated_by: Option<String>,
    pub timestamp: TimeMs,
}

impl RideEvent {
    pub fn from_ride(event_type: RideEventType, ride: &Ride, timestamp: TimeMs) -> Self {
        RideEvent {
            event_type,
            ride_id: ride.id,
            rider_id: ride.rider_id.clone(),
            driver_id: ride.driver_id.clone(),
            pickup: ride.pickup,
            destination: ride.destination,
            fare_amount: ride.fare_amount,
            estimated_duration_minutes: ride.estimated_duration_minutes,
            actual_duration_minutes: ride.actual_duration_minutes(),
            initiated_by: None,
            timestamp,
        }
    }

    pub fn initiated_by(mut self, who: impl Into<String>) -> Self {
        self.initiated_by = Some(who.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverLocationEvent {
    pub driver_id: DriverId,
    pub location: GeoPoint,
    pub heading: Option<f64>,
    pub speed_kmh: Option<f64>,
    pub accuracy_meters: Option<f64>,
    pub status: DriverStatus,
    pub timestamp: TimeMs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentEventType {
    DriverAssigned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideAssignmentEvent {
    pub ride_id: RideId,
    pub driver_id: DriverId,
    pub event_type: AssignmentEventType,
    pub timestamp: TimeMs,
}

/// Typed, best-effort helpers over any [`EventPublisher`].
pub trait EventPublisherExt: EventPublisher {
    fn publish_ride_event(&self, event: &RideEvent) {
        let key = event.ride_id.to_string();
        publish_logged(self, Topic::RideEvents, &key, event);
    }

    fn publish_driver_location(&self, event: &DriverLocationEvent) {
        publish_logged(self, Topic::DriverLocations, event.driver_id.as_str(), event);
    }

    fn publish_assignment(&self, event: &RideAssignmentEvent) {
        let key = event.ride_id.to_string();
        publish_logged(self, Topic::RideAssignments, &key, event);
    }
}

impl<T: EventPublisher + ?Sized> EventPublisherExt for T {}

fn publish_logged<P, E>(publisher: &P, topic: Topic, key: &str, event: &E)
where
    P: EventPublisher + ?Sized,
    E: Serialize,
{
    let result = serde_json::to_value(event)
        .map_err(|e| EventPublishError::Serialization(e.to_string()))
        .and_then(|payload| publisher.publish(topic, key, payload));
    if let Err(e) = result {
        warn!(topic = %topic, key = %key, error = %e, "Dropped event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_names() {
        assert_eq!(Topic::RideEvents.as_str(), "ride-events");
        assert_eq!(Topic::DriverLocations.to_string(), "driver-locations");
        assert_eq!(
            serde_json::to_value(Topic::RideAssignments).unwrap(),
            serde_json::json!("ride-assignments")
        );
    }

    #[test]
    fn test_ride_event_carries_fare_and_duration() {
        let mut ride = Ride::request(
            RiderId::new("r"),
            GeoPoint::new(40.0, -73.0).unwrap(),
            None,
            TimeMs::new(0),
        );
        ride.accept(DriverId::new("D"), TimeMs::new(1)).unwrap();
        ride.start(TimeMs::new(60_000)).unwrap();
        ride.complete(Decimal::from_parts(1850, 2), TimeMs::new(16 * 60_000))
            .unwrap();

        let event = RideEvent::from_ride(RideEventType::RideCompleted, &ride, TimeMs::new(5));
        assert_eq!(event.actual_duration_minutes, Some(15));
        assert_eq!(event.fare_amount, Some(Decimal::from_parts(1850, 2)));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventType"], "RIDE_COMPLETED");
        assert_eq!(json["driverId"], "D");
    }
}
