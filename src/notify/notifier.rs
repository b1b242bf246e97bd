//! Turns ride lifecycle events into rider and driver notifications.

use super::{NotificationSink, StatusUpdate};
use crate::events::{PublishedEvent, RideEvent, RideEventType, Topic};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct RideNotifier {
    sink: Arc<dyn NotificationSink>,
}

impl RideNotifier {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    /// Consume events until the bus closes.
    pub fn spawn(
        sink: Arc<dyn NotificationSink>,
        mut events: broadcast::Receiver<PublishedEvent>,
    ) -> JoinHandle<()> {
        let notifier = RideNotifier::new(sink);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => notifier.handle(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Ride notifier lagged behind the event bus");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Ride notifier stopped");
        })
    }

    pub fn handle(&self, event: &PublishedEvent) {
        if event.topic != Topic::RideEvents {
            return;
        }
        match serde_json::from_value::<RideEvent>(event.payload.clone()) {
            Ok(ride_event) => self.handle_ride_event(&ride_event),
            Err(e) => warn!(key = %event.key, error = %e, "Unreadable ride event"),
        }
    }

    pub fn handle_ride_event(&self, event: &RideEvent) {
        let update = |status: &str, message: &str, details: serde_json::Value| StatusUpdate {
            ride_id: event.ride_id,
            status: status.to_string(),
            message: message.to_string(),
            details,
        };

        match event.event_type {
            RideEventType::RideRequested => {
                debug!(ride_id = %event.ride_id, "Ride requested");
            }
            RideEventType::RideAccepted => {
                self.sink.notify_rider(
                    &event.rider_id,
                    update(
                        "ASSIGNED",
                        "Driver assigned and on the way",
                        json!({ "driverId": event.driver_id }),
                    ),
                );
            }
            RideEventType::RideStarted => {
                self.sink.notify_rider(
                    &event.rider_id,
                    update(
                        "IN_PROGRESS",
                        "Your ride has started",
                        json!({ "startTime": event.timestamp }),
                    ),
                );
            }
            RideEventType::RideCompleted => {
                self.sink.notify_rider(
                    &event.rider_id,
                    update(
                        "COMPLETED",
                        "Your ride has been completed. Thank you!",
                        json!({
                            "fareAmount": event.fare_amount,
                            "duration": event.actual_duration_minutes,
                            "completedAt": event.timestamp,
                        }),
                    ),
                );
            }
            RideEventType::RideCancelled => {
                self.sink.notify_rider(
                    &event.rider_id,
                    update(
                        "CANCELLED",
                        "Your ride has been cancelled",
                        json!({ "cancelledAt": event.timestamp }),
                    ),
                );
                if let Some(driver_id) = &event.driver_id {
                    self.sink.notify_driver(
                        driver_id,
                        update(
                            "RIDE_CANCELLED",
                            "Ride has been cancelled",
                            json!({ "initiatedBy": event.initiated_by }),
                        ),
                    );
                }
            }
        }
    }
}
