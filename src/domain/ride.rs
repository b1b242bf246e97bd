//! Ride record and its lifecycle state machine.
//!
//! ```text
//! Requested ──accept──▶ Accepted ──start──▶ InProgress ──complete──▶ Completed
//!     │                    │
//!     └──────cancel────────┴──────────────▶ Cancelled
//! ```
//!
//! Every transition checks its guard before touching any field, so a rejected
//! transition leaves the ride exactly as it was.

use serde::{Deserialize, Serialize};

use super::{Decimal, DriverId, GeoPoint, RideId, RiderId, TimeMs};
use crate::error::DispatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideStatus {
    Requested,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
}

impl RideStatus {
    /// Statuses that count toward the one-active-ride limits.
    pub const ACTIVE: [RideStatus; 3] = [
        RideStatus::Requested,
        RideStatus::Accepted,
        RideStatus::InProgress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Requested => "REQUESTED",
            RideStatus::Accepted => "ACCEPTED",
            RideStatus::InProgress => "IN_PROGRESS",
            RideStatus::Completed => "COMPLETED",
            RideStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "REQUESTED" => Some(RideStatus::Requested),
            "ACCEPTED" => Some(RideStatus::Accepted),
            "IN_PROGRESS" => Some(RideStatus::InProgress),
            "COMPLETED" => Some(RideStatus::Completed),
            "CANCELLED" => Some(RideStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }
}

impl std::fmt::Display for RideStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ride {
    pub id: RideId,
    pub rider_id: RiderId,
    pub driver_id: Option<DriverId>,
    pub pickup: GeoPoint,
    pub destination: Option<GeoPoint>,
    pub status: RideStatus,
    pub fare_amount: Option<Decimal>,
    pub estimated_duration_minutes: Option<i64>,
    pub created_at: TimeMs,
    pub accepted_at: Option<TimeMs>,
    pub started_at: Option<TimeMs>,
    pub completed_at: Option<TimeMs>,
    pub cancelled_at: Option<TimeMs>,
    pub updated_at: TimeMs,
}

impl Ride {
    /// A fresh ride in `Requested`.
    pub fn request(
        rider_id: RiderId,
        pickup: GeoPoint,
        destination: Option<GeoPoint>,
        now: TimeMs,
    ) -> Self {
        Ride {
            id: RideId::generate(),
            rider_id,
            driver_id: None,
            pickup,
            destination,
            status: RideStatus::Requested,
            fare_amount: None,
            estimated_duration_minutes: None,
            created_at: now,
            accepted_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            updated_at: now,
        }
    }

    pub fn can_be_accepted(&self) -> bool {
        self.status == RideStatus::Requested
    }

    pub fn can_be_started(&self) -> bool {
        self.status == RideStatus::Accepted
    }

    pub fn can_be_completed(&self) -> bool {
        self.status == RideStatus::InProgress
    }

    pub fn can_be_cancelled(&self) -> bool {
        matches!(self.status, RideStatus::Requested | RideStatus::Accepted)
    }

    /// # Errors
    /// `InvalidState` unless the ride is `Requested`.
    pub fn accept(&mut self, driver_id: DriverId, now: TimeMs) -> Result<(), DispatchError> {
        self.guard(self.can_be_accepted(), "accepted")?;
        self.driver_id = Some(driver_id);
        self.status = RideStatus::Accepted;
        self.accepted_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// # Errors
    /// `InvalidState` unless the ride is `Accepted`.
    pub fn start(&mut self, now: TimeMs) -> Result<(), DispatchError> {
        self.guard(self.can_be_started(), "started")?;
        self.status = RideStatus::InProgress;
        self.started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// # Errors
    /// `InvalidState` unless the ride is `InProgress`.
    pub fn complete(&mut self, fare: Decimal, now: TimeMs) -> Result<(), DispatchError> {
        self.guard(self.can_be_completed(), "completed")?;
        self.fare_amount = Some(fare);
        self.status = RideStatus::Completed;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// # Errors
    /// `InvalidState` unless the ride is `Requested` or `Accepted`.
    pub fn cancel(&mut self, now: TimeMs) -> Result<(), DispatchError> {
        self.guard(self.can_be_cancelled(), "cancelled")?;
        self.status = RideStatus::Cancelled;
        self.cancelled_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Minutes between start and completion, if both happened.
    pub fn actual_duration_minutes(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => Some(started.whole_minutes_until(completed)),
            _ => None,
        }
    }

    fn guard(&self, allowed: bool, verb: &str) -> Result<(), DispatchError> {
        if allowed {
            Ok(())
        } else {
            Err(DispatchError::InvalidState(format!(
                "ride {} cannot be {} in status {}",
                self.id, verb, self.status
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ride() -> Ride {
        Ride::request(
            RiderId::new("rider-1"),
            GeoPoint::new(40.7590, -73.9850).unwrap(),
            None,
            TimeMs::new(1_000),
        )
    }

    #[test]
    fn test_happy_path_sets_each_timestamp_once() {
        let mut r = ride();
        assert_eq!(r.status, RideStatus::Requested);
        assert_eq!(r.created_at, TimeMs::new(1_000));

        r.accept(DriverId::new("D"), TimeMs::new(2_000)).unwrap();
        assert_eq!(r.status, RideStatus::Accepted);
        assert_eq!(r.driver_id, Some(DriverId::new("D")));
        assert_eq!(r.accepted_at, Some(TimeMs::new(2_000)));

        r.start(TimeMs::new(3_000)).unwrap();
        assert_eq!(r.status, RideStatus::InProgress);
        assert_eq!(r.started_at, Some(TimeMs::new(3_000)));

        let fare = Decimal::from_parts(1850, 2);
        r.complete(fare, TimeMs::new(3_000 + 15 * 60_000)).unwrap();
        assert_eq!(r.status, RideStatus::Completed);
        assert_eq!(r.fare_amount, Some(fare));
        assert_eq!(r.actual_duration_minutes(), Some(15));
        assert_eq!(r.cancelled_at, None);
    }

    #[test]
    fn test_cannot_skip_states() {
        let mut r = ride();
        let before = r.clone();
        assert!(matches!(
            r.start(TimeMs::new(2)),
            Err(DispatchError::InvalidState(_))
        ));
        assert!(matches!(
            r.complete(Decimal::ONE, TimeMs::new(2)),
            Err(DispatchError::InvalidState(_))
        ));
        assert_eq!(r, before);
    }

    #[test]
    fn test_cannot_accept_twice() {
        let mut r = ride();
        r.accept(DriverId::new("D1"), TimeMs::new(2)).unwrap();
        let before = r.clone();
        assert!(r.accept(DriverId::new("D2"), TimeMs::new(3)).is_err());
        assert_eq!(r, before);
    }

    #[test]
    fn test_cancel_allowed_from_requested_and_accepted_only() {
        let mut requested = ride();
        requested.cancel(TimeMs::new(5)).unwrap();
        assert_eq!(requested.status, RideStatus::Cancelled);
        assert_eq!(requested.cancelled_at, Some(TimeMs::new(5)));

        let mut accepted = ride();
        accepted.accept(DriverId::new("D"), TimeMs::new(2)).unwrap();
        accepted.cancel(TimeMs::new(5)).unwrap();
        assert_eq!(accepted.status, RideStatus::Cancelled);

        let mut in_progress = ride();
        in_progress.accept(DriverId::new("D"), TimeMs::new(2)).unwrap();
        in_progress.start(TimeMs::new(3)).unwrap();
        let before = in_progress.clone();
        assert!(matches!(
            in_progress.cancel(TimeMs::new(5)),
            Err(DispatchError::InvalidState(_))
        ));
        assert_eq!(in_progress, before);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut cancelled = ride();
        cancelled.cancel(TimeMs::new(5)).unwrap();
        assert!(cancelled.status.is_terminal());
        assert!(cancelled.cancel(TimeMs::new(6)).is_err());
        assert!(cancelled.accept(DriverId::new("D"), TimeMs::new(6)).is_err());
        assert!(cancelled.complete(Decimal::ONE, TimeMs::new(6)).is_err());
        assert_eq!(cancelled.completed_at, None);
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            RideStatus::Requested,
            RideStatus::Accepted,
            RideStatus::InProgress,
            RideStatus::Completed,
            RideStatus::Cancelled,
        ] {
            assert_eq!(RideStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RideStatus::parse("PENDING"), None);
    }
}
