//! Driver record and its status state machine.

use serde::{Deserialize, Serialize};

use super::{Decimal, DriverId, GeoPoint, TimeMs};
use crate::error::DispatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverStatus {
    Offline,
    Available,
    Busy,
    EnRoute,
}

impl DriverStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverStatus::Offline => "OFFLINE",
            DriverStatus::Available => "AVAILABLE",
            DriverStatus::Busy => "BUSY",
            DriverStatus::EnRoute => "EN_ROUTE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OFFLINE" => Some(DriverStatus::Offline),
            "AVAILABLE" => Some(DriverStatus::Available),
            "BUSY" => Some(DriverStatus::Busy),
            "EN_ROUTE" => Some(DriverStatus::EnRoute),
            _ => None,
        }
    }
}

impl std::fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Vehicle class, which scales the fare.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleType {
    #[default]
    Standard,
    Premium,
    Suv,
    Luxury,
}

impl VehicleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleType::Standard => "STANDARD",
            VehicleType::Premium => "PREMIUM",
            VehicleType::Suv => "SUV",
            VehicleType::Luxury => "LUXURY",
        }
    }

    /// Case-insensitive; unknown names are `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "STANDARD" => Some(VehicleType::Standard),
            "PREMIUM" => Some(VehicleType::Premium),
            "SUV" => Some(VehicleType::Suv),
            "LUXURY" => Some(VehicleType::Luxury),
            _ => None,
        }
    }

    pub fn fare_multiplier(&self) -> Decimal {
        match self {
            VehicleType::Standard => Decimal::ONE,
            VehicleType::Premium => Decimal::from_parts(15, 1),
            VehicleType::Suv => Decimal::from_parts(18, 1),
            VehicleType::Luxury => Decimal::from_parts(25, 1),
        }
    }
}

/// Fare multiplier for a free-form vehicle type name; unknown names price as standard.
pub fn vehicle_type_multiplier(name: &str) -> Decimal {
    VehicleType::parse(name)
        .map(|v| v.fare_multiplier())
        .unwrap_or(Decimal::ONE)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Driver {
    pub id: DriverId,
    pub name: String,
    pub phone: Option<String>,
    pub license_plate: Option<String>,
    pub vehicle_type: VehicleType,
    pub current_location: Option<GeoPoint>,
    pub last_location_update: Option<TimeMs>,
    pub status: DriverStatus,
    pub created_at: TimeMs,
    pub updated_at: TimeMs,
}

impl Driver {
    /// A newly registered driver: offline, no known location.
    pub fn register(id: DriverId, name: String, now: TimeMs) -> Self {
        Driver {
            id,
            name,
            phone: None,
            license_plate: None,
            vehicle_type: VehicleType::Standard,
            current_location: None,
            last_location_update: None,
            status: DriverStatus::Offline,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == DriverStatus::Available
    }

    pub fn can_accept_ride(&self) -> bool {
        self.is_available()
    }

    pub fn update_location(&mut self, location: GeoPoint, now: TimeMs) {
        self.current_location = Some(location);
        self.last_location_update = Some(now);
        self.updated_at = now;
    }

    /// # Errors
    /// `InvalidState` if no location is known, or the driver is on a ride.
    pub fn go_online(&mut self, now: TimeMs) -> Result<(), DispatchError> {
        if self.current_location.is_none() {
            return Err(DispatchError::InvalidState(format!(
                "driver {} cannot go online without a location",
                self.id
            )));
        }
        if matches!(self.status, DriverStatus::Busy | DriverStatus::EnRoute) {
            return Err(self.invalid("go online"));
        }
        self.status = DriverStatus::Available;
        self.updated_at = now;
        Ok(())
    }

    pub fn go_offline(&mut self, now: TimeMs) {
        self.status = DriverStatus::Offline;
        self.updated_at = now;
    }

    /// # Errors
    /// `InvalidState` unless the driver is `Available`.
    pub fn start_ride(&mut self, now: TimeMs) -> Result<(), DispatchError> {
        if !self.can_accept_ride() {
            return Err(self.invalid("start a ride"));
        }
        self.status = DriverStatus::Busy;
        self.updated_at = now;
        Ok(())
    }

    /// # Errors
    /// `InvalidState` unless the driver is `Busy`.
    pub fn finish_ride(&mut self, now: TimeMs) -> Result<(), DispatchError> {
        if self.status != DriverStatus::Busy {
            return Err(self.invalid("finish a ride"));
        }
        self.status = DriverStatus::Available;
        self.updated_at = now;
        Ok(())
    }

    /// Back to `Available` after the ride this driver held was cancelled.
    ///
    /// # Errors
    /// `InvalidState` unless the driver is `Busy` or `EnRoute`.
    pub fn release_from_ride(&mut self, now: TimeMs) -> Result<(), DispatchError> {
        if !matches!(self.status, DriverStatus::Busy | DriverStatus::EnRoute) {
            return Err(self.invalid("be released from a ride"));
        }
        self.status = DriverStatus::Available;
        self.updated_at = now;
        Ok(())
    }

    /// Unconditional overlay while travelling to a pickup.
    pub fn set_en_route(&mut self, now: TimeMs) {
        self.status = DriverStatus::EnRoute;
        self.updated_at = now;
    }

    fn invalid(&self, action: &str) -> DispatchError {
        DispatchError::InvalidState(format!(
            "driver {} cannot {} in status {}",
            self.id, action, self.status
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> Driver {
        Driver::register(DriverId::new("D"), "Dana".to_string(), TimeMs::new(0))
    }

    fn located_driver() -> Driver {
        let mut d = driver();
        d.update_location(GeoPoint::new(40.7589, -73.9851).unwrap(), TimeMs::new(10));
        d
    }

    #[test]
    fn test_go_online_requires_location() {
        let mut d = driver();
        assert!(matches!(
            d.go_online(TimeMs::new(1)),
            Err(DispatchError::InvalidState(_))
        ));
        assert_eq!(d.status, DriverStatus::Offline);

        let mut d = located_driver();
        d.go_online(TimeMs::new(11)).unwrap();
        assert_eq!(d.status, DriverStatus::Available);
        assert!(d.current_location.is_some());
    }

    #[test]
    fn test_go_offline_always_succeeds() {
        let mut d = driver();
        d.go_offline(TimeMs::new(1));
        assert_eq!(d.status, DriverStatus::Offline);

        let mut d = located_driver();
        d.go_online(TimeMs::new(11)).unwrap();
        d.start_ride(TimeMs::new(12)).unwrap();
        d.go_offline(TimeMs::new(13));
        assert_eq!(d.status, DriverStatus::Offline);
    }

    #[test]
    fn test_ride_cycle() {
        let mut d = located_driver();
        assert!(d.start_ride(TimeMs::new(11)).is_err());

        d.go_online(TimeMs::new(11)).unwrap();
        d.start_ride(TimeMs::new(12)).unwrap();
        assert_eq!(d.status, DriverStatus::Busy);
        assert!(d.start_ride(TimeMs::new(13)).is_err());

        d.finish_ride(TimeMs::new(14)).unwrap();
        assert_eq!(d.status, DriverStatus::Available);
        assert!(d.finish_ride(TimeMs::new(15)).is_err());
    }

    #[test]
    fn test_busy_driver_cannot_go_online() {
        let mut d = located_driver();
        d.go_online(TimeMs::new(11)).unwrap();
        d.start_ride(TimeMs::new(12)).unwrap();
        assert!(d.go_online(TimeMs::new(13)).is_err());
        assert_eq!(d.status, DriverStatus::Busy);
    }

    #[test]
    fn test_release_from_ride() {
        let mut d = located_driver();
        assert!(d.release_from_ride(TimeMs::new(11)).is_err());

        d.go_online(TimeMs::new(11)).unwrap();
        d.start_ride(TimeMs::new(12)).unwrap();
        d.set_en_route(TimeMs::new(13));
        d.release_from_ride(TimeMs::new(14)).unwrap();
        assert_eq!(d.status, DriverStatus::Available);
    }

    #[test]
    fn test_set_en_route_is_unconditional() {
        let mut d = driver();
        d.set_en_route(TimeMs::new(1));
        assert_eq!(d.status, DriverStatus::EnRoute);
    }

    #[test]
    fn test_vehicle_multipliers() {
        assert_eq!(vehicle_type_multiplier("standard"), Decimal::ONE);
        assert_eq!(vehicle_type_multiplier("PREMIUM"), Decimal::from_parts(15, 1));
        assert_eq!(vehicle_type_multiplier("Suv"), Decimal::from_parts(18, 1));
        assert_eq!(vehicle_type_multiplier("luxury"), Decimal::from_parts(25, 1));
        assert_eq!(vehicle_type_multiplier("hovercraft"), Decimal::ONE);
    }
}
