//! Domain types for the dispatch engine.
//!
//! This module provides:
//! - Identifiers and timestamps (`RideId`, `DriverId`, `RiderId`, `TimeMs`)
//! - Validated coordinates and great-circle helpers
//! - Fixed-point `Decimal` for fares and multipliers
//! - The ride and driver records with their lifecycle state machines

pub mod decimal;
pub mod driver;
pub mod geo;
pub mod primitives;
pub mod ride;

pub use decimal::Decimal;
pub use driver::{vehicle_type_multiplier, Driver, DriverStatus, VehicleType};
pub use geo::{haversine_km, BoundingBox};
pub use primitives::{CoordinateError, DriverId, GeoPoint, RideId, RiderId, TimeMs};
pub use ride::{Ride, RideStatus};
