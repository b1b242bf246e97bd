pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod events;
pub mod flags;
pub mod geo;
pub mod notify;
pub mod services;

pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{
    Decimal, Driver, DriverId, DriverStatus, GeoPoint, Ride, RideId, RideStatus, RiderId, TimeMs,
    VehicleType,
};
pub use error::{AppError, DispatchError};
pub use services::{DriverLocationTracker, MatchingEngine, StaleDriverSweeper, SurgePricingEngine};
