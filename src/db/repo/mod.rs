//! Repository layer for the dispatch store.
//!
//! Rides and drivers are plain records; every write that must respect a
//! lifecycle invariant is a conditional update that reports whether it applied.
//! Methods are organized across submodules:
//! - `rides.rs` - ride inserts, compare-and-swap updates and the assignment transaction
//! - `drivers.rs` - driver registration, location, status CAS and reconciliation queries

mod drivers;
mod rides;

use crate::domain::{Decimal, DriverStatus, GeoPoint, RideStatus, TimeMs, VehicleType};
use sqlx::sqlite::SqlitePool;
use std::str::FromStr;

/// Repository for database operations.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Round-trips a trivial query for readiness checks.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn decode_error(msg: String) -> sqlx::Error {
    sqlx::Error::Decode(msg.into())
}

fn parse_ride_status(s: &str) -> Result<RideStatus, sqlx::Error> {
    RideStatus::parse(s).ok_or_else(|| decode_error(format!("unknown ride status {}", s)))
}

fn parse_driver_status(s: &str) -> Result<DriverStatus, sqlx::Error> {
    DriverStatus::parse(s).ok_or_else(|| decode_error(format!("unknown driver status {}", s)))
}

fn parse_vehicle_type(s: &str) -> Result<VehicleType, sqlx::Error> {
    VehicleType::parse(s).ok_or_else(|| decode_error(format!("unknown vehicle type {}", s)))
}

fn parse_decimal(s: &str) -> Result<Decimal, sqlx::Error> {
    Decimal::from_str(s).map_err(|e| decode_error(format!("invalid decimal {}: {}", s, e)))
}

fn point_from_columns(
    lat: Option<f64>,
    lng: Option<f64>,
) -> Result<Option<GeoPoint>, sqlx::Error> {
    match (lat, lng) {
        (Some(lat), Some(lng)) => GeoPoint::new(lat, lng)
            .map(Some)
            .map_err(|e| decode_error(e.to_string())),
        _ => Ok(None),
    }
}

fn opt_time(ms: Option<i64>) -> Option<TimeMs> {
    ms.map(TimeMs::new)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|e| e.is_unique_violation())
        .unwrap_or(false)
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}
