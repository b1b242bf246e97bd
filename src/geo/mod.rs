//! Geo-index abstraction: nearest-driver lookup and driver presence propagation.

use crate::domain::{DriverId, DriverStatus, GeoPoint, TimeMs};
use crate::error::DispatchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod http;
pub mod memory;

pub use http::HttpGeoIndexClient;
pub use memory::InMemoryGeoIndex;

/// A candidate returned by the index, pre-sorted by distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyDriver {
    pub driver_id: DriverId,
    pub distance_km: f64,
    pub status: DriverStatus,
}

/// The index's view of one driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedDriver {
    pub driver_id: DriverId,
    pub location: GeoPoint,
    pub status: DriverStatus,
    pub updated_at: TimeMs,
}

/// Geo-index client.
///
/// Every call is bounded by a timeout; failures come back as `GeoIndexError`
/// and callers decide whether they are fatal.
#[async_trait]
pub trait GeoIndexClient: Send + Sync + fmt::Debug {
    /// Up to `max_count` `Available` drivers within `max_radius_km`, nearest first.
    async fn find_nearest_drivers(
        &self,
        location: GeoPoint,
        max_count: usize,
        max_radius_km: f64,
    ) -> Result<Vec<NearbyDriver>, GeoIndexError>;

    async fn update_driver_location(
        &self,
        driver_id: &DriverId,
        location: GeoPoint,
        status: DriverStatus,
    ) -> Result<bool, GeoIndexError>;

    async fn remove_driver(&self, driver_id: &DriverId) -> Result<bool, GeoIndexError>;

    async fn get_driver_location(
        &self,
        driver_id: &DriverId,
    ) -> Result<Option<IndexedDriver>, GeoIndexError>;
}

/// Error type for geo-index calls.
#[derive(Debug, Clone)]
pub enum GeoIndexError {
    /// Connection failure or timeout
    NetworkError(String),
    /// Non-success HTTP status
    HttpError { status: u16, message: String },
    /// Malformed response body
    ParseError(String),
    /// Index refused the call
    Unavailable(String),
}

impl fmt::Display for GeoIndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeoIndexError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            GeoIndexError::HttpError { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            GeoIndexError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            GeoIndexError::Unavailable(msg) => write!(f, "Geo index unavailable: {}", msg),
        }
    }
}

impl std::error::Error for GeoIndexError {}

impl From<GeoIndexError> for DispatchError {
    fn from(err: GeoIndexError) -> Self {
        DispatchError::ExternalService(format!("geo index: {}", err))
    }
}
