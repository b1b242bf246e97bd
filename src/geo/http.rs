//! HTTP/JSON geo-index client.

use super::{GeoIndexClient, GeoIndexError, IndexedDriver, NearbyDriver};
use crate::domain::{DriverId, DriverStatus, GeoPoint};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NearestRequest {
    lat: f64,
    lng: f64,
    max_count: usize,
    max_radius_km: f64,
}

#[derive(Debug, Deserialize)]
struct NearestResponse {
    drivers: Vec<NearbyDriver>,
}

#[derive(Debug, Serialize)]
struct LocationUpdate {
    lat: f64,
    lng: f64,
    status: DriverStatus,
}

#[derive(Debug, Deserialize)]
struct AckResponse {
    success: bool,
}

/// Geo-index reached over HTTP. Reads are retried briefly; writes are sent once.
#[derive(Debug, Clone)]
pub struct HttpGeoIndexClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpGeoIndexClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GeoIndexError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GeoIndexError::NetworkError(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn read_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(50),
            max_elapsed_time: Some(self.timeout),
            ..Default::default()
        }
    }

    async fn send_ack(&self, request: reqwest::RequestBuilder) -> Result<bool, GeoIndexError> {
        let response = request
            .send()
            .await
            .map_err(|e| GeoIndexError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !status.is_success() {
            return Err(GeoIndexError::HttpError {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("error").to_string(),
            });
        }

        let ack = response
            .json::<AckResponse>()
            .await
            .map_err(|e| GeoIndexError::ParseError(e.to_string()))?;
        Ok(ack.success)
    }
}

fn classify(status: StatusCode) -> Result<(), backoff::Error<GeoIndexError>> {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(backoff::Error::transient(GeoIndexError::HttpError {
            status: status.as_u16(),
            message: "Server error".to_string(),
        }));
    }
    if !status.is_success() {
        return Err(backoff::Error::permanent(GeoIndexError::HttpError {
            status: status.as_u16(),
            message: "Client error".to_string(),
        }));
    }
    Ok(())
}

#[async_trait]
impl GeoIndexClient for HttpGeoIndexClient {
    async fn find_nearest_drivers(
        &self,
        location: GeoPoint,
        max_count: usize,
        max_radius_km: f64,
    ) -> Result<Vec<NearbyDriver>, GeoIndexError> {
        let url = format!("{}/drivers/nearest", self.base_url);
        let payload = NearestRequest {
            lat: location.lat,
            lng: location.lng,
            max_count,
            max_radius_km,
        };
        debug!(lat = location.lat, lng = location.lng, max_count, "Querying geo index");

        retry(self.read_backoff(), || async {
            let response = self
                .client
                .post(&url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(GeoIndexError::NetworkError(e.to_string())))?;
            classify(response.status())?;
            response
                .json::<NearestResponse>()
                .await
                .map(|r| r.drivers)
                .map_err(|e| backoff::Error::permanent(GeoIndexError::ParseError(e.to_string())))
        })
        .await
    }

    async fn update_driver_location(
        &self,
        driver_id: &DriverId,
        location: GeoPoint,
        status: DriverStatus,
    ) -> Result<bool, GeoIndexError> {
        let url = format!("{}/drivers/{}/location", self.base_url, driver_id);
        let body = LocationUpdate {
            lat: location.lat,
            lng: location.lng,
            status,
        };
        self.send_ack(self.client.put(&url).json(&body)).await
    }

    async fn remove_driver(&self, driver_id: &DriverId) -> Result<bool, GeoIndexError> {
        let url = format!("{}/drivers/{}", self.base_url, driver_id);
        self.send_ack(self.client.delete(&url)).await
    }

    async fn get_driver_location(
        &self,
        driver_id: &DriverId,
    ) -> Result<Option<IndexedDriver>, GeoIndexError> {
        let url = format!("{}/drivers/{}", self.base_url, driver_id);

        retry(self.read_backoff(), || async {
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(GeoIndexError::NetworkError(e.to_string())))?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            classify(response.status())?;
            response
                .json::<IndexedDriver>()
                .await
                .map(Some)
                .map_err(|e| backoff::Error::permanent(GeoIndexError::ParseError(e.to_string())))
        })
        .await
    }
}
