pub mod drivers;
pub mod health;
pub mod pricing;
pub mod rides;

use crate::db::Repository;
use crate::domain::GeoPoint;
use crate::error::AppError;
use crate::services::{DriverLocationTracker, MatchingEngine, SurgePricingEngine};
use axum::{
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Repository,
    pub matching: Arc<MatchingEngine>,
    pub tracker: Arc<DriverLocationTracker>,
    pub pricing: Arc<SurgePricingEngine>,
}

impl AppState {
    pub fn new(
        repo: Repository,
        matching: Arc<MatchingEngine>,
        tracker: Arc<DriverLocationTracker>,
        pricing: Arc<SurgePricingEngine>,
    ) -> Self {
        Self {
            repo,
            matching,
            tracker,
            pricing,
        }
    }
}

/// Coordinates as they arrive on the wire, validated on conversion.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PointDto {
    pub lat: f64,
    pub lng: f64,
}

impl TryFrom<PointDto> for GeoPoint {
    type Error = AppError;

    fn try_from(p: PointDto) -> Result<Self, Self::Error> {
        GeoPoint::new(p.lat, p.lng).map_err(|e| AppError::BadRequest(e.to_string()))
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/rides", post(rides::create_ride).get(rides::list_rides))
        .route("/v1/rides/:id", get(rides::get_ride))
        .route("/v1/rides/:id/start", post(rides::start_ride))
        .route("/v1/rides/:id/complete", post(rides::complete_ride))
        .route("/v1/rides/:id/cancel", post(rides::cancel_ride))
        .route("/v1/rides/:id/match", post(rides::retry_matching))
        .route("/v1/drivers", post(drivers::register_driver))
        .route("/v1/drivers/nearby", get(drivers::nearby_drivers))
        .route("/v1/drivers/:id", get(drivers::get_driver))
        .route("/v1/drivers/:id/location", post(drivers::update_location))
        .route("/v1/drivers/:id/online", post(drivers::go_online))
        .route("/v1/drivers/:id/offline", post(drivers::go_offline))
        .route("/v1/drivers/:id/en-route", post(drivers::set_en_route))
        .route("/v1/pricing/surge", get(pricing::get_surge))
        .route("/v1/pricing/estimate", post(pricing::estimate_fare))
        .layer(cors)
        .with_state(state)
}
