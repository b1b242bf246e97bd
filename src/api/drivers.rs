use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{AppState, PointDto};
use crate::domain::{Driver, DriverId, GeoPoint};
use crate::error::AppError;
use crate::services::{LocationUpdate, NearbyDriverRecord, NewDriver};

const DEFAULT_NEARBY_RADIUS_KM: f64 = 5.0;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRequest {
    pub lat: f64,
    pub lng: f64,
    pub heading: Option<f64>,
    pub speed_kmh: Option<f64>,
    pub accuracy_meters: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyQuery {
    pub lat: f64,
    pub lng: f64,
    pub radius_km: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct NearbyResponse {
    pub drivers: Vec<NearbyDriverRecord>,
}

pub async fn register_driver(
    State(state): State<AppState>,
    Json(body): Json<NewDriver>,
) -> Result<(StatusCode, Json<Driver>), AppError> {
    let driver = state.tracker.register_driver(body).await?;
    Ok((StatusCode::CREATED, Json(driver)))
}

pub async fn get_driver(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(state.tracker.get_driver(&DriverId::new(id)).await?))
}

pub async fn update_location(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<LocationRequest>,
) -> Result<Json<Driver>, AppError> {
    let location = GeoPoint::try_from(PointDto {
        lat: body.lat,
        lng: body.lng,
    })?;
    let update = LocationUpdate {
        location,
        heading: body.heading,
        speed_kmh: body.speed_kmh,
        accuracy_meters: body.accuracy_meters,
    };
    let driver = state
        .tracker
        .update_location(&DriverId::new(id), update)
        .await?;
    Ok(Json(driver))
}

/// The body is optional: `{"lat", "lng"}` records a location before going
/// online, an empty body relies on the last ping.
pub async fn go_online(
    Path(id): Path<String>,
    State(state): State<AppState>,
    body: Option<Json<PointDto>>,
) -> Result<Json<Driver>, AppError> {
    let location = body.map(|Json(p)| GeoPoint::try_from(p)).transpose()?;
    let driver = state
        .tracker
        .go_online(&DriverId::new(id), location)
        .await?;
    Ok(Json(driver))
}

pub async fn go_offline(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(state.tracker.go_offline(&DriverId::new(id)).await?))
}

pub async fn set_en_route(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(state.tracker.set_en_route(&DriverId::new(id)).await?))
}

pub async fn nearby_drivers(
    Query(params): Query<NearbyQuery>,
    State(state): State<AppState>,
) -> Result<Json<NearbyResponse>, AppError> {
    let location = GeoPoint::try_from(PointDto {
        lat: params.lat,
        lng: params.lng,
    })?;
    let radius_km = params.radius_km.unwrap_or(DEFAULT_NEARBY_RADIUS_KM);
    let drivers = state
        .tracker
        .nearby_available_drivers(location, radius_km)
        .await?;
    Ok(Json(NearbyResponse { drivers }))
}
