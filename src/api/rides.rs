use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{AppState, PointDto};
use crate::domain::{Decimal, DriverId, GeoPoint, Ride, RideId, RiderId};
use crate::error::AppError;

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRideRequest {
    pub rider_id: String,
    pub pickup: PointDto,
    pub destination: Option<PointDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RidesQuery {
    pub rider_id: Option<String>,
    pub driver_id: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RidesResponse {
    pub rides: Vec<Ride>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverActionRequest {
    pub driver_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRideRequest {
    pub driver_id: String,
    pub fare_amount: Decimal,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRideRequest {
    pub initiated_by: Option<String>,
}

fn parse_ride_id(raw: &str) -> Result<RideId, AppError> {
    RideId::parse(raw).ok_or_else(|| AppError::BadRequest(format!("Invalid ride id: {}", raw)))
}

pub async fn create_ride(
    State(state): State<AppState>,
    Json(body): Json<CreateRideRequest>,
) -> Result<(StatusCode, Json<Ride>), AppError> {
    let pickup = GeoPoint::try_from(body.pickup)?;
    let destination = body.destination.map(GeoPoint::try_from).transpose()?;

    let ride = state
        .matching
        .create_ride(RiderId::new(body.rider_id), pickup, destination)
        .await?;
    Ok((StatusCode::CREATED, Json(ride)))
}

pub async fn get_ride(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Ride>, AppError> {
    let ride_id = parse_ride_id(&id)?;
    Ok(Json(state.matching.get_ride(&ride_id).await?))
}

pub async fn list_rides(
    Query(params): Query<RidesQuery>,
    State(state): State<AppState>,
) -> Result<Json<RidesResponse>, AppError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    let rides = match (params.rider_id.as_deref(), params.driver_id.as_deref()) {
        (Some(rider), None) if !rider.is_empty() => {
            state
                .matching
                .rides_for_rider(&RiderId::new(rider), limit)
                .await?
        }
        (None, Some(driver)) if !driver.is_empty() => {
            state
                .matching
                .rides_for_driver(&DriverId::new(driver), limit)
                .await?
        }
        _ => {
            return Err(AppError::BadRequest(
                "Exactly one of riderId or driverId is required".into(),
            ))
        }
    };
    Ok(Json(RidesResponse { rides }))
}

pub async fn start_ride(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<DriverActionRequest>,
) -> Result<Json<Ride>, AppError> {
    let ride_id = parse_ride_id(&id)?;
    let ride = state
        .matching
        .start_ride(&ride_id, &DriverId::new(body.driver_id))
        .await?;
    Ok(Json(ride))
}

pub async fn complete_ride(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<CompleteRideRequest>,
) -> Result<Json<Ride>, AppError> {
    let ride_id = parse_ride_id(&id)?;
    let ride = state
        .matching
        .complete_ride(&ride_id, &DriverId::new(body.driver_id), body.fare_amount)
        .await?;
    Ok(Json(ride))
}

pub async fn cancel_ride(
    Path(id): Path<String>,
    State(state): State<AppState>,
    body: Option<Json<CancelRideRequest>>,
) -> Result<Json<Ride>, AppError> {
    let ride_id = parse_ride_id(&id)?;
    let initiated_by = body
        .and_then(|Json(b)| b.initiated_by)
        .unwrap_or_else(|| "rider".to_string());
    let ride = state.matching.cancel_ride(&ride_id, &initiated_by).await?;
    Ok(Json(ride))
}

pub async fn retry_matching(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Ride>, AppError> {
    let ride_id = parse_ride_id(&id)?;
    Ok(Json(state.matching.retry_matching(&ride_id).await?))
}
