use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{AppState, PointDto};
use crate::domain::{Decimal, GeoPoint, TimeMs};
use crate::error::AppError;
use crate::services::FareQuote;

#[derive(Debug, Deserialize)]
pub struct SurgeQuery {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurgeResponse {
    pub multiplier: Decimal,
    pub level: &'static str,
    pub predicted_next_hour: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateRequest {
    pub pickup: PointDto,
    pub destination: PointDto,
    pub estimated_minutes: Option<i64>,
    pub vehicle_type: Option<String>,
}

pub async fn get_surge(
    Query(params): Query<SurgeQuery>,
    State(state): State<AppState>,
) -> Result<Json<SurgeResponse>, AppError> {
    let location = GeoPoint::try_from(PointDto {
        lat: params.lat,
        lng: params.lng,
    })?;

    let (multiplier, predicted_next_hour) = state
        .pricing
        .surge_outlook_at(location, TimeMs::now())
        .await;
    Ok(Json(SurgeResponse {
        multiplier,
        level: state.pricing.surge_level_description(multiplier),
        predicted_next_hour,
    }))
}

pub async fn estimate_fare(
    State(state): State<AppState>,
    Json(body): Json<EstimateRequest>,
) -> Result<Json<FareQuote>, AppError> {
    let pickup = GeoPoint::try_from(body.pickup)?;
    let destination = GeoPoint::try_from(body.destination)?;
    let vehicle_type = body.vehicle_type.as_deref().unwrap_or("STANDARD");

    let quote = state
        .matching
        .estimate_fare(pickup, destination, body.estimated_minutes, vehicle_type)
        .await;
    Ok(Json(quote))
}
