//! Trip duration estimates.

use crate::domain::{haversine_km, GeoPoint};
use async_trait::async_trait;
use chrono::{Datelike, FixedOffset, NaiveDateTime, NaiveTime, Utc, Weekday};
use std::fmt;

/// Average city speed assumed when no routing data is available.
pub const FALLBACK_SPEED_KMH: f64 = 20.0;

#[async_trait]
pub trait EtaEstimator: Send + Sync + fmt::Debug {
    /// Whole minutes from `from` to `to`, never less than one.
    async fn estimate_minutes(&self, from: GeoPoint, to: GeoPoint) -> i64;
}

/// Great-circle distance at [`FALLBACK_SPEED_KMH`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StraightLineEta;

impl StraightLineEta {
    pub fn minutes_for_distance(distance_km: f64) -> i64 {
        let minutes = (distance_km / FALLBACK_SPEED_KMH * 60.0).round();
        if minutes.is_finite() {
            (minutes as i64).max(1)
        } else {
            1
        }
    }
}

#[async_trait]
impl EtaEstimator for StraightLineEta {
    async fn estimate_minutes(&self, from: GeoPoint, to: GeoPoint) -> i64 {
        Self::minutes_for_distance(haversine_km(from, to))
    }
}

fn strictly_between(t: NaiveTime, from_hour: u32, to_hour: u32) -> bool {
    let from = NaiveTime::from_hms_opt(from_hour, 0, 0).unwrap_or(NaiveTime::MIN);
    let to = NaiveTime::from_hms_opt(to_hour, 0, 0).unwrap_or(NaiveTime::MIN);
    t > from && t < to
}

/// Average city speed in km/h for a local time of day.
pub fn average_speed_kmh(t: NaiveTime) -> f64 {
    let late = NaiveTime::from_hms_opt(22, 0, 0).unwrap_or(NaiveTime::MIN);
    let early = NaiveTime::from_hms_opt(6, 0, 0).unwrap_or(NaiveTime::MIN);
    if strictly_between(t, 7, 10) {
        15.0
    } else if strictly_between(t, 17, 20) {
        12.0
    } else if t > late || t < early {
        35.0
    } else {
        25.0
    }
}

/// Congestion multiplier by weekday: busy Mondays and Fridays, quiet weekends.
pub fn day_multiplier(day: Weekday) -> f64 {
    match day {
        Weekday::Mon => 1.1,
        Weekday::Fri => 1.2,
        Weekday::Sat => 0.9,
        Weekday::Sun => 0.8,
        _ => 1.0,
    }
}

/// Distance at the local time-of-day speed, scaled by the weekday multiplier.
#[derive(Debug, Clone, Copy)]
pub struct TrafficAwareEta {
    offset: FixedOffset,
}

impl TrafficAwareEta {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn minutes_at(distance_km: f64, local: NaiveDateTime) -> i64 {
        let minutes =
            (distance_km / average_speed_kmh(local.time()) * 60.0 * day_multiplier(local.weekday()))
                .round();
        if minutes.is_finite() {
            (minutes as i64).max(1)
        } else {
            1
        }
    }
}

#[async_trait]
impl EtaEstimator for TrafficAwareEta {
    async fn estimate_minutes(&self, from: GeoPoint, to: GeoPoint) -> i64 {
        let local = Utc::now().with_timezone(&self.offset).naive_local();
        Self::minutes_at(haversine_km(from, to), local)
    }
}
