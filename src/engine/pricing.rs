//! Surge and fare arithmetic.
//!
//! Everything here is a pure function of its inputs; signal lookup and caching
//! live in the surge service.

use crate::domain::{Decimal, GeoPoint};
use chrono::{Datelike, NaiveDateTime, NaiveTime, Timelike, Weekday};

pub const PER_KM_RATE: Decimal = Decimal::from_parts(250, 2);
pub const PER_MINUTE_RATE: Decimal = Decimal::from_parts(40, 2);
pub const MINIMUM_FARE: Decimal = Decimal::from_parts(800, 2);

pub const MIN_SURGE: Decimal = Decimal::from_parts(10, 1);
pub const MAX_SURGE: Decimal = Decimal::from_parts(50, 1);
/// Largest change allowed between two computations for the same cell.
pub const MAX_SURGE_STEP: Decimal = Decimal::from_parts(5, 1);

pub const HIGH_DEMAND_THRESHOLD: f64 = 0.8;
pub const CRITICAL_DEMAND_THRESHOLD: f64 = 0.95;

pub const HISTORICAL_MIN: f64 = 0.8;
pub const HISTORICAL_MAX: f64 = 1.4;

const WEIGHT_SUPPLY_DEMAND: Decimal = Decimal::from_parts(40, 2);
const WEIGHT_TIME: Decimal = Decimal::from_parts(25, 2);
const WEIGHT_WEATHER: Decimal = Decimal::from_parts(15, 2);
const WEIGHT_EVENTS: Decimal = Decimal::from_parts(10, 2);
const WEIGHT_DENSITY: Decimal = Decimal::from_parts(5, 2);
const WEIGHT_HISTORICAL: Decimal = Decimal::from_parts(5, 2);

/// The six per-location inputs to the surge multiplier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurgeFactors {
    pub supply_demand: f64,
    pub time_of_day: f64,
    pub weather: f64,
    pub events: f64,
    pub density: f64,
    pub historical: f64,
}

impl SurgeFactors {
    pub const NEUTRAL: SurgeFactors = SurgeFactors {
        supply_demand: 1.0,
        time_of_day: 1.0,
        weather: 1.0,
        events: 1.0,
        density: 1.0,
        historical: 1.0,
    };

    /// Weighted sum rounded to two decimals.
    pub fn weighted(&self) -> Decimal {
        let sum = Decimal::from_f64_lossy(self.supply_demand) * WEIGHT_SUPPLY_DEMAND
            + Decimal::from_f64_lossy(self.time_of_day) * WEIGHT_TIME
            + Decimal::from_f64_lossy(self.weather) * WEIGHT_WEATHER
            + Decimal::from_f64_lossy(self.events) * WEIGHT_EVENTS
            + Decimal::from_f64_lossy(self.density) * WEIGHT_DENSITY
            + Decimal::from_f64_lossy(self.historical) * WEIGHT_HISTORICAL;
        sum.round2()
    }
}

/// Location cell used for surge caching: coordinates rounded to 3 decimals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurgeCell {
    lat_milli: i64,
    lng_milli: i64,
}

impl SurgeCell {
    pub fn of(point: GeoPoint) -> Self {
        SurgeCell {
            lat_milli: (point.lat * 1000.0).round() as i64,
            lng_milli: (point.lng * 1000.0).round() as i64,
        }
    }
}

impl std::fmt::Display for SurgeCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.3}:{:.3}",
            self.lat_milli as f64 / 1000.0,
            self.lng_milli as f64 / 1000.0
        )
    }
}

/// `pending / max(1, available + pending)` mapped onto the demand curve.
pub fn supply_demand_factor(available: u64, pending: u64) -> f64 {
    let total = (available + pending).max(1) as f64;
    let utilization = pending as f64 / total;
    if utilization >= CRITICAL_DEMAND_THRESHOLD {
        3.0
    } else if utilization >= HIGH_DEMAND_THRESHOLD {
        1.5 + (utilization - HIGH_DEMAND_THRESHOLD) * 10.0
    } else {
        1.0
    }
}

fn strictly_between(t: NaiveTime, from_hour: u32, to_hour: u32) -> bool {
    let from = NaiveTime::from_hms_opt(from_hour, 0, 0).unwrap_or(NaiveTime::MIN);
    let to = NaiveTime::from_hms_opt(to_hour, 0, 0).unwrap_or(NaiveTime::MIN);
    t > from && t < to
}

pub fn is_rush_hour(t: NaiveTime) -> bool {
    strictly_between(t, 7, 10) || strictly_between(t, 17, 20)
}

pub fn is_late_night(t: NaiveTime) -> bool {
    t > NaiveTime::from_hms_opt(22, 0, 0).unwrap_or(NaiveTime::MIN)
        || t < NaiveTime::from_hms_opt(6, 0, 0).unwrap_or(NaiveTime::MIN)
}

pub fn is_weekend(day: Weekday) -> bool {
    matches!(day, Weekday::Sat | Weekday::Sun)
}

/// Evening window during which venue events drive demand.
pub fn is_event_time(t: NaiveTime) -> bool {
    strictly_between(t, 18, 23)
}

/// Rush hour beats late night beats weekend.
pub fn time_of_day_factor(local: NaiveDateTime) -> f64 {
    let t = local.time();
    if is_rush_hour(t) {
        1.8
    } else if is_late_night(t) {
        1.5
    } else if is_weekend(local.weekday()) {
        1.2
    } else {
        1.0
    }
}

pub fn clamp_historical(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(HISTORICAL_MIN, HISTORICAL_MAX)
    } else {
        1.0
    }
}

/// Cap the move away from `previous` at [`MAX_SURGE_STEP`], then bound the
/// result to `[MIN_SURGE, MAX_SURGE]`.
pub fn smooth_surge(computed: Decimal, previous: Option<Decimal>) -> Decimal {
    let smoothed = match previous {
        None => computed,
        Some(prev) => {
            let diff = computed - prev;
            if diff.abs() > MAX_SURGE_STEP {
                if diff.is_negative() {
                    prev - MAX_SURGE_STEP
                } else {
                    prev + MAX_SURGE_STEP
                }
            } else {
                computed
            }
        }
    };
    smoothed.clamp_to(MIN_SURGE, MAX_SURGE)
}

/// `max(distance * per_km + minutes * per_minute, minimum)`.
pub fn base_fare(distance_km: f64, minutes: i64) -> Decimal {
    let distance_fare = PER_KM_RATE * Decimal::from_f64_lossy(distance_km.max(0.0));
    let time_fare = PER_MINUTE_RATE * Decimal::from_i64(minutes.max(0));
    (distance_fare + time_fare).max(MINIMUM_FARE)
}

/// `round2(base * surge * vehicle)`, half away from zero.
pub fn total_fare(base: Decimal, surge: Decimal, vehicle_multiplier: Decimal) -> Decimal {
    (base * surge * vehicle_multiplier).round2()
}

pub fn surge_level_description(multiplier: Decimal) -> &'static str {
    let m = multiplier.to_f64();
    if m >= 4.0 {
        "Very High Demand"
    } else if m >= 2.5 {
        "High Demand"
    } else if m >= 1.8 {
        "Increased Demand"
    } else if m >= 1.3 {
        "Moderate Demand"
    } else {
        "Normal Pricing"
    }
}

/// Scale the current multiplier by what the next hour usually brings.
pub fn predict_next_hour(current: Decimal, local_now: NaiveDateTime) -> Decimal {
    let next_hour = (local_now.hour() + 1) % 24;
    let adjustment = if next_hour == 17 || next_hour == 8 {
        Decimal::from_parts(12, 1)
    } else if next_hour >= 22 {
        Decimal::from_parts(11, 1)
    } else {
        Decimal::ONE
    };
    (current * adjustment).round2().clamp_to(MIN_SURGE, MAX_SURGE)
}
