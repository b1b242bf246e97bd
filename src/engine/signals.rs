//! Location and time signals that feed the surge multiplier.
//!
//! Weather, demand/supply and history sit behind traits so deployments can wire
//! real feeds; venues and dense areas are plain data.

use super::pricing::is_event_time;
use crate::domain::GeoPoint;
use crate::error::DispatchError;
use async_trait::async_trait;
use chrono::{NaiveTime, Weekday};
use std::fmt;

/// Live counts around a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DemandSupply {
    pub available_drivers: u64,
    pub pending_rides: u64,
}

#[async_trait]
pub trait DemandSupplySource: Send + Sync + fmt::Debug {
    async fn demand_supply(&self, location: GeoPoint) -> Result<DemandSupply, DispatchError>;
}

#[async_trait]
pub trait WeatherSource: Send + Sync + fmt::Debug {
    /// Multiplier for current conditions at `location`; 1.0 is clear.
    async fn weather_factor(&self, location: GeoPoint) -> f64;
}

#[async_trait]
pub trait HistoricalDemandSource: Send + Sync + fmt::Debug {
    /// Recorded demand multiplier for this place and slot, if any is known.
    async fn historical_factor(&self, location: GeoPoint, hour: u32, weekday: Weekday) -> Option<f64>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClearWeather;

#[async_trait]
impl WeatherSource for ClearWeather {
    async fn weather_factor(&self, _location: GeoPoint) -> f64 {
        1.0
    }
}

/// No recorded history anywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeutralHistory;

#[async_trait]
impl HistoricalDemandSource for NeutralHistory {
    async fn historical_factor(&self, _location: GeoPoint, _hour: u32, _weekday: Weekday) -> Option<f64> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VenueKind {
    /// Busy only during the evening event window.
    EventVenue,
    /// Busy around the clock.
    Airport,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Venue {
    pub name: String,
    pub center: GeoPoint,
    /// Half the side of the square catchment, in degrees.
    pub half_width_deg: f64,
    pub kind: VenueKind,
}

impl Venue {
    fn covers(&self, location: GeoPoint) -> bool {
        (location.lat - self.center.lat).abs() < self.half_width_deg
            && (location.lng - self.center.lng).abs() < self.half_width_deg
    }
}

pub const EVENT_VENUE_FACTOR: f64 = 2.5;
pub const AIRPORT_FACTOR: f64 = 1.3;

#[derive(Debug, Clone, PartialEq)]
pub struct EventCalendar {
    pub venues: Vec<Venue>,
}

impl EventCalendar {
    pub fn empty() -> Self {
        Self { venues: Vec::new() }
    }

    /// A live event venue beats an airport.
    pub fn factor(&self, location: GeoPoint, local_time: NaiveTime) -> f64 {
        let at_event = self.venues.iter().any(|v| {
            v.kind == VenueKind::EventVenue && v.covers(location) && is_event_time(local_time)
        });
        if at_event {
            return EVENT_VENUE_FACTOR;
        }
        if self
            .venues
            .iter()
            .any(|v| v.kind == VenueKind::Airport && v.covers(location))
        {
            return AIRPORT_FACTOR;
        }
        1.0
    }
}

impl Default for EventCalendar {
    fn default() -> Self {
        Self {
            venues: vec![
                Venue {
                    name: "Madison Square Garden".to_string(),
                    center: GeoPoint {
                        lat: 40.7505,
                        lng: -73.9934,
                    },
                    half_width_deg: 0.005,
                    kind: VenueKind::EventVenue,
                },
                Venue {
                    name: "JFK Airport".to_string(),
                    center: GeoPoint {
                        lat: 40.6413,
                        lng: -73.7781,
                    },
                    half_width_deg: 0.01,
                    kind: VenueKind::Airport,
                },
            ],
        }
    }
}

/// Inclusive lat/lng rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DenseArea {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl DenseArea {
    fn contains(&self, location: GeoPoint) -> bool {
        location.lat >= self.min_lat
            && location.lat <= self.max_lat
            && location.lng >= self.min_lng
            && location.lng <= self.max_lng
    }
}

pub const DENSE_AREA_FACTOR: f64 = 1.2;

#[derive(Debug, Clone, PartialEq)]
pub struct DensityMap {
    pub areas: Vec<DenseArea>,
}

impl DensityMap {
    pub fn empty() -> Self {
        Self { areas: Vec::new() }
    }

    pub fn factor(&self, location: GeoPoint) -> f64 {
        if self.areas.iter().any(|a| a.contains(location)) {
            DENSE_AREA_FACTOR
        } else {
            1.0
        }
    }
}

impl Default for DensityMap {
    /// Midtown and lower Manhattan.
    fn default() -> Self {
        Self {
            areas: vec![DenseArea {
                min_lat: 40.7,
                max_lat: 40.8,
                min_lng: -74.0,
                max_lng: -73.9,
            }],
        }
    }
}
