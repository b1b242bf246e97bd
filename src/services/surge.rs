//! Location-aware surge multiplier and fare calculation.

use crate::cache::TtlCache;
use crate::config::SurgeConfig;
use crate::db::Repository;
use crate::domain::{haversine_km, vehicle_type_multiplier, BoundingBox, Decimal, GeoPoint, TimeMs};
use crate::engine::pricing::{
    self, base_fare, clamp_historical, predict_next_hour, smooth_surge, supply_demand_factor,
    time_of_day_factor, total_fare, SurgeCell, SurgeFactors, MIN_SURGE,
};
use crate::engine::{
    ClearWeather, DemandSupply, DemandSupplySource, DensityMap, EventCalendar,
    HistoricalDemandSource, NeutralHistory, WeatherSource,
};
use crate::error::DispatchError;
use crate::flags::{FeatureFlagSource, SURGE_PRICING};
use crate::geo::GeoIndexClient;
use crate::notify::{NotificationSink, SURGE_UPDATES_TOPIC};
use async_trait::async_trait;
use chrono::{Datelike, FixedOffset, NaiveDateTime, Timelike};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const SURGE_CACHE_TTL: Duration = Duration::from_secs(120);
pub const HISTORY_CACHE_TTL: Duration = Duration::from_secs(3600);

const PRICING_FLAG_CONTEXT: &str = "pricing";

/// Cap on geo-index candidates counted as supply.
const SUPPLY_SAMPLE_LIMIT: usize = 500;

/// Pending rides from the store and available drivers from the geo-index,
/// both within `radius_km` of the location.
#[derive(Debug, Clone)]
pub struct MarketDemandSupply {
    repo: Repository,
    geo: Arc<dyn GeoIndexClient>,
    radius_km: f64,
}

impl MarketDemandSupply {
    pub fn new(repo: Repository, geo: Arc<dyn GeoIndexClient>, radius_km: f64) -> Self {
        Self {
            repo,
            geo,
            radius_km,
        }
    }
}

#[async_trait]
impl DemandSupplySource for MarketDemandSupply {
    async fn demand_supply(&self, location: GeoPoint) -> Result<DemandSupply, DispatchError> {
        let area = BoundingBox::around(location, self.radius_km);
        let pending = self.repo.count_pending_rides_in_area(&area).await?;
        let available = self
            .geo
            .find_nearest_drivers(location, SUPPLY_SAMPLE_LIMIT, self.radius_km)
            .await?;
        Ok(DemandSupply {
            available_drivers: available.len() as u64,
            pending_rides: u64::try_from(pending).unwrap_or(0),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct HistoryKey {
    cell: SurgeCell,
    hour: u32,
    weekday: u32,
}

/// Fare breakdown for one prospective trip.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FareQuote {
    pub distance_km: f64,
    pub estimated_minutes: i64,
    pub base_fare: Decimal,
    pub surge_multiplier: Decimal,
    pub vehicle_multiplier: Decimal,
    pub total: Decimal,
    pub surge_level: &'static str,
}

#[derive(Debug)]
pub struct SurgePricingEngine {
    demand: Arc<dyn DemandSupplySource>,
    weather: Arc<dyn WeatherSource>,
    history: Arc<dyn HistoricalDemandSource>,
    calendar: EventCalendar,
    density: DensityMap,
    offset: FixedOffset,
    surge_cache: TtlCache<SurgeCell, Decimal>,
    history_cache: TtlCache<HistoryKey, f64>,
    notifications: Option<Arc<dyn NotificationSink>>,
    flags: Option<Arc<dyn FeatureFlagSource>>,
}

impl SurgePricingEngine {
    pub fn new(demand: Arc<dyn DemandSupplySource>, config: &SurgeConfig) -> Self {
        let offset = config.local_offset();
        Self {
            demand,
            weather: Arc::new(ClearWeather),
            history: Arc::new(NeutralHistory),
            calendar: EventCalendar::default(),
            density: DensityMap::default(),
            offset,
            surge_cache: TtlCache::new(SURGE_CACHE_TTL),
            history_cache: TtlCache::new(HISTORY_CACHE_TTL),
            notifications: None,
            flags: None,
        }
    }

    pub fn with_weather(mut self, weather: Arc<dyn WeatherSource>) -> Self {
        self.weather = weather;
        self
    }

    pub fn with_history(mut self, history: Arc<dyn HistoricalDemandSource>) -> Self {
        self.history = history;
        self
    }

    pub fn with_event_calendar(mut self, calendar: EventCalendar) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn with_density_map(mut self, density: DensityMap) -> Self {
        self.density = density;
        self
    }

    /// Broadcast changed multipliers on the surge-updates topic.
    pub fn with_notifications(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notifications = Some(sink);
        self
    }

    /// Price at the base multiplier whenever the `surge_pricing` flag is off.
    /// Without a flag source surge always applies.
    pub fn with_flags(mut self, flags: Arc<dyn FeatureFlagSource>) -> Self {
        self.flags = Some(flags);
        self
    }

    async fn surge_enabled(&self) -> bool {
        match &self.flags {
            Some(flags) => flags.is_enabled(SURGE_PRICING, PRICING_FLAG_CONTEXT).await,
            None => true,
        }
    }

    fn local_time(&self, now: TimeMs) -> NaiveDateTime {
        now.to_datetime().with_timezone(&self.offset).naive_local()
    }

    pub async fn calculate_surge_multiplier(&self, location: GeoPoint) -> Decimal {
        self.calculate_surge_multiplier_at(location, TimeMs::now())
            .await
    }

    /// Multiplier in `[1.0, 5.0]`, moved at most 0.5 from the last value
    /// computed for the same cell within the cache window.
    ///
    /// With surge pricing switched off this is `1.0` and nothing is cached
    /// or broadcast.
    pub async fn calculate_surge_multiplier_at(&self, location: GeoPoint, now: TimeMs) -> Decimal {
        if !self.surge_enabled().await {
            return MIN_SURGE;
        }
        let factors = self.collect_factors(location, now).await;
        let computed = factors.weighted();

        let cell = SurgeCell::of(location);
        let previous = self.surge_cache.get(&cell);
        let multiplier = smooth_surge(computed, previous);
        self.surge_cache.insert(cell, multiplier);

        debug!(
            cell = %cell,
            supply_demand = factors.supply_demand,
            time_of_day = factors.time_of_day,
            weather = factors.weather,
            events = factors.events,
            density = factors.density,
            historical = factors.historical,
            multiplier = %multiplier,
            "Surge calculated"
        );

        if previous != Some(multiplier) && (previous.is_some() || multiplier > MIN_SURGE) {
            self.broadcast_change(cell, location, multiplier, now);
        }
        multiplier
    }

    /// Last multiplier computed for the cell, if still cached.
    pub fn cached_multiplier(&self, location: GeoPoint) -> Option<Decimal> {
        self.surge_cache.get(&SurgeCell::of(location))
    }

    async fn collect_factors(&self, location: GeoPoint, now: TimeMs) -> SurgeFactors {
        let local = self.local_time(now);

        let supply_demand = match self.demand.demand_supply(location).await {
            Ok(counts) => supply_demand_factor(counts.available_drivers, counts.pending_rides),
            Err(e) => {
                warn!(lat = location.lat, lng = location.lng, error = %e, "Demand lookup failed, assuming balanced market");
                1.0
            }
        };

        let weather = self.weather.weather_factor(location).await;
        let historical = self.historical_factor(location, local).await;

        SurgeFactors {
            supply_demand,
            time_of_day: time_of_day_factor(local),
            weather: if weather.is_finite() && weather > 0.0 { weather } else { 1.0 },
            events: self.calendar.factor(location, local.time()),
            density: self.density.factor(location),
            historical,
        }
    }

    async fn historical_factor(&self, location: GeoPoint, local: NaiveDateTime) -> f64 {
        let key = HistoryKey {
            cell: SurgeCell::of(location),
            hour: local.hour(),
            weekday: local.weekday().number_from_monday(),
        };
        if let Some(cached) = self.history_cache.get(&key) {
            return cached;
        }
        let value = clamp_historical(
            self.history
                .historical_factor(location, key.hour, local.weekday())
                .await
                .unwrap_or(1.0),
        );
        self.history_cache.insert(key, value);
        value
    }

    fn broadcast_change(&self, cell: SurgeCell, location: GeoPoint, multiplier: Decimal, now: TimeMs) {
        if let Some(sink) = &self.notifications {
            sink.broadcast(
                SURGE_UPDATES_TOPIC,
                json!({
                    "cell": cell.to_string(),
                    "lat": location.lat,
                    "lng": location.lng,
                    "multiplier": multiplier,
                    "level": pricing::surge_level_description(multiplier),
                    "timestamp": now,
                }),
            );
        }
    }

    pub async fn calculate_fare(
        &self,
        pickup: GeoPoint,
        destination: GeoPoint,
        estimated_minutes: i64,
        vehicle_type: &str,
    ) -> Decimal {
        self.quote_fare_at(pickup, destination, estimated_minutes, vehicle_type, TimeMs::now())
            .await
            .total
    }

    /// `round2(max(distance * 2.50 + minutes * 0.40, 8.00) * surge * vehicle)`.
    pub async fn quote_fare_at(
        &self,
        pickup: GeoPoint,
        destination: GeoPoint,
        estimated_minutes: i64,
        vehicle_type: &str,
        now: TimeMs,
    ) -> FareQuote {
        let distance_km = haversine_km(pickup, destination);
        let surge_multiplier = self.calculate_surge_multiplier_at(pickup, now).await;
        let base = base_fare(distance_km, estimated_minutes);
        let vehicle_multiplier = vehicle_type_multiplier(vehicle_type);
        FareQuote {
            distance_km,
            estimated_minutes,
            base_fare: base.round2(),
            surge_multiplier,
            vehicle_multiplier,
            total: total_fare(base, surge_multiplier, vehicle_multiplier),
            surge_level: pricing::surge_level_description(surge_multiplier),
        }
    }

    pub fn surge_level_description(&self, multiplier: Decimal) -> &'static str {
        pricing::surge_level_description(multiplier)
    }

    pub async fn predict_surge_in_one_hour(&self, location: GeoPoint) -> Decimal {
        self.predict_surge_in_one_hour_at(location, TimeMs::now())
            .await
    }

    pub async fn predict_surge_in_one_hour_at(&self, location: GeoPoint, now: TimeMs) -> Decimal {
        self.surge_outlook_at(location, now).await.1
    }

    /// Current multiplier and the prediction for the next hour, both `1.0`
    /// while surge pricing is off.
    pub async fn surge_outlook_at(&self, location: GeoPoint, now: TimeMs) -> (Decimal, Decimal) {
        if !self.surge_enabled().await {
            return (MIN_SURGE, MIN_SURGE);
        }
        let current = self.calculate_surge_multiplier_at(location, now).await;
        (current, self.predict_from(current, now))
    }

    /// Next-hour multiplier given the current one.
    fn predict_from(&self, current: Decimal, now: TimeMs) -> Decimal {
        predict_next_hour(current, self.local_time(now))
    }
}
