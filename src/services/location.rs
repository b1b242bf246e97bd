//! Driver presence: registration, location pings, online/offline and the
//! staleness sweep.

use crate::config::TrackingConfig;
use crate::db::Repository;
use crate::domain::{
    haversine_km, BoundingBox, Driver, DriverId, DriverStatus, GeoPoint, TimeMs, VehicleType,
};
use crate::error::DispatchError;
use crate::events::{DriverLocationEvent, EventPublisher, EventPublisherExt};
use crate::flags::{FeatureFlagSource, REAL_TIME_TRACKING};
use crate::geo::GeoIndexClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Drivers whose last ping is older than this are not offered as nearby.
pub const NEARBY_RECENCY_SECS: u64 = 300;
const NEARBY_LIMIT: i64 = 50;

const ALL_STATUSES: [DriverStatus; 4] = [
    DriverStatus::Offline,
    DriverStatus::Available,
    DriverStatus::Busy,
    DriverStatus::EnRoute,
];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDriver {
    pub id: DriverId,
    pub name: String,
    pub phone: Option<String>,
    pub license_plate: Option<String>,
    #[serde(default)]
    pub vehicle_type: VehicleType,
}

/// One location ping with optional motion data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationUpdate {
    pub location: GeoPoint,
    pub heading: Option<f64>,
    pub speed_kmh: Option<f64>,
    pub accuracy_meters: Option<f64>,
}

impl LocationUpdate {
    pub fn at(location: GeoPoint) -> Self {
        Self {
            location,
            heading: None,
            speed_kmh: None,
            accuracy_meters: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyDriverRecord {
    #[serde(flatten)]
    pub driver: Driver,
    pub distance_km: f64,
}

/// Outcome of one staleness sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub offlined: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct DriverLocationTracker {
    repo: Repository,
    geo: Arc<dyn GeoIndexClient>,
    events: Arc<dyn EventPublisher>,
    flags: Arc<dyn FeatureFlagSource>,
    config: TrackingConfig,
}

impl DriverLocationTracker {
    pub fn new(
        repo: Repository,
        geo: Arc<dyn GeoIndexClient>,
        events: Arc<dyn EventPublisher>,
        flags: Arc<dyn FeatureFlagSource>,
        config: TrackingConfig,
    ) -> Self {
        Self {
            repo,
            geo,
            events,
            flags,
            config,
        }
    }

    /// # Errors
    /// `Validation` for an empty id or name, `Conflict` if the id is taken.
    pub async fn register_driver(&self, new: NewDriver) -> Result<Driver, DispatchError> {
        if new.id.as_str().trim().is_empty() || new.name.trim().is_empty() {
            return Err(DispatchError::Validation(
                "driver id and name must not be empty".to_string(),
            ));
        }

        let mut driver = Driver::register(new.id, new.name, TimeMs::now());
        driver.phone = new.phone;
        driver.license_plate = new.license_plate;
        driver.vehicle_type = new.vehicle_type;

        if !self.repo.insert_driver(&driver).await? {
            return Err(DispatchError::Conflict(format!(
                "driver {} already registered",
                driver.id
            )));
        }
        info!(driver_id = %driver.id, vehicle_type = driver.vehicle_type.as_str(), "Driver registered");
        Ok(driver)
    }

    /// # Errors
    /// `NotFound` for an unknown driver.
    pub async fn get_driver(&self, driver_id: &DriverId) -> Result<Driver, DispatchError> {
        self.repo
            .get_driver(driver_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("driver {}", driver_id)))
    }

    /// Record a ping, then mirror it to the geo-index and the event bus.
    ///
    /// # Errors
    /// `NotFound` for an unknown driver.
    pub async fn update_location(
        &self,
        driver_id: &DriverId,
        update: LocationUpdate,
    ) -> Result<Driver, DispatchError> {
        let mut driver = self.get_driver(driver_id).await?;
        let now = TimeMs::now();
        driver.update_location(update.location, now);

        if !self
            .repo
            .update_driver_location(driver_id, update.location, now)
            .await?
        {
            return Err(DispatchError::NotFound(format!("driver {}", driver_id)));
        }

        self.propagate(&driver).await;
        self.publish_location(&driver, update, now).await;
        Ok(driver)
    }

    async fn publish_location(&self, driver: &Driver, update: LocationUpdate, now: TimeMs) {
        if self
            .flags
            .is_enabled(REAL_TIME_TRACKING, driver.id.as_str())
            .await
        {
            self.events.publish_driver_location(&DriverLocationEvent {
                driver_id: driver.id.clone(),
                location: update.location,
                heading: update.heading,
                speed_kmh: update.speed_kmh,
                accuracy_meters: update.accuracy_meters,
                status: driver.status,
                timestamp: now,
            });
        }
    }

    /// Mark the driver `Available`, recording `location` first when given.
    ///
    /// A supplied location is persisted, indexed and published like a ping.
    ///
    /// # Errors
    /// `NotFound`; `InvalidState` without any location or while on a ride.
    pub async fn go_online(
        &self,
        driver_id: &DriverId,
        location: Option<GeoPoint>,
    ) -> Result<Driver, DispatchError> {
        let mut driver = self.get_driver(driver_id).await?;
        let previous = driver.status;
        let now = TimeMs::now();
        if let Some(location) = location {
            driver.update_location(location, now);
        }
        driver.go_online(now)?;

        if let Some(location) = location {
            if !self
                .repo
                .update_driver_location(driver_id, location, now)
                .await?
            {
                return Err(DispatchError::NotFound(format!("driver {}", driver_id)));
            }
        }
        if !self
            .repo
            .update_driver_status_if(&driver, &[previous])
            .await?
        {
            return Err(DispatchError::InvalidState(format!(
                "driver {} changed status concurrently",
                driver_id
            )));
        }
        info!(driver_id = %driver_id, "Driver online");
        self.propagate(&driver).await;
        if let Some(location) = location {
            self.publish_location(&driver, LocationUpdate::at(location), now)
                .await;
        }
        Ok(driver)
    }

    /// Always succeeds for a known driver.
    ///
    /// # Errors
    /// `NotFound` for an unknown driver.
    pub async fn go_offline(&self, driver_id: &DriverId) -> Result<Driver, DispatchError> {
        let mut driver = self.get_driver(driver_id).await?;
        driver.go_offline(TimeMs::now());

        if !self
            .repo
            .update_driver_status_if(&driver, &ALL_STATUSES)
            .await?
        {
            return Err(DispatchError::NotFound(format!("driver {}", driver_id)));
        }
        info!(driver_id = %driver_id, "Driver offline");
        self.remove_from_index(driver_id).await;
        Ok(driver)
    }

    /// # Errors
    /// `NotFound` for an unknown driver.
    pub async fn set_en_route(&self, driver_id: &DriverId) -> Result<Driver, DispatchError> {
        let mut driver = self.get_driver(driver_id).await?;
        driver.set_en_route(TimeMs::now());

        if !self
            .repo
            .update_driver_status_if(&driver, &ALL_STATUSES)
            .await?
        {
            return Err(DispatchError::NotFound(format!("driver {}", driver_id)));
        }
        self.propagate(&driver).await;
        Ok(driver)
    }

    /// Available drivers from the store within `radius_km`, nearest first,
    /// that pinged in the last five minutes.
    pub async fn nearby_available_drivers(
        &self,
        location: GeoPoint,
        radius_km: f64,
    ) -> Result<Vec<NearbyDriverRecord>, DispatchError> {
        if !radius_km.is_finite() || radius_km <= 0.0 {
            return Err(DispatchError::Validation(
                "radius must be a positive number of kilometres".to_string(),
            ));
        }
        let since = TimeMs::now().minus_secs(NEARBY_RECENCY_SECS);
        let area = BoundingBox::around(location, radius_km);
        let drivers = self
            .repo
            .find_available_drivers_in_area(&area, since, NEARBY_LIMIT)
            .await?;

        let mut nearby: Vec<NearbyDriverRecord> = drivers
            .into_iter()
            .filter_map(|driver| {
                let distance_km = haversine_km(location, driver.current_location?);
                (distance_km <= radius_km).then_some(NearbyDriverRecord {
                    driver,
                    distance_km,
                })
            })
            .collect();
        nearby.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        Ok(nearby)
    }

    pub async fn sweep_stale_drivers(&self) -> Result<SweepReport, DispatchError> {
        self.sweep_stale_drivers_at(TimeMs::now()).await
    }

    /// Force every non-offline driver that stopped pinging offline.
    ///
    /// Each driver is handled on its own; one failure is counted and logged
    /// and the sweep moves on.
    ///
    /// # Errors
    /// Only if the stale drivers cannot be listed.
    pub async fn sweep_stale_drivers_at(&self, now: TimeMs) -> Result<SweepReport, DispatchError> {
        let cutoff = now.minus_secs(self.config.stale_after_secs);
        let stale = self.repo.find_stale_drivers(cutoff).await?;

        let mut report = SweepReport {
            examined: stale.len(),
            ..SweepReport::default()
        };
        for driver in stale {
            match self.force_offline(driver, cutoff, now).await {
                Ok(true) => report.offlined += 1,
                Ok(false) => {}
                Err((driver_id, e)) => {
                    error!(driver_id = %driver_id, error = %e, "Failed to offline stale driver");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn force_offline(
        &self,
        mut driver: Driver,
        cutoff: TimeMs,
        now: TimeMs,
    ) -> Result<bool, (DriverId, DispatchError)> {
        let previous = driver.status;
        driver.go_offline(now);
        let updated = self
            .repo
            .mark_offline_if_stale(&driver, previous, cutoff)
            .await
            .map_err(|e| (driver.id.clone(), DispatchError::from(e)))?;
        if updated {
            info!(driver_id = %driver.id, last_update = ?driver.last_location_update, "Stale driver offlined");
            self.remove_from_index(&driver.id).await;
        }
        Ok(updated)
    }

    async fn propagate(&self, driver: &Driver) {
        let Some(location) = driver.current_location else {
            return;
        };
        match self
            .geo
            .update_driver_location(&driver.id, location, driver.status)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(driver_id = %driver.id, "Geo index rejected location update"),
            Err(e) => warn!(driver_id = %driver.id, error = %e, "Failed to update geo index"),
        }
    }

    async fn remove_from_index(&self, driver_id: &DriverId) {
        if let Err(e) = self.geo.remove_driver(driver_id).await {
            warn!(driver_id = %driver_id, error = %e, "Failed to remove driver from geo index");
        }
    }
}
