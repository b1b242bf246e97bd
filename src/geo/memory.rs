//! Process-local geo-index for single-node deployments and tests.

use super::{GeoIndexClient, GeoIndexError, IndexedDriver, NearbyDriver};
use crate::domain::{haversine_km, DriverId, DriverStatus, GeoPoint, TimeMs};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Linear-scan nearest-driver index over a concurrent map.
///
/// Clones share the same underlying state. `set_failing(true)` makes every
/// call return `GeoIndexError::Unavailable`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGeoIndex {
    drivers: Arc<DashMap<DriverId, IndexedDriver>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryGeoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    fn check(&self) -> Result<(), GeoIndexError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GeoIndexError::Unavailable("index offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl GeoIndexClient for InMemoryGeoIndex {
    async fn find_nearest_drivers(
        &self,
        location: GeoPoint,
        max_count: usize,
        max_radius_km: f64,
    ) -> Result<Vec<NearbyDriver>, GeoIndexError> {
        self.check()?;

        let mut candidates: Vec<NearbyDriver> = self
            .drivers
            .iter()
            .filter(|entry| entry.status == DriverStatus::Available)
            .filter_map(|entry| {
                let distance_km = haversine_km(location, entry.location);
                (distance_km <= max_radius_km).then(|| NearbyDriver {
                    driver_id: entry.driver_id.clone(),
                    distance_km,
                    status: entry.status,
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.distance_km
                .total_cmp(&b.distance_km)
                .then_with(|| a.driver_id.cmp(&b.driver_id))
        });
        candidates.truncate(max_count);
        Ok(candidates)
    }

    async fn update_driver_location(
        &self,
        driver_id: &DriverId,
        location: GeoPoint,
        status: DriverStatus,
    ) -> Result<bool, GeoIndexError> {
        self.check()?;
        self.drivers.insert(
            driver_id.clone(),
            IndexedDriver {
                driver_id: driver_id.clone(),
                location,
                status,
                updated_at: TimeMs::now(),
            },
        );
        Ok(true)
    }

    async fn remove_driver(&self, driver_id: &DriverId) -> Result<bool, GeoIndexError> {
        self.check()?;
        Ok(self.drivers.remove(driver_id).is_some())
    }

    async fn get_driver_location(
        &self,
        driver_id: &DriverId,
    ) -> Result<Option<IndexedDriver>, GeoIndexError> {
        self.check()?;
        Ok(self.drivers.get(driver_id).map(|d| d.clone()))
    }
}
