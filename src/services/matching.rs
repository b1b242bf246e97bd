//! Ride lifecycle orchestration: creation, driver matching, start, completion
//! and cancellation.
//!
//! State changes go through the repository's conditional updates, so the
//! geo-index read that picks a candidate never has to be trusted. Events and
//! index propagation follow a committed change and are best-effort.

use crate::config::MatchingConfig;
use crate::db::Repository;
use crate::domain::{
    Decimal, Driver, DriverId, DriverStatus, GeoPoint, Ride, RideId, RideStatus, RiderId, TimeMs,
};
use crate::engine::{strategy_for, EtaEstimator, StraightLineEta};
use crate::error::DispatchError;
use crate::events::{
    AssignmentEventType, EventPublisher, EventPublisherExt, RideAssignmentEvent, RideEvent,
    RideEventType,
};
use crate::flags::{FeatureFlagSource, ADVANCED_MATCHING, DYNAMIC_ETA};
use crate::geo::{GeoIndexClient, NearbyDriver};
use crate::services::surge::{FareQuote, SurgePricingEngine};
use std::sync::Arc;
use tracing::{debug, info, warn};

const MATCHING_FLAG_CONTEXT: &str = "matching";

#[derive(Debug, Clone)]
pub struct MatchingEngine {
    repo: Repository,
    geo: Arc<dyn GeoIndexClient>,
    events: Arc<dyn EventPublisher>,
    flags: Arc<dyn FeatureFlagSource>,
    pricing: Arc<SurgePricingEngine>,
    eta: Arc<dyn EtaEstimator>,
    config: MatchingConfig,
}

impl MatchingEngine {
    pub fn new(
        repo: Repository,
        geo: Arc<dyn GeoIndexClient>,
        events: Arc<dyn EventPublisher>,
        flags: Arc<dyn FeatureFlagSource>,
        pricing: Arc<SurgePricingEngine>,
        config: MatchingConfig,
    ) -> Self {
        Self {
            repo,
            geo,
            events,
            flags,
            pricing,
            eta: Arc::new(StraightLineEta),
            config,
        }
    }

    /// Use a routing-aware estimator while the `dynamic_eta` flag is on.
    pub fn with_eta(mut self, eta: Arc<dyn EtaEstimator>) -> Self {
        self.eta = eta;
        self
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    async fn estimate_minutes(&self, from: GeoPoint, to: GeoPoint) -> i64 {
        if self.flags.is_enabled(DYNAMIC_ETA, MATCHING_FLAG_CONTEXT).await {
            self.eta.estimate_minutes(from, to).await
        } else {
            StraightLineEta.estimate_minutes(from, to).await
        }
    }

    /// Create a ride for a rider with no active ride, then try to match it.
    ///
    /// Matching failures leave the ride `Requested`; the returned ride is the
    /// latest known state.
    ///
    /// # Errors
    /// `Conflict` if the rider already has an active ride.
    pub async fn create_ride(
        &self,
        rider_id: RiderId,
        pickup: GeoPoint,
        destination: Option<GeoPoint>,
    ) -> Result<Ride, DispatchError> {
        if rider_id.as_str().trim().is_empty() {
            return Err(DispatchError::Validation("rider id must not be empty".to_string()));
        }

        let now = TimeMs::now();
        let mut ride = Ride::request(rider_id, pickup, destination, now);
        if let Some(dest) = destination {
            ride.estimated_duration_minutes = Some(self.estimate_minutes(pickup, dest).await);
        }

        if !self.repo.insert_ride_if_rider_idle(&ride).await? {
            return Err(DispatchError::Conflict(format!(
                "rider {} already has an active ride",
                ride.rider_id
            )));
        }
        info!(ride_id = %ride.id, rider_id = %ride.rider_id, "Ride requested");
        self.events
            .publish_ride_event(&RideEvent::from_ride(RideEventType::RideRequested, &ride, now));

        match self.attempt_driver_matching(&ride).await {
            Ok(Some(accepted)) => Ok(accepted),
            Ok(None) => Ok(ride),
            Err(e) => {
                warn!(ride_id = %ride.id, error = %e, "Matching aborted, ride stays pending");
                Ok(ride)
            }
        }
    }

    /// One matching pass for a `Requested` ride.
    ///
    /// Returns the accepted ride when a driver was assigned, `None` when no
    /// candidate could be claimed.
    ///
    /// # Errors
    /// `ExternalService` if the geo-index query fails; store errors.
    pub async fn attempt_driver_matching(
        &self,
        ride: &Ride,
    ) -> Result<Option<Ride>, DispatchError> {
        if ride.status != RideStatus::Requested {
            return Ok(None);
        }

        let mut candidates = self
            .geo
            .find_nearest_drivers(
                ride.pickup,
                self.config.max_drivers_to_consider,
                self.config.max_search_radius_km,
            )
            .await?;
        if candidates.is_empty() {
            info!(ride_id = %ride.id, "No drivers near pickup");
            return Ok(None);
        }

        let advanced = self
            .flags
            .is_enabled(ADVANCED_MATCHING, MATCHING_FLAG_CONTEXT)
            .await;
        let strategy = strategy_for(advanced);

        loop {
            let Some(chosen) = strategy.select(&candidates).map(|c| c.driver_id.clone()) else {
                debug!(ride_id = %ride.id, strategy = strategy.name(), "No eligible candidate left");
                return Ok(None);
            };

            if let Some(accepted) = self.assign_ride_to_driver(ride, &chosen).await? {
                return Ok(Some(accepted));
            }
            if !self.config.retry_next_candidate {
                return Ok(None);
            }
            drop_candidate(&mut candidates, &chosen);
        }
    }

    /// Claim `driver_id` for `ride`.
    ///
    /// The driver record is re-read, and the store only applies the claim while
    /// the driver is still `Available` and the ride still `Requested`. A lost
    /// claim returns `None` and leaves both records untouched.
    ///
    /// # Errors
    /// Store errors.
    pub async fn assign_ride_to_driver(
        &self,
        ride: &Ride,
        driver_id: &DriverId,
    ) -> Result<Option<Ride>, DispatchError> {
        let Some(driver) = self.repo.get_driver(driver_id).await? else {
            warn!(ride_id = %ride.id, driver_id = %driver_id, "Candidate unknown to the store");
            return Ok(None);
        };
        if !driver.is_available() {
            info!(ride_id = %ride.id, driver_id = %driver_id, status = %driver.status, "Candidate no longer available");
            return Ok(None);
        }

        let now = TimeMs::now();
        let mut accepted = ride.clone();
        accepted.accept(driver_id.clone(), now)?;
        let mut busy = driver;
        busy.start_ride(now)?;

        if !self.repo.assign_ride_to_driver(&accepted, &busy).await? {
            info!(ride_id = %ride.id, driver_id = %driver_id, "Lost assignment race");
            return Ok(None);
        }
        info!(ride_id = %ride.id, driver_id = %driver_id, "Driver assigned");

        self.propagate(&busy).await;
        self.events.publish_ride_event(&RideEvent::from_ride(
            RideEventType::RideAccepted,
            &accepted,
            now,
        ));
        self.events.publish_assignment(&RideAssignmentEvent {
            ride_id: accepted.id,
            driver_id: driver_id.clone(),
            event_type: AssignmentEventType::DriverAssigned,
            timestamp: now,
        });
        Ok(Some(accepted))
    }

    /// # Errors
    /// `NotFound`, `Validation` for a different driver, `InvalidState` unless
    /// the ride is `Accepted`.
    pub async fn start_ride(
        &self,
        ride_id: &RideId,
        driver_id: &DriverId,
    ) -> Result<Ride, DispatchError> {
        let mut ride = self.get_ride(ride_id).await?;
        check_driver(&ride, driver_id)?;

        let now = TimeMs::now();
        ride.start(now)?;
        self.persist_transition(&ride, RideStatus::Accepted).await?;
        info!(ride_id = %ride.id, driver_id = %driver_id, "Ride started");

        self.events
            .publish_ride_event(&RideEvent::from_ride(RideEventType::RideStarted, &ride, now));
        Ok(ride)
    }

    /// Complete the ride with the final fare and free the driver.
    ///
    /// # Errors
    /// `NotFound`, `Validation` for a different driver or a negative fare,
    /// `InvalidState` unless the ride is `InProgress`.
    pub async fn complete_ride(
        &self,
        ride_id: &RideId,
        driver_id: &DriverId,
        fare_amount: Decimal,
    ) -> Result<Ride, DispatchError> {
        if fare_amount.is_negative() {
            return Err(DispatchError::Validation("fare must not be negative".to_string()));
        }
        let mut ride = self.get_ride(ride_id).await?;
        check_driver(&ride, driver_id)?;

        let now = TimeMs::now();
        ride.complete(fare_amount.round2(), now)?;
        self.persist_transition(&ride, RideStatus::InProgress).await?;
        info!(ride_id = %ride.id, driver_id = %driver_id, fare = %ride.fare_amount.unwrap_or_default(), "Ride completed");

        self.release_driver(driver_id, now, |d, at| d.finish_ride(at), &[DriverStatus::Busy])
            .await;
        self.events.publish_ride_event(&RideEvent::from_ride(
            RideEventType::RideCompleted,
            &ride,
            now,
        ));
        Ok(ride)
    }

    /// # Errors
    /// `NotFound`, `InvalidState` unless the ride is `Requested` or `Accepted`.
    pub async fn cancel_ride(
        &self,
        ride_id: &RideId,
        initiated_by: &str,
    ) -> Result<Ride, DispatchError> {
        let mut ride = self.get_ride(ride_id).await?;
        let previous = ride.status;

        let now = TimeMs::now();
        ride.cancel(now)?;
        self.persist_transition(&ride, previous).await?;
        info!(ride_id = %ride.id, initiated_by, "Ride cancelled");

        if let Some(driver_id) = &ride.driver_id {
            self.release_driver(
                driver_id,
                now,
                |d, at| d.release_from_ride(at),
                &[DriverStatus::Busy, DriverStatus::EnRoute],
            )
            .await;
        }
        self.events.publish_ride_event(
            &RideEvent::from_ride(RideEventType::RideCancelled, &ride, now)
                .initiated_by(initiated_by),
        );
        Ok(ride)
    }

    /// Run another matching pass for a ride that is still pending.
    ///
    /// # Errors
    /// `NotFound`, `InvalidState` unless the ride is `Requested`,
    /// `ExternalService` if the geo-index is unreachable.
    pub async fn retry_matching(&self, ride_id: &RideId) -> Result<Ride, DispatchError> {
        let ride = self.get_ride(ride_id).await?;
        if ride.status != RideStatus::Requested {
            return Err(DispatchError::InvalidState(format!(
                "ride {} is {}, not awaiting a driver",
                ride.id, ride.status
            )));
        }
        Ok(self.attempt_driver_matching(&ride).await?.unwrap_or(ride))
    }

    /// # Errors
    /// `NotFound` for an unknown ride.
    pub async fn get_ride(&self, ride_id: &RideId) -> Result<Ride, DispatchError> {
        self.repo
            .get_ride(ride_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("ride {}", ride_id)))
    }

    pub async fn rides_for_rider(
        &self,
        rider_id: &RiderId,
        limit: i64,
    ) -> Result<Vec<Ride>, DispatchError> {
        Ok(self.repo.rides_by_rider(rider_id, limit).await?)
    }

    pub async fn rides_for_driver(
        &self,
        driver_id: &DriverId,
        limit: i64,
    ) -> Result<Vec<Ride>, DispatchError> {
        Ok(self.repo.rides_by_driver(driver_id, limit).await?)
    }

    /// Price a prospective trip. Without an explicit duration the ETA
    /// estimator fills it in.
    pub async fn estimate_fare(
        &self,
        pickup: GeoPoint,
        destination: GeoPoint,
        estimated_minutes: Option<i64>,
        vehicle_type: &str,
    ) -> FareQuote {
        let minutes = match estimated_minutes {
            Some(m) => m.max(0),
            None => self.estimate_minutes(pickup, destination).await,
        };
        self.pricing
            .quote_fare_at(pickup, destination, minutes, vehicle_type, TimeMs::now())
            .await
    }

    async fn persist_transition(
        &self,
        ride: &Ride,
        expected: RideStatus,
    ) -> Result<(), DispatchError> {
        if self.repo.update_ride_if_status(ride, expected).await? {
            Ok(())
        } else {
            Err(DispatchError::InvalidState(format!(
                "ride {} changed concurrently, expected {}",
                ride.id, expected
            )))
        }
    }

    /// Return the ride's driver to `Available`. The ride change is already
    /// committed, so failures here are only logged.
    async fn release_driver<F>(
        &self,
        driver_id: &DriverId,
        now: TimeMs,
        transition: F,
        expected: &[DriverStatus],
    ) where
        F: FnOnce(&mut Driver, TimeMs) -> Result<(), DispatchError>,
    {
        let mut driver = match self.repo.get_driver(driver_id).await {
            Ok(Some(d)) => d,
            Ok(None) => {
                warn!(driver_id = %driver_id, "Driver of finished ride not found");
                return;
            }
            Err(e) => {
                warn!(driver_id = %driver_id, error = %e, "Failed to load driver of finished ride");
                return;
            }
        };

        if let Err(e) = transition(&mut driver, now) {
            warn!(driver_id = %driver_id, error = %e, "Driver not released");
            return;
        }
        match self.repo.update_driver_status_if(&driver, expected).await {
            Ok(true) => self.propagate(&driver).await,
            Ok(false) => warn!(driver_id = %driver_id, "Driver status changed concurrently, not released"),
            Err(e) => warn!(driver_id = %driver_id, error = %e, "Failed to release driver"),
        }
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
            Ok(false) => warn!(driver_id = %driver.id, status = %driver.status, "Geo index rejected driver update"),
            Err(e) => warn!(driver_id = %driver.id, status = %driver.status, error = %e, "Failed to update geo index"),
        }
    }
}

fn check_driver(ride: &Ride, driver_id: &DriverId) -> Result<(), DispatchError> {
    if ride.driver_id.as_ref() == Some(driver_id) {
        Ok(())
    } else {
        Err(DispatchError::Validation(format!(
            "driver {} is not assigned to ride {}",
            driver_id, ride.id
        )))
    }
}

fn drop_candidate(candidates: &mut Vec<NearbyDriver>, driver_id: &DriverId) {
    candidates.retain(|c| &c.driver_id != driver_id);
}
