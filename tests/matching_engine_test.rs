use dispatch_engine::config::{MatchingConfig, SurgeConfig, TrackingConfig};
use dispatch_engine::db::init_db;
use dispatch_engine::events::{BroadcastEventPublisher, PublishedEvent, RideEvent, RideEventType, Topic};
use dispatch_engine::engine::{EtaEstimator, StraightLineEta};
use dispatch_engine::flags::{StaticFeatureFlags, ADVANCED_MATCHING, DYNAMIC_ETA};
use dispatch_engine::geo::{GeoIndexClient, InMemoryGeoIndex};
use dispatch_engine::services::{LocationUpdate, MarketDemandSupply, NewDriver};
use dispatch_engine::{
    Decimal, DispatchError, DriverId, DriverLocationTracker, DriverStatus, GeoPoint,
    MatchingEngine, Repository, RideStatus, RiderId, SurgePricingEngine, VehicleType,
};
use async_trait::async_trait;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::broadcast;

struct Harness {
    repo: Repository,
    geo: Arc<InMemoryGeoIndex>,
    bus: Arc<BroadcastEventPublisher>,
    flags: StaticFeatureFlags,
    matching: Arc<MatchingEngine>,
    tracker: Arc<DriverLocationTracker>,
    _temp: TempDir,
}

async fn setup(matching_config: MatchingConfig) -> Harness {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Repository::new(pool);

    let geo = Arc::new(InMemoryGeoIndex::new());
    let bus = Arc::new(BroadcastEventPublisher::new(1024));
    let flags = StaticFeatureFlags::new();

    let demand = Arc::new(MarketDemandSupply::new(repo.clone(), geo.clone(), 2.0));
    let pricing = Arc::new(SurgePricingEngine::new(demand, &SurgeConfig::default()));
    let matching = Arc::new(MatchingEngine::new(
        repo.clone(),
        geo.clone(),
        bus.clone(),
        Arc::new(flags.clone()),
        pricing,
        matching_config,
    ));
    let tracker = Arc::new(DriverLocationTracker::new(
        repo.clone(),
        geo.clone(),
        bus.clone(),
        Arc::new(flags.clone()),
        TrackingConfig::default(),
    ));

    Harness {
        repo,
        geo,
        bus,
        flags,
        matching,
        tracker,
        _temp: temp_dir,
    }
}

fn point(lat: f64, lng: f64) -> GeoPoint {
    GeoPoint::new(lat, lng).unwrap()
}

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

async fn online_driver(h: &Harness, id: &str, location: GeoPoint) -> DriverId {
    let driver_id = DriverId::new(id);
    h.tracker
        .register_driver(NewDriver {
            id: driver_id.clone(),
            name: format!("Driver {}", id),
            phone: None,
            license_plate: None,
            vehicle_type: VehicleType::Standard,
        })
        .await
        .unwrap();
    h.tracker
        .update_location(&driver_id, LocationUpdate::at(location))
        .await
        .unwrap();
    h.tracker.go_online(&driver_id, None).await.unwrap();
    driver_id
}

fn ride_events(rx: &mut broadcast::Receiver<PublishedEvent>) -> Vec<RideEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if event.topic == Topic::RideEvents {
            events.push(serde_json::from_value(event.payload).unwrap());
        }
    }
    events
}

#[tokio::test]
async fn test_match_start_complete_scenario() {
    let h = setup(MatchingConfig::default()).await;
    let mut rx = h.bus.subscribe();
    let d = online_driver(&h, "D", point(40.7589, -73.9851)).await;

    let ride = h
        .matching
        .create_ride(RiderId::new("rider-1"), point(40.7590, -73.9850), None)
        .await
        .unwrap();
    assert_eq!(ride.status, RideStatus::Accepted);
    assert_eq!(ride.driver_id, Some(d.clone()));
    assert_eq!(h.tracker.get_driver(&d).await.unwrap().status, DriverStatus::Busy);
    assert_eq!(
        h.geo.get_driver_location(&d).await.unwrap().unwrap().status,
        DriverStatus::Busy
    );

    let started = h.matching.start_ride(&ride.id, &d).await.unwrap();
    assert_eq!(started.status, RideStatus::InProgress);

    let completed = h
        .matching
        .complete_ride(&ride.id, &d, dec("18.50"))
        .await
        .unwrap();
    assert_eq!(completed.status, RideStatus::Completed);
    assert_eq!(completed.fare_amount, Some(dec("18.50")));

    let stored = h.matching.get_ride(&ride.id).await.unwrap();
    assert_eq!(stored.status, RideStatus::Completed);
    assert_eq!(stored.fare_amount, Some(dec("18.50")));
    assert_eq!(
        h.tracker.get_driver(&d).await.unwrap().status,
        DriverStatus::Available
    );
    assert_eq!(
        h.geo.get_driver_location(&d).await.unwrap().unwrap().status,
        DriverStatus::Available
    );

    let types: Vec<RideEventType> = ride_events(&mut rx).iter().map(|e| e.event_type).collect();
    assert_eq!(
        types,
        vec![
            RideEventType::RideRequested,
            RideEventType::RideAccepted,
            RideEventType::RideStarted,
            RideEventType::RideCompleted,
        ]
    );
}

#[tokio::test]
async fn test_cancel_in_progress_rejected() {
    let h = setup(MatchingConfig::default()).await;
    let d = online_driver(&h, "D", point(40.7589, -73.9851)).await;

    let ride = h
        .matching
        .create_ride(RiderId::new("rider-1"), point(40.7590, -73.9850), None)
        .await
        .unwrap();
    h.matching.start_ride(&ride.id, &d).await.unwrap();

    let err = h.matching.cancel_ride(&ride.id, "rider").await.unwrap_err();
    assert!(matches!(err, DispatchError::InvalidState(_)));

    let stored = h.matching.get_ride(&ride.id).await.unwrap();
    assert_eq!(stored.status, RideStatus::InProgress);
    assert_eq!(stored.cancelled_at, None);
    assert_eq!(h.tracker.get_driver(&d).await.unwrap().status, DriverStatus::Busy);
}

#[tokio::test]
async fn test_cancel_accepted_releases_driver() {
    let h = setup(MatchingConfig::default()).await;
    let d = online_driver(&h, "D", point(40.7589, -73.9851)).await;

    let ride = h
        .matching
        .create_ride(RiderId::new("rider-1"), point(40.7590, -73.9850), None)
        .await
        .unwrap();
    assert_eq!(ride.status, RideStatus::Accepted);

    let mut rx = h.bus.subscribe();
    let cancelled = h.matching.cancel_ride(&ride.id, "driver").await.unwrap();
    assert_eq!(cancelled.status, RideStatus::Cancelled);
    assert_eq!(
        h.tracker.get_driver(&d).await.unwrap().status,
        DriverStatus::Available
    );

    let events = ride_events(&mut rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, RideEventType::RideCancelled);
    assert_eq!(events[0].initiated_by.as_deref(), Some("driver"));

    // A cancelled ride cannot be cancelled again.
    assert!(matches!(
        h.matching.cancel_ride(&ride.id, "rider").await,
        Err(DispatchError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_one_active_ride_per_rider() {
    let h = setup(MatchingConfig::default()).await;
    let rider = RiderId::new("rider-1");

    let first = h
        .matching
        .create_ride(rider.clone(), point(40.7590, -73.9850), None)
        .await
        .unwrap();
    assert_eq!(first.status, RideStatus::Requested);

    let err = h
        .matching
        .create_ride(rider.clone(), point(40.7600, -73.9800), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Conflict(_)));

    h.matching.cancel_ride(&first.id, "rider").await.unwrap();
    let second = h
        .matching
        .create_ride(rider.clone(), point(40.7600, -73.9800), None)
        .await
        .unwrap();
    assert_eq!(second.status, RideStatus::Requested);

    let history = h.matching.rides_for_rider(&rider, 10).await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn test_pending_ride_matched_on_retry() {
    let h = setup(MatchingConfig::default()).await;

    let ride = h
        .matching
        .create_ride(
            RiderId::new("rider-1"),
            point(40.7590, -73.9850),
            Some(point(40.7128, -74.0060)),
        )
        .await
        .unwrap();
    assert_eq!(ride.status, RideStatus::Requested);
    assert!(ride.estimated_duration_minutes.unwrap() >= 1);

    let d = online_driver(&h, "D", point(40.7589, -73.9851)).await;
    let retried = h.matching.retry_matching(&ride.id).await.unwrap();
    assert_eq!(retried.status, RideStatus::Accepted);
    assert_eq!(retried.driver_id, Some(d));

    assert!(matches!(
        h.matching.retry_matching(&ride.id).await,
        Err(DispatchError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_geo_index_outage_leaves_ride_pending() {
    let h = setup(MatchingConfig::default()).await;
    online_driver(&h, "D", point(40.7589, -73.9851)).await;
    h.geo.set_failing(true);

    let ride = h
        .matching
        .create_ride(RiderId::new("rider-1"), point(40.7590, -73.9850), None)
        .await
        .unwrap();
    assert_eq!(ride.status, RideStatus::Requested);

    assert!(matches!(
        h.matching.retry_matching(&ride.id).await,
        Err(DispatchError::ExternalService(_))
    ));

    h.geo.set_failing(false);
    let retried = h.matching.retry_matching(&ride.id).await.unwrap();
    assert_eq!(retried.status, RideStatus::Accepted);
}

#[tokio::test]
async fn test_wrong_driver_cannot_start_or_complete() {
    let h = setup(MatchingConfig::default()).await;
    let d = online_driver(&h, "D", point(40.7589, -73.9851)).await;

    let ride = h
        .matching
        .create_ride(RiderId::new("rider-1"), point(40.7590, -73.9850), None)
        .await
        .unwrap();

    let other = DriverId::new("E");
    assert!(matches!(
        h.matching.start_ride(&ride.id, &other).await,
        Err(DispatchError::Validation(_))
    ));
    assert!(matches!(
        h.matching.complete_ride(&ride.id, &d, dec("10.00")).await,
        Err(DispatchError::InvalidState(_))
    ));
    assert!(matches!(
        h.matching
            .start_ride(&dispatch_engine::RideId::generate(), &d)
            .await,
        Err(DispatchError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_stale_candidate_skipped_for_next() {
    let h = setup(MatchingConfig::default()).await;
    let pickup = point(40.7590, -73.9850);

    // The index still advertises a driver the store already has offline.
    let ghost = online_driver(&h, "ghost", point(40.7590, -73.9850)).await;
    h.tracker.go_offline(&ghost).await.unwrap();
    h.geo
        .update_driver_location(&ghost, pickup, DriverStatus::Available)
        .await
        .unwrap();
    let real = online_driver(&h, "real", point(40.7620, -73.9850)).await;

    let ride = h
        .matching
        .create_ride(RiderId::new("rider-1"), pickup, None)
        .await
        .unwrap();
    assert_eq!(ride.status, RideStatus::Accepted);
    assert_eq!(ride.driver_id, Some(real));
    assert_eq!(
        h.tracker.get_driver(&ghost).await.unwrap().status,
        DriverStatus::Offline
    );
}

#[tokio::test]
async fn test_stale_candidate_abandons_without_retry() {
    let h = setup(MatchingConfig {
        retry_next_candidate: false,
        ..MatchingConfig::default()
    })
    .await;
    let pickup = point(40.7590, -73.9850);

    let ghost = online_driver(&h, "ghost", pickup).await;
    h.tracker.go_offline(&ghost).await.unwrap();
    h.geo
        .update_driver_location(&ghost, pickup, DriverStatus::Available)
        .await
        .unwrap();
    online_driver(&h, "real", point(40.7620, -73.9850)).await;

    let ride = h
        .matching
        .create_ride(RiderId::new("rider-1"), pickup, None)
        .await
        .unwrap();
    assert_eq!(ride.status, RideStatus::Requested);
    assert_eq!(ride.driver_id, None);
}

#[tokio::test]
async fn test_advanced_matching_picks_nearest() {
    let h = setup(MatchingConfig::default()).await;
    h.flags.set(ADVANCED_MATCHING, true);
    let pickup = point(40.7590, -73.9850);

    online_driver(&h, "far", point(40.7700, -73.9850)).await;
    let near = online_driver(&h, "near", point(40.7592, -73.9851)).await;

    let ride = h
        .matching
        .create_ride(RiderId::new("rider-1"), pickup, None)
        .await
        .unwrap();
    assert_eq!(ride.driver_id, Some(near));
}

#[tokio::test]
async fn test_concurrent_rides_claim_single_driver_once() {
    const RIDERS: usize = 8;
    let h = setup(MatchingConfig::default()).await;
    let d = online_driver(&h, "D", point(40.7589, -73.9851)).await;

    let attempts = (0..RIDERS).map(|i| {
        let matching = h.matching.clone();
        async move {
            matching
                .create_ride(
                    RiderId::new(format!("rider-{}", i)),
                    point(40.7590, -73.9850),
                    None,
                )
                .await
        }
    });
    let rides: Vec<_> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let accepted: Vec<_> = rides
        .iter()
        .filter(|r| r.status == RideStatus::Accepted)
        .collect();
    let requested = rides
        .iter()
        .filter(|r| r.status == RideStatus::Requested)
        .count();
    assert_eq!(accepted.len(), 1);
    assert_eq!(requested, RIDERS - 1);
    assert_eq!(accepted[0].driver_id, Some(d.clone()));

    let driver_rides = h.repo.rides_by_driver(&d, 100).await.unwrap();
    assert_eq!(driver_rides.len(), 1);
    assert_eq!(h.tracker.get_driver(&d).await.unwrap().status, DriverStatus::Busy);
}

/// Routing stand-in that always answers the same number of minutes.
#[derive(Debug)]
struct FixedEta(i64);

#[async_trait]
impl EtaEstimator for FixedEta {
    async fn estimate_minutes(&self, _from: GeoPoint, _to: GeoPoint) -> i64 {
        self.0
    }
}

#[tokio::test]
async fn test_dynamic_eta_flag_selects_estimator() {
    let h = setup(MatchingConfig::default()).await;
    let demand = Arc::new(MarketDemandSupply::new(h.repo.clone(), h.geo.clone(), 2.0));
    let pricing = Arc::new(SurgePricingEngine::new(demand, &SurgeConfig::default()));
    let matching = MatchingEngine::new(
        h.repo.clone(),
        h.geo.clone(),
        h.bus.clone(),
        Arc::new(h.flags.clone()),
        pricing,
        MatchingConfig::default(),
    )
    .with_eta(Arc::new(FixedEta(42)));

    let pickup = point(40.7590, -73.9850);
    let destination = point(40.7128, -74.0060);

    let routed = matching
        .create_ride(RiderId::new("rider-1"), pickup, Some(destination))
        .await
        .unwrap();
    assert_eq!(routed.estimated_duration_minutes, Some(42));

    h.flags.set(DYNAMIC_ETA, false);
    let straight = matching
        .create_ride(RiderId::new("rider-2"), pickup, Some(destination))
        .await
        .unwrap();
    let expected = StraightLineEta.estimate_minutes(pickup, destination).await;
    assert_eq!(straight.estimated_duration_minutes, Some(expected));
    assert_ne!(expected, 42);

    // No destination, no estimate.
    let open_ended = matching
        .create_ride(RiderId::new("rider-3"), pickup, None)
        .await
        .unwrap();
    assert_eq!(open_ended.estimated_duration_minutes, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_requests_for_one_rider_create_one_ride() {
    const ATTEMPTS: usize = 8;
    let h = setup(MatchingConfig::default()).await;
    let rider = RiderId::new("rider-1");

    let handles: Vec<_> = (0..ATTEMPTS)
        .map(|_| {
            let matching = h.matching.clone();
            let rider = rider.clone();
            tokio::spawn(async move {
                matching
                    .create_ride(rider, point(40.7590, -73.9850), None)
                    .await
            })
        })
        .collect();
    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let created = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(DispatchError::Conflict(_))))
        .count();
    assert_eq!(created, 1);
    assert_eq!(conflicts, ATTEMPTS - 1);

    let history = h.matching.rides_for_rider(&rider, 100).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, RideStatus::Requested);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_assignments_claim_driver_once() {
    const RIDES: usize = 8;
    let h = setup(MatchingConfig::default()).await;

    // Requested before any driver is online, so every ride stays pending.
    let mut rides = Vec::new();
    for i in 0..RIDES {
        let ride = h
            .matching
            .create_ride(
                RiderId::new(format!("rider-{}", i)),
                point(40.7590, -73.9850),
                None,
            )
            .await
            .unwrap();
        assert_eq!(ride.status, RideStatus::Requested);
        rides.push(ride);
    }
    let d = online_driver(&h, "D", point(40.7589, -73.9851)).await;

    let handles: Vec<_> = rides
        .into_iter()
        .map(|ride| {
            let matching = h.matching.clone();
            let driver_id = d.clone();
            tokio::spawn(async move { matching.assign_ride_to_driver(&ride, &driver_id).await })
        })
        .collect();
    let outcomes: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let claimed: Vec<_> = outcomes.iter().flatten().collect();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].status, RideStatus::Accepted);
    assert_eq!(claimed[0].driver_id, Some(d.clone()));

    let driver_rides = h.repo.rides_by_driver(&d, 100).await.unwrap();
    assert_eq!(driver_rides.len(), 1);
    assert_eq!(driver_rides[0].id, claimed[0].id);
    assert_eq!(h.tracker.get_driver(&d).await.unwrap().status, DriverStatus::Busy);
}
