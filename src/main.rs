use anyhow::Context;
use dispatch_engine::engine::TrafficAwareEta;
use dispatch_engine::events::BroadcastEventPublisher;
use dispatch_engine::flags::{FeatureFlagSource, HttpFeatureFlagSource, StaticFeatureFlags};
use dispatch_engine::geo::{GeoIndexClient, HttpGeoIndexClient, InMemoryGeoIndex};
use dispatch_engine::notify::{LoggingNotificationSink, NotificationSink, RideNotifier};
use dispatch_engine::services::MarketDemandSupply;
use dispatch_engine::{
    api, config::Config, db::init_db, DriverLocationTracker, MatchingEngine, Repository,
    StaleDriverSweeper, SurgePricingEngine,
};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("Configuration error")?;
    let timeout = config.external_timeout();

    let pool = init_db(&config.database_path)
        .await
        .context("Failed to initialize database")?;
    let repo = Repository::new(pool);

    let geo: Arc<dyn GeoIndexClient> = match &config.geo_index_url {
        Some(url) => Arc::new(
            HttpGeoIndexClient::new(url.clone(), timeout)
                .map_err(|e| anyhow::anyhow!("Failed to build geo index client: {}", e))?,
        ),
        None => {
            tracing::info!("No GEO_INDEX_URL set, using in-process geo index");
            Arc::new(InMemoryGeoIndex::new())
        }
    };

    let flags: Arc<dyn FeatureFlagSource> = match &config.feature_flags_url {
        Some(url) => Arc::new(
            HttpFeatureFlagSource::new(url.clone(), config.feature_flags_enabled, timeout)
                .map_err(|e| anyhow::anyhow!("Failed to build feature flag client: {}", e))?,
        ),
        None => Arc::new(StaticFeatureFlags::new()),
    };

    let bus = Arc::new(BroadcastEventPublisher::new(config.event_bus_capacity));
    let notifications: Arc<dyn NotificationSink> = Arc::new(LoggingNotificationSink);
    let notifier = RideNotifier::spawn(notifications.clone(), bus.subscribe());

    let demand = Arc::new(MarketDemandSupply::new(
        repo.clone(),
        geo.clone(),
        config.surge.demand_radius_km,
    ));
    let pricing = Arc::new(
        SurgePricingEngine::new(demand, &config.surge)
            .with_notifications(notifications)
            .with_flags(flags.clone()),
    );
    let matching = Arc::new(
        MatchingEngine::new(
            repo.clone(),
            geo.clone(),
            bus.clone(),
            flags.clone(),
            pricing.clone(),
            config.matching.clone(),
        )
        .with_eta(Arc::new(TrafficAwareEta::new(config.surge.local_offset()))),
    );
    let tracker = Arc::new(DriverLocationTracker::new(
        repo.clone(),
        geo,
        bus.clone(),
        flags,
        config.tracking.clone(),
    ));

    let sweeper =
        StaleDriverSweeper::new(tracker.clone(), config.tracking.sweep_interval()).start();

    let app = api::create_router(api::AppState::new(repo, matching, tracker, pricing));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("Server error")?;

    sweeper.stop().await;
    drop(bus);
    notifier.abort();
    Ok(())
}
