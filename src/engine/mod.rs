//! Pure dispatch computation: candidate selection, pricing arithmetic, surge
//! signals and trip duration estimates.
//!
//! Nothing in here touches the store or the network directly; the services
//! feed it data and act on its answers.

pub mod eta;
pub mod pricing;
pub mod selection;
pub mod signals;

pub use eta::{EtaEstimator, StraightLineEta, TrafficAwareEta};
pub use pricing::{SurgeCell, SurgeFactors};
pub use selection::{strategy_for, NearestSelection, SelectionStrategy, SimpleSelection};
pub use signals::{
    ClearWeather, DemandSupply, DemandSupplySource, DensityMap, EventCalendar,
    HistoricalDemandSource, NeutralHistory, WeatherSource,
};
