//! Orchestration over the store, the engine and the external collaborators.

pub mod location;
pub mod matching;
pub mod surge;
pub mod sweeper;

pub use location::{DriverLocationTracker, LocationUpdate, NearbyDriverRecord, NewDriver, SweepReport};
pub use matching::MatchingEngine;
pub use surge::{FareQuote, MarketDemandSupply, SurgePricingEngine};
pub use sweeper::{StaleDriverSweeper, SweeperHandle};
