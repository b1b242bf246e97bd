//! Candidate selection strategies.
//!
//! Strategies only look at candidates the index reported as `Available`. The
//! choice is a point-in-time read, not a reservation; the store arbitrates.

use crate::domain::DriverStatus;
use crate::geo::NearbyDriver;
use std::fmt;

pub trait SelectionStrategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Pick one candidate, or `None` if no candidate is eligible.
    fn select<'a>(&self, candidates: &'a [NearbyDriver]) -> Option<&'a NearbyDriver>;
}

fn eligible(candidate: &&NearbyDriver) -> bool {
    candidate.status == DriverStatus::Available
}

/// First eligible candidate in index order.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleSelection;

impl SelectionStrategy for SimpleSelection {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn select<'a>(&self, candidates: &'a [NearbyDriver]) -> Option<&'a NearbyDriver> {
        candidates.iter().find(eligible)
    }
}

/// Eligible candidate with the smallest reported distance; ties keep index order.
#[derive(Debug, Default, Clone, Copy)]
pub struct NearestSelection;

impl SelectionStrategy for NearestSelection {
    fn name(&self) -> &'static str {
        "advanced"
    }

    fn select<'a>(&self, candidates: &'a [NearbyDriver]) -> Option<&'a NearbyDriver> {
        candidates
            .iter()
            .filter(eligible)
            .min_by(|a, b| a.distance_km.total_cmp(&b.distance_km))
    }
}

static SIMPLE: SimpleSelection = SimpleSelection;
static NEAREST: NearestSelection = NearestSelection;

/// Strategy for the `advanced_matching` flag value.
pub fn strategy_for(advanced: bool) -> &'static dyn SelectionStrategy {
    if advanced {
        &NEAREST
    } else {
        &SIMPLE
    }
}
