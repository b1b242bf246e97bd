//! Feature flag lookup with static fallbacks.

use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

pub mod http;

pub use http::HttpFeatureFlagSource;

pub const ADVANCED_MATCHING: &str = "advanced_matching";
pub const SURGE_PRICING: &str = "surge_pricing";
pub const DYNAMIC_ETA: &str = "dynamic_eta";
pub const REAL_TIME_TRACKING: &str = "real_time_tracking";

/// Value used whenever the flag service is disabled or unreachable.
pub fn default_flag_value(name: &str) -> bool {
    match name {
        ADVANCED_MATCHING => false,
        SURGE_PRICING => false,
        DYNAMIC_ETA => true,
        REAL_TIME_TRACKING => true,
        _ => false,
    }
}

/// Rollout share reported when a flag has no percentage or the lookup fails.
pub const DEFAULT_PERCENTAGE: f64 = 0.0;

/// Flag lookups never fail; implementations fall back to [`default_flag_value`]
/// and [`DEFAULT_PERCENTAGE`].
#[async_trait]
pub trait FeatureFlagSource: Send + Sync + fmt::Debug {
    async fn is_enabled(&self, name: &str, context: &str) -> bool;

    /// Rollout percentage for `name`, in `0.0..=100.0`.
    async fn feature_percentage(&self, name: &str, context: &str) -> f64;
}

#[derive(Debug, Clone)]
pub enum FlagError {
    NetworkError(String),
    HttpError { status: u16 },
    ParseError(String),
}

impl fmt::Display for FlagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            FlagError::HttpError { status } => write!(f, "HTTP error {}", status),
            FlagError::ParseError(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for FlagError {}

/// In-process flags: explicit overrides, else the static defaults.
///
/// Clones share overrides, so a test can flip a flag on a running engine.
#[derive(Debug, Clone, Default)]
pub struct StaticFeatureFlags {
    overrides: Arc<DashMap<String, bool>>,
    percentages: Arc<DashMap<String, f64>>,
}

impl StaticFeatureFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flag(self, name: impl Into<String>, enabled: bool) -> Self {
        self.set(name, enabled);
        self
    }

    pub fn set(&self, name: impl Into<String>, enabled: bool) {
        self.overrides.insert(name.into(), enabled);
    }

    pub fn set_percentage(&self, name: impl Into<String>, percentage: f64) {
        self.percentages
            .insert(name.into(), percentage.clamp(0.0, 100.0));
    }

    pub fn clear(&self, name: &str) {
        self.overrides.remove(name);
        self.percentages.remove(name);
    }
}

#[async_trait]
impl FeatureFlagSource for StaticFeatureFlags {
    async fn is_enabled(&self, name: &str, _context: &str) -> bool {
        self.overrides
            .get(name)
            .map(|v| *v)
            .unwrap_or_else(|| default_flag_value(name))
    }

    async fn feature_percentage(&self, name: &str, _context: &str) -> f64 {
        self.percentages
            .get(name)
            .map(|v| *v)
            .unwrap_or(DEFAULT_PERCENTAGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert!(!default_flag_value(ADVANCED_MATCHING));
        assert!(!default_flag_value(SURGE_PRICING));
        assert!(default_flag_value(DYNAMIC_ETA));
        assert!(default_flag_value(REAL_TIME_TRACKING));
        assert!(!default_flag_value("something_new"));
    }

    #[tokio::test]
    async fn test_static_overrides() {
        let flags = StaticFeatureFlags::new().with_flag(ADVANCED_MATCHING, true);
        assert!(flags.is_enabled(ADVANCED_MATCHING, "ride").await);
        assert!(flags.is_enabled(DYNAMIC_ETA, "ride").await);

        flags.set(DYNAMIC_ETA, false);
        assert!(!flags.is_enabled(DYNAMIC_ETA, "ride").await);
        flags.clear(ADVANCED_MATCHING);
        assert!(!flags.is_enabled(ADVANCED_MATCHING, "ride").await);
    }

    #[tokio::test]
    async fn test_static_percentages() {
        let flags = StaticFeatureFlags::new();
        assert_eq!(flags.feature_percentage(SURGE_PRICING, "ride").await, 0.0);

        flags.set_percentage(SURGE_PRICING, 25.0);
        assert_eq!(flags.feature_percentage(SURGE_PRICING, "ride").await, 25.0);
        flags.set_percentage(ADVANCED_MATCHING, 140.0);
        assert_eq!(flags.feature_percentage(ADVANCED_MATCHING, "ride").await, 100.0);

        flags.clear(SURGE_PRICING);
        assert_eq!(flags.feature_percentage(SURGE_PRICING, "ride").await, 0.0);
    }
}
