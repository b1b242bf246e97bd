use chrono::{FixedOffset, Offset, Utc};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    /// Remote geo-index base URL; `None` runs the in-process index.
    pub geo_index_url: Option<String>,
    pub feature_flags_url: Option<String>,
    pub feature_flags_enabled: bool,
    pub external_timeout_ms: u64,
    pub event_bus_capacity: usize,
    pub matching: MatchingConfig,
    pub tracking: TrackingConfig,
    pub surge: SurgeConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchingConfig {
    pub max_search_radius_km: f64,
    pub max_drivers_to_consider: usize,
    /// Try the next candidate when the chosen one was claimed concurrently.
    pub retry_next_candidate: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            max_search_radius_km: 5.0,
            max_drivers_to_consider: 10,
            retry_next_candidate: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackingConfig {
    pub stale_after_secs: u64,
    pub sweep_interval_secs: u64,
}

impl TrackingConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 600,
            sweep_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SurgeConfig {
    /// Local-time offset used for rush-hour and late-night windows.
    pub utc_offset_minutes: i32,
    pub demand_radius_km: f64,
}

impl SurgeConfig {
    /// Fixed offset for local-time rules; out-of-range values fall back to UTC.
    pub fn local_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}

impl Default for SurgeConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            demand_radius_km: 2.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parse_or(&env_map, "PORT", 8080u16, "must be a valid u16")?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let geo_index_url = non_empty(&env_map, "GEO_INDEX_URL");
        let feature_flags_url = non_empty(&env_map, "FEATURE_FLAGS_URL");
        let feature_flags_enabled = parse_bool(&env_map, "FEATURE_FLAGS_ENABLED", false)?;

        let external_timeout_ms = parse_or(
            &env_map,
            "EXTERNAL_TIMEOUT_MS",
            2000u64,
            "must be a number of milliseconds",
        )?;
        if external_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "EXTERNAL_TIMEOUT_MS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let event_bus_capacity =
            parse_or(&env_map, "EVENT_BUS_CAPACITY", 1024usize, "must be a positive integer")?;
        if event_bus_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "EVENT_BUS_CAPACITY".to_string(),
                "must be a positive integer".to_string(),
            ));
        }

        let defaults = MatchingConfig::default();
        let max_search_radius_km = parse_or(
            &env_map,
            "MATCHING_MAX_SEARCH_RADIUS_KM",
            defaults.max_search_radius_km,
            "must be a number of kilometres",
        )?;
        if !(max_search_radius_km > 0.0) {
            return Err(ConfigError::InvalidValue(
                "MATCHING_MAX_SEARCH_RADIUS_KM".to_string(),
                "must be positive".to_string(),
            ));
        }
        let matching = MatchingConfig {
            max_search_radius_km,
            max_drivers_to_consider: parse_or(
                &env_map,
                "MATCHING_MAX_DRIVERS",
                defaults.max_drivers_to_consider,
                "must be a positive integer",
            )?,
            retry_next_candidate: parse_bool(
                &env_map,
                "MATCHING_RETRY_NEXT_CANDIDATE",
                defaults.retry_next_candidate,
            )?,
        };

        let defaults = TrackingConfig::default();
        let tracking = TrackingConfig {
            stale_after_secs: parse_or(
                &env_map,
                "STALE_DRIVER_THRESHOLD_SECS",
                defaults.stale_after_secs,
                "must be a number of seconds",
            )?,
            sweep_interval_secs: parse_or(
                &env_map,
                "STALE_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval_secs,
                "must be a number of seconds",
            )?,
        };
        if tracking.sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "STALE_SWEEP_INTERVAL_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let defaults = SurgeConfig::default();
        let utc_offset_minutes = parse_or(
            &env_map,
            "SURGE_UTC_OFFSET_MINUTES",
            defaults.utc_offset_minutes,
            "must be an integer number of minutes",
        )?;
        if !(-14 * 60..=14 * 60).contains(&utc_offset_minutes) {
            return Err(ConfigError::InvalidValue(
                "SURGE_UTC_OFFSET_MINUTES".to_string(),
                "must be within +/- 14 hours".to_string(),
            ));
        }
        let surge = SurgeConfig {
            utc_offset_minutes,
            demand_radius_km: parse_or(
                &env_map,
                "SURGE_DEMAND_RADIUS_KM",
                defaults.demand_radius_km,
                "must be a number of kilometres",
            )?,
        };

        Ok(Config {
            port,
            database_path,
            geo_index_url,
            feature_flags_url,
            feature_flags_enabled,
            external_timeout_ms,
            event_bus_capacity,
            matching,
            tracking,
            surge,
        })
    }

    pub fn external_timeout(&self) -> Duration {
        Duration::from_millis(self.external_timeout_ms)
    }
}

fn non_empty(env_map: &HashMap<String, String>, key: &str) -> Option<String> {
    env_map
        .get(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
    expectation: &str,
) -> Result<T, ConfigError> {
    match env_map.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), expectation.to_string())),
    }
}

fn parse_bool(
    env_map: &HashMap<String, String>,
    key: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match env_map.get(key).map(|s| s.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::InvalidValue(
                key.to_string(),
                format!("must be true or false, got {}", other),
            )),
        },
    }
}
