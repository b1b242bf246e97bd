//! Remote feature flag service client.

use super::{default_flag_value, FeatureFlagSource, FlagError, DEFAULT_PERCENTAGE};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct FlagResponse {
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct PercentageResponse {
    percentage: Option<f64>,
}

/// Looks flags up at `GET {base}/flags/{name}?context=...` and rollout shares
/// at `GET {base}/flags/{name}/percentage?context=...`.
///
/// When disabled, or when the call fails or times out, the static default for
/// the flag (or a zero percentage) is returned.
#[derive(Debug, Clone)]
pub struct HttpFeatureFlagSource {
    client: Client,
    base_url: String,
    enabled: bool,
}

impl HttpFeatureFlagSource {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        enabled: bool,
        timeout: Duration,
    ) -> Result<Self, FlagError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FlagError::NetworkError(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            enabled,
        })
    }

    async fn fetch(&self, name: &str, context: &str) -> Result<Option<bool>, FlagError> {
        let url = format!("{}/flags/{}", self.base_url, name);
        self.get_json::<FlagResponse>(&url, context)
            .await
            .map(|r| r.enabled)
    }

    async fn fetch_percentage(&self, name: &str, context: &str) -> Result<Option<f64>, FlagError> {
        let url = format!("{}/flags/{}/percentage", self.base_url, name);
        self.get_json::<PercentageResponse>(&url, context)
            .await
            .map(|r| r.percentage)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        context: &str,
    ) -> Result<T, FlagError> {
        let response = self
            .client
            .get(url)
            .query(&[("context", context)])
            .send()
            .await
            .map_err(|e| FlagError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FlagError::HttpError {
                status: status.as_u16(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| FlagError::ParseError(e.to_string()))
    }
}

#[async_trait]
impl FeatureFlagSource for HttpFeatureFlagSource {
    async fn is_enabled(&self, name: &str, context: &str) -> bool {
        if !self.enabled {
            return default_flag_value(name);
        }

        match self.fetch(name, context).await {
            Ok(Some(enabled)) => {
                debug!(flag = name, context, enabled, "Feature flag resolved");
                enabled
            }
            Ok(None) => default_flag_value(name),
            Err(e) => {
                warn!(flag = name, context, error = %e, "Feature flag lookup failed, using default");
                default_flag_value(name)
            }
        }
    }

    async fn feature_percentage(&self, name: &str, context: &str) -> f64 {
        if !self.enabled {
            return DEFAULT_PERCENTAGE;
        }

        match self.fetch_percentage(name, context).await {
            Ok(Some(percentage)) if percentage.is_finite() => percentage.clamp(0.0, 100.0),
            Ok(_) => DEFAULT_PERCENTAGE,
            Err(e) => {
                warn!(flag = name, context, error = %e, "Feature percentage lookup failed, using 0");
                DEFAULT_PERCENTAGE
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{ADVANCED_MATCHING, DYNAMIC_ETA, SURGE_PRICING};
    use axum::extract::Path;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    /// Serves a flag service on an ephemeral port and returns its base URL.
    async fn serve_flags() -> String {
        let app = Router::new()
            .route(
                "/flags/:name",
                get(|Path(name): Path<String>| async move {
                    Json(json!({ "enabled": name == "advanced_matching" }))
                }),
            )
            .route(
                "/flags/:name/percentage",
                get(|Path(name): Path<String>| async move {
                    let body: Value = match name.as_str() {
                        "surge_pricing" => json!({ "percentage": 35.5 }),
                        "dynamic_eta" => json!({ "percentage": "lots" }),
                        _ => json!({}),
                    };
                    Json(body)
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_disabled_source_uses_defaults() {
        let flags =
            HttpFeatureFlagSource::new("http://127.0.0.1:9", false, Duration::from_millis(100))
                .unwrap();
        assert!(!flags.is_enabled(ADVANCED_MATCHING, "ride").await);
        assert!(flags.is_enabled(DYNAMIC_ETA, "ride").await);
    }

    #[tokio::test]
    async fn test_unreachable_source_falls_back() {
        let flags =
            HttpFeatureFlagSource::new("http://127.0.0.1:9", true, Duration::from_millis(200))
                .unwrap();
        assert!(!flags.is_enabled(ADVANCED_MATCHING, "ride").await);
        assert!(flags.is_enabled(DYNAMIC_ETA, "ride").await);
    }

    #[tokio::test]
    async fn test_remote_flags_and_percentages() {
        let base = serve_flags().await;
        let flags = HttpFeatureFlagSource::new(base, true, Duration::from_secs(2)).unwrap();

        assert!(flags.is_enabled(ADVANCED_MATCHING, "ride").await);
        assert!(!flags.is_enabled(DYNAMIC_ETA, "ride").await);

        assert_eq!(flags.feature_percentage(SURGE_PRICING, "ride").await, 35.5);
        // Malformed and missing percentages both read as zero.
        assert_eq!(flags.feature_percentage(DYNAMIC_ETA, "ride").await, 0.0);
        assert_eq!(flags.feature_percentage(ADVANCED_MATCHING, "ride").await, 0.0);
    }

    #[tokio::test]
    async fn test_percentage_falls_back_to_zero() {
        let disabled =
            HttpFeatureFlagSource::new("http://127.0.0.1:9", false, Duration::from_millis(100))
                .unwrap();
        assert_eq!(disabled.feature_percentage(SURGE_PRICING, "ride").await, 0.0);

        let unreachable =
            HttpFeatureFlagSource::new("http://127.0.0.1:9", true, Duration::from_millis(200))
                .unwrap();
        assert_eq!(unreachable.feature_percentage(SURGE_PRICING, "ride").await, 0.0);
    }
}
