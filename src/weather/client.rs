//! HTTP client for the current-weather endpoint (OpenWeatherMap v2.5).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, info, instrument};

use super::snapshot::WeatherSnapshot;

/// Public endpoint used when no base URL is configured.
pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org";

const WEATHER_PATH: &str = "/data/2.5/weather";

/// Errors from a single weather lookup
#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("city name is empty")]
    BlankCity,

    #[error("no weather service key configured")]
    MissingApiKey,

    #[error("city not found: {city}")]
    NotFound { city: String },

    #[error("weather request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("weather service responded with {0}")]
    Status(StatusCode),

    #[error("unexpected weather payload: {0}")]
    Decode(String),
}

impl WeatherError {
    /// True for an unknown city, as opposed to a transport or service problem.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Anything that can produce a snapshot for a city name.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn fetch(&self, city: &str) -> Result<WeatherSnapshot, WeatherError>;
}

/// Talks to the remote weather service.
///
/// One request per call and no retries: a failed attempt goes straight back
/// to the caller.
pub struct WeatherClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl WeatherClient {
    /// Build a client with its own connection pool.
    ///
    /// # Arguments
    /// * `api_key` - Application key sent as `appid`
    /// * `base_url` - Service root, e.g. [`DEFAULT_BASE_URL`]
    /// * `timeout` - Whole-request timeout
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, WeatherError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl std::fmt::Debug for WeatherClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The key stays out of logs
        f.debug_struct("WeatherClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[async_trait]
impl WeatherSource for WeatherClient {
    #[instrument(skip(self))]
    async fn fetch(&self, city: &str) -> Result<WeatherSnapshot, WeatherError> {
        let city = city.trim();
        if city.is_empty() {
            return Err(WeatherError::BlankCity);
        }
        if self.api_key.is_empty() {
            return Err(WeatherError::MissingApiKey);
        }

        let url = format!("{}{}", self.base_url, WEATHER_PATH);
        debug!(url = %url, "GET current weather");

        // without_url() keeps the appid query parameter out of error messages
        let response = self
            .http
            .get(&url)
            .query(&[("appid", self.api_key.as_str()), ("q", city)])
            .send()
            .await
            .map_err(|e| WeatherError::Network(e.without_url()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(WeatherError::NotFound { city: city.to_string() });
        }
        if !status.is_success() {
            return Err(WeatherError::Status(status));
        }

        let body = response
            .text()
            .await
            .map_err(|e| WeatherError::Network(e.without_url()))?;
        let snapshot =
            WeatherSnapshot::from_json(&body).map_err(|e| WeatherError::Decode(e.to_string()))?;

        info!(
            city = snapshot.city(),
            temperature = %snapshot.temperature_label(),
            "Weather fetched"
        );
        Ok(snapshot)
    }
}
