//! Weather snapshot as delivered by the current-weather endpoint.
//!
//! Temperatures are kept in Kelvin exactly as received and converted to
//! Celsius on every read.

use serde::Deserialize;
use thiserror::Error;

/// Offset between Kelvin and Celsius.
pub const KELVIN_OFFSET: f64 = 273.15;

/// Convert Kelvin to Celsius.
pub fn celsius(kelvin: f64) -> f64 {
    kelvin - KELVIN_OFFSET
}

/// Two decimals, `.` separator, independent of any locale setting.
pub fn format_celsius(value: f64) -> String {
    format!("{value:.2}")
}

/// Why a payload could not be turned into a snapshot
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("malformed weather json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("weather payload has no conditions")]
    NoConditions,

    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

/// Immutable point-in-time weather for one city.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherSnapshot {
    city: String,
    main: String,
    description: String,
    temperature_k: f64,
    feels_like_k: f64,
    min_k: f64,
    max_k: f64,
    humidity: u8,
    cloudiness: u8,
    wind_speed: f64,
}

impl WeatherSnapshot {
    /// Parse the JSON body of a current-weather response.
    pub fn from_json(body: &str) -> Result<Self, PayloadError> {
        let payload: WeatherPayload = serde_json::from_str(body)?;
        Self::from_payload(payload)
    }

    pub fn city(&self) -> &str {
        &self.city
    }

    /// Short description, e.g. "Clouds".
    pub fn main(&self) -> &str {
        &self.main
    }

    /// Detailed description, e.g. "broken clouds".
    pub fn description(&self) -> &str {
        &self.description
    }

    /// False when the detailed description just repeats the short one.
    pub fn has_distinct_description(&self) -> bool {
        !self.main.eq_ignore_ascii_case(&self.description)
    }

    /// Temperature in °C
    pub fn temperature(&self) -> f64 {
        celsius(self.temperature_k)
    }

    pub fn feels_like(&self) -> f64 {
        celsius(self.feels_like_k)
    }

    pub fn min(&self) -> f64 {
        celsius(self.min_k)
    }

    pub fn max(&self) -> f64 {
        celsius(self.max_k)
    }

    /// Temperature as received from the service.
    pub fn temperature_kelvin(&self) -> f64 {
        self.temperature_k
    }

    /// Humidity in percent
    pub fn humidity(&self) -> u8 {
        self.humidity
    }

    /// Cloud cover in percent
    pub fn cloudiness(&self) -> u8 {
        self.cloudiness
    }

    /// Wind speed in m/s
    pub fn wind_speed(&self) -> f64 {
        self.wind_speed
    }

    /// `temperature()` formatted with two decimals, e.g. "15.00".
    pub fn temperature_label(&self) -> String {
        format_celsius(self.temperature())
    }
}

// Wire format of the current-weather endpoint. Only the fields we use.

#[derive(Debug, Deserialize)]
struct WeatherPayload {
    name: String,
    weather: Vec<ConditionPayload>,
    main: MainPayload,
    wind: WindPayload,
    clouds: CloudsPayload,
}

#[derive(Debug, Deserialize)]
struct ConditionPayload {
    main: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct MainPayload {
    temp: f64,
    feels_like: f64,
    temp_min: f64,
    temp_max: f64,
    humidity: u32,
}

#[derive(Debug, Deserialize)]
struct WindPayload {
    speed: f64,
}

#[derive(Debug, Deserialize)]
struct CloudsPayload {
    all: u32,
}

fn percent(field: &'static str, value: u32) -> Result<u8, PayloadError> {
    u8::try_from(value)
        .ok()
        .filter(|v| *v <= 100)
        .ok_or(PayloadError::OutOfRange { field, value: f64::from(value) })
}

impl WeatherSnapshot {
    fn from_payload(payload: WeatherPayload) -> Result<Self, PayloadError> {
        let condition = payload
            .weather
            .into_iter()
            .next()
            .ok_or(PayloadError::NoConditions)?;

        if !(payload.wind.speed >= 0.0) {
            return Err(PayloadError::OutOfRange { field: "wind.speed", value: payload.wind.speed });
        }

        Ok(Self {
            city: payload.name,
            main: condition.main,
            description: condition.description,
            temperature_k: payload.main.temp,
            feels_like_k: payload.main.feels_like,
            min_k: payload.main.temp_min,
            max_k: payload.main.temp_max,
            humidity: percent("main.humidity", payload.main.humidity)?,
            cloudiness: percent("clouds.all", payload.clouds.all)?,
            wind_speed: payload.wind.speed,
        })
    }
}
