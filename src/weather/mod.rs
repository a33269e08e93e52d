//! Weather lookup and the current-weather store.

pub mod client;
pub mod snapshot;
pub mod store;

pub use client::{WeatherClient, WeatherError, WeatherSource, DEFAULT_BASE_URL};
pub use snapshot::{celsius, format_celsius, WeatherSnapshot};
pub use store::{FailureKind, WeatherEvent, WeatherEvents, WeatherStore};
