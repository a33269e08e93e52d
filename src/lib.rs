//! Weather-annotated photos.
//!
//! Fetch the current weather for a city, stamp it on a photo in a color
//! picked from the photo itself, store the result in a gallery and keep a
//! browsable history of every capture.

pub mod app;
pub mod color;
pub mod config;
pub mod photo;
pub mod pipeline;
pub mod state;
pub mod weather;

pub use app::{AppError, PhotoWeather};
pub use config::AppConfig;
pub use pipeline::{CaptureReport, CaptureSlot, PhotoPipeline, PipelineError, PipelineState};
