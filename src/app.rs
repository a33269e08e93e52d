//! Explicit wiring of the stores and collaborators.
//!
//! [`PhotoWeather`] owns one instance of every store. Build it once with
//! [`PhotoWeather::open`] and tear it down with [`PhotoWeather::shutdown`].

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::{AppConfig, ConfigError};
use crate::photo::{Camera, CommandShare, DirectoryGallery, GalleryError, NoShare, ShareTarget};
use crate::pipeline::{CaptureSlot, PhotoPipeline};
use crate::state::{HistoryError, PhotoHistoryStore};
use crate::weather::{WeatherClient, WeatherError, WeatherStore};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("could not set up weather client: {0}")]
    Weather(#[from] WeatherError),

    #[error("could not open gallery: {0}")]
    Gallery(#[from] GalleryError),

    #[error("could not open photo history: {0}")]
    History(#[from] HistoryError),
}

#[derive(Debug)]
pub struct PhotoWeather {
    config: AppConfig,
    weather: Arc<WeatherStore>,
    gallery: Arc<DirectoryGallery>,
    history: Arc<PhotoHistoryStore>,
    capture: CaptureSlot,
}

impl PhotoWeather {
    pub async fn open(config: &AppConfig) -> Result<Self, AppError> {
        let client = WeatherClient::new(
            config.weather.api_key.clone().unwrap_or_default(),
            config.weather.base_url.clone(),
            config.weather.timeout(),
        )?;
        let weather = Arc::new(WeatherStore::new(Arc::new(client)));

        let gallery = Arc::new(DirectoryGallery::open(config.storage.gallery_dir()?).await?);
        let history = Arc::new(PhotoHistoryStore::open(config.storage.database_path()?).await?);

        info!(
            gallery = %gallery.root().display(),
            database = %history.path().display(),
            "PhotoWeather ready"
        );

        Ok(Self {
            config: config.clone(),
            weather,
            gallery,
            history,
            capture: CaptureSlot::new(),
        })
    }

    pub fn weather(&self) -> &Arc<WeatherStore> {
        &self.weather
    }

    pub fn gallery(&self) -> &Arc<DirectoryGallery> {
        &self.gallery
    }

    pub fn history(&self) -> &Arc<PhotoHistoryStore> {
        &self.history
    }

    /// Share target from `[share] command`, or [`NoShare`] when unset.
    pub fn share_target(&self) -> Arc<dyn ShareTarget> {
        match CommandShare::from_command(&self.config.share.command) {
            Some(command) => Arc::new(command),
            None => Arc::new(NoShare),
        }
    }

    /// Build a capture pipeline over this instance's stores.
    ///
    /// All pipelines from one instance share a single capture slot: while
    /// one attempt runs, every other pipeline reports `PipelineBusy`.
    pub fn pipeline(&self, camera: Arc<dyn Camera>, share: Arc<dyn ShareTarget>) -> PhotoPipeline {
        PhotoPipeline::new(
            Arc::clone(&self.weather),
            self.gallery.clone(),
            Arc::clone(&self.history),
            camera,
            share,
            self.capture.clone(),
        )
    }

    /// Close the history database. Pipelines built from this instance must
    /// be dropped first, otherwise the connection closes when they go away.
    pub async fn shutdown(self) -> Result<(), AppError> {
        match Arc::try_unwrap(self.history) {
            Ok(history) => history.close().await?,
            Err(_) => warn!("Photo history still in use, leaving it open"),
        }
        info!("PhotoWeather shut down");
        Ok(())
    }
}
