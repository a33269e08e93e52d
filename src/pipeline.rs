//! One capture attempt from camera to history.
//!
//! ```text
//! Idle -> AwaitingCapture -> Annotating -> Persisting -> Done
//!           |                   |              |
//!           +-> Cancelled       +-> Failed     +-> Failed
//! ```
//!
//! The placeholder slot reserved for the camera is gone by the time an
//! attempt ends, whatever the outcome. A history record is only written
//! after the annotated image is safely in the gallery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Local;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task;
use tracing::{debug, error, info, warn};

use crate::color::Color;
use crate::photo::{
    Camera, CaptureOutcome, Gallery, GalleryError, PhotoAnnotator, RenderError, ShareError,
    ShareTarget, JPEG_MIME,
};
use crate::state::data::{capture_timestamp, image_file_name};
use crate::state::{HistoryError, PhotoHistoryStore, PhotoRecord};
use crate::weather::{WeatherSnapshot, WeatherStore};

/// Description attached to every gallery entry we create.
pub const GALLERY_DESCRIPTION: &str = "PhotoWeather";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    AwaitingCapture,
    Annotating,
    Persisting,
    Done,
    Failed,
    Cancelled,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no weather selected, fetch a city first")]
    NoWeatherSelected,

    #[error("a capture is already in progress")]
    PipelineBusy,

    #[error("capture cancelled")]
    Cancelled,

    #[error("capture failed: {0}")]
    CaptureFailed(String),

    #[error("gallery error: {0}")]
    Gallery(#[source] GalleryError),

    #[error("could not annotate photo: {0}")]
    Render(#[from] RenderError),

    #[error("could not save annotated photo: {0}")]
    Persist(#[source] GalleryError),

    #[error("could not record photo in history: {0}")]
    History(#[from] HistoryError),

    #[error("annotation task failed: {0}")]
    Task(#[from] task::JoinError),
}

/// What a successful attempt produced.
#[derive(Debug)]
pub struct CaptureReport {
    pub record: PhotoRecord,
    pub overlay: Color,
    /// Set when offering the photo for sharing failed. The record stays.
    pub share_error: Option<ShareError>,
}

/// The right to run a capture.
///
/// Every pipeline built from the same slot shares it, so at most one of
/// them has an attempt in flight.
#[derive(Debug, Clone, Default)]
pub struct CaptureSlot(Arc<AtomicBool>);

impl CaptureSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn acquire(&self) -> Option<BusyGuard<'_>> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(&self.0))
    }
}

/// Clears the busy flag when an attempt ends, however it ends
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct PhotoPipeline {
    weather: Arc<WeatherStore>,
    gallery: Arc<dyn Gallery>,
    history: Arc<PhotoHistoryStore>,
    camera: Arc<dyn Camera>,
    share: Arc<dyn ShareTarget>,
    annotator: PhotoAnnotator,
    slot: CaptureSlot,
    state: watch::Sender<PipelineState>,
}

impl PhotoPipeline {
    pub fn new(
        weather: Arc<WeatherStore>,
        gallery: Arc<dyn Gallery>,
        history: Arc<PhotoHistoryStore>,
        camera: Arc<dyn Camera>,
        share: Arc<dyn ShareTarget>,
        slot: CaptureSlot,
    ) -> Self {
        let (state, _) = watch::channel(PipelineState::Idle);
        Self {
            weather,
            gallery,
            history,
            camera,
            share,
            annotator: PhotoAnnotator::default(),
            slot,
            state,
        }
    }

    pub fn with_annotator(mut self, annotator: PhotoAnnotator) -> Self {
        self.annotator = annotator;
        self
    }

    /// State of the current or most recent attempt.
    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Follow state transitions.
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Run one capture attempt.
    ///
    /// Fails fast with [`PipelineError::PipelineBusy`] while another attempt
    /// holds the same [`CaptureSlot`] and with [`PipelineError::NoWeatherSelected`] when no
    /// weather has been fetched; neither touches the camera or any store.
    pub async fn run(&self) -> Result<CaptureReport, PipelineError> {
        let Some(_guard) = self.slot.acquire() else {
            return Err(PipelineError::PipelineBusy);
        };

        let Some(weather) = self.weather.current() else {
            self.set_state(PipelineState::Failed);
            return Err(PipelineError::NoWeatherSelected);
        };

        let result = self.attempt(weather).await;
        match &result {
            Ok(report) => {
                info!(
                    location = %report.record.url,
                    id = ?report.record.id,
                    shared = report.share_error.is_none(),
                    "Capture complete"
                );
            }
            Err(PipelineError::Cancelled) => {
                self.set_state(PipelineState::Cancelled);
                info!("Capture cancelled");
            }
            Err(err) => {
                self.set_state(PipelineState::Failed);
                warn!(error = %err, "Capture failed");
            }
        }
        result
    }

    async fn attempt(&self, weather: Arc<WeatherSnapshot>) -> Result<CaptureReport, PipelineError> {
        let time_stamp = capture_timestamp(&Local::now());
        let file_name = image_file_name(&time_stamp);

        self.set_state(PipelineState::AwaitingCapture);
        let placeholder = self
            .gallery
            .reserve(&file_name, GALLERY_DESCRIPTION)
            .await
            .map_err(PipelineError::Gallery)?;
        debug!(placeholder, "Placeholder reserved for capture");

        let annotated = self.capture_and_annotate(&placeholder, weather).await;

        // Only the annotated image should remain under this name
        self.discard(&placeholder).await;
        let (jpeg, overlay) = annotated?;

        self.set_state(PipelineState::Persisting);
        let location = self
            .gallery
            .insert(jpeg, &file_name, GALLERY_DESCRIPTION)
            .await
            .map_err(PipelineError::Persist)?;

        let record = match self.history.insert(PhotoRecord::new(&location, &time_stamp)).await {
            Ok(record) => record,
            Err(err) => {
                if let HistoryError::Duplicate(id) = &err {
                    error!(id = *id, location, "History assigned an identifier that already exists");
                }
                self.discard(&location).await;
                return Err(err.into());
            }
        };

        self.set_state(PipelineState::Done);
        let share_error = match self.share.share(&record.url, JPEG_MIME).await {
            Ok(()) => None,
            Err(err) => {
                warn!(location = %record.url, error = %err, "Sharing failed, photo kept");
                Some(err)
            }
        };

        Ok(CaptureReport { record, overlay, share_error })
    }

    /// Capture into `placeholder` and return the encoded annotated JPEG
    async fn capture_and_annotate(
        &self,
        placeholder: &str,
        weather: Arc<WeatherSnapshot>,
    ) -> Result<(Vec<u8>, Color), PipelineError> {
        match self.camera.capture(placeholder).await {
            CaptureOutcome::Captured => {}
            CaptureOutcome::Cancelled => return Err(PipelineError::Cancelled),
            CaptureOutcome::Failed(reason) => return Err(PipelineError::CaptureFailed(reason)),
        }

        self.set_state(PipelineState::Annotating);
        let bytes = self
            .gallery
            .read(placeholder)
            .await
            .map_err(PipelineError::Gallery)?;

        let annotator = self.annotator.clone();
        let (jpeg, overlay) = task::spawn_blocking(move || -> Result<_, RenderError> {
            let annotated = annotator.annotate(&bytes, &weather)?;
            Ok((annotated.encode_jpeg()?, annotated.overlay))
        })
        .await??;

        debug!(bytes = jpeg.len(), %overlay, "Annotated JPEG encoded");
        Ok((jpeg, overlay))
    }

    /// Best-effort removal of a gallery entry
    async fn discard(&self, location: &str) {
        match self.gallery.delete(location).await {
            Ok(true) => debug!(location, "Gallery entry removed"),
            Ok(false) => debug!(location, "Gallery entry already gone"),
            Err(err) => warn!(location, error = %err, "Could not remove gallery entry"),
        }
    }

    fn set_state(&self, state: PipelineState) {
        self.state.send_replace(state);
    }
}

impl std::fmt::Debug for PhotoPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhotoPipeline")
            .field("state", &self.state())
            .field("busy", &self.slot.is_busy())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use tokio::sync::Notify;

    use super::*;
    use crate::weather::snapshot::fixtures;
    use crate::weather::{WeatherError, WeatherSource};

    struct FixedSource;

    #[async_trait]
    impl WeatherSource for FixedSource {
        async fn fetch(&self, city: &str) -> Result<WeatherSnapshot, WeatherError> {
            Ok(fixtures::snapshot(city, 288.15))
        }
    }

    /// Gallery kept in a map, with switchable write failures
    #[derive(Default)]
    struct MemoryGallery {
        entries: Mutex<HashMap<String, Vec<u8>>>,
        fail_insert: AtomicBool,
        fail_delete: AtomicBool,
    }

    impl MemoryGallery {
        fn locations(&self) -> Vec<String> {
            let mut keys: Vec<_> = self.entries.lock().unwrap().keys().cloned().collect();
            keys.sort();
            keys
        }

        fn put(&self, location: &str, bytes: Vec<u8>) {
            self.entries.lock().unwrap().insert(location.to_string(), bytes);
        }

        fn create(&self, file_name: &str, bytes: Vec<u8>) -> String {
            let mut entries = self.entries.lock().unwrap();
            let mut location = format!("mem://{file_name}.jpg");
            let mut n = 1;
            while entries.contains_key(&location) {
                location = format!("mem://{file_name}{n}.jpg");
                n += 1;
            }
            entries.insert(location.clone(), bytes);
            location
        }
    }

    fn io_error(location: &str) -> GalleryError {
        GalleryError::Io {
            path: location.into(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        }
    }

    #[async_trait]
    impl Gallery for MemoryGallery {
        async fn reserve(&self, file_name: &str, _: &str) -> Result<String, GalleryError> {
            Ok(self.create(file_name, Vec::new()))
        }

        async fn insert(&self, bytes: Vec<u8>, file_name: &str, _: &str) -> Result<String, GalleryError> {
            if self.fail_insert.load(Ordering::SeqCst) {
                return Err(io_error(file_name));
            }
            Ok(self.create(file_name, bytes))
        }

        async fn read(&self, location: &str) -> Result<Vec<u8>, GalleryError> {
            self.entries
                .lock()
                .unwrap()
                .get(location)
                .cloned()
                .ok_or_else(|| GalleryError::Foreign(location.to_string()))
        }

        async fn delete(&self, location: &str) -> Result<bool, GalleryError> {
            if self.fail_delete.load(Ordering::SeqCst) {
                return Err(io_error(location));
            }
            Ok(self.entries.lock().unwrap().remove(location).is_some())
        }

        async fn exists(&self, location: &str) -> bool {
            self.entries.lock().unwrap().contains_key(location)
        }
    }

    /// Camera that writes fixed bytes into the destination slot
    struct StubCamera {
        gallery: Arc<MemoryGallery>,
        outcome: CaptureOutcome,
        bytes: Vec<u8>,
        calls: Mutex<usize>,
        hold: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    impl StubCamera {
        fn new(gallery: &Arc<MemoryGallery>, outcome: CaptureOutcome, bytes: Vec<u8>) -> Self {
            Self {
                gallery: Arc::clone(gallery),
                outcome,
                bytes,
                calls: Mutex::new(0),
                hold: None,
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Camera for StubCamera {
        async fn capture(&self, destination: &str) -> CaptureOutcome {
            *self.calls.lock().unwrap() += 1;
            if let Some((started, release)) = &self.hold {
                started.notify_one();
                release.notified().await;
            }
            if self.outcome == CaptureOutcome::Captured {
                self.gallery.put(destination, self.bytes.clone());
            }
            self.outcome.clone()
        }
    }

    #[derive(Default)]
    struct RecordingShare {
        fail: bool,
        shared: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ShareTarget for RecordingShare {
        async fn share(&self, location: &str, mime: &str) -> Result<(), ShareError> {
            self.shared.lock().unwrap().push((location.to_string(), mime.to_string()));
            if self.fail {
                Err(ShareError::NoTarget)
            } else {
                Ok(())
            }
        }
    }

    fn png(color: [u8; 3]) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(320, 320, Rgb(color)))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    struct Harness {
        weather: Arc<WeatherStore>,
        gallery: Arc<MemoryGallery>,
        history: Arc<PhotoHistoryStore>,
        camera: Arc<StubCamera>,
        share: Arc<RecordingShare>,
    }

    impl Harness {
        async fn new(outcome: CaptureOutcome, bytes: Vec<u8>) -> Self {
            let weather = Arc::new(WeatherStore::new(Arc::new(FixedSource)));
            weather.refresh("London").await.unwrap();
            let gallery = Arc::new(MemoryGallery::default());
            Self {
                weather,
                camera: Arc::new(StubCamera::new(&gallery, outcome, bytes)),
                gallery,
                history: Arc::new(PhotoHistoryStore::open_in_memory().unwrap()),
                share: Arc::new(RecordingShare::default()),
            }
        }

        async fn captured() -> Self {
            Self::new(CaptureOutcome::Captured, png([0, 255, 255])).await
        }

        fn pipeline(&self) -> PhotoPipeline {
            PhotoPipeline::new(
                Arc::clone(&self.weather),
                self.gallery.clone(),
                Arc::clone(&self.history),
                self.camera.clone(),
                self.share.clone(),
                CaptureSlot::new(),
            )
        }
    }

    #[tokio::test]
    async fn test_happy_path_persists_and_shares() {
        let h = Harness::captured().await;
        let pipeline = h.pipeline();

        let report = pipeline.run().await.unwrap();

        assert_eq!(pipeline.state(), PipelineState::Done);
        assert_eq!(report.overlay, Color::argb(255, 255, 0, 0));
        assert!(report.share_error.is_none());
        assert!(report.record.id.is_some());
        assert!(report.record.url.starts_with("mem://JPEG_"));

        // Only the annotated image is left, and it is a JPEG
        assert_eq!(h.gallery.locations(), vec![report.record.url.clone()]);
        let stored = h.gallery.read(&report.record.url).await.unwrap();
        assert_eq!(image::guess_format(&stored).unwrap(), ImageFormat::Jpeg);

        assert_eq!(h.history.list_all().await.unwrap(), vec![report.record.clone()]);
        assert_eq!(
            *h.share.shared.lock().unwrap(),
            vec![(report.record.url.clone(), "image/jpeg".to_string())]
        );
    }

    #[tokio::test]
    async fn test_no_weather_has_no_side_effects() {
        let h = Harness::captured().await;
        let pipeline = PhotoPipeline::new(
            Arc::new(WeatherStore::new(Arc::new(FixedSource))),
            h.gallery.clone(),
            Arc::clone(&h.history),
            h.camera.clone(),
            h.share.clone(),
            CaptureSlot::new(),
        );

        let result = pipeline.run().await;

        assert!(matches!(result, Err(PipelineError::NoWeatherSelected)));
        assert_eq!(h.camera.calls(), 0);
        assert!(h.gallery.locations().is_empty());
        assert_eq!(h.history.count().await.unwrap(), 0);
        assert!(h.share.shared.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_capture_releases_placeholder() {
        let h = Harness::new(CaptureOutcome::Cancelled, Vec::new()).await;
        let pipeline = h.pipeline();

        assert!(matches!(pipeline.run().await, Err(PipelineError::Cancelled)));
        assert_eq!(pipeline.state(), PipelineState::Cancelled);
        assert!(h.gallery.locations().is_empty());
        assert_eq!(h.history.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_capture_releases_placeholder() {
        let h = Harness::new(CaptureOutcome::Failed("no camera".into()), Vec::new()).await;
        let pipeline = h.pipeline();

        assert!(matches!(pipeline.run().await, Err(PipelineError::CaptureFailed(r)) if r == "no camera"));
        assert_eq!(pipeline.state(), PipelineState::Failed);
        assert!(h.gallery.locations().is_empty());
    }

    #[tokio::test]
    async fn test_render_failure_leaves_no_record_and_no_placeholder() {
        let h = Harness::new(CaptureOutcome::Captured, b"not an image".to_vec()).await;
        let pipeline = h.pipeline();

        assert!(matches!(pipeline.run().await, Err(PipelineError::Render(RenderError::Decode(_)))));
        assert_eq!(pipeline.state(), PipelineState::Failed);
        assert!(h.gallery.locations().is_empty());
        assert_eq!(h.history.count().await.unwrap(), 0);
        assert!(h.share.shared.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_gallery_write_failure_records_nothing() {
        let h = Harness::captured().await;
        h.gallery.fail_insert.store(true, Ordering::SeqCst);
        let pipeline = h.pipeline();

        assert!(matches!(pipeline.run().await, Err(PipelineError::Persist(_))));
        assert_eq!(pipeline.state(), PipelineState::Failed);
        assert!(h.gallery.locations().is_empty());
        assert_eq!(h.history.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_failure_does_not_mask_outcome() {
        let h = Harness::new(CaptureOutcome::Cancelled, Vec::new()).await;
        h.gallery.fail_delete.store(true, Ordering::SeqCst);
        let pipeline = h.pipeline();

        assert!(matches!(pipeline.run().await, Err(PipelineError::Cancelled)));
        // Placeholder is left behind, but only logged
        assert_eq!(h.gallery.locations().len(), 1);
    }

    #[tokio::test]
    async fn test_share_failure_keeps_record() {
        let h = Harness::captured().await;
        let share = Arc::new(RecordingShare { fail: true, ..Default::default() });
        let pipeline = PhotoPipeline::new(
            Arc::clone(&h.weather),
            h.gallery.clone(),
            Arc::clone(&h.history),
            h.camera.clone(),
            share,
            CaptureSlot::new(),
        );

        let report = pipeline.run().await.unwrap();

        assert!(matches!(report.share_error, Some(ShareError::NoTarget)));
        assert_eq!(pipeline.state(), PipelineState::Done);
        assert_eq!(h.history.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_second_run_while_busy_is_rejected() {
        let mut h = Harness::captured().await;
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let mut camera = StubCamera::new(&h.gallery, CaptureOutcome::Captured, png([0, 255, 255]));
        camera.hold = Some((Arc::clone(&started), Arc::clone(&release)));
        h.camera = Arc::new(camera);
        let pipeline = Arc::new(h.pipeline());

        let first = tokio::spawn({
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.run().await }
        });
        started.notified().await;
        assert_eq!(pipeline.state(), PipelineState::AwaitingCapture);

        assert!(matches!(pipeline.run().await, Err(PipelineError::PipelineBusy)));
        assert_eq!(h.camera.calls(), 1);

        release.notify_one();
        assert!(first.await.unwrap().is_ok());

        // Free again once the first attempt is over
        release.notify_one();
        assert!(pipeline.run().await.is_ok());
        assert_eq!(h.history.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_pipelines_sharing_a_slot_never_overlap() {
        let h = Harness::captured().await;
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let mut held = StubCamera::new(&h.gallery, CaptureOutcome::Captured, png([0, 255, 255]));
        held.hold = Some((Arc::clone(&started), Arc::clone(&release)));
        let held = Arc::new(held);

        let slot = CaptureSlot::new();
        let build = |camera: Arc<StubCamera>| {
            PhotoPipeline::new(
                Arc::clone(&h.weather),
                h.gallery.clone(),
                Arc::clone(&h.history),
                camera,
                h.share.clone(),
                slot.clone(),
            )
        };
        let first = Arc::new(build(Arc::clone(&held)));
        let second = build(h.camera.clone());

        let running = tokio::spawn({
            let first = Arc::clone(&first);
            async move { first.run().await }
        });
        started.notified().await;
        assert!(slot.is_busy());

        assert!(matches!(second.run().await, Err(PipelineError::PipelineBusy)));
        assert_eq!(second.state(), PipelineState::Idle);
        assert_eq!(h.camera.calls(), 0);
        // Only the first attempt's placeholder exists
        assert_eq!(h.gallery.locations().len(), 1);

        release.notify_one();
        assert!(running.await.unwrap().is_ok());
        assert!(!slot.is_busy());

        assert!(second.run().await.is_ok());
        assert_eq!(h.history.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_states_are_observable() {
        let h = Harness::captured().await;
        let layout = crate::photo::TextLayout { x: 10, baselines: [20, 40, 60], scale: 2 };
        let pipeline = h.pipeline().with_annotator(PhotoAnnotator::new(layout));
        let states = pipeline.subscribe();
        assert_eq!(*states.borrow(), PipelineState::Idle);

        pipeline.run().await.unwrap();
        assert!(states.has_changed().unwrap());
        assert!(pipeline.state().is_terminal());
    }
}
