//! Capture collaborator.
//!
//! The pipeline hands the camera a destination location (a freshly
//! reserved gallery placeholder) and gets back how the capture ended.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, warn};

/// How a capture request ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// The image was written to the destination.
    Captured,
    /// The user backed out.
    Cancelled,
    Failed(String),
}

#[async_trait]
pub trait Camera: Send + Sync {
    /// Capture an image into `destination`.
    async fn capture(&self, destination: &str) -> CaptureOutcome;
}

/// "Captures" by importing an existing image file.
///
/// Destinations must be filesystem paths, as [`super::gallery::DirectoryGallery`]
/// hands out. Without a source file every capture counts as cancelled.
#[derive(Debug, Clone, Default)]
pub struct FileCamera {
    source: Option<PathBuf>,
}

impl FileCamera {
    pub fn new(source: Option<PathBuf>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Camera for FileCamera {
    async fn capture(&self, destination: &str) -> CaptureOutcome {
        let Some(source) = &self.source else {
            debug!("No source image, treating capture as cancelled");
            return CaptureOutcome::Cancelled;
        };

        match tokio::fs::copy(source, destination).await {
            Ok(bytes) => {
                debug!(source = %source.display(), destination, bytes, "Image captured");
                CaptureOutcome::Captured
            }
            Err(e) => {
                warn!(source = %source.display(), error = %e, "Capture failed");
                CaptureOutcome::Failed(format!("could not read {}: {e}", source.display()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_copies_source_into_destination() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.jpg");
        let destination = dir.path().join("slot.jpg");
        std::fs::write(&source, b"jpeg bytes").unwrap();
        std::fs::write(&destination, b"").unwrap();

        let camera = FileCamera::new(Some(source));
        let outcome = camera.capture(&destination.to_string_lossy()).await;

        assert_eq!(outcome, CaptureOutcome::Captured);
        assert_eq!(std::fs::read(&destination).unwrap(), b"jpeg bytes");
    }

    #[tokio::test]
    async fn test_no_source_is_cancelled() {
        let camera = FileCamera::default();
        assert_eq!(camera.capture("/tmp/whatever.jpg").await, CaptureOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let camera = FileCamera::new(Some(dir.path().join("missing.jpg")));
        let outcome = camera.capture(&dir.path().join("slot.jpg").to_string_lossy()).await;
        assert!(matches!(outcome, CaptureOutcome::Failed(_)));
    }
}
