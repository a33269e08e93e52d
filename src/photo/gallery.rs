//! Durable image storage.
//!
//! The pipeline only sees the [`Gallery`] trait. [`DirectoryGallery`] keeps
//! images as JPEG files in one directory and uses absolute file paths as
//! locations.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Give up looking for a free filename after this many suffixes.
const MAX_NAME_ATTEMPTS: u32 = 1000;

#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("gallery io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("location is not part of this gallery: {0}")]
    Foreign(String),

    #[error("no free filename for {0}")]
    NameExhausted(String),
}

impl GalleryError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io { path: path.to_path_buf(), source }
    }
}

/// Where annotated photos live.
#[async_trait]
pub trait Gallery: Send + Sync {
    /// Create an empty placeholder entry and return its location.
    async fn reserve(&self, file_name: &str, description: &str) -> Result<String, GalleryError>;

    /// Store a finished image and return its location.
    async fn insert(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        description: &str,
    ) -> Result<String, GalleryError>;

    async fn read(&self, location: &str) -> Result<Vec<u8>, GalleryError>;

    /// Remove an entry; `Ok(false)` when it was already gone.
    async fn delete(&self, location: &str) -> Result<bool, GalleryError>;

    /// Whether the location still resolves to an image.
    async fn exists(&self, location: &str) -> bool;
}

/// Gallery backed by a plain directory of `.jpg` files
#[derive(Debug, Clone)]
pub struct DirectoryGallery {
    root: PathBuf,
}

impl DirectoryGallery {
    /// Open the gallery directory, creating it if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, GalleryError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| GalleryError::io(&root, e))?;
        let root = fs::canonicalize(&root)
            .await
            .map_err(|e| GalleryError::io(&root, e))?;
        debug!(root = %root.display(), "Gallery opened");
        Ok(Self { root })
    }

    /// Default gallery directory
    /// Returns ~/Pictures/PhotoWeather on Linux, falling back to the data dir
    pub fn default_root() -> Option<PathBuf> {
        let mut path = dirs::picture_dir()
            .or_else(dirs::data_dir)
            .or_else(dirs::home_dir)?;
        path.push("PhotoWeather");
        Some(path)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a location back to a file inside the root
    fn resolve(&self, location: &str) -> Result<PathBuf, GalleryError> {
        let path = PathBuf::from(location);
        if path.parent() != Some(self.root.as_path()) {
            return Err(GalleryError::Foreign(location.to_string()));
        }
        Ok(path)
    }

    /// Create `<name>.jpg`, or `<name>1.jpg`, `<name>2.jpg`, ... if taken
    async fn create_unique(&self, file_name: &str) -> Result<(PathBuf, fs::File), GalleryError> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                format!("{file_name}.jpg")
            } else {
                format!("{file_name}{attempt}.jpg")
            };
            let path = self.root.join(name);

            match fs::OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(GalleryError::io(&path, e)),
            }
        }
        Err(GalleryError::NameExhausted(file_name.to_string()))
    }
}

/// Remove a half-written file. Failures are logged, not returned.
async fn discard_partial(path: &Path) -> bool {
    match fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not remove partially written image");
            false
        }
    }
}

fn location_of(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[async_trait]
impl Gallery for DirectoryGallery {
    async fn reserve(&self, file_name: &str, description: &str) -> Result<String, GalleryError> {
        let (path, _file) = self.create_unique(file_name).await?;
        debug!(path = %path.display(), description, "Placeholder reserved");
        Ok(location_of(&path))
    }

    async fn insert(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        description: &str,
    ) -> Result<String, GalleryError> {
        let (path, mut file) = self.create_unique(file_name).await?;

        let written = async {
            file.write_all(&bytes).await?;
            file.sync_all().await
        }
        .await;

        if let Err(e) = written {
            discard_partial(&path).await;
            return Err(GalleryError::io(&path, e));
        }

        info!(path = %path.display(), bytes = bytes.len(), description, "Image stored in gallery");
        Ok(location_of(&path))
    }

    async fn read(&self, location: &str) -> Result<Vec<u8>, GalleryError> {
        let path = self.resolve(location)?;
        fs::read(&path).await.map_err(|e| GalleryError::io(&path, e))
    }

    async fn delete(&self, location: &str) -> Result<bool, GalleryError> {
        let path = self.resolve(location)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Gallery entry deleted");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(GalleryError::io(&path, e)),
        }
    }

    async fn exists(&self, location: &str) -> bool {
        match self.resolve(location) {
            Ok(path) => fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false),
            Err(_) => false,
        }
    }
}
