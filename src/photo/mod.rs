/// Photo handling
///
/// - Text overlay and JPEG encoding (annotate.rs)
/// - Capture collaborator (camera.rs)
/// - Durable image storage (gallery.rs)
/// - Sharing collaborator (share.rs)
pub mod annotate;
pub mod camera;
pub mod gallery;
pub mod share;

pub use annotate::{AnnotatedImage, PhotoAnnotator, RenderError, TextLayout};
pub use camera::{Camera, CaptureOutcome, FileCamera};
pub use gallery::{DirectoryGallery, Gallery, GalleryError};
pub use share::{CommandShare, NoShare, ShareError, ShareTarget, JPEG_MIME};
