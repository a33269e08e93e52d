/// State management module
///
/// This module handles all persisted application state:
/// - Photo history database and its live listing (library.rs)
/// - Shared data structures (data.rs)
pub mod data;
pub mod library;

pub use data::PhotoRecord;
pub use library::{HistoryError, PhotoHistoryStore};
