//! Shared data structures for the photo history
//!
//! These structs represent the data model that flows between
//! the database layer, the capture pipeline and the CLI.

use chrono::{DateTime, TimeZone};

/// Capture timestamp layout (`yyyyMMdd_HHmmss`)
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Represents a single annotated photo in the history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoRecord {
    /// Unique database ID, `None` until the store assigns one
    pub id: Option<i64>,
    /// Location of the annotated image in the gallery
    pub url: String,
    /// Capture time, formatted with [`TIMESTAMP_FORMAT`]
    pub time_stamp: String,
}

impl PhotoRecord {
    /// A record that has not been stored yet
    pub fn new(url: impl Into<String>, time_stamp: impl Into<String>) -> Self {
        Self {
            id: None,
            url: url.into(),
            time_stamp: time_stamp.into(),
        }
    }

    /// Same record with an explicit identifier
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }
}

/// Format a capture time the way records and filenames store it
pub fn capture_timestamp<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Gallery filename for a capture, e.g. `JPEG_20240101_120000_`
pub fn image_file_name(time_stamp: &str) -> String {
    format!("JPEG_{time_stamp}_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_timestamp_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(capture_timestamp(&at), "20240309_070501");
    }

    #[test]
    fn test_file_name() {
        assert_eq!(image_file_name("20240309_070501"), "JPEG_20240309_070501_");
    }

    #[test]
    fn test_new_record_has_no_id() {
        let record = PhotoRecord::new("/tmp/a.jpg", "20240309_070501");
        assert_eq!(record.id, None);
        assert_eq!(record.with_id(4).id, Some(4));
    }
}
