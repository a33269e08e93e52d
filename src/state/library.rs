use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::{params, Connection, ErrorCode};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task;
use tracing::{debug, info, warn};

use super::data::PhotoRecord;
use crate::photo::gallery::Gallery;

/// Errors from the photo history database
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("photo record {0} already exists")]
    Duplicate(i64),

    #[error("could not create data directory {path}: {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("background database task failed: {0}")]
    Task(#[from] task::JoinError),
}

/// Ordered listing shared with subscribers
pub type Listing = Arc<Vec<PhotoRecord>>;

/// The PhotoHistoryStore manages the SQLite history database.
/// It records every annotated photo that made it into the gallery.
///
/// All access goes through one connection behind a mutex, and every
/// statement runs on the blocking pool. After each mutation the ordered
/// listing is re-read under the same lock and pushed to subscribers.
pub struct PhotoHistoryStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
    listing: Arc<watch::Sender<Listing>>,
}

impl PhotoHistoryStore {
    /// Open (or create) the history database at `db_path`.
    ///
    /// The parent directory is created when missing.
    pub async fn open(db_path: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let db_path = db_path.into();
        let path = db_path.clone();

        let conn = task::spawn_blocking(move || -> Result<Connection, HistoryError> {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|source| HistoryError::DataDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            let conn = Connection::open(&path)?;
            init_schema(&conn)?;
            Ok(conn)
        })
        .await??;

        info!(path = %db_path.display(), "Photo history opened");
        Self::from_connection(conn, db_path)
    }

    /// A private, non-durable store. Used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self, HistoryError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Self::from_connection(conn, PathBuf::from(":memory:"))
    }

    fn from_connection(conn: Connection, db_path: PathBuf) -> Result<Self, HistoryError> {
        let initial = query_all(&conn)?;
        let (listing, _) = watch::channel(Arc::new(initial));
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
            listing: Arc::new(listing),
        })
    }

    /// Where the database should live by default:
    /// - Linux: ~/.local/share/photo-weather/photo_weather.db
    /// - macOS: ~/Library/Application Support/photo-weather/photo_weather.db
    /// - Windows: %APPDATA%\photo-weather\photo_weather.db
    pub fn default_path() -> Option<PathBuf> {
        let mut path = dirs::data_dir().or_else(dirs::home_dir)?;
        path.push("photo-weather");
        path.push("photo_weather.db");
        Some(path)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T, HistoryError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &watch::Sender<Listing>) -> Result<T, HistoryError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let listing = Arc::clone(&self.listing);
        task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            f(&*conn, &*listing)
        })
        .await?
    }

    /// Insert a record and return it with its identifier.
    ///
    /// A record that already carries an identifier keeps it; reusing an
    /// existing identifier fails with [`HistoryError::Duplicate`].
    pub async fn insert(&self, record: PhotoRecord) -> Result<PhotoRecord, HistoryError> {
        self.with_conn(move |conn, listing| {
            let result = match record.id {
                Some(id) => conn.execute(
                    "INSERT INTO photo_table (id, url, time_stamp) VALUES (?1, ?2, ?3)",
                    params![id, record.url, record.time_stamp],
                ),
                None => conn.execute(
                    "INSERT INTO photo_table (url, time_stamp) VALUES (?1, ?2)",
                    params![record.url, record.time_stamp],
                ),
            };

            if let Err(e) = result {
                return Err(match (record.id, e.sqlite_error_code()) {
                    (Some(id), Some(ErrorCode::ConstraintViolation)) => HistoryError::Duplicate(id),
                    _ => e.into(),
                });
            }

            let stored = PhotoRecord {
                id: Some(conn.last_insert_rowid()),
                ..record
            };
            publish(conn, listing)?;
            debug!(id = ?stored.id, url = %stored.url, "Photo recorded");
            Ok(stored)
        })
        .await
    }

    /// Remove the record with the same identifier.
    ///
    /// Returns false (not an error) when there was nothing to remove.
    pub async fn delete(&self, record: &PhotoRecord) -> Result<bool, HistoryError> {
        match record.id {
            Some(id) => self.delete_by_id(id).await,
            None => Ok(false),
        }
    }

    pub async fn delete_by_id(&self, id: i64) -> Result<bool, HistoryError> {
        self.with_conn(move |conn, listing| {
            let removed = conn.execute("DELETE FROM photo_table WHERE id = ?1", params![id])?;
            if removed > 0 {
                publish(conn, listing)?;
                info!(id, "Photo removed from history");
            }
            Ok(removed > 0)
        })
        .await
    }

    /// Empty the history in a single statement.
    ///
    /// Readers share the lock, so they see either everything or nothing.
    pub async fn delete_all(&self) -> Result<usize, HistoryError> {
        self.with_conn(|conn, listing| {
            let removed = conn.execute("DELETE FROM photo_table", [])?;
            publish(conn, listing)?;
            info!(removed, "Photo history cleared");
            Ok(removed)
        })
        .await
    }

    /// All records, most recent capture first
    pub async fn list_all(&self) -> Result<Vec<PhotoRecord>, HistoryError> {
        self.with_conn(|conn, _| query_all(conn)).await
    }

    /// Get a count of photos in the history
    pub async fn count(&self) -> Result<i64, HistoryError> {
        self.with_conn(|conn, _| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM photo_table", [], |row| row.get(0))?;
            Ok(count)
        })
        .await
    }

    /// Live ordered listing; a new value arrives after every mutation.
    ///
    /// Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> watch::Receiver<Listing> {
        self.listing.subscribe()
    }

    /// Verify that every recorded image still exists in the gallery
    /// and drop the records whose image is gone
    ///
    /// Returns the number of records removed.
    pub async fn reconcile(&self, gallery: &dyn Gallery) -> Result<usize, HistoryError> {
        let records = self.list_all().await?;

        let mut missing = Vec::new();
        for record in records {
            if !gallery.exists(&record.url).await {
                missing.push(record);
            }
        }

        let mut removed = 0;
        for record in &missing {
            if self.delete(record).await? {
                removed += 1;
            }
        }

        if removed > 0 {
            warn!(removed, "Dropped history entries whose image no longer exists");
        }

        Ok(removed)
    }

    /// Close the database, surfacing any error from the final flush.
    pub async fn close(self) -> Result<(), HistoryError> {
        let path = self.db_path.clone();
        match Arc::try_unwrap(self.conn) {
            Ok(mutex) => {
                let conn = mutex.into_inner();
                task::spawn_blocking(move || conn.close().map_err(|(_, e)| HistoryError::from(e)))
                    .await??;
                info!(path = %path.display(), "Photo history closed");
            }
            // An in-flight task still holds the connection; it closes on drop
            Err(_) => debug!(path = %path.display(), "Photo history released"),
        }
        Ok(())
    }
}

/// Initialize the database schema.
/// Creates the table and index if they don't exist.
fn init_schema(conn: &Connection) -> Result<(), HistoryError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS photo_table (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            url             TEXT NOT NULL,
            time_stamp      TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_photo_time_stamp
         ON photo_table(time_stamp DESC)",
        [],
    )?;

    Ok(())
}

fn query_all(conn: &Connection) -> Result<Vec<PhotoRecord>, HistoryError> {
    let mut stmt = conn.prepare(
        "SELECT id, url, time_stamp FROM photo_table ORDER BY time_stamp DESC, id DESC",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok(PhotoRecord {
            id: Some(row.get(0)?),
            url: row.get(1)?,
            time_stamp: row.get(2)?,
        })
    })?;

    let mut records = Vec::new();
    for record in rows {
        records.push(record?);
    }
    Ok(records)
}

/// Push the current listing to subscribers; caller holds the connection lock
fn publish(conn: &Connection, listing: &watch::Sender<Listing>) -> Result<(), HistoryError> {
    listing.send_replace(Arc::new(query_all(conn)?));
    Ok(())
}

// Implement Debug for better error messages
impl std::fmt::Debug for PhotoHistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhotoHistoryStore")
            .field("db_path", &self.db_path)
            .finish()
    }
}
