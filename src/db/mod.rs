//! SQLite catalog of photos, EXIF records, detections and known faces.
//!
//! Every "replace" operation runs inside one transaction: either the whole
//! new state is committed or the previous state is left untouched.

mod schema;
pub mod detections;
pub mod faces;
pub mod photos;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;

pub use detections::{DetectionEvent, ObjectSearchHit, ObjectSummary};
pub use faces::{FaceDetection, FaceLocation, FaceSearchHit, FaceSummary, KnownFace};
pub use photos::{ClassTotal, FileMeta, PhotoInfo, PhotoRecord, RecentPhoto, StatisticsReport};
pub use schema::SCHEMA;

pub struct Database {
    pub(crate) conn: Connection,
}

impl Database {
    /// Open (creating if needed) the catalog at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Cannot create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Cannot open catalog {}", path.display()))?;
        let db = Self { conn };
        db.initialize()?;
        tracing::debug!(path = %path.display(), "Catalog opened");
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.initialize()?;
        Ok(db)
    }

    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

/// Current local time as stored in timestamp columns.
///
/// Milliseconds keep `ORDER BY created_at` stable for photos ingested
/// within the same second.
pub(crate) fn now_timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%d %H:%M:%S%.3f")
        .to_string()
}

/// `?, ?, ?` for binding a list into an `IN (...)` clause
pub(crate) fn repeat_vars(count: usize) -> String {
    let mut vars = "?, ".repeat(count);
    vars.truncate(vars.len().saturating_sub(2));
    vars
}
