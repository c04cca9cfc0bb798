use anyhow::Result;
use rusqlite::{params, Row};
use serde::Serialize;
use std::path::Path;

use super::{now_timestamp, Database, FaceDetection, FaceSummary, ObjectSummary};
use crate::scanner::ExifRecord;

/// File-level facts recorded on every ingestion
#[derive(Debug, Clone, Default)]
pub struct FileMeta {
    pub file_name: String,
    pub file_size: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<String>,
    pub model_used: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhotoRecord {
    pub id: i64,
    pub file_path: String,
    pub file_name: String,
    pub file_size: i64,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub format: Option<String>,
    pub created_at: String,
    pub processed_at: Option<String>,
    pub model_used: Option<String>,
}

/// Everything the catalog knows about one photo
#[derive(Debug, Clone, Serialize)]
pub struct PhotoInfo {
    pub photo: PhotoRecord,
    pub exif: Option<ExifRecord>,
    pub objects: Vec<ObjectSummary>,
    pub faces: Option<FaceSummary>,
    pub face_detections: Vec<FaceDetection>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassTotal {
    pub class_name: String,
    pub total_count: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatisticsReport {
    pub total_photos: i64,
    pub processed_photos: i64,
    pub total_objects: i64,
    pub top_classes: Vec<ClassTotal>,
    pub known_faces: i64,
    pub face_detections: i64,
    pub recognized_faces: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentPhoto {
    pub photo: PhotoRecord,
    pub object_classes: i64,
}

pub(crate) const PHOTO_COLUMNS: &str = "p.id, p.file_path, p.file_name, p.file_size, \
     p.width, p.height, p.format, p.created_at, p.processed_at, p.model_used";

/// Build a `PhotoRecord` from the first ten columns selected via `PHOTO_COLUMNS`
pub(crate) fn photo_from_row(row: &Row<'_>) -> rusqlite::Result<PhotoRecord> {
    Ok(PhotoRecord {
        id: row.get(0)?,
        file_path: row.get(1)?,
        file_name: row.get(2)?,
        file_size: row.get(3)?,
        width: row.get(4)?,
        height: row.get(5)?,
        format: row.get(6)?,
        created_at: row.get(7)?,
        processed_at: row.get(8)?,
        model_used: row.get(9)?,
    })
}

impl Database {
    /// Insert a photo or update the existing row for the same path.
    ///
    /// The id of an existing row is preserved, as is its `created_at`.
    pub fn upsert_photo(&self, path: &Path, meta: &FileMeta) -> Result<i64> {
        let path_str = path.to_string_lossy();
        let id = self.conn.query_row(
            r#"
            INSERT INTO photos (file_path, file_name, file_size, width, height, format, created_at, model_used)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(file_path) DO UPDATE SET
                file_name = excluded.file_name,
                file_size = excluded.file_size,
                width = excluded.width,
                height = excluded.height,
                format = excluded.format,
                model_used = excluded.model_used
            RETURNING id
            "#,
            params![
                path_str.as_ref(),
                meta.file_name,
                meta.file_size as i64,
                meta.width,
                meta.height,
                meta.format,
                now_timestamp(),
                meta.model_used,
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Replace the EXIF record of a photo; `None` leaves it without one.
    pub fn replace_exif(&self, photo_id: i64, exif: Option<&ExifRecord>) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute("DELETE FROM exif_data WHERE photo_id = ?", params![photo_id])?;

        if let Some(exif) = exif {
            tx.execute(
                r#"
                INSERT INTO exif_data (
                    photo_id, camera_make, camera_model, software, date_time_original,
                    exposure_time, f_number, iso_speed, focal_length,
                    gps_latitude, gps_longitude, gps_altitude
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    photo_id,
                    exif.camera_make,
                    exif.camera_model,
                    exif.software,
                    exif.date_time_original,
                    exif.exposure_time,
                    exif.f_number,
                    exif.iso_speed,
                    exif.focal_length,
                    exif.gps_latitude,
                    exif.gps_longitude,
                    exif.gps_altitude,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn find_photo_by_path(&self, path: &Path) -> Result<Option<PhotoRecord>> {
        let path_str = path.to_string_lossy();
        let result = self.conn.query_row(
            &format!("SELECT {} FROM photos p WHERE p.file_path = ?", PHOTO_COLUMNS),
            [path_str.as_ref()],
            photo_from_row,
        );

        match result {
            Ok(photo) => Ok(Some(photo)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_photo(&self, photo_id: i64) -> Result<Option<PhotoRecord>> {
        let result = self.conn.query_row(
            &format!("SELECT {} FROM photos p WHERE p.id = ?", PHOTO_COLUMNS),
            [photo_id],
            photo_from_row,
        );

        match result {
            Ok(photo) => Ok(Some(photo)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_exif(&self, photo_id: i64) -> Result<Option<ExifRecord>> {
        let result = self.conn.query_row(
            r#"
            SELECT camera_make, camera_model, software, date_time_original,
                   exposure_time, f_number, iso_speed, focal_length,
                   gps_latitude, gps_longitude, gps_altitude
            FROM exif_data
            WHERE photo_id = ?
            "#,
            [photo_id],
            |row| {
                Ok(ExifRecord {
                    camera_make: row.get(0)?,
                    camera_model: row.get(1)?,
                    software: row.get(2)?,
                    date_time_original: row.get(3)?,
                    exposure_time: row.get(4)?,
                    f_number: row.get(5)?,
                    iso_speed: row.get(6)?,
                    focal_length: row.get(7)?,
                    gps_latitude: row.get(8)?,
                    gps_longitude: row.get(9)?,
                    gps_altitude: row.get(10)?,
                })
            },
        );

        match result {
            Ok(exif) => Ok(Some(exif)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Photo row plus its EXIF record, object summaries and faces
    pub fn get_photo_info(&self, photo_id: i64) -> Result<Option<PhotoInfo>> {
        let photo = match self.get_photo(photo_id)? {
            Some(photo) => photo,
            None => return Ok(None),
        };

        Ok(Some(PhotoInfo {
            photo,
            exif: self.get_exif(photo_id)?,
            objects: self.get_object_summaries(photo_id)?,
            faces: self.get_face_summary(photo_id)?,
            face_detections: self.get_face_detections(photo_id)?,
        }))
    }

    /// Most recently created photos first
    pub fn list_recent(&self, limit: usize) -> Result<Vec<RecentPhoto>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {},
                   (SELECT COUNT(*) FROM object_summary s WHERE s.photo_id = p.id)
            FROM photos p
            ORDER BY p.created_at DESC, p.id DESC
            LIMIT ?
            "#,
            PHOTO_COLUMNS
        ))?;

        let photos = stmt
            .query_map([limit as i64], |row| {
                Ok(RecentPhoto {
                    photo: photo_from_row(row)?,
                    object_classes: row.get(10)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(photos)
    }

    pub fn get_statistics(&self) -> Result<StatisticsReport> {
        let count = |sql: &str| -> Result<i64> {
            Ok(self.conn.query_row(sql, [], |row| row.get(0))?)
        };

        let mut stmt = self.conn.prepare(
            r#"
            SELECT class_name, SUM(total_count) AS total
            FROM object_summary
            GROUP BY class_name
            ORDER BY total DESC, class_name
            LIMIT 10
            "#,
        )?;
        let top_classes = stmt
            .query_map([], |row| {
                Ok(ClassTotal {
                    class_name: row.get(0)?,
                    total_count: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(StatisticsReport {
            total_photos: count("SELECT COUNT(*) FROM photos")?,
            processed_photos: count("SELECT COUNT(*) FROM photos WHERE processed_at IS NOT NULL")?,
            total_objects: count("SELECT COALESCE(SUM(total_count), 0) FROM object_summary")?,
            top_classes,
            known_faces: self.count_known_faces()?,
            face_detections: count("SELECT COUNT(*) FROM face_detections")?,
            recognized_faces: count(
                "SELECT COUNT(*) FROM face_detections WHERE recognized_name IS NOT NULL",
            )?,
        })
    }
}
