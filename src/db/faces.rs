//! Face detections, per-photo face summaries and the known-face reference set.

use anyhow::Result;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{now_timestamp, repeat_vars, Database};
use crate::aggregate::summarize_faces;
use crate::error::CatalogError;

/// Face bounding box in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FaceLocation {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl FaceLocation {
    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// A face found in a photo, with the gallery match if there was one
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceDetection {
    pub location: FaceLocation,
    pub confidence: Option<f32>,
    #[serde(skip)]
    pub encoding: Option<Vec<f32>>,
    pub recognized_name: Option<String>,
    pub recognized_confidence: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FaceSummary {
    pub total_faces: i64,
    pub recognized_faces: i64,
    pub unrecognized_faces: i64,
}

/// A reference face used to build the gallery
#[derive(Debug, Clone)]
pub struct KnownFace {
    pub id: i64,
    pub name: String,
    pub image_path: String,
    pub encoding: Vec<f32>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FaceSearchHit {
    pub photo_id: i64,
    pub file_path: String,
    pub file_name: String,
    pub created_at: String,
    pub recognized_name: String,
    pub best_confidence: Option<f64>,
}

impl Database {
    /// Replace a photo's face detections and recompute its face summary.
    pub fn replace_faces(&self, photo_id: i64, faces: &[FaceDetection]) -> Result<FaceSummary> {
        let tx = self.conn.unchecked_transaction()?;

        let exists = tx
            .query_row("SELECT 1 FROM photos WHERE id = ?", [photo_id], |row| row.get::<_, i64>(0))
            .optional()?;
        if exists.is_none() {
            return Err(CatalogError::PhotoNotFound(photo_id).into());
        }

        let summary = write_faces(&tx, photo_id, faces)?;
        tx.commit()?;
        Ok(summary)
    }

    pub fn get_face_summary(&self, photo_id: i64) -> Result<Option<FaceSummary>> {
        let result = self.conn.query_row(
            "SELECT total_faces, recognized_faces, unrecognized_faces FROM face_summary WHERE photo_id = ?",
            [photo_id],
            |row| {
                Ok(FaceSummary {
                    total_faces: row.get(0)?,
                    recognized_faces: row.get(1)?,
                    unrecognized_faces: row.get(2)?,
                })
            },
        );

        match result {
            Ok(summary) => Ok(Some(summary)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_face_detections(&self, photo_id: i64) -> Result<Vec<FaceDetection>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT location_top, location_right, location_bottom, location_left,
                   confidence, recognized_name, recognized_confidence, encoding
            FROM face_detections
            WHERE photo_id = ?
            ORDER BY id
            "#,
        )?;

        let rows = stmt
            .query_map([photo_id], |row| {
                let face = FaceDetection {
                    location: FaceLocation {
                        top: row.get(0)?,
                        right: row.get(1)?,
                        bottom: row.get(2)?,
                        left: row.get(3)?,
                    },
                    confidence: row.get(4)?,
                    encoding: None,
                    recognized_name: row.get(5)?,
                    recognized_confidence: row.get(6)?,
                };
                Ok((face, row.get::<_, Option<Vec<u8>>>(7)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut faces = Vec::with_capacity(rows.len());
        for (mut face, bytes) in rows {
            face.encoding = bytes.as_deref().map(bytes_to_embedding).transpose()?;
            faces.push(face);
        }
        Ok(faces)
    }

    /// Insert or update the known face stored for `image_path`.
    pub fn upsert_known_face(&self, name: &str, image_path: &Path, encoding: &[f32]) -> Result<i64> {
        let path_str = image_path.to_string_lossy();
        let now = now_timestamp();
        let id = self.conn.query_row(
            r#"
            INSERT INTO known_faces (name, image_path, encoding, encoding_dim, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(image_path) DO UPDATE SET
                name = excluded.name,
                encoding = excluded.encoding,
                encoding_dim = excluded.encoding_dim,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
            params![
                name,
                path_str.as_ref(),
                embedding_to_bytes(encoding),
                encoding.len() as i64,
                now,
                now,
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// All known faces ordered by name, then id
    pub fn get_known_faces(&self) -> Result<Vec<KnownFace>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, image_path, encoding, updated_at FROM known_faces ORDER BY name, id",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut faces = Vec::with_capacity(rows.len());
        for (id, name, image_path, bytes, updated_at) in rows {
            faces.push(KnownFace {
                id,
                name,
                image_path,
                encoding: bytes_to_embedding(&bytes)?,
                updated_at,
            });
        }
        Ok(faces)
    }

    pub fn count_known_faces(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM known_faces", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Distinct identities in the reference set
    pub fn known_face_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT name FROM known_faces ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    /// Photos where any of `names` was recognized, newest first.
    ///
    /// One hit per (photo, name) with the best recognition confidence.
    pub fn search_by_face_names(&self, names: &[String]) -> Result<Vec<FaceSearchHit>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            r#"
            SELECT p.id, p.file_path, p.file_name, p.created_at,
                   f.recognized_name, MAX(f.recognized_confidence)
            FROM photos p
            JOIN face_detections f ON f.photo_id = p.id
            WHERE f.recognized_name IN ({})
            GROUP BY p.id, f.recognized_name
            ORDER BY p.created_at DESC, p.id DESC, f.recognized_name
            "#,
            repeat_vars(names.len())
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let hits = stmt
            .query_map(params_from_iter(names.iter()), |row| {
                Ok(FaceSearchHit {
                    photo_id: row.get(0)?,
                    file_path: row.get(1)?,
                    file_name: row.get(2)?,
                    created_at: row.get(3)?,
                    recognized_name: row.get(4)?,
                    best_confidence: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(hits)
    }
}

/// Swap the stored face rows and summary for `faces`; the caller owns the transaction.
pub(super) fn write_faces(conn: &Connection, photo_id: i64, faces: &[FaceDetection]) -> Result<FaceSummary> {
    conn.execute("DELETE FROM face_detections WHERE photo_id = ?", params![photo_id])?;
    conn.execute("DELETE FROM face_summary WHERE photo_id = ?", params![photo_id])?;

    {
        let mut stmt = conn.prepare(
            r#"
            INSERT INTO face_detections (
                photo_id, location_top, location_right, location_bottom, location_left,
                confidence, recognized_name, recognized_confidence, encoding
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )?;
        for face in faces {
            let encoding_bytes = face.encoding.as_deref().map(embedding_to_bytes);
            stmt.execute(params![
                photo_id,
                face.location.top,
                face.location.right,
                face.location.bottom,
                face.location.left,
                face.confidence,
                face.recognized_name,
                face.recognized_confidence,
                encoding_bytes,
            ])?;
        }
    }

    let summary = summarize_faces(faces);
    conn.execute(
        r#"
        INSERT INTO face_summary (photo_id, total_faces, recognized_faces, unrecognized_faces)
        VALUES (?, ?, ?, ?)
        "#,
        params![
            photo_id,
            summary.total_faces,
            summary.recognized_faces,
            summary.unrecognized_faces,
        ],
    )?;

    Ok(summary)
}

/// Convert f32 slice to little-endian bytes for storage
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

/// Convert stored bytes back to an f32 vector
pub fn bytes_to_embedding(bytes: &[u8]) -> Result<Vec<f32>, CatalogError> {
    if bytes.len() % 4 != 0 {
        return Err(CatalogError::InvalidEncoding { len: bytes.len() });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
