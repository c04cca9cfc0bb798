use anyhow::Result;
use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};

use super::faces::write_faces;
use super::{now_timestamp, repeat_vars, Database, FaceDetection, FaceSummary};
use crate::aggregate::summarize_objects;
use crate::error::CatalogError;

/// One raw object detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub class_name: String,
    pub class_id: i64,
    pub confidence: f32,
}

impl DetectionEvent {
    pub fn new(class_name: impl Into<String>, class_id: i64, confidence: f32) -> Self {
        Self {
            class_name: class_name.into(),
            class_id,
            confidence,
        }
    }
}

/// Per-class aggregate of a photo's detections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub class_name: String,
    pub class_id: i64,
    pub total_count: i64,
    pub avg_confidence: f64,
    pub max_confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ObjectSearchHit {
    pub photo_id: i64,
    pub file_path: String,
    pub file_name: String,
    pub created_at: String,
    pub class_name: String,
    pub total_count: i64,
    pub max_confidence: f64,
}

impl Database {
    /// Replace a photo's detections and summaries, and mark it processed.
    ///
    /// Runs in one transaction; on any failure the previous detections,
    /// summaries and `processed_at` remain as they were.
    pub fn replace_detections(
        &self,
        photo_id: i64,
        events: &[DetectionEvent],
    ) -> Result<Vec<ObjectSummary>> {
        let tx = self.conn.unchecked_transaction()?;
        mark_processed(&tx, photo_id)?;
        let summaries = write_detections(&tx, photo_id, events)?;
        tx.commit()?;

        tracing::debug!(photo_id, events = events.len(), classes = summaries.len(), "Detections replaced");
        Ok(summaries)
    }

    /// Replace both the object and the face results of one ingestion.
    ///
    /// Detections, faces, both summaries and `processed_at` are committed
    /// together, so a photo is only ever marked processed with a complete
    /// result set.
    pub fn replace_results(
        &self,
        photo_id: i64,
        events: &[DetectionEvent],
        faces: &[FaceDetection],
    ) -> Result<(Vec<ObjectSummary>, FaceSummary)> {
        let tx = self.conn.unchecked_transaction()?;
        mark_processed(&tx, photo_id)?;
        let summaries = write_detections(&tx, photo_id, events)?;
        let face_summary = write_faces(&tx, photo_id, faces)?;
        tx.commit()?;

        tracing::debug!(
            photo_id,
            events = events.len(),
            faces = faces.len(),
            "Detection results replaced"
        );
        Ok((summaries, face_summary))
    }

    pub fn get_object_summaries(&self, photo_id: i64) -> Result<Vec<ObjectSummary>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT class_name, class_id, total_count, avg_confidence, max_confidence
            FROM object_summary
            WHERE photo_id = ?
            ORDER BY total_count DESC, class_name
            "#,
        )?;

        let summaries = stmt
            .query_map([photo_id], |row| {
                Ok(ObjectSummary {
                    class_name: row.get(0)?,
                    class_id: row.get(1)?,
                    total_count: row.get(2)?,
                    avg_confidence: row.get(3)?,
                    max_confidence: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(summaries)
    }

    /// Raw detections in insertion order
    pub fn get_detection_events(&self, photo_id: i64) -> Result<Vec<DetectionEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT class_name, class_id, confidence FROM object_detections WHERE photo_id = ? ORDER BY id",
        )?;

        let events = stmt
            .query_map([photo_id], |row| {
                Ok(DetectionEvent {
                    class_name: row.get(0)?,
                    class_id: row.get(1)?,
                    confidence: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(events)
    }

    /// Photos with at least `min_count` objects of any of `classes`, newest first.
    ///
    /// Hits are per (photo, class): a photo matching two of the requested
    /// classes appears once for each.
    pub fn search_by_object_classes(
        &self,
        classes: &[String],
        min_count: i64,
    ) -> Result<Vec<ObjectSearchHit>> {
        if classes.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            r#"
            SELECT p.id, p.file_path, p.file_name, p.created_at,
                   s.class_name, s.total_count, s.max_confidence
            FROM photos p
            JOIN object_summary s ON s.photo_id = p.id
            WHERE s.class_name IN ({}) AND s.total_count >= ?
            ORDER BY p.created_at DESC, p.id DESC, s.class_name
            "#,
            repeat_vars(classes.len())
        );

        let mut values: Vec<rusqlite::types::Value> = classes
            .iter()
            .map(|c| rusqlite::types::Value::Text(c.clone()))
            .collect();
        values.push(rusqlite::types::Value::Integer(min_count));

        let mut stmt = self.conn.prepare(&sql)?;
        let hits = stmt
            .query_map(params_from_iter(values), |row| {
                Ok(ObjectSearchHit {
                    photo_id: row.get(0)?,
                    file_path: row.get(1)?,
                    file_name: row.get(2)?,
                    created_at: row.get(3)?,
                    class_name: row.get(4)?,
                    total_count: row.get(5)?,
                    max_confidence: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(hits)
    }
}

fn mark_processed(conn: &Connection, photo_id: i64) -> Result<()> {
    let updated = conn.execute(
        "UPDATE photos SET processed_at = ? WHERE id = ?",
        params![now_timestamp(), photo_id],
    )?;
    if updated == 0 {
        return Err(CatalogError::PhotoNotFound(photo_id).into());
    }
    Ok(())
}

/// Swap the stored events and summaries for `events`; the caller owns the transaction.
fn write_detections(conn: &Connection, photo_id: i64, events: &[DetectionEvent]) -> Result<Vec<ObjectSummary>> {
    conn.execute("DELETE FROM object_detections WHERE photo_id = ?", params![photo_id])?;
    conn.execute("DELETE FROM object_summary WHERE photo_id = ?", params![photo_id])?;

    {
        let mut stmt = conn.prepare(
            "INSERT INTO object_detections (photo_id, class_name, class_id, confidence) VALUES (?, ?, ?, ?)",
        )?;
        for event in events {
            stmt.execute(params![photo_id, event.class_name, event.class_id, event.confidence])?;
        }
    }

    let summaries = summarize_objects(events);
    let mut stmt = conn.prepare(
        r#"
        INSERT INTO object_summary (photo_id, class_name, class_id, total_count, avg_confidence, max_confidence)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )?;
    for summary in &summaries {
        stmt.execute(params![
            photo_id,
            summary.class_name,
            summary.class_id,
            summary.total_count,
            summary.avg_confidence,
            summary.max_confidence,
        ])?;
    }

    Ok(summaries)
}
