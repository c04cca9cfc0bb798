//! Per-photo aggregates computed from raw detections.

use crate::db::{DetectionEvent, FaceDetection, FaceSummary, ObjectSummary};

/// Group events by class name, in order of first appearance.
///
/// A class whose events disagree on `class_id` keeps the id of its first event.
pub fn summarize_objects(events: &[DetectionEvent]) -> Vec<ObjectSummary> {
    struct Acc {
        class_name: String,
        class_id: i64,
        count: i64,
        sum: f64,
        max: f64,
    }

    let mut groups: Vec<Acc> = Vec::new();

    for event in events {
        let confidence = event.confidence as f64;
        match groups.iter_mut().find(|g| g.class_name == event.class_name) {
            Some(group) => {
                group.count += 1;
                group.sum += confidence;
                group.max = group.max.max(confidence);
            }
            None => groups.push(Acc {
                class_name: event.class_name.clone(),
                class_id: event.class_id,
                count: 1,
                sum: confidence,
                max: confidence,
            }),
        }
    }

    groups
        .into_iter()
        .map(|g| ObjectSummary {
            class_name: g.class_name,
            class_id: g.class_id,
            total_count: g.count,
            avg_confidence: g.sum / g.count as f64,
            max_confidence: g.max,
        })
        .collect()
}

pub fn summarize_faces(faces: &[FaceDetection]) -> FaceSummary {
    let total = faces.len() as i64;
    let recognized = faces.iter().filter(|f| f.recognized_name.is_some()).count() as i64;
    FaceSummary {
        total_faces: total,
        recognized_faces: recognized,
        unrecognized_faces: total - recognized,
    }
}
