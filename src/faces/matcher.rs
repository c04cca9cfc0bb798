//! Nearest-neighbour matching of face encodings against a gallery.

use serde::Serialize;

use super::Gallery;
use crate::config::{DistanceMetric, FacesConfig};

/// Distance between two encodings; lower means more similar.
pub type DistanceFn = fn(&[f32], &[f32]) -> f32;

pub const DEFAULT_TOLERANCE: f32 = 0.6;

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FaceMatch {
    pub name: Option<String>,
    pub confidence: Option<f32>,
}

impl FaceMatch {
    pub fn is_match(&self) -> bool {
        self.name.is_some()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FaceMatcher {
    pub tolerance: f32,
    pub distance: DistanceFn,
}

impl Default for FaceMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE, euclidean_distance)
    }
}

impl FaceMatcher {
    pub fn new(tolerance: f32, distance: DistanceFn) -> Self {
        Self { tolerance, distance }
    }

    pub fn from_metric(tolerance: f32, metric: DistanceMetric) -> Self {
        let distance: DistanceFn = match metric {
            DistanceMetric::Euclidean => euclidean_distance,
            DistanceMetric::Cosine => cosine_distance,
        };
        Self::new(tolerance, distance)
    }

    pub fn from_config(config: &FacesConfig) -> Self {
        Self::from_metric(config.tolerance, config.distance)
    }

    /// Closest gallery entry within tolerance, with confidence `1 - distance`.
    pub fn find_match(&self, gallery: &Gallery, query: &[f32]) -> FaceMatch {
        self.find_match_with_tolerance(gallery, query, self.tolerance)
    }

    pub fn find_match_with_tolerance(&self, gallery: &Gallery, query: &[f32], tolerance: f32) -> FaceMatch {
        let mut best: Option<(usize, f32)> = None;

        for (index, entry) in gallery.entries().iter().enumerate() {
            let distance = (self.distance)(&entry.encoding, query);
            // NaN fails this comparison and is never a candidate
            if !(distance <= tolerance) {
                continue;
            }
            // Strict comparison keeps the earliest entry on ties
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((index, distance));
            }
        }

        match best {
            Some((index, distance)) => FaceMatch {
                name: Some(gallery.entries()[index].name.clone()),
                confidence: Some(1.0 - distance),
            },
            None => FaceMatch::default(),
        }
    }
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }

    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// `1 - cosine similarity`, in [0, 2]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return f32::INFINITY;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a > 0.0 && norm_b > 0.0 {
        1.0 - dot / (norm_a * norm_b)
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Treats the first component of the gallery encoding as the distance
    fn first_component(entry: &[f32], _query: &[f32]) -> f32 {
        entry[0]
    }

    fn gallery(distances: &[f32]) -> Gallery {
        let mut gallery = Gallery::new();
        for (i, d) in distances.iter().enumerate() {
            gallery.push(format!("person{}", i), vec![*d]);
        }
        gallery
    }

    #[test]
    fn test_selects_closest_candidate() {
        let matcher = FaceMatcher::new(0.6, first_component);
        let result = matcher.find_match(&gallery(&[0.5, 0.3, 0.7]), &[0.0]);

        assert_eq!(result.name.as_deref(), Some("person1"));
        assert!((result.confidence.unwrap() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_no_candidate_within_tolerance() {
        let matcher = FaceMatcher::new(0.2, first_component);
        let result = matcher.find_match(&gallery(&[0.5, 0.3, 0.7]), &[0.0]);
        assert_eq!(result, FaceMatch::default());
        assert!(!result.is_match());
    }

    #[test]
    fn test_empty_gallery() {
        let result = FaceMatcher::default().find_match(&Gallery::new(), &[1.0, 2.0]);
        assert_eq!(result, FaceMatch::default());
    }

    #[test]
    fn test_tolerance_is_inclusive_and_ties_go_first() {
        let matcher = FaceMatcher::new(0.5, first_component);
        let result = matcher.find_match(&gallery(&[0.9, 0.5, 0.5]), &[0.0]);
        assert_eq!(result.name.as_deref(), Some("person1"));
    }

    #[test]
    fn test_nan_distance_never_matches() {
        let matcher = FaceMatcher::new(0.6, first_component);
        let result = matcher.find_match(&gallery(&[f32::NAN]), &[0.0]);
        assert!(!result.is_match());
    }

    #[test]
    fn test_override_tolerance() {
        let matcher = FaceMatcher::new(0.6, first_component);
        let result = matcher.find_match_with_tolerance(&gallery(&[0.5, 0.3]), &[0.0], 0.1);
        assert!(!result.is_match());
    }

    #[test]
    fn test_euclidean_distance() {
        assert!((euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-6);
        assert_eq!(euclidean_distance(&[1.0], &[1.0, 2.0]), f32::INFINITY);
    }

    #[test]
    fn test_cosine_distance() {
        assert!(cosine_distance(&[1.0, 0.0], &[2.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_distance(&[1.0], &[]), f32::INFINITY);
    }

    #[test]
    fn test_mismatched_lengths_never_match() {
        let mut gallery = Gallery::new();
        gallery.push("alice", vec![0.1, 0.2, 0.3]);
        let result = FaceMatcher::default().find_match(&gallery, &[0.1, 0.2]);
        assert!(!result.is_match());
    }

    #[test]
    fn test_from_metric() {
        let matcher = FaceMatcher::from_metric(0.4, DistanceMetric::Cosine);
        let mut gallery = Gallery::new();
        gallery.push("alice", vec![1.0, 0.0]);
        gallery.push("bob", vec![0.0, 1.0]);

        let result = matcher.find_match(&gallery, &[0.9, 0.1]);
        assert_eq!(result.name.as_deref(), Some("alice"));
    }
}
