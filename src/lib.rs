//! Photo catalog with object detection and face recognition.
//!
//! Photos are ingested into a SQLite catalog together with their EXIF
//! metadata, per-class object summaries and recognized faces. Reprocessing
//! a photo replaces its previous results instead of merging with them.

pub mod aggregate;
pub mod config;
pub mod db;
pub mod error;
pub mod faces;
pub mod logging;
pub mod models;
pub mod objects;
pub mod pipeline;
pub mod scanner;
