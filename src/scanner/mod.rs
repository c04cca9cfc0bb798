//! Finding image files and pulling their metadata.

pub mod discovery;
pub mod metadata;
pub mod reader;

pub use discovery::discover_images;
pub use metadata::{extract_exif, ExifRecord, TagMap, TagValue};
pub use reader::{ExifMetadataReader, ImageInfo, MetadataReader};
