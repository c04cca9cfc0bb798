use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::metadata::{tags, Rational, TagMap, TagValue};

/// File-level facts about an image plus its raw tag map
#[derive(Debug, Clone, Default)]
pub struct ImageInfo {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<String>,
    pub file_size: u64,
    pub tags: TagMap,
}

/// Reads dimensions, format and raw tags from an image file.
pub trait MetadataReader {
    fn read_image(&self, path: &Path) -> Result<ImageInfo>;
}

/// Default reader backed by the `image` and `kamadak-exif` crates.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExifMetadataReader;

impl MetadataReader for ExifMetadataReader {
    fn read_image(&self, path: &Path) -> Result<ImageInfo> {
        let file_metadata = std::fs::metadata(path)
            .with_context(|| format!("Cannot read {}", path.display()))?;

        let reader = image::ImageReader::open(path)
            .with_context(|| format!("Cannot open {}", path.display()))?
            .with_guessed_format()
            .with_context(|| format!("Cannot detect image format of {}", path.display()))?;

        let format = reader
            .format()
            .map(|f| format!("{:?}", f).to_uppercase());

        let (width, height) = reader
            .into_dimensions()
            .with_context(|| format!("Cannot decode image {}", path.display()))?;

        Ok(ImageInfo {
            width: Some(width),
            height: Some(height),
            format,
            file_size: file_metadata.len(),
            tags: read_tags(path),
        })
    }
}

/// Read the EXIF tags we care about; a file without EXIF gives an empty map.
fn read_tags(path: &Path) -> TagMap {
    let mut map = TagMap::new();

    let file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return map,
    };

    let mut bufreader = BufReader::new(file);
    let exif = match exif::Reader::new().read_from_container(&mut bufreader) {
        Ok(e) => e,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "No EXIF data");
            return map;
        }
    };

    let wanted = [
        (exif::Tag::Make, tags::MAKE),
        (exif::Tag::Model, tags::MODEL),
        (exif::Tag::Software, tags::SOFTWARE),
        (exif::Tag::DateTimeOriginal, tags::DATE_TIME_ORIGINAL),
        (exif::Tag::ExposureTime, tags::EXPOSURE_TIME),
        (exif::Tag::FNumber, tags::F_NUMBER),
        (exif::Tag::PhotographicSensitivity, tags::ISO_SPEED),
        (exif::Tag::FocalLength, tags::FOCAL_LENGTH),
        (exif::Tag::GPSLatitude, tags::GPS_LATITUDE),
        (exif::Tag::GPSLatitudeRef, tags::GPS_LATITUDE_REF),
        (exif::Tag::GPSLongitude, tags::GPS_LONGITUDE),
        (exif::Tag::GPSLongitudeRef, tags::GPS_LONGITUDE_REF),
        (exif::Tag::GPSAltitude, tags::GPS_ALTITUDE),
        (exif::Tag::GPSAltitudeRef, tags::GPS_ALTITUDE_REF),
    ];

    for (tag, name) in wanted {
        if let Some(field) = exif.get_field(tag, exif::In::PRIMARY) {
            if let Some(value) = convert_value(&field.value) {
                map.insert(name.to_string(), value);
            }
        }
    }

    map
}

fn convert_value(value: &exif::Value) -> Option<TagValue> {
    match value {
        exif::Value::Ascii(parts) => parts
            .first()
            .map(|bytes| TagValue::Text(String::from_utf8_lossy(bytes).into_owned())),
        exif::Value::Byte(v) => collapse(v.iter().map(|&b| TagValue::Integer(b as i64))),
        exif::Value::Short(v) => collapse(v.iter().map(|&s| TagValue::Integer(s as i64))),
        exif::Value::Long(v) => collapse(v.iter().map(|&l| TagValue::Integer(l as i64))),
        exif::Value::SShort(v) => collapse(v.iter().map(|&s| TagValue::Integer(s as i64))),
        exif::Value::SLong(v) => collapse(v.iter().map(|&l| TagValue::Integer(l as i64))),
        exif::Value::Rational(v) => collapse(
            v.iter()
                .map(|r| TagValue::Rational(Rational::new(r.num as i64, r.denom as i64))),
        ),
        exif::Value::SRational(v) => collapse(
            v.iter()
                .map(|r| TagValue::Rational(Rational::new(r.num as i64, r.denom as i64))),
        ),
        exif::Value::Float(v) => collapse(v.iter().map(|&f| TagValue::Float(f as f64))),
        exif::Value::Double(v) => collapse(v.iter().map(|&f| TagValue::Float(f))),
        _ => None,
    }
}

/// Single values stay scalar, multi-valued fields (GPS triples) become lists
fn collapse(values: impl Iterator<Item = TagValue>) -> Option<TagValue> {
    let mut values: Vec<TagValue> = values.collect();
    match values.len() {
        0 => None,
        1 => values.pop(),
        _ => Some(TagValue::List(values)),
    }
}
