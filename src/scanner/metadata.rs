//! Normalization of raw image tags into typed EXIF fields.
//!
//! Extraction never fails: a field that is missing or malformed is left as
//! `None` and the remaining fields are still extracted.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tag names understood by [`extract_exif`].
pub mod tags {
    pub const MAKE: &str = "Make";
    pub const MODEL: &str = "Model";
    pub const SOFTWARE: &str = "Software";
    pub const DATE_TIME_ORIGINAL: &str = "DateTimeOriginal";
    pub const EXPOSURE_TIME: &str = "ExposureTime";
    pub const F_NUMBER: &str = "FNumber";
    pub const ISO_SPEED: &str = "ISOSpeedRatings";
    pub const FOCAL_LENGTH: &str = "FocalLength";
    pub const GPS_LATITUDE: &str = "GPSLatitude";
    pub const GPS_LATITUDE_REF: &str = "GPSLatitudeRef";
    pub const GPS_LONGITUDE: &str = "GPSLongitude";
    pub const GPS_LONGITUDE_REF: &str = "GPSLongitudeRef";
    pub const GPS_ALTITUDE: &str = "GPSAltitude";
    pub const GPS_ALTITUDE_REF: &str = "GPSAltitudeRef";
}

/// EXIF placeholder written by cameras without a clock.
const ZERO_DATETIME: &str = "0000:00:00 00:00:00";
const EXIF_DATETIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub num: i64,
    pub denom: i64,
}

impl Rational {
    pub fn new(num: i64, denom: i64) -> Self {
        Self { num, denom }
    }
}

/// A raw tag value as produced by an image tag reader
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Rational(Rational),
    List(Vec<TagValue>),
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::Text(value.to_string())
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        TagValue::Integer(value)
    }
}

impl From<f64> for TagValue {
    fn from(value: f64) -> Self {
        TagValue::Float(value)
    }
}

impl From<Rational> for TagValue {
    fn from(value: Rational) -> Self {
        TagValue::Rational(value)
    }
}

pub type TagMap = BTreeMap<String, TagValue>;

/// Typed EXIF fields stored alongside a photo
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExifRecord {
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub software: Option<String>,
    /// ISO-8601, `YYYY-MM-DDTHH:MM:SS`
    pub date_time_original: Option<String>,
    pub exposure_time: Option<f64>,
    pub f_number: Option<f64>,
    pub iso_speed: Option<i64>,
    pub focal_length: Option<f64>,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
    pub gps_altitude: Option<f64>,
}

impl ExifRecord {
    pub fn is_empty(&self) -> bool {
        *self == ExifRecord::default()
    }
}

/// Extract typed EXIF fields from a raw tag map.
///
/// Returns `None` when no field could be extracted.
pub fn extract_exif(tag_map: &TagMap) -> Option<ExifRecord> {
    if tag_map.is_empty() {
        return None;
    }

    let record = ExifRecord {
        camera_make: tag_map.get(tags::MAKE).and_then(tag_text),
        camera_model: tag_map.get(tags::MODEL).and_then(tag_text),
        software: tag_map.get(tags::SOFTWARE).and_then(tag_text),
        date_time_original: tag_map
            .get(tags::DATE_TIME_ORIGINAL)
            .and_then(tag_text)
            .and_then(|raw| parse_exif_datetime(&raw)),
        exposure_time: tag_map.get(tags::EXPOSURE_TIME).and_then(rational_to_f64),
        f_number: tag_map.get(tags::F_NUMBER).and_then(rational_to_f64),
        iso_speed: tag_map.get(tags::ISO_SPEED).and_then(tag_integer),
        focal_length: tag_map.get(tags::FOCAL_LENGTH).and_then(rational_to_f64),
        gps_latitude: gps_to_decimal(
            tag_map.get(tags::GPS_LATITUDE),
            tag_map.get(tags::GPS_LATITUDE_REF),
        ),
        gps_longitude: gps_to_decimal(
            tag_map.get(tags::GPS_LONGITUDE),
            tag_map.get(tags::GPS_LONGITUDE_REF),
        ),
        gps_altitude: gps_altitude(
            tag_map.get(tags::GPS_ALTITUDE),
            tag_map.get(tags::GPS_ALTITUDE_REF),
        ),
    };

    if record.is_empty() {
        None
    } else {
        Some(record)
    }
}

/// Convert a rational-like tag to a float.
///
/// Accepts a rational, a `"num/den"` string, or a plain number. A zero
/// denominator or an unparseable value yields `None`.
pub fn rational_to_f64(value: &TagValue) -> Option<f64> {
    let result = match value {
        TagValue::Rational(r) => {
            if r.denom == 0 {
                return None;
            }
            r.num as f64 / r.denom as f64
        }
        TagValue::Text(text) => {
            let text = clean_text(text);
            match text.split_once('/') {
                Some((num, denom)) => {
                    let num: f64 = num.trim().parse().ok()?;
                    let denom: f64 = denom.trim().parse().ok()?;
                    if denom == 0.0 {
                        return None;
                    }
                    num / denom
                }
                None => text.parse().ok()?,
            }
        }
        TagValue::Integer(i) => *i as f64,
        TagValue::Float(f) => *f,
        TagValue::List(values) => return values.first().and_then(rational_to_f64),
    };

    result.is_finite().then_some(result)
}

/// Convert degrees/minutes/seconds plus a hemisphere reference to decimal degrees.
pub fn gps_to_decimal(coords: Option<&TagValue>, reference: Option<&TagValue>) -> Option<f64> {
    let reference = reference.and_then(tag_text)?;
    let TagValue::List(parts) = coords? else {
        return None;
    };
    if parts.len() < 3 {
        return None;
    }

    let degrees = rational_to_f64(&parts[0])?;
    let minutes = rational_to_f64(&parts[1])?;
    let seconds = rational_to_f64(&parts[2])?;

    let decimal = dms_to_decimal(degrees, minutes, seconds);

    match reference.to_ascii_uppercase().as_str() {
        "S" | "W" => Some(-decimal),
        _ => Some(decimal),
    }
}

fn dms_to_decimal(degrees: f64, minutes: f64, seconds: f64) -> f64 {
    degrees + minutes / 60.0 + seconds / 3600.0
}

fn gps_altitude(altitude: Option<&TagValue>, reference: Option<&TagValue>) -> Option<f64> {
    let altitude = rational_to_f64(altitude?)?;
    // Reference 1 means below sea level
    let below_sea_level = matches!(reference.and_then(tag_integer), Some(1));
    Some(if below_sea_level { -altitude } else { altitude })
}

/// Validate an EXIF `YYYY:MM:DD HH:MM:SS` timestamp and normalize it to ISO-8601.
///
/// Zeroed placeholders, unparseable values and timestamps outside
/// 1900-01-01 00:00:00..=2100-12-31 00:00:00 yield `None`.
pub fn parse_exif_datetime(raw: &str) -> Option<String> {
    let raw = clean_text(raw);
    if raw.is_empty() || raw == ZERO_DATETIME {
        tracing::debug!(value = %raw, "Invalid EXIF datetime");
        return None;
    }

    if let Some((date_part, time_part)) = raw.split_once(' ') {
        if date_part.starts_with("0000") || time_part.trim() == "00:00:00" {
            tracing::debug!(value = %raw, "Zeroed EXIF datetime");
            return None;
        }
    }

    let parsed = match NaiveDateTime::parse_from_str(&raw, EXIF_DATETIME_FORMAT) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::debug!(value = %raw, error = %e, "Could not parse EXIF datetime");
            return None;
        }
    };

    let earliest = NaiveDate::from_ymd_opt(1900, 1, 1)?.and_hms_opt(0, 0, 0)?;
    let latest = NaiveDate::from_ymd_opt(2100, 12, 31)?.and_hms_opt(0, 0, 0)?;
    if parsed < earliest || parsed > latest {
        tracing::debug!(value = %raw, "EXIF datetime out of range");
        return None;
    }

    Some(parsed.format("%Y-%m-%dT%H:%M:%S").to_string())
}

fn tag_text(value: &TagValue) -> Option<String> {
    let text = match value {
        TagValue::Text(text) => clean_text(text),
        TagValue::Integer(i) => i.to_string(),
        TagValue::Float(f) => f.to_string(),
        TagValue::List(values) => return values.first().and_then(tag_text),
        TagValue::Rational(_) => return None,
    };

    (!text.is_empty()).then_some(text)
}

fn tag_integer(value: &TagValue) -> Option<i64> {
    match value {
        TagValue::Integer(i) => Some(*i),
        TagValue::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
        TagValue::Text(text) => clean_text(text).parse().ok(),
        TagValue::List(values) => values.first().and_then(tag_integer),
        _ => None,
    }
}

/// Strip whitespace, NUL padding and surrounding quotes
fn clean_text(text: &str) -> String {
    text.trim_matches(|c: char| c.is_whitespace() || c == '\0' || c == '"')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dms(d: i64, m: i64, s: i64) -> TagValue {
        TagValue::List(vec![
            Rational::new(d, 1).into(),
            Rational::new(m, 1).into(),
            Rational::new(s, 1).into(),
        ])
    }

    #[test]
    fn test_gps_to_decimal() {
        let north = gps_to_decimal(Some(&dms(40, 26, 46)), Some(&"N".into())).unwrap();
        assert!((north - 40.446111).abs() < 1e-5);

        let south = gps_to_decimal(Some(&dms(40, 26, 46)), Some(&"S".into())).unwrap();
        assert!((south + 40.446111).abs() < 1e-5);

        let west = gps_to_decimal(Some(&dms(73, 59, 0)), Some(&"W".into())).unwrap();
        assert!(west < 0.0);
    }

    #[test]
    fn test_gps_requires_coordinates_and_reference() {
        assert_eq!(gps_to_decimal(None, Some(&"N".into())), None);
        assert_eq!(gps_to_decimal(Some(&dms(40, 26, 46)), None), None);
        assert_eq!(gps_to_decimal(Some(&dms(40, 26, 46)), Some(&"".into())), None);

        let short = TagValue::List(vec![Rational::new(40, 1).into()]);
        assert_eq!(gps_to_decimal(Some(&short), Some(&"N".into())), None);

        let bad_seconds = TagValue::List(vec![
            Rational::new(40, 1).into(),
            Rational::new(26, 1).into(),
            Rational::new(46, 0).into(),
        ]);
        assert_eq!(gps_to_decimal(Some(&bad_seconds), Some(&"N".into())), None);
    }

    #[test]
    fn test_rational_conversion() {
        let value = rational_to_f64(&Rational::new(26, 10).into()).unwrap();
        assert!((value - 2.6).abs() < 1e-12);

        for num in [0, 1, 26, -5] {
            assert_eq!(rational_to_f64(&Rational::new(num, 0).into()), None);
        }

        assert_eq!(rational_to_f64(&"26/10".into()), Some(2.6));
        assert_eq!(rational_to_f64(&"1/0".into()), None);
        assert_eq!(rational_to_f64(&"abc".into()), None);
        assert_eq!(rational_to_f64(&"4.5".into()), Some(4.5));
        assert_eq!(rational_to_f64(&TagValue::Integer(50)), Some(50.0));
        assert_eq!(rational_to_f64(&TagValue::Float(f64::NAN)), None);
    }

    #[test]
    fn test_datetime_validation() {
        assert_eq!(parse_exif_datetime("0000:00:00 00:00:00"), None);
        assert_eq!(
            parse_exif_datetime("2023:05:01 10:00:00").as_deref(),
            Some("2023-05-01T10:00:00")
        );
        assert_eq!(parse_exif_datetime("1899:12:31 00:00:01"), None);
        assert_eq!(parse_exif_datetime("2101:01:01 12:00:00"), None);
        assert_eq!(parse_exif_datetime("0000:05:01 10:00:00"), None);
        assert_eq!(parse_exif_datetime("2023:05:01 00:00:00"), None);
        assert_eq!(parse_exif_datetime("2023-05-01 10:00:00"), None);
        assert_eq!(parse_exif_datetime("2023:13:01 10:00:00"), None);
        assert_eq!(parse_exif_datetime(""), None);
        assert_eq!(
            parse_exif_datetime(" 2100:12:30 23:59:59\0").as_deref(),
            Some("2100-12-30T23:59:59")
        );
        // The upper bound is midnight at the start of 2100-12-31
        assert_eq!(parse_exif_datetime("2100:12:31 10:00:00"), None);
        assert_eq!(
            parse_exif_datetime("1900:01:01 00:00:01").as_deref(),
            Some("1900-01-01T00:00:01")
        );
    }

    #[test]
    fn test_extract_exif_empty_map() {
        assert_eq!(extract_exif(&TagMap::new()), None);
    }

    #[test]
    fn test_extract_exif_unusable_fields_only() {
        let mut map = TagMap::new();
        map.insert(tags::FOCAL_LENGTH.to_string(), Rational::new(35, 0).into());
        map.insert(tags::DATE_TIME_ORIGINAL.to_string(), "0000:00:00 00:00:00".into());
        assert_eq!(extract_exif(&map), None);
    }

    #[test]
    fn test_extract_exif_fields() {
        let mut map = TagMap::new();
        map.insert(tags::MAKE.to_string(), "\"Canon\"".into());
        map.insert(tags::MODEL.to_string(), "EOS 5D\0\0".into());
        map.insert(tags::DATE_TIME_ORIGINAL.to_string(), "2023:05:01 10:00:00".into());
        map.insert(tags::EXPOSURE_TIME.to_string(), Rational::new(1, 250).into());
        map.insert(tags::F_NUMBER.to_string(), Rational::new(28, 10).into());
        map.insert(tags::FOCAL_LENGTH.to_string(), "50/0".into());
        map.insert(tags::ISO_SPEED.to_string(), TagValue::List(vec![TagValue::Integer(400)]));
        map.insert(tags::GPS_LATITUDE.to_string(), dms(40, 26, 46));
        map.insert(tags::GPS_LATITUDE_REF.to_string(), "N".into());
        map.insert(tags::GPS_LONGITUDE.to_string(), dms(79, 58, 56));
        map.insert(tags::GPS_LONGITUDE_REF.to_string(), "W".into());
        map.insert(tags::GPS_ALTITUDE.to_string(), Rational::new(1200, 10).into());
        map.insert(tags::GPS_ALTITUDE_REF.to_string(), TagValue::Integer(1));

        let exif = extract_exif(&map).unwrap();
        assert_eq!(exif.camera_make.as_deref(), Some("Canon"));
        assert_eq!(exif.camera_model.as_deref(), Some("EOS 5D"));
        assert_eq!(exif.software, None);
        assert_eq!(exif.date_time_original.as_deref(), Some("2023-05-01T10:00:00"));
        assert!((exif.exposure_time.unwrap() - 0.004).abs() < 1e-12);
        assert!((exif.f_number.unwrap() - 2.8).abs() < 1e-12);
        assert_eq!(exif.focal_length, None);
        assert_eq!(exif.iso_speed, Some(400));
        assert!((exif.gps_latitude.unwrap() - 40.446111).abs() < 1e-5);
        assert!(exif.gps_longitude.unwrap() < -79.0);
        assert_eq!(exif.gps_altitude, Some(-120.0));
    }
}
