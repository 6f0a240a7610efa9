//! Technical metadata extraction from artifact bytes
//!
//! Pulls camera and GPS fields out of the EXIF container. GPS coordinates
//! arrive as degree/minute/second rational triplets and are folded into
//! signed decimal degrees.

use std::io::Cursor;

use exif::{Exif, In, Rational, Tag, Value};
use thiserror::Error;

use mediastore::{GpsPoint, TechnicalMetadata};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no readable EXIF container: {0}")]
    Exif(#[from] exif::Error),
}

/// Extract technical metadata from raw artifact bytes
pub fn extract_technical(bytes: &[u8]) -> Result<TechnicalMetadata, ExtractError> {
    let exif = exif::Reader::new().read_from_container(&mut Cursor::new(bytes))?;

    Ok(TechnicalMetadata {
        make: ascii_value(&exif, Tag::Make),
        model: ascii_value(&exif, Tag::Model),
        software: ascii_value(&exif, Tag::Software),
        date_taken: ascii_value(&exif, Tag::DateTimeOriginal),
        gps: gps_point(&exif),
    })
}

fn ascii_value(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    if let Value::Ascii(ref lines) = field.value {
        let text = String::from_utf8_lossy(lines.first()?);
        let text = text.trim_end_matches('\0').trim();
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    } else {
        None
    }
}

fn gps_point(exif: &Exif) -> Option<GpsPoint> {
    let lat = dms_value(exif, Tag::GPSLatitude)?;
    let lng = dms_value(exif, Tag::GPSLongitude)?;
    let lat = apply_ref(lat, ascii_value(exif, Tag::GPSLatitudeRef), "S");
    let lng = apply_ref(lng, ascii_value(exif, Tag::GPSLongitudeRef), "W");
    Some(GpsPoint {
        lat,
        lng,
        altitude: altitude(exif).unwrap_or(0.0),
    })
}

fn dms_value(exif: &Exif, tag: Tag) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    if let Value::Rational(ref triplet) = field.value {
        dms_to_decimal(triplet)
    } else {
        None
    }
}

fn dms_to_decimal(triplet: &[Rational]) -> Option<f64> {
    let degrees = triplet.first()?.to_f64();
    let minutes = triplet.get(1).map_or(0.0, Rational::to_f64);
    let seconds = triplet.get(2).map_or(0.0, Rational::to_f64);
    Some(degrees + minutes / 60.0 + seconds / 3600.0)
}

fn apply_ref(value: f64, reference: Option<String>, negative: &str) -> f64 {
    match reference {
        Some(r) if r.eq_ignore_ascii_case(negative) => -value,
        _ => value,
    }
}

fn altitude(exif: &Exif) -> Option<f64> {
    let field = exif.get_field(Tag::GPSAltitude, In::PRIMARY)?;
    let meters = if let Value::Rational(ref v) = field.value {
        v.first()?.to_f64()
    } else {
        return None;
    };
    // GPSAltitudeRef 1 means below sea level
    let below = matches!(
        exif.get_field(Tag::GPSAltitudeRef, In::PRIMARY),
        Some(field) if matches!(field.value, Value::Byte(ref v) if v.first() == Some(&1))
    );
    Some(if below { -meters } else { meters })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rational(num: u32, denom: u32) -> Rational {
        Rational { num, denom }
    }

    #[test]
    fn test_dms_to_decimal() {
        // 52° 13' 30" = 52.225
        let triplet = [rational(52, 1), rational(13, 1), rational(30, 1)];
        let decimal = dms_to_decimal(&triplet).unwrap();
        assert!((decimal - 52.225).abs() < 1e-9);
    }

    #[test]
    fn test_dms_to_decimal_partial_triplet() {
        assert_eq!(dms_to_decimal(&[rational(10, 1)]), Some(10.0));
        assert_eq!(dms_to_decimal(&[]), None);
    }

    #[test]
    fn test_apply_ref_signs() {
        assert_eq!(apply_ref(52.0, Some("N".to_string()), "S"), 52.0);
        assert_eq!(apply_ref(52.0, Some("S".to_string()), "S"), -52.0);
        assert_eq!(apply_ref(21.0, Some("w".to_string()), "W"), -21.0);
        assert_eq!(apply_ref(21.0, None, "W"), 21.0);
    }

    #[test]
    fn test_garbage_bytes_is_an_error() {
        assert!(extract_technical(b"definitely not an image").is_err());
        assert!(extract_technical(&[]).is_err());
    }
}
