use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use exif::{In, Tag};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Capture settings that determine how much light reached the sensor.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExposureInfo {
    /// Shutter time in seconds.
    pub exposure_time: Option<f64>,
    pub f_number: Option<f64>,
    pub iso: Option<u32>,
}

impl ExposureInfo {
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let mut reader = BufReader::new(file);
        let exif = exif::Reader::new()
            .read_from_container(&mut reader)
            .with_context(|| format!("read EXIF from {}", path.display()))?;

        let info = Self {
            exposure_time: get_rational_f64(&exif, Tag::ExposureTime),
            f_number: get_rational_f64(&exif, Tag::FNumber),
            iso: get_u32(&exif, Tag::PhotographicSensitivity),
        };
        debug!(?path, ?info, "read exposure metadata");
        Ok(info)
    }

    /// Relative exposure: shutter time scaled by sensor gain (ISO / 100).
    /// `None` without a usable shutter time.
    pub fn relative_exposure(&self) -> Option<f64> {
        let time = self.exposure_time.filter(|t| t.is_finite() && *t > 0.0)?;
        let gain = self.iso.filter(|&iso| iso > 0).map_or(1.0, |iso| iso as f64 / 100.0);
        Some(time * gain)
    }
}

/// Relative exposure recorded in a file's EXIF block, if any.
pub fn relative_exposure(path: &Path) -> Option<f64> {
    match ExposureInfo::from_file(path) {
        Ok(info) => info.relative_exposure(),
        Err(e) => {
            debug!(?path, error = %e, "no exposure metadata");
            None
        }
    }
}

fn get_u32(exif: &exif::Exif, tag: Tag) -> Option<u32> {
    exif.get_field(tag, In::PRIMARY).and_then(|f| match f.value {
        exif::Value::Short(ref v) => v.first().map(|&x| x as u32),
        exif::Value::Long(ref v) => v.first().copied(),
        _ => f.display_value().to_string().trim().parse().ok(),
    })
}

fn get_rational_f64(exif: &exif::Exif, tag: Tag) -> Option<f64> {
    exif.get_field(tag, In::PRIMARY).and_then(|f| match f.value {
        exif::Value::Rational(ref v) => v
            .first()
            .filter(|r| r.denom != 0)
            .map(|r| r.num as f64 / r.denom as f64),
        _ => f.display_value().to_string().trim().parse().ok(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_exposure_scales_with_iso() {
        let info = ExposureInfo {
            exposure_time: Some(0.01),
            f_number: Some(4.0),
            iso: Some(400),
        };
        let e = info.relative_exposure().unwrap();
        assert!((e - 0.04).abs() < 1e-12, "got {e}");
    }

    #[test]
    fn missing_iso_means_unit_gain() {
        let info = ExposureInfo {
            exposure_time: Some(0.5),
            ..Default::default()
        };
        assert_eq!(info.relative_exposure(), Some(0.5));
    }

    #[test]
    fn missing_or_invalid_time_has_no_exposure() {
        assert_eq!(ExposureInfo::default().relative_exposure(), None);
        let info = ExposureInfo {
            exposure_time: Some(0.0),
            ..Default::default()
        };
        assert_eq!(info.relative_exposure(), None);
    }

    #[test]
    fn file_without_exif_has_no_exposure() {
        let dir = std::env::temp_dir().join(format!("hdr-metadata-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("plain.txt");
        std::fs::write(&path, b"not an image").unwrap();
        assert!(ExposureInfo::from_file(&path).is_err());
        assert_eq!(relative_exposure(&path), None);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn serializes_to_json() {
        let info = ExposureInfo {
            exposure_time: Some(0.25),
            f_number: None,
            iso: Some(100),
        };
        let json = serde_json::to_string(&info).unwrap();
        let back: ExposureInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, info);
    }
}
