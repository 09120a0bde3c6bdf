use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::pixel_buf::{Exposure, ExposureSet, PixelBuffer};

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tiff", "tif"];

pub fn is_supported_extension(ext: &str) -> bool {
    IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(is_supported_extension)
}

/// Decode a JPEG, PNG or TIFF file into a normalized 4-channel buffer.
/// Sources without alpha get a zero 4th channel.
pub fn decode(path: &Path) -> Result<PixelBuffer> {
    info!(?path, "loading image file");
    let t0 = std::time::Instant::now();

    let img =
        image::open(path).with_context(|| format!("failed to open image: {}", path.display()))?;
    let (width, height) = (img.width(), img.height());
    debug!(
        elapsed_ms = t0.elapsed().as_millis(),
        width, height, "image decode"
    );

    let buf = if img.color().has_alpha() {
        PixelBuffer::from_rgba8(width, height, img.into_rgba8().as_raw())?
    } else {
        PixelBuffer::from_rgb8(width, height, img.into_rgb8().as_raw())?
    };
    debug!(elapsed_ms = t0.elapsed().as_millis(), "total decode");
    Ok(buf)
}

/// Encode the RGB channels as 8-bit, clamping to [0,1]. The format follows
/// the file extension.
pub fn encode(buf: &PixelBuffer, path: &Path) -> Result<()> {
    let t0 = std::time::Instant::now();
    let Some(img) = image::RgbImage::from_raw(buf.width, buf.height, buf.to_rgb8()) else {
        bail!("buffer does not match {}x{}", buf.width, buf.height);
    };
    img.save(path)
        .with_context(|| format!("failed to write image: {}", path.display()))?;
    info!(?path, elapsed_ms = t0.elapsed().as_millis(), "wrote image");
    Ok(())
}

/// `<dir>/<input stem>_<filter name>.jpg`
pub fn output_path(dir: &Path, input: &Path, filter_name: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    dir.join(format!("{stem}_{filter_name}.jpg"))
}

/// Exposure encoded as a trailing `_<number>` in the file stem, e.g.
/// `window_0.25.jpg`.
pub fn exposure_from_stem(path: &Path) -> Option<f64> {
    let stem = path.file_stem()?.to_str()?;
    let (_, suffix) = stem.rsplit_once('_')?;
    suffix
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
}

/// Load every supported image in `dir`, in file-name order, as one bracket.
///
/// Exposures come from EXIF (shutter time x gain), falling back to the
/// file-name suffix, and are normalized so the median exposure is 1.
pub fn load_exposure_set(dir: &Path) -> Result<ExposureSet> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && has_supported_extension(p))
        .collect();
    paths.sort();
    if paths.is_empty() {
        bail!("no images found in {}", dir.display());
    }

    let mut raw = Vec::with_capacity(paths.len());
    for path in &paths {
        let exposure = hdr_metadata::relative_exposure(path)
            .or_else(|| exposure_from_stem(path))
            .with_context(|| {
                format!(
                    "no exposure for {}: add EXIF ExposureTime or a _<exposure> file-name suffix",
                    path.display()
                )
            })?;
        raw.push((decode(path)?, exposure));
    }

    let mut sorted: Vec<f64> = raw.iter().map(|(_, e)| *e).collect();
    sorted.sort_by(f64::total_cmp);
    let median = sorted[(sorted.len() - 1) / 2];
    if raw.len() == 1 {
        warn!(?dir, "exposure set has a single image");
    }

    let images = raw
        .into_iter()
        .map(|(buffer, exposure)| Exposure {
            buffer,
            exposure: (exposure / median) as f32,
        })
        .collect();
    let set = ExposureSet::new(images)?;
    info!(
        ?dir,
        images = set.len(),
        width = set.width(),
        height = set.height(),
        "loaded exposure set"
    );
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(path: &Path, value: u8) {
        let img = image::RgbImage::from_pixel(4, 3, image::Rgb([value, value / 2, 255 - value]));
        img.save(path).unwrap();
    }

    #[test]
    fn supported_extensions_ignore_case() {
        assert!(is_supported_extension("JPG"));
        assert!(is_supported_extension("tif"));
        assert!(!is_supported_extension("cr2"));
    }

    #[test]
    fn png_roundtrip_is_lossless() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.png");
        let mut buf = PixelBuffer::new(16, 2);
        for (i, px) in buf.data.chunks_exact_mut(4).enumerate() {
            let v = (i * 16) as f32 / 255.0;
            px.copy_from_slice(&[v, 1.0 - v, 0.5, 0.0]);
        }
        encode(&buf, &path).unwrap();
        let back = decode(&path).unwrap();
        assert_eq!(back.to_rgb8(), buf.to_rgb8());
        assert!(back.data.chunks_exact(4).all(|px| px[3] == 0.0));
    }

    #[test]
    fn jpeg_output_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = output_path(dir.path(), Path::new("in/lena-300x300.jpg"), "ReinhardGlobal");
        assert_eq!(path.file_name().unwrap(), "lena-300x300_ReinhardGlobal.jpg");
        encode(&PixelBuffer::filled(8, 8, [0.2, 0.4, 0.6, 0.0]), &path).unwrap();
        let back = decode(&path).unwrap();
        assert_eq!((back.width, back.height), (8, 8));
    }

    #[test]
    fn decode_missing_file_fails() {
        assert!(decode(Path::new("/nonexistent/image.png")).is_err());
    }

    #[test]
    fn stem_exposure_parsing() {
        assert_eq!(exposure_from_stem(Path::new("door_0.25.jpg")), Some(0.25));
        assert_eq!(exposure_from_stem(Path::new("a_b_4.png")), Some(4.0));
        assert_eq!(exposure_from_stem(Path::new("door.jpg")), None);
        assert_eq!(exposure_from_stem(Path::new("door_x.jpg")), None);
        assert_eq!(exposure_from_stem(Path::new("door_0.jpg")), None);
    }

    #[test]
    fn exposure_set_is_median_normalized() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("shot_0.5.png"), 40);
        write_png(&dir.path().join("shot_1.png"), 120);
        write_png(&dir.path().join("shot_2.png"), 220);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let set = load_exposure_set(dir.path()).unwrap();
        let exposures: Vec<f32> = set.images().iter().map(|e| e.exposure).collect();
        assert_eq!(exposures, vec![0.5, 1.0, 2.0]);
        assert_eq!((set.width(), set.height()), (4, 3));
    }

    #[test]
    fn image_without_exposure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("shot.png"), 40);
        assert!(load_exposure_set(dir.path()).is_err());
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_exposure_set(dir.path()).is_err());
    }
}
