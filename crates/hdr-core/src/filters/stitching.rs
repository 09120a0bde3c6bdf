use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::color::{exposure_weight, luminance};
use crate::error::FilterError;
use crate::pixel_buf::{CHANNELS, ExposureSet, PixelBuffer};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StitchingParams {
    /// Added to the weight sum so that pixels clipped in every exposure
    /// resolve to black instead of NaN.
    pub weight_epsilon: f32,
}

impl Default for StitchingParams {
    fn default() -> Self {
        Self {
            weight_epsilon: 1e-6,
        }
    }
}

impl StitchingParams {
    pub fn validate(&self) -> Result<(), FilterError> {
        if !(self.weight_epsilon.is_finite() && self.weight_epsilon > 0.0) {
            return Err(FilterError::InvalidParams(format!(
                "weight_epsilon must be positive, got {}",
                self.weight_epsilon
            )));
        }
        Ok(())
    }
}

/// Weighted radiance estimate for pixel `i`. Each sample is weighted by
/// how well exposed it is and divided by its exposure. The 4th channel
/// carries the luminance of the result.
pub fn fuse_pixel(set: &ExposureSet, i: usize, weight_epsilon: f32) -> [f32; 4] {
    let mut sum = [0.0_f32; 3];
    let mut weight_sum = 0.0_f32;
    for image in set.images() {
        let rgb = image.buffer.rgb(i);
        let w = exposure_weight(luminance(rgb));
        for c in 0..3 {
            sum[c] += rgb[c] / image.exposure * w;
        }
        weight_sum += w;
    }
    let norm = weight_sum + weight_epsilon;
    let hdr = [sum[0] / norm, sum[1] / norm, sum[2] / norm];
    [hdr[0], hdr[1], hdr[2], luminance(hdr)]
}

/// Fuse a bracket into one HDR buffer. Values are not clamped.
pub fn reference(set: &ExposureSet, params: &StitchingParams) -> PixelBuffer {
    let mut output = PixelBuffer::new(set.width(), set.height());
    for i in 0..output.pixel_count() {
        output.put_pixel(i, fuse_pixel(set, i, params.weight_epsilon));
    }
    output
}

pub fn parallel(set: &ExposureSet, params: &StitchingParams, local: usize) -> PixelBuffer {
    let mut output = PixelBuffer::new(set.width(), set.height());
    output
        .data
        .par_chunks_mut(CHANNELS)
        .enumerate()
        .with_min_len(local.max(1))
        .for_each(|(i, dst)| dst.copy_from_slice(&fuse_pixel(set, i, params.weight_epsilon)));
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel_buf::Exposure;

    fn bracket() -> ExposureSet {
        let scene = |x: usize| 0.02 + 0.3 * x as f32;
        let mut images = Vec::new();
        for exposure in [0.25_f32, 1.0, 4.0] {
            let mut buf = PixelBuffer::new(8, 2);
            for (i, px) in buf.data.chunks_exact_mut(4).enumerate() {
                let v = (scene(i % 8) * exposure).min(1.0);
                px.copy_from_slice(&[v, v, v, 0.0]);
            }
            images.push(Exposure {
                buffer: buf,
                exposure,
            });
        }
        ExposureSet::new(images).unwrap()
    }

    #[test]
    fn single_well_exposed_image_recovers_radiance() {
        let buf = PixelBuffer::filled(2, 2, [0.4, 0.2, 0.3, 0.0]);
        let set = ExposureSet::new(vec![Exposure {
            buffer: buf,
            exposure: 2.0,
        }])
        .unwrap();
        let out = reference(&set, &StitchingParams::default());
        let px = out.pixel(0);
        assert!((px[0] - 0.2).abs() < 1e-4, "got {}", px[0]);
        assert!((px[1] - 0.1).abs() < 1e-4, "got {}", px[1]);
        assert!((px[3] - luminance([px[0], px[1], px[2]])).abs() < 1e-6);
    }

    #[test]
    fn fused_radiance_tracks_scene_and_can_exceed_one() {
        let out = reference(&bracket(), &StitchingParams::default());
        for x in 1..8 {
            let expected = 0.02 + 0.3 * x as f32;
            let got = out.pixel(x)[0];
            assert!(
                (got - expected).abs() < 0.05 * expected,
                "x={x}: expected ~{expected}, got {got}"
            );
        }
        assert!(out.pixel(7)[0] > 1.0, "HDR output must not be clamped");
    }

    #[test]
    fn identical_mid_gray_exposures_fuse_to_the_same_gray() {
        let images = (0..3)
            .map(|_| Exposure {
                buffer: PixelBuffer::filled(3, 2, [0.5, 0.5, 0.5, 1.0]),
                exposure: 1.0,
            })
            .collect();
        let set = ExposureSet::new(images).unwrap();
        let out = reference(&set, &StitchingParams::default());
        for i in 0..out.pixel_count() {
            let px = out.pixel(i);
            for v in px {
                assert!((v - 0.5).abs() < 1e-5, "pixel {i}: {px:?}");
            }
        }
    }

    #[test]
    fn fully_clipped_pixel_is_black_not_nan() {
        let set = ExposureSet::new(vec![Exposure {
            buffer: PixelBuffer::filled(1, 1, [1.0, 1.0, 1.0, 0.0]),
            exposure: 1.0,
        }])
        .unwrap();
        let out = reference(&set, &StitchingParams::default());
        assert!(out.data.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn parallel_matches_reference() {
        let set = bracket();
        let params = StitchingParams::default();
        let seq = reference(&set, &params);
        let par = parallel(&set, &params, 4);
        assert_eq!(seq, par);
    }
}
