use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::color::{LUM_EPSILON, rgb_to_xyz};
use crate::error::FilterError;
use crate::pixel_buf::{CHANNELS, PixelBuffer, clamp_unit};
use crate::reduce::{LaunchConfig, luminance_stats, luminance_stats_parallel};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReinhardGlobalParams {
    /// Target log-average luminance ("middle grey").
    pub key: f32,
    /// Colour saturation exponent applied to channel/luminance ratios.
    pub sat: f32,
}

impl Default for ReinhardGlobalParams {
    fn default() -> Self {
        Self { key: 0.18, sat: 1.6 }
    }
}

impl ReinhardGlobalParams {
    pub fn validate(&self) -> Result<(), FilterError> {
        if !(self.key.is_finite() && self.key > 0.0) {
            return Err(FilterError::InvalidParams(format!(
                "key must be positive, got {}",
                self.key
            )));
        }
        if !(self.sat.is_finite() && self.sat > 0.0) {
            return Err(FilterError::InvalidParams(format!(
                "sat must be positive, got {}",
                self.sat
            )));
        }
        Ok(())
    }
}

/// Reinhard's extended operator: L(1 + L/Lw^2) / (1 + L).
pub fn compress(l: f32, l_white: f32) -> f32 {
    l * (1.0 + l / (l_white * l_white)) / (1.0 + l)
}

/// Scale each channel by its ratio to luminance raised to `sat`. Black
/// pixels stay black.
pub fn recolor(px: &[f32], y: f32, ld: f32, sat: f32, out: &mut [f32]) {
    if y <= LUM_EPSILON {
        out[..3].fill(0.0);
    } else {
        for c in 0..3 {
            out[c] = clamp_unit(ratio_pow(px[c] / y, sat) * ld);
        }
    }
    out[3] = clamp_unit(px[3]);
}

/// `x^sat` with non-positive bases mapped to 0.
pub fn ratio_pow(x: f32, sat: f32) -> f32 {
    if x <= 0.0 { 0.0 } else { x.powf(sat) }
}

fn map_pixel(px: &[f32], scale: f32, l_white: f32, sat: f32, out: &mut [f32]) {
    let y = rgb_to_xyz([px[0], px[1], px[2]])[1];
    let ld = compress(scale * y, l_white);
    recolor(px, y, ld, sat, out);
}

pub fn reference(input: &PixelBuffer, params: &ReinhardGlobalParams) -> PixelBuffer {
    let stats = luminance_stats(input);
    let scale = params.key / stats.log_average();
    let l_white = stats.white();

    let mut output = PixelBuffer::new(input.width, input.height);
    for (src, dst) in input
        .data
        .chunks_exact(CHANNELS)
        .zip(output.data.chunks_exact_mut(CHANNELS))
    {
        map_pixel(src, scale, l_white, params.sat, dst);
    }
    output
}

/// Partial log-sum/max reduction per group, one-lane final merge, then a
/// parallel per-pixel map.
pub fn parallel(input: &PixelBuffer, params: &ReinhardGlobalParams, local: usize) -> PixelBuffer {
    let config = LaunchConfig::reduction(input.pixel_count(), local);
    let stats = luminance_stats_parallel(input, &config);
    let scale = params.key / stats.log_average();
    let l_white = stats.white();

    let chunk = CHANNELS * local.max(1);
    let mut output = PixelBuffer::new(input.width, input.height);
    output
        .data
        .par_chunks_mut(chunk)
        .zip(input.data.par_chunks(chunk))
        .for_each(|(dst, src)| {
            for (d, s) in dst.chunks_exact_mut(CHANNELS).zip(src.chunks_exact(CHANNELS)) {
                map_pixel(s, scale, l_white, params.sat, d);
            }
        });
    output
}
