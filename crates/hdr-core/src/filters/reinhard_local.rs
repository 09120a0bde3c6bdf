use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::color::luminance;
use crate::error::FilterError;
use crate::filters::reinhard_global::recolor;
use crate::pixel_buf::{CHANNELS, PixelBuffer};
use crate::pyramid::{PackedPyramid, level_count};
use crate::reduce::{LaunchConfig, luminance_stats, luminance_stats_parallel};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReinhardLocalParams {
    pub key: f32,
    pub sat: f32,
    /// Centre/surround contrast threshold that stops the scale search.
    pub epsilon: f32,
    /// Sharpening exponent in the contrast normalization.
    pub phi: f32,
    /// Requested mip levels; fewer are used when the image is small.
    pub levels: usize,
}

impl Default for ReinhardLocalParams {
    fn default() -> Self {
        Self {
            key: 0.18,
            sat: 1.6,
            epsilon: 0.05,
            phi: 8.0,
            levels: 8,
        }
    }
}

impl ReinhardLocalParams {
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
        if !(self.epsilon.is_finite() && self.epsilon >= 0.0) || !self.phi.is_finite() {
            return Err(FilterError::InvalidParams(format!(
                "epsilon must be non-negative and phi finite, got {} and {}",
                self.epsilon, self.phi
            )));
        }
        if self.levels == 0 {
            return Err(FilterError::InvalidParams("levels must be at least 1".into()));
        }
        Ok(())
    }
}

/// Scaled luminance of the surround at the largest scale whose
/// centre/surround contrast stays below `epsilon`.
///
/// `sample(level, x, y)` reads unscaled luminance with clamped coordinates
/// and `scale` is key / log-average. With a single level the pixel's own
/// luminance is used.
pub fn local_adaptation(
    sample: impl Fn(usize, i64, i64) -> f32,
    levels: usize,
    x: i64,
    y: i64,
    scale: f32,
    params: &ReinhardLocalParams,
) -> f32 {
    let sharpness = 2f32.powf(params.phi) * params.key;
    let (mut cx, mut cy) = (x, y);
    let mut local = scale * sample(0, cx, cy);
    for i in 0..levels.saturating_sub(1) {
        let (sx, sy) = (cx / 2, cy / 2);
        let centre = scale * sample(i, cx, cy);
        let surround = scale * sample(i + 1, sx, sy);
        let s = (1u32 << i) as f32;
        let contrast = (centre - surround).abs() / (sharpness / (s * s) + centre);
        if contrast > params.epsilon {
            return centre;
        }
        local = surround;
        cx = sx;
        cy = sy;
    }
    local
}

fn map_pixel(
    pyramid: &PackedPyramid,
    i: usize,
    px: &[f32],
    scale: f32,
    params: &ReinhardLocalParams,
    out: &mut [f32],
) {
    let width = pyramid.levels[0].width as usize;
    let (x, y) = ((i % width) as i64, (i / width) as i64);
    let lum = pyramid.data[i];
    let local = local_adaptation(
        |k, sx, sy| pyramid.sample(k, sx, sy),
        pyramid.len(),
        x,
        y,
        scale,
        params,
    );
    let ld = scale * lum / (1.0 + local);
    recolor(px, lum, ld, params.sat, out);
}

fn luminance_plane(input: &PixelBuffer) -> Vec<f32> {
    (0..input.pixel_count()).map(|i| luminance(input.rgb(i))).collect()
}

pub fn reference(input: &PixelBuffer, params: &ReinhardLocalParams) -> PixelBuffer {
    let stats = luminance_stats(input);
    let scale = params.key / stats.log_average();
    let count = level_count(input.width, input.height, params.levels);
    let pyramid = PackedPyramid::build(&luminance_plane(input), input.width, input.height, count);

    let mut output = PixelBuffer::new(input.width, input.height);
    for (i, (src, dst)) in input
        .data
        .chunks_exact(CHANNELS)
        .zip(output.data.chunks_exact_mut(CHANNELS))
        .enumerate()
    {
        map_pixel(&pyramid, i, src, scale, params, dst);
    }
    output
}

/// Log-average reduction, per-level parallel mipmapping, then a parallel
/// tone map reading the packed pyramid.
pub fn parallel(input: &PixelBuffer, params: &ReinhardLocalParams, local: usize) -> PixelBuffer {
    let n = input.pixel_count();
    let config = LaunchConfig::reduction(n, local);
    let stats = luminance_stats_parallel(input, &config);
    let scale = params.key / stats.log_average();

    let base: Vec<f32> = (0..n)
        .into_par_iter()
        .with_min_len(local.max(1))
        .map(|i| luminance(input.rgb(i)))
        .collect();
    let count = level_count(input.width, input.height, params.levels);
    let pyramid = PackedPyramid::build_parallel(&base, input.width, input.height, count);

    let mut output = PixelBuffer::new(input.width, input.height);
    output
        .data
        .par_chunks_mut(CHANNELS)
        .zip(input.data.par_chunks(CHANNELS))
        .enumerate()
        .with_min_len(local.max(1))
        .for_each(|(i, (dst, src))| map_pixel(&pyramid, i, src, scale, params, dst));
    output
}
