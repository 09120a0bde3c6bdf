//! Gradient-domain compression (Fattal et al.).
//!
//! Log luminance is differentiated, large gradients are attenuated by a
//! factor built from a gradient pyramid, and the attenuated field is
//! integrated back with a Jacobi Poisson solve. The solution's mean is
//! shifted to the input's mean log luminance before colour is restored.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::color::{LUM_EPSILON, luminance};
use crate::error::FilterError;
use crate::filters::reinhard_global::recolor;
use crate::pixel_buf::{CHANNELS, PixelBuffer};
use crate::pyramid::{MipLevel, PackedPyramid, level_count_min_size};
use crate::reduce::{self, LaunchConfig};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradDomParams {
    /// Attenuation exponent; below 1 compresses large gradients.
    pub beta: f32,
    /// Fraction of a level's average gradient used as alpha on all but the
    /// coarsest level.
    pub alpha_scale: f32,
    pub sat: f32,
    /// Per-pixel change below which a Jacobi update counts as converged.
    pub termination: f32,
    /// Share of converged pixels that ends the solve.
    pub converged_fraction: f32,
    pub max_iterations: u32,
    /// Pyramid levels are added while both dimensions stay at or above this.
    pub min_level_size: u32,
}

impl Default for GradDomParams {
    fn default() -> Self {
        Self {
            beta: 0.85,
            alpha_scale: 0.1,
            sat: 1.0,
            termination: 0.001,
            converged_fraction: 0.5,
            max_iterations: 5000,
            min_level_size: 32,
        }
    }
}

impl GradDomParams {
    pub fn validate(&self) -> Result<(), FilterError> {
        let positive = |name: &str, v: f32| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(FilterError::InvalidParams(format!("{name} must be positive, got {v}")))
            }
        };
        positive("beta", self.beta)?;
        positive("alpha_scale", self.alpha_scale)?;
        positive("sat", self.sat)?;
        if !(self.termination.is_finite() && self.termination >= 0.0) {
            return Err(FilterError::InvalidParams(format!(
                "termination must be non-negative, got {}",
                self.termination
            )));
        }
        if !(0.0..=1.0).contains(&self.converged_fraction) {
            return Err(FilterError::InvalidParams(format!(
                "converged_fraction must be in [0,1], got {}",
                self.converged_fraction
            )));
        }
        if self.max_iterations == 0 || self.min_level_size == 0 {
            return Err(FilterError::InvalidParams(
                "max_iterations and min_level_size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Converged pixels needed to stop, out of `pixels`.
    pub fn required_converged(&self, pixels: usize) -> usize {
        (f64::from(self.converged_fraction) * pixels as f64).ceil() as usize
    }
}

/// Result of the Poisson solve.
#[derive(Clone, Debug, PartialEq)]
pub struct PoissonSolution {
    pub field: Vec<f32>,
    pub iterations: u32,
    pub converged: bool,
}

pub fn log_luminance(input: &PixelBuffer) -> Vec<f32> {
    (0..input.pixel_count())
        .map(|i| (luminance(input.rgb(i)) + LUM_EPSILON).ln())
        .collect()
}

fn clamped(width: usize, height: usize, x: i64, y: i64) -> usize {
    let x = x.clamp(0, width as i64 - 1) as usize;
    let y = y.clamp(0, height as i64 - 1) as usize;
    x + y * width
}

/// Central-difference gradient magnitude at level `k`, divided by
/// 2^(k+1) so that levels are comparable.
pub fn gradient_cell(level: &[f32], geom: &MipLevel, k: usize, x: usize, y: usize) -> f32 {
    let (w, h) = (geom.width as usize, geom.height as usize);
    let (xi, yi) = (x as i64, y as i64);
    let norm = (1u32 << (k + 1)) as f32;
    let gx = (level[clamped(w, h, xi + 1, yi)] - level[clamped(w, h, xi - 1, yi)]) / norm;
    let gy = (level[clamped(w, h, xi, yi + 1)] - level[clamped(w, h, xi, yi - 1)]) / norm;
    (gx * gx + gy * gy).sqrt()
}

/// (alpha / |g|) * (|g| / alpha)^beta; zero where there is no gradient.
pub fn attenuation_factor(grad: f32, alpha: f32, beta: f32) -> f32 {
    if grad <= 0.0 || alpha <= 0.0 {
        return 0.0;
    }
    (alpha / grad) * (grad / alpha).powf(beta)
}

/// Alpha for level `k` of `count`: the coarsest level uses its average
/// gradient, finer levels a fraction of theirs.
pub fn level_alpha(k: usize, count: usize, average: f32, params: &GradDomParams) -> f32 {
    if k + 1 == count {
        average
    } else {
        params.alpha_scale * average
    }
}

/// Bilinear 2x upsample of the coarse level at fine pixel (x, y), weights
/// 9/3/3/1 toward the nearest coarse neighbours.
pub fn upsample_cell(coarse: &[f32], geom: &MipLevel, x: usize, y: usize) -> f32 {
    let (w, h) = (geom.width as usize, geom.height as usize);
    let (cx, cy) = ((x / 2) as i64, (y / 2) as i64);
    let dx = if x & 1 == 1 { 1 } else { -1 };
    let dy = if y & 1 == 1 { 1 } else { -1 };
    let c = coarse[clamped(w, h, cx, cy)];
    let nx = coarse[clamped(w, h, cx + dx, cy)];
    let ny = coarse[clamped(w, h, cx, cy + dy)];
    let nxy = coarse[clamped(w, h, cx + dx, cy + dy)];
    (9.0 * c + 3.0 * nx + 3.0 * ny + nxy) / 16.0
}

/// Divergence of the attenuated forward-difference gradient field.
/// Gradients past the last row/column are zero.
pub fn divergence_cell(lum: &[f32], atten: &[f32], w: usize, h: usize, x: usize, y: usize) -> f32 {
    let gx = |x: usize, y: usize| {
        let i = x + y * w;
        if x + 1 < w { (lum[i + 1] - lum[i]) * atten[i] } else { 0.0 }
    };
    let gy = |x: usize, y: usize| {
        let i = x + y * w;
        if y + 1 < h { (lum[i + w] - lum[i]) * atten[i] } else { 0.0 }
    };
    let mut div = gx(x, y) + gy(x, y);
    if x > 0 {
        div -= gx(x - 1, y);
    }
    if y > 0 {
        div -= gy(x, y - 1);
    }
    div
}

/// One Jacobi update with clamped neighbours.
pub fn jacobi_cell(prev: &[f32], div: &[f32], w: usize, h: usize, x: usize, y: usize) -> f32 {
    let (xi, yi) = (x as i64, y as i64);
    let left = prev[clamped(w, h, xi - 1, yi)];
    let right = prev[clamped(w, h, xi + 1, yi)];
    let up = prev[clamped(w, h, xi, yi - 1)];
    let down = prev[clamped(w, h, xi, yi + 1)];
    0.25 * (left + right + up + down - div[x + y * w])
}

fn fill(out: &mut [f32], width: usize, f: impl Fn(usize, usize) -> f32) {
    for (y, row) in out.chunks_mut(width).enumerate() {
        for (x, v) in row.iter_mut().enumerate() {
            *v = f(x, y);
        }
    }
}

fn fill_parallel(out: &mut [f32], width: usize, f: impl Fn(usize, usize) -> f32 + Sync) {
    out.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        for (x, v) in row.iter_mut().enumerate() {
            *v = f(x, y);
        }
    });
}

fn solve_with(
    initial: &[f32],
    params: &GradDomParams,
    mut step: impl FnMut(&[f32], &mut [f32]) -> usize,
) -> PoissonSolution {
    let required = params.required_converged(initial.len());
    let mut prev = initial.to_vec();
    let mut next = vec![0.0; initial.len()];
    let mut iterations = 0;
    let mut converged = false;
    while iterations < params.max_iterations {
        let count = step(&prev, &mut next);
        std::mem::swap(&mut prev, &mut next);
        iterations += 1;
        if count >= required {
            converged = true;
            break;
        }
    }
    if !converged {
        warn!(iterations, "Poisson solve stopped at the iteration cap");
    }
    debug!(iterations, converged, "Poisson solve finished");
    PoissonSolution {
        field: prev,
        iterations,
        converged,
    }
}

/// Jacobi iteration from `initial` until `converged_fraction` of the pixels
/// change by less than `termination` in one sweep.
pub fn solve_poisson(
    initial: &[f32],
    div: &[f32],
    w: usize,
    h: usize,
    params: &GradDomParams,
) -> PoissonSolution {
    let termination = params.termination;
    solve_with(initial, params, |prev, next| {
        let mut count = 0usize;
        for y in 0..h {
            for x in 0..w {
                let i = x + y * w;
                let v = jacobi_cell(prev, div, w, h, x, y);
                if (v - prev[i]).abs() < termination {
                    count += 1;
                }
                next[i] = v;
            }
        }
        count
    })
}

pub fn solve_poisson_parallel(
    initial: &[f32],
    div: &[f32],
    w: usize,
    h: usize,
    params: &GradDomParams,
) -> PoissonSolution {
    let termination = params.termination;
    solve_with(initial, params, |prev, next| {
        next.par_chunks_mut(w)
            .enumerate()
            .map(|(y, row)| {
                let mut count = 0usize;
                for (x, out) in row.iter_mut().enumerate() {
                    let v = jacobi_cell(prev, div, w, h, x, y);
                    if (v - prev[x + y * w]).abs() < termination {
                        count += 1;
                    }
                    *out = v;
                }
                count
            })
            .sum()
    })
}

fn reconstruct_pixel(px: &[f32], solved: f32, shift: f32, sat: f32, out: &mut [f32]) {
    let y = luminance([px[0], px[1], px[2]]);
    recolor(px, y, (solved + shift).exp(), sat, out);
}

pub fn reference(input: &PixelBuffer, params: &GradDomParams) -> PixelBuffer {
    if input.pixel_count() == 0 {
        return input.clone();
    }
    let (w, h) = (input.width as usize, input.height as usize);
    let lum = log_luminance(input);
    let count = level_count_min_size(input.width, input.height, params.min_level_size);
    let pyramid = PackedPyramid::build(&lum, input.width, input.height, count);

    let mut grads = vec![0.0; pyramid.data.len()];
    for (k, geom) in pyramid.levels.iter().enumerate() {
        let level = pyramid.level(k);
        let out = &mut grads[geom.offset..geom.offset + geom.len()];
        fill(out, geom.width as usize, |x, y| gradient_cell(level, geom, k, x, y));
    }
    let averages: Vec<f32> = pyramid
        .levels
        .iter()
        .map(|g| reduce::mean(&grads[g.offset..g.offset + g.len()]))
        .collect();

    let mut atten = vec![0.0; pyramid.data.len()];
    for k in (0..count).rev() {
        let geom = pyramid.levels[k];
        let alpha = level_alpha(k, count, averages[k], params);
        let g = &grads[geom.offset..geom.offset + geom.len()];
        let beta = params.beta;
        let gw = geom.width as usize;
        if k + 1 == count {
            let out = &mut atten[geom.offset..geom.offset + geom.len()];
            fill(out, gw, |x, y| attenuation_factor(g[x + y * gw], alpha, beta));
        } else {
            let coarse_geom = pyramid.levels[k + 1];
            let (fine, coarse) = atten.split_at_mut(coarse_geom.offset);
            let coarse = &coarse[..coarse_geom.len()];
            fill(&mut fine[geom.offset..], gw, |x, y| {
                upsample_cell(coarse, &coarse_geom, x, y)
                    * attenuation_factor(g[x + y * gw], alpha, beta)
            });
        }
    }

    let base_atten = &atten[..w * h];
    let mut div = vec![0.0; w * h];
    fill(&mut div, w, |x, y| divergence_cell(&lum, base_atten, w, h, x, y));

    let solution = solve_poisson(&lum, &div, w, h, params);
    let shift = reduce::mean(&lum) - reduce::mean(&solution.field);

    let mut output = PixelBuffer::new(input.width, input.height);
    for ((src, dst), &u) in input
        .data
        .chunks_exact(CHANNELS)
        .zip(output.data.chunks_exact_mut(CHANNELS))
        .zip(&solution.field)
    {
        reconstruct_pixel(src, u, shift, params.sat, dst);
    }
    output
}

/// Same phases as [`reference`], each one data-parallel, with group-wise
/// reductions for the per-level averages and the means.
pub fn parallel(input: &PixelBuffer, params: &GradDomParams, local: usize) -> PixelBuffer {
    if input.pixel_count() == 0 {
        return input.clone();
    }
    let (w, h) = (input.width as usize, input.height as usize);
    let lum: Vec<f32> = (0..w * h)
        .into_par_iter()
        .with_min_len(local.max(1))
        .map(|i| (luminance(input.rgb(i)) + LUM_EPSILON).ln())
        .collect();
    let count = level_count_min_size(input.width, input.height, params.min_level_size);
    let pyramid = PackedPyramid::build_parallel(&lum, input.width, input.height, count);

    let mut grads = vec![0.0; pyramid.data.len()];
    for (k, geom) in pyramid.levels.iter().enumerate() {
        let level = pyramid.level(k);
        let out = &mut grads[geom.offset..geom.offset + geom.len()];
        fill_parallel(out, geom.width as usize, |x, y| gradient_cell(level, geom, k, x, y));
    }
    let averages: Vec<f32> = pyramid
        .levels
        .iter()
        .map(|g| {
            let config = LaunchConfig::reduction(g.len(), local);
            reduce::mean_parallel(&grads[g.offset..g.offset + g.len()], &config)
        })
        .collect();

    let mut atten = vec![0.0; pyramid.data.len()];
    for k in (0..count).rev() {
        let geom = pyramid.levels[k];
        let alpha = level_alpha(k, count, averages[k], params);
        let g = &grads[geom.offset..geom.offset + geom.len()];
        let beta = params.beta;
        let gw = geom.width as usize;
        if k + 1 == count {
            let out = &mut atten[geom.offset..geom.offset + geom.len()];
            fill_parallel(out, gw, |x, y| attenuation_factor(g[x + y * gw], alpha, beta));
        } else {
            let coarse_geom = pyramid.levels[k + 1];
            let (fine, coarse) = atten.split_at_mut(coarse_geom.offset);
            let coarse = &coarse[..coarse_geom.len()];
            fill_parallel(&mut fine[geom.offset..], gw, |x, y| {
                upsample_cell(coarse, &coarse_geom, x, y)
                    * attenuation_factor(g[x + y * gw], alpha, beta)
            });
        }
    }

    let base_atten = &atten[..w * h];
    let mut div = vec![0.0; w * h];
    fill_parallel(&mut div, w, |x, y| divergence_cell(&lum, base_atten, w, h, x, y));

    let solution = solve_poisson_parallel(&lum, &div, w, h, params);
    let config = LaunchConfig::reduction(w * h, local);
    let shift =
        reduce::mean_parallel(&lum, &config) - reduce::mean_parallel(&solution.field, &config);

    let mut output = PixelBuffer::new(input.width, input.height);
    output
        .data
        .par_chunks_mut(CHANNELS)
        .zip(input.data.par_chunks(CHANNELS))
        .zip(solution.field.par_iter())
        .with_min_len(local.max(1))
        .for_each(|((dst, src), &u)| reconstruct_pixel(src, u, shift, params.sat, dst));
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene(width: u32, height: u32) -> PixelBuffer {
        let mut buf = PixelBuffer::new(width, height);
        let w = width as usize;
        for (i, px) in buf.data.chunks_exact_mut(4).enumerate() {
            let (x, y) = ((i % w) as f32, (i / w) as f32);
            let sky = if y < height as f32 / 3.0 { 0.9 } else { 0.0 };
            let v = (0.05 + 0.4 * (x * 0.3).sin().abs() * (y * 0.2).cos().abs() + sky).min(1.0);
            px.copy_from_slice(&[v, v * 0.8, v * 0.6, 0.75]);
        }
        buf
    }

    #[test]
    fn attenuation_factor_shape() {
        assert_eq!(attenuation_factor(0.0, 0.1, 0.85), 0.0);
        assert!((attenuation_factor(0.1, 0.1, 0.85) - 1.0).abs() < 1e-6);
        assert!(attenuation_factor(1.0, 0.1, 0.85) < 1.0, "large gradients are compressed");
        assert!(attenuation_factor(0.01, 0.1, 0.85) > 1.0, "small gradients are boosted");
    }

    #[test]
    fn upsample_of_constant_is_constant() {
        let geom = MipLevel {
            width: 3,
            height: 2,
            offset: 0,
            scale: 2,
        };
        let coarse = [0.5; 6];
        for y in 0..4 {
            for x in 0..7 {
                assert!((upsample_cell(&coarse, &geom, x, y) - 0.5).abs() < 1e-7);
            }
        }
    }

    #[test]
    fn upsample_weights_nearest_coarse_pixel() {
        let geom = MipLevel {
            width: 2,
            height: 1,
            offset: 0,
            scale: 2,
        };
        let coarse = [0.0, 16.0];
        // x=1 leans right toward coarse pixel 1: (9*0 + 3*16 + 3*0 + 16) / 16
        assert_eq!(upsample_cell(&coarse, &geom, 1, 0), 4.0);
        // x=0 leans left, clamped back onto coarse pixel 0
        assert_eq!(upsample_cell(&coarse, &geom, 0, 0), 0.0);
    }

    #[test]
    fn unattenuated_divergence_has_lum_as_fixed_point() {
        let (w, h) = (9, 7);
        let lum: Vec<f32> = (0..w * h).map(|i| ((i * 13) % 17) as f32 * 0.1).collect();
        let ones = vec![1.0; w * h];
        let mut div = vec![0.0; w * h];
        fill(&mut div, w, |x, y| divergence_cell(&lum, &ones, w, h, x, y));
        let params = GradDomParams::default();
        let solution = solve_poisson(&lum, &div, w, h, &params);
        assert!(solution.converged);
        assert_eq!(solution.iterations, 1);
        for (a, b) in solution.field.iter().zip(&lum) {
            assert!((a - b).abs() < 1e-4, "{a} vs {b}");
        }
    }

    #[test]
    fn constant_field_with_zero_divergence_is_unchanged() {
        let field = vec![0.5; 20];
        let div = vec![0.0; 20];
        let solution = solve_poisson(&field, &div, 5, 4, &GradDomParams::default());
        assert_eq!(solution.field, field);
    }

    #[test]
    fn solver_respects_iteration_cap() {
        let (w, h) = (16, 16);
        let initial = vec![0.0; w * h];
        let div = vec![1.0; w * h];
        let params = GradDomParams {
            termination: 0.0,
            max_iterations: 7,
            ..Default::default()
        };
        let solution = solve_poisson(&initial, &div, w, h, &params);
        assert_eq!(solution.iterations, 7);
        assert!(!solution.converged);
    }

    #[test]
    fn uniform_image_round_trips() {
        let input = PixelBuffer::filled(40, 40, [0.4, 0.4, 0.4, 1.0]);
        let output = reference(&input, &GradDomParams::default());
        let diff = input.max_abs_diff(&output).unwrap();
        assert!(diff < 1e-3, "diff {diff}");
    }

    #[test]
    fn output_in_unit_range() {
        let output = reference(&scene(70, 50), &GradDomParams::default());
        for px in output.data.chunks_exact(4) {
            assert!(px[..3].iter().all(|v| (0.0..=1.0).contains(v)));
            assert_eq!(px[3], 0.75);
        }
    }

    #[test]
    fn image_below_min_level_size_uses_single_level() {
        let output = reference(&scene(12, 9), &GradDomParams::default());
        assert_eq!(output.pixel_count(), 108);
        assert!(output.data.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn parallel_matches_reference() {
        let input = scene(70, 50);
        let params = GradDomParams::default();
        let seq = reference(&input, &params);
        for local in [1, 64] {
            let par = parallel(&input, &params, local);
            let diff = seq.max_abs_diff(&par).unwrap();
            assert!(diff <= 1.0 / 255.0, "local={local}: diff {diff}");
        }
    }

    #[test]
    fn invalid_fraction_rejected() {
        let params = GradDomParams {
            converged_fraction: 1.5,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }
}
