use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::color::{hsv_to_rgb, rgb_to_hsv};
use crate::error::FilterError;
use crate::pixel_buf::{CHANNELS, PixelBuffer, clamp_unit};
use crate::reduce::{LaunchConfig, final_merge, partial_reduce};

pub const MAX_BINS: u32 = 256;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistEqParams {
    /// Brightness quantization levels, 2..=256.
    pub bins: u32,
}

impl Default for HistEqParams {
    fn default() -> Self {
        Self { bins: MAX_BINS }
    }
}

impl HistEqParams {
    pub fn validate(&self) -> Result<(), FilterError> {
        if !(2..=MAX_BINS).contains(&self.bins) {
            return Err(FilterError::InvalidParams(format!(
                "histogram bins must be in 2..={MAX_BINS}, got {}",
                self.bins
            )));
        }
        Ok(())
    }
}

/// Brightness bin of a value in [0,1]; round half up.
pub fn quantize(v: f32, bins: u32) -> usize {
    let top = (bins - 1) as f32;
    ((clamp_unit(v) * top + 0.5).floor() as usize).min(bins as usize - 1)
}

fn brightness(px: &[f32]) -> f32 {
    px[0].max(px[1]).max(px[2])
}

/// Running sum of a histogram.
pub fn cumulative(hist: &[u32]) -> Vec<u32> {
    let mut total = 0u32;
    hist.iter()
        .map(|&count| {
            total += count;
            total
        })
        .collect()
}

/// True when at most one bin is occupied; equalization is then undefined
/// and the image passes through unchanged.
fn is_degenerate(hist: &[u32]) -> bool {
    hist.iter().filter(|&&count| count > 0).count() <= 1
}

/// Equalized brightness level for `bin`, as an integer in 0..bins.
pub fn equalized_level(cdf: &[u32], bin: usize, total: u32) -> u32 {
    let top = (cdf.len() - 1) as u64;
    let first = u64::from(cdf[0]);
    let denom = u64::from(total) - first;
    (top * (u64::from(cdf[bin]) - first) / denom) as u32
}

fn equalize_pixel(px: &[f32], cdf: &[u32], total: u32, out: &mut [f32]) {
    let [h, s, v] = rgb_to_hsv([px[0], px[1], px[2]]);
    let bins = cdf.len() as u32;
    let level = equalized_level(cdf, quantize(v, bins), total) as f32 / (bins - 1) as f32;
    let rgb = hsv_to_rgb([h, s, level]);
    out[0] = clamp_unit(rgb[0]);
    out[1] = clamp_unit(rgb[1]);
    out[2] = clamp_unit(rgb[2]);
    out[3] = clamp_unit(px[3]);
}

pub fn histogram(input: &PixelBuffer, bins: u32) -> Vec<u32> {
    let mut hist = vec![0u32; bins as usize];
    for px in input.data.chunks_exact(CHANNELS) {
        hist[quantize(brightness(px), bins)] += 1;
    }
    hist
}

pub fn reference(input: &PixelBuffer, params: &HistEqParams) -> PixelBuffer {
    let hist = histogram(input, params.bins);
    if is_degenerate(&hist) {
        return input.clone();
    }
    let cdf = cumulative(&hist);
    let total = input.pixel_count() as u32;

    let mut output = PixelBuffer::new(input.width, input.height);
    for (src, dst) in input
        .data
        .chunks_exact(CHANNELS)
        .zip(output.data.chunks_exact_mut(CHANNELS))
    {
        equalize_pixel(src, &cdf, total, dst);
    }
    output
}

/// Per-group partial histograms, merged on one lane, then a parallel remap.
pub fn parallel(input: &PixelBuffer, params: &HistEqParams, local: usize) -> PixelBuffer {
    let bins = params.bins;
    let n = input.pixel_count();
    let config = LaunchConfig::reduction(n, local);
    let partials = partial_reduce(&config, n, vec![0u32; bins as usize], |mut acc, i| {
        let px = &input.data[i * CHANNELS..(i + 1) * CHANNELS];
        acc[quantize(brightness(px), bins)] += 1;
        acc
    });
    let hist = final_merge(partials, vec![0u32; bins as usize], |mut acc, part| {
        for (a, p) in acc.iter_mut().zip(part) {
            *a += p;
        }
        acc
    });
    if is_degenerate(&hist) {
        return input.clone();
    }
    let cdf = cumulative(&hist);
    let total = n as u32;

    let mut output = PixelBuffer::new(input.width, input.height);
    output
        .data
        .par_chunks_mut(CHANNELS * local.max(1))
        .zip(input.data.par_chunks(CHANNELS * local.max(1)))
        .for_each(|(dst, src)| {
            for (d, s) in dst.chunks_exact_mut(CHANNELS).zip(src.chunks_exact(CHANNELS)) {
                equalize_pixel(s, &cdf, total, d);
            }
        });
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: u32, height: u32) -> PixelBuffer {
        let mut buf = PixelBuffer::new(width, height);
        let n = buf.pixel_count();
        for (i, px) in buf.data.chunks_exact_mut(4).enumerate() {
            // compressed into the lower half of the range
            let v = 0.5 * i as f32 / (n - 1) as f32;
            px.copy_from_slice(&[v, v * 0.8, v * 0.6, 0.25]);
        }
        buf
    }

    #[test]
    fn quantize_rounds_half_up() {
        assert_eq!(quantize(0.0, 256), 0);
        assert_eq!(quantize(1.0, 256), 255);
        assert_eq!(quantize(0.5, 256), 128);
        assert_eq!(quantize(1.5, 256), 255);
        assert_eq!(quantize(-1.0, 256), 0);
    }

    #[test]
    fn cumulative_is_running_sum() {
        assert_eq!(cumulative(&[1, 0, 2, 3]), vec![1, 1, 3, 6]);
    }

    #[test]
    fn equalization_stretches_to_full_range() {
        let input = ramp(64, 4);
        let output = reference(&input, &HistEqParams::default());
        let max_v = output
            .data
            .chunks_exact(4)
            .map(brightness)
            .fold(0.0_f32, f32::max);
        assert!((max_v - 1.0).abs() < 1e-5, "brightest pixel should reach 1, got {max_v}");
        let first = output.pixel(0);
        assert!(brightness(&first) < 1e-6, "darkest pixel should map to 0");
    }

    #[test]
    fn output_stays_in_unit_range_and_keeps_fourth_channel() {
        let output = reference(&ramp(32, 8), &HistEqParams::default());
        for px in output.data.chunks_exact(4) {
            for &c in &px[..3] {
                assert!((0.0..=1.0).contains(&c), "channel out of range: {c}");
            }
            assert_eq!(px[3], 0.25);
        }
    }

    #[test]
    fn equalization_preserves_order() {
        let input = ramp(64, 4);
        let output = reference(&input, &HistEqParams::default());
        let mut prev = -1.0;
        for px in output.data.chunks_exact(4) {
            let v = brightness(px);
            assert!(v >= prev, "brightness must not decrease: {v} < {prev}");
            prev = v;
        }
    }

    #[test]
    fn uniform_image_passes_through() {
        for value in [0.0, 0.4] {
            let input = PixelBuffer::filled(8, 8, [value, value, value, 1.0]);
            let output = reference(&input, &HistEqParams::default());
            assert_eq!(output, input);
        }
    }

    #[test]
    fn flat_histogram_is_already_equalized() {
        // every level k/255 appears four times
        let mut input = PixelBuffer::new(32, 32);
        for (i, px) in input.data.chunks_exact_mut(4).enumerate() {
            let v = (i % 256) as f32 / 255.0;
            px.copy_from_slice(&[v, v, v, 1.0]);
        }
        let output = reference(&input, &HistEqParams::default());
        let diff = input.max_abs_diff(&output).unwrap();
        assert!(diff < 1e-6, "diff {diff}");
    }

    #[test]
    fn parallel_matches_reference() {
        let mut input = ramp(57, 13);
        // scramble so that groups see different parts of the histogram
        for (i, px) in input.data.chunks_exact_mut(4).enumerate() {
            px[1] = ((i * 31) % 97) as f32 / 97.0;
        }
        let params = HistEqParams::default();
        let seq = reference(&input, &params);
        for local in [1, 7, 64, 256] {
            let par = parallel(&input, &params, local);
            let diff = seq.max_abs_diff(&par).unwrap();
            assert!(diff < 1e-6, "local={local}: diff {diff}");
        }
    }

    #[test]
    fn fewer_bins_validates() {
        assert!(HistEqParams { bins: 16 }.validate().is_ok());
        assert!(HistEqParams { bins: 1 }.validate().is_err());
        assert!(HistEqParams { bins: 512 }.validate().is_err());
    }
}
