//! Work-group style reductions for the host-parallel backend.
//!
//! Each phase splits the pixel range over a fixed number of groups, every
//! group folds its slice into a partial result, and one lane merges the
//! partials in group order. Sums accumulate in f64 so that the result does
//! not depend on how the range was split.

use std::ops::Range;

use rayon::prelude::*;

use crate::color::{LUM_EPSILON, luminance};
use crate::pixel_buf::PixelBuffer;

pub const DEFAULT_LOCAL_SIZE: usize = 256;
pub const MAX_GROUPS: usize = 64;

/// Local and global sizes of one parallel phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaunchConfig {
    pub local: usize,
    pub groups: usize,
}

impl LaunchConfig {
    /// One lane per item, rounded up to whole groups.
    pub fn for_items(items: usize, local: usize) -> Self {
        let local = local.max(1);
        Self {
            local,
            groups: items.div_ceil(local).max(1),
        }
    }

    /// A bounded number of groups for a reduction over `items`.
    pub fn reduction(items: usize, local: usize) -> Self {
        let mut config = Self::for_items(items, local);
        config.groups = config.groups.min(MAX_GROUPS);
        config
    }

    pub fn global(&self) -> usize {
        self.local * self.groups
    }

    /// Contiguous slice of `0..items` owned by `group`.
    pub fn group_range(&self, group: usize, items: usize) -> Range<usize> {
        let per_group = items.div_ceil(self.groups);
        let start = (group * per_group).min(items);
        let end = (start + per_group).min(items);
        start..end
    }
}

/// Fold each group's slice of `0..items` into a partial result.
pub fn partial_reduce<A, F>(config: &LaunchConfig, items: usize, identity: A, fold: F) -> Vec<A>
where
    A: Clone + Send + Sync,
    F: Fn(A, usize) -> A + Sync,
{
    (0..config.groups)
        .into_par_iter()
        .map(|group| {
            config
                .group_range(group, items)
                .fold(identity.clone(), |acc, i| fold(acc, i))
        })
        .collect()
}

/// Merge partials sequentially, in group order.
pub fn final_merge<A, C>(partials: Vec<A>, identity: A, combine: C) -> A
where
    C: Fn(A, A) -> A,
{
    partials.into_iter().fold(identity, combine)
}

/// Log-average inputs and the white point of an image's luminance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LumStats {
    /// Sum of ln(Y + LUM_EPSILON).
    pub log_sum: f64,
    pub max: f32,
    pub count: usize,
}

impl LumStats {
    pub const EMPTY: LumStats = LumStats {
        log_sum: 0.0,
        max: 0.0,
        count: 0,
    };

    fn add(mut self, y: f32) -> Self {
        self.log_sum += f64::from((y + LUM_EPSILON).ln());
        self.max = self.max.max(y);
        self.count += 1;
        self
    }

    fn merge(self, other: LumStats) -> Self {
        LumStats {
            log_sum: self.log_sum + other.log_sum,
            max: self.max.max(other.max),
            count: self.count + other.count,
        }
    }

    /// exp(mean(ln(Y + eps))); 1.0 for an empty image.
    pub fn log_average(&self) -> f32 {
        if self.count == 0 {
            return 1.0;
        }
        (self.log_sum / self.count as f64).exp() as f32
    }

    /// Maximum luminance, floored so it can be used as a divisor.
    pub fn white(&self) -> f32 {
        self.max.max(LUM_EPSILON)
    }
}

pub fn luminance_stats(input: &PixelBuffer) -> LumStats {
    (0..input.pixel_count()).fold(LumStats::EMPTY, |acc, i| acc.add(luminance(input.rgb(i))))
}

pub fn luminance_stats_parallel(input: &PixelBuffer, config: &LaunchConfig) -> LumStats {
    let n = input.pixel_count();
    let partials = partial_reduce(config, n, LumStats::EMPTY, |acc, i| {
        acc.add(luminance(input.rgb(i)))
    });
    final_merge(partials, LumStats::EMPTY, LumStats::merge)
}

/// Sum of a plane, f64 accumulation.
pub fn sum(values: &[f32]) -> f64 {
    values.iter().map(|&v| f64::from(v)).sum()
}

pub fn sum_parallel(values: &[f32], config: &LaunchConfig) -> f64 {
    let partials = partial_reduce(config, values.len(), 0.0_f64, |acc, i| {
        acc + f64::from(values[i])
    });
    final_merge(partials, 0.0, |a, b| a + b)
}

/// Arithmetic mean of a plane; 0 when empty.
pub fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    (sum(values) / values.len() as f64) as f32
}

pub fn mean_parallel(values: &[f32], config: &LaunchConfig) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    (sum_parallel(values, config) / values.len() as f64) as f32
}
