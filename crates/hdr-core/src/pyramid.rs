use rayon::prelude::*;

/// Geometry of one level inside a packed pyramid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MipLevel {
    pub width: u32,
    pub height: u32,
    /// First element of this level in the packed buffer.
    pub offset: usize,
    /// Base pixels per level pixel along one axis (2^level).
    pub scale: u32,
}

impl MipLevel {
    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index into the packed buffer for clamped coordinates.
    fn index(&self, x: i64, y: i64) -> usize {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        self.offset + x + y * self.width as usize
    }
}

/// Number of levels (at most `requested`) a `width` x `height` base can be
/// halved into while every level keeps at least one pixel.
pub fn level_count(width: u32, height: u32, requested: usize) -> usize {
    let mut count = 0;
    let (mut w, mut h) = (width, height);
    while count < requested && w >= 1 && h >= 1 {
        count += 1;
        w /= 2;
        h /= 2;
    }
    count
}

/// Number of levels whose dimensions both stay at or above `min_size`.
/// The base level always counts, however small.
pub fn level_count_min_size(width: u32, height: u32, min_size: u32) -> usize {
    let mut count = 1;
    let (mut w, mut h) = (width / 2, height / 2);
    while w >= min_size && h >= min_size {
        count += 1;
        w /= 2;
        h /= 2;
    }
    count
}

/// Level geometry for a packed pyramid. Each level halves the previous one
/// (rounding down) and is stored directly after it.
pub fn layout(width: u32, height: u32, count: usize) -> Vec<MipLevel> {
    let mut levels = Vec::with_capacity(count);
    let (mut w, mut h, mut offset) = (width, height, 0usize);
    for k in 0..count {
        levels.push(MipLevel {
            width: w,
            height: h,
            offset,
            scale: 1 << k,
        });
        offset += w as usize * h as usize;
        w /= 2;
        h /= 2;
    }
    levels
}

/// 2x2 box filter of a `width` x `height` plane into `dst`, which must
/// hold `(width / 2) * (height / 2)` values.
pub fn downsample_into(src: &[f32], width: u32, dst: &mut [f32], dst_width: u32) {
    let (sw, dw) = (width as usize, dst_width as usize);
    for (y, row) in dst.chunks_mut(dw).enumerate() {
        for (x, out) in row.iter_mut().enumerate() {
            *out = box_sample(src, sw, x, y);
        }
    }
}

fn box_sample(src: &[f32], src_width: usize, x: usize, y: usize) -> f32 {
    let top = 2 * y * src_width + 2 * x;
    let bottom = top + src_width;
    (src[top] + src[top + 1] + src[bottom] + src[bottom + 1]) * 0.25
}

/// A single-channel pyramid stored as one contiguous buffer with a level
/// table. Built level by level, each level reads the one before it.
#[derive(Clone, Debug, PartialEq)]
pub struct PackedPyramid {
    pub data: Vec<f32>,
    pub levels: Vec<MipLevel>,
}

impl PackedPyramid {
    /// Sequential construction from a base plane.
    pub fn build(base: &[f32], width: u32, height: u32, count: usize) -> Self {
        let levels = layout(width, height, count);
        let mut data = vec![0.0; total_len(&levels)];
        data[..base.len()].copy_from_slice(base);
        for k in 1..levels.len() {
            let (prev, next) = (levels[k - 1], levels[k]);
            if next.is_empty() {
                continue;
            }
            let (head, tail) = data.split_at_mut(next.offset);
            downsample_into(
                &head[prev.offset..prev.offset + prev.len()],
                prev.width,
                &mut tail[..next.len()],
                next.width,
            );
        }
        Self { data, levels }
    }

    /// Same result as [`PackedPyramid::build`], rows of each level computed
    /// in parallel.
    pub fn build_parallel(base: &[f32], width: u32, height: u32, count: usize) -> Self {
        let levels = layout(width, height, count);
        let mut data = vec![0.0; total_len(&levels)];
        data[..base.len()].copy_from_slice(base);
        for k in 1..levels.len() {
            let (prev, next) = (levels[k - 1], levels[k]);
            if next.is_empty() {
                continue;
            }
            let (head, tail) = data.split_at_mut(next.offset);
            let src = &head[prev.offset..prev.offset + prev.len()];
            let sw = prev.width as usize;
            tail[..next.len()]
                .par_chunks_mut(next.width as usize)
                .enumerate()
                .for_each(|(y, row)| {
                    for (x, out) in row.iter_mut().enumerate() {
                        *out = box_sample(src, sw, x, y);
                    }
                });
        }
        Self { data, levels }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn level(&self, k: usize) -> &[f32] {
        let l = self.levels[k];
        &self.data[l.offset..l.offset + l.len()]
    }

    /// Sample level `k` with clamped coordinates.
    pub fn sample(&self, k: usize, x: i64, y: i64) -> f32 {
        self.data[self.levels[k].index(x, y)]
    }
}

pub fn total_len(levels: &[MipLevel]) -> usize {
    levels.last().map_or(0, |l| l.offset + l.len())
}
