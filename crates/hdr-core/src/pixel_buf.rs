use crate::error::FilterError;

/// Samples per pixel. The 4th channel carries alpha for decoded images and
/// HDR luminance for stitched output.
pub const CHANNELS: usize = 4;

/// Normalized f32 RGBA image buffer.
///
/// Pixel data is stored as interleaved RGBARGBA... Tone-mapped buffers hold
/// values in [0,1]; stitched HDR buffers may exceed 1.0. 8-bit data only
/// enters or leaves through [`PixelBuffer::from_rgba8`],
/// [`PixelBuffer::from_rgb8`] and [`PixelBuffer::to_rgb8`].
#[derive(Clone, Debug, PartialEq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    /// Flat pixel data: [R, G, B, A, R, G, B, A, ...].
    pub data: Vec<f32>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width as usize * height as usize * CHANNELS],
        }
    }

    pub fn from_data(width: u32, height: u32, data: Vec<f32>) -> Result<Self, FilterError> {
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(FilterError::InvalidInput(format!(
                "expected {expected} floats for {width}x{height} RGBA, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// A buffer where every pixel has the same value.
    pub fn filled(width: u32, height: u32, pixel: [f32; 4]) -> Self {
        let count = width as usize * height as usize;
        let mut data = Vec::with_capacity(count * CHANNELS);
        for _ in 0..count {
            data.extend_from_slice(&pixel);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Convert 8-bit RGBA samples to normalized floats.
    pub fn from_rgba8(width: u32, height: u32, bytes: &[u8]) -> Result<Self, FilterError> {
        let data = bytes.iter().map(|&b| b as f32 / 255.0).collect();
        Self::from_data(width, height, data)
    }

    /// Convert 8-bit RGB samples to normalized floats. The 4th channel is
    /// zero-filled.
    pub fn from_rgb8(width: u32, height: u32, bytes: &[u8]) -> Result<Self, FilterError> {
        let expected = width as usize * height as usize * 3;
        if bytes.len() != expected {
            return Err(FilterError::InvalidInput(format!(
                "expected {expected} bytes for {width}x{height} RGB, got {}",
                bytes.len()
            )));
        }
        let mut data = Vec::with_capacity(width as usize * height as usize * CHANNELS);
        for pixel in bytes.chunks_exact(3) {
            data.push(pixel[0] as f32 / 255.0);
            data.push(pixel[1] as f32 / 255.0);
            data.push(pixel[2] as f32 / 255.0);
            data.push(0.0);
        }
        Self::from_data(width, height, data)
    }

    /// Quantize the first three channels to 8-bit RGB, clamping to [0,1].
    pub fn to_rgb8(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pixel_count() * 3);
        for pixel in self.data.chunks_exact(CHANNELS) {
            out.push(to_u8(pixel[0]));
            out.push(to_u8(pixel[1]));
            out.push(to_u8(pixel[2]));
        }
        out
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn same_dimensions(&self, other: &PixelBuffer) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// Sample a channel; coordinates are clamped to the image. An empty
    /// image reads as 0.
    pub fn get(&self, x: i64, y: i64, c: usize) -> f32 {
        self.clamped_index(x, y)
            .map_or(0.0, |idx| self.data[idx * CHANNELS + c])
    }

    /// Write a channel; coordinates are clamped to the image and the value
    /// to [0,1]. Writes to an empty image are dropped.
    pub fn set(&mut self, x: i64, y: i64, c: usize, value: f32) {
        if let Some(idx) = self.clamped_index(x, y) {
            self.data[idx * CHANNELS + c] = clamp_unit(value);
        }
    }

    /// The four channels of pixel `i` in row-major order.
    pub fn pixel(&self, i: usize) -> [f32; 4] {
        let p = &self.data[i * CHANNELS..(i + 1) * CHANNELS];
        [p[0], p[1], p[2], p[3]]
    }

    pub fn rgb(&self, i: usize) -> [f32; 3] {
        let p = &self.data[i * CHANNELS..i * CHANNELS + 3];
        [p[0], p[1], p[2]]
    }

    /// Unclamped write of a whole pixel (used for HDR output).
    pub fn put_pixel(&mut self, i: usize, value: [f32; 4]) {
        self.data[i * CHANNELS..(i + 1) * CHANNELS].copy_from_slice(&value);
    }

    /// Largest absolute per-channel difference, or `None` when dimensions
    /// differ.
    pub fn max_abs_diff(&self, other: &PixelBuffer) -> Option<f32> {
        if !self.same_dimensions(other) {
            return None;
        }
        Some(
            self.data
                .iter()
                .zip(&other.data)
                .map(|(a, b)| (a - b).abs())
                .fold(0.0_f32, f32::max),
        )
    }

    fn clamped_index(&self, x: i64, y: i64) -> Option<usize> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        Some(x + y * self.width as usize)
    }
}

/// Clamp to [0,1], mapping NaN to 0.
pub fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}

fn to_u8(v: f32) -> u8 {
    (clamp_unit(v) * 255.0 + 0.5) as u8
}

/// One LDR capture of a bracketed sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct Exposure {
    pub buffer: PixelBuffer,
    /// Relative exposure (time x gain); the stitcher divides samples by it.
    pub exposure: f32,
}

/// An ordered bracket of LDR images sharing the same dimensions.
#[derive(Clone, Debug, PartialEq)]
pub struct ExposureSet {
    images: Vec<Exposure>,
}

impl ExposureSet {
    pub fn new(images: Vec<Exposure>) -> Result<Self, FilterError> {
        let Some(first) = images.first() else {
            return Err(FilterError::InvalidInput(
                "exposure set must contain at least one image".into(),
            ));
        };
        let (width, height) = (first.buffer.width, first.buffer.height);
        for (i, image) in images.iter().enumerate() {
            if image.buffer.width != width || image.buffer.height != height {
                return Err(FilterError::InvalidInput(format!(
                    "exposure {i} is {}x{}, expected {width}x{height}",
                    image.buffer.width, image.buffer.height
                )));
            }
            if !(image.exposure.is_finite() && image.exposure > 0.0) {
                return Err(FilterError::InvalidInput(format!(
                    "exposure {i} has invalid exposure value {}",
                    image.exposure
                )));
            }
        }
        Ok(Self { images })
    }

    pub fn width(&self) -> u32 {
        self.images[0].buffer.width
    }

    pub fn height(&self) -> u32 {
        self.images[0].buffer.height
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn images(&self) -> &[Exposure] {
        &self.images
    }
}

/// What a filter consumes: one image for tone mappers, a bracket for the
/// stitcher.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterInput {
    Single(PixelBuffer),
    Exposures(ExposureSet),
}

impl FilterInput {
    pub fn width(&self) -> u32 {
        match self {
            FilterInput::Single(buf) => buf.width,
            FilterInput::Exposures(set) => set.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            FilterInput::Single(buf) => buf.height,
            FilterInput::Exposures(set) => set.height(),
        }
    }

    /// The single image to tone-map. A one-image bracket also qualifies.
    pub fn single(&self) -> Option<&PixelBuffer> {
        match self {
            FilterInput::Single(buf) => Some(buf),
            FilterInput::Exposures(set) if set.len() == 1 => Some(&set.images()[0].buffer),
            FilterInput::Exposures(_) => None,
        }
    }

    pub fn exposures(&self) -> Option<&ExposureSet> {
        match self {
            FilterInput::Exposures(set) => Some(set),
            FilterInput::Single(_) => None,
        }
    }

    /// Content fingerprint: dimensions, exposure values and every sample.
    pub fn fingerprint(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        match self {
            FilterInput::Single(buf) => {
                hasher.update(b"single");
                hash_buffer(&mut hasher, buf);
            }
            FilterInput::Exposures(set) => {
                hasher.update(b"exposures");
                hasher.update(&(set.len() as u64).to_le_bytes());
                for image in set.images() {
                    hasher.update(&image.exposure.to_le_bytes());
                    hash_buffer(&mut hasher, &image.buffer);
                }
            }
        }
        hasher.finalize()
    }
}

impl From<PixelBuffer> for FilterInput {
    fn from(buf: PixelBuffer) -> Self {
        FilterInput::Single(buf)
    }
}

impl From<ExposureSet> for FilterInput {
    fn from(set: ExposureSet) -> Self {
        FilterInput::Exposures(set)
    }
}

fn hash_buffer(hasher: &mut blake3::Hasher, buf: &PixelBuffer) {
    hasher.update(&buf.width.to_le_bytes());
    hasher.update(&buf.height.to_le_bytes());
    hasher.update(bytemuck::cast_slice(&buf.data));
}
