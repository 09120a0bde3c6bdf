use hdr_core::pixel_buf::CHANNELS;
use hdr_core::{FilterError, PixelBuffer};

use crate::context::GpuContext;

const TEXEL_BYTES: u32 = (CHANNELS * std::mem::size_of::<f32>()) as u32;

/// A device-resident RGBA f32 image, the exchange format of texture
/// interop.
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

/// Row pitch of a texture copy, padded to the copy alignment.
fn padded_row_bytes(width: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    (width * TEXEL_BYTES).div_ceil(align) * align
}

impl GpuTexture {
    fn create(ctx: &GpuContext, width: u32, height: u32, label: &str) -> Result<Self, FilterError> {
        if width == 0 || height == 0 {
            return Err(FilterError::InvalidInput(format!(
                "{label}: textures need a non-zero size, got {width}x{height}"
            )));
        }
        let limit = ctx.device.limits().max_texture_dimension_2d;
        if width > limit || height > limit {
            return Err(FilterError::InvalidInput(format!(
                "{label}: {width}x{height} exceeds the texture limit of {limit}"
            )));
        }
        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent(width, height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba32Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(Self {
            texture,
            view,
            width,
            height,
        })
    }

    /// Upload `buf` into a new Rgba32Float texture.
    pub fn from_pixel_buffer(
        ctx: &GpuContext,
        buf: &PixelBuffer,
        label: &str,
    ) -> Result<Self, FilterError> {
        let tex = Self::create(ctx, buf.width, buf.height, label)?;
        ctx.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &tex.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(&buf.data),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(buf.width * TEXEL_BYTES),
                rows_per_image: Some(buf.height),
            },
            extent(buf.width, buf.height),
        );
        Ok(tex)
    }

    /// Read the texture back into a pixel buffer (blocking).
    pub fn download(&self, ctx: &GpuContext) -> Result<PixelBuffer, FilterError> {
        let row_bytes = self.width * TEXEL_BYTES;
        let padded = padded_row_bytes(self.width);
        let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("texture_download_staging"),
            size: u64::from(padded) * u64::from(self.height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("texture_download"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(self.height),
                },
            },
            extent(self.width, self.height),
        );
        ctx.queue.submit(std::iter::once(encoder.finish()));

        let (sender, receiver) = std::sync::mpsc::channel();
        staging
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = sender.send(result);
            });
        ctx.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| FilterError::backend("poll device", e))?;
        receiver
            .recv()
            .map_err(|_| FilterError::backend("map texture", "map request dropped"))?
            .map_err(|e| FilterError::backend("map texture", e))?;

        let mapped = staging.slice(..).get_mapped_range();
        let mut data = Vec::with_capacity(self.width as usize * self.height as usize * CHANNELS);
        for row in mapped.chunks_exact(padded as usize) {
            data.extend_from_slice(bytemuck::cast_slice(&row[..row_bytes as usize]));
        }
        drop(mapped);
        staging.unmap();

        PixelBuffer::from_data(self.width, self.height, data)
    }
}
