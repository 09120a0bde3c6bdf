use std::num::NonZeroU64;

use bytemuck::{Pod, Zeroable};
use hdr_core::{FilterError, PixelBuffer};
use wgpu::util::DeviceExt;

use crate::context::GpuContext;

/// Storage buffer holding `contents`, readable back through a copy.
pub fn storage_init(device: &wgpu::Device, label: &str, contents: &[u8]) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
    })
}

/// Zero-initialized storage buffer of at least `size` bytes.
pub fn storage(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size.max(4).next_multiple_of(4),
        usage: wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

pub fn uniform<T: Pod>(device: &wgpu::Device, label: &str, value: &T) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::bytes_of(value),
        usage: wgpu::BufferUsages::UNIFORM,
    })
}

/// Bind group with `buffers` at bindings 0, 1, 2, ... in order.
pub fn bind_buffers(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    buffers: &[&wgpu::Buffer],
) -> wgpu::BindGroup {
    let entries: Vec<_> = buffers
        .iter()
        .enumerate()
        .map(|(i, buffer)| wgpu::BindGroupEntry {
            binding: i as u32,
            resource: buffer.as_entire_binding(),
        })
        .collect();
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &entries,
    })
}

/// Upload the pixels of `buf` as `array<vec4<f32>>`.
pub fn upload_pixels(
    ctx: &GpuContext,
    label: &str,
    buf: &PixelBuffer,
) -> Result<wgpu::Buffer, FilterError> {
    check_binding_size(ctx, label, pixel_bytes(buf.pixel_count()))?;
    Ok(storage_init(&ctx.device, label, bytemuck::cast_slice(&buf.data)))
}

pub fn pixel_bytes(pixels: usize) -> u64 {
    (pixels * hdr_core::pixel_buf::CHANNELS * std::mem::size_of::<f32>()) as u64
}

/// Fail before allocation when a buffer would exceed what one binding can
/// address on this device.
pub fn check_binding_size(ctx: &GpuContext, label: &str, bytes: u64) -> Result<(), FilterError> {
    let limit = ctx.max_binding_size();
    if bytes > limit {
        return Err(FilterError::InvalidInput(format!(
            "{label} needs {bytes} bytes, device allows {limit} per binding"
        )));
    }
    Ok(())
}

/// Copy `count` elements of `src` into a staging buffer and map it
/// (blocking).
pub fn read_buffer<T: Pod>(
    ctx: &GpuContext,
    src: &wgpu::Buffer,
    count: usize,
) -> Result<Vec<T>, FilterError> {
    let size = (count * std::mem::size_of::<T>()) as u64;
    if size == 0 {
        return Ok(Vec::new());
    }
    let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback_staging"),
        size,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback_encoder"),
        });
    encoder.copy_buffer_to_buffer(src, 0, &staging, 0, size);
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
        .map_err(|_| FilterError::backend("map buffer", "map request dropped"))?
        .map_err(|e| FilterError::backend("map buffer", e))?;

    let data = staging.slice(..).get_mapped_range();
    let values: Vec<T> = bytemuck::cast_slice(&data).to_vec();
    drop(data);
    staging.unmap();
    Ok(values)
}

/// Read an `array<vec4<f32>>` buffer back into a pixel buffer.
pub fn download_pixels(
    ctx: &GpuContext,
    src: &wgpu::Buffer,
    width: u32,
    height: u32,
) -> Result<PixelBuffer, FilterError> {
    let count = width as usize * height as usize * hdr_core::pixel_buf::CHANNELS;
    PixelBuffer::from_data(width, height, read_buffer(ctx, src, count)?)
}

/// Per-dispatch parameters of level-wise and iterative kernels. Mirrors
/// `struct Step` in the shaders.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Step {
    pub level: u32,
    pub src: u32,
    pub dst: u32,
    pub count: u32,
    pub slot: u32,
    pub groups: u32,
    pub _pad: [u32; 2],
}

impl Step {
    pub fn level(level: usize) -> Self {
        Self {
            level: level as u32,
            ..Default::default()
        }
    }
}

const STEP_SIZE: u64 = std::mem::size_of::<Step>() as u64;

/// A uniform buffer of steps bound once and addressed with dynamic offsets,
/// so that one command buffer can carry many differently parameterized
/// dispatches.
pub struct StepTable {
    buffer: wgpu::Buffer,
    pub bind_group: wgpu::BindGroup,
    stride: u64,
    capacity: usize,
}

impl StepTable {
    pub fn new(
        ctx: &GpuContext,
        layout: &wgpu::BindGroupLayout,
        label: &str,
        capacity: usize,
    ) -> Self {
        let align = u64::from(ctx.device.limits().min_uniform_buffer_offset_alignment);
        let stride = STEP_SIZE.div_ceil(align) * align;
        let capacity = capacity.max(1);
        let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: stride * capacity as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: NonZeroU64::new(STEP_SIZE),
                }),
            }],
        });
        Self {
            buffer,
            bind_group,
            stride,
            capacity,
        }
    }

    /// Replace the table contents. Takes effect with the next submission.
    pub fn write(&self, queue: &wgpu::Queue, steps: &[Step]) -> Result<(), FilterError> {
        if steps.len() > self.capacity {
            return Err(FilterError::backend(
                "write step table",
                format!("{} steps exceed capacity {}", steps.len(), self.capacity),
            ));
        }
        let stride = self.stride as usize;
        let mut bytes = vec![0u8; stride * steps.len().max(1)];
        for (chunk, step) in bytes.chunks_exact_mut(stride).zip(steps) {
            chunk[..STEP_SIZE as usize].copy_from_slice(bytemuck::bytes_of(step));
        }
        queue.write_buffer(&self.buffer, 0, &bytes);
        Ok(())
    }

    pub fn offset(&self, index: usize) -> u32 {
        (index as u64 * self.stride) as u32
    }
}
