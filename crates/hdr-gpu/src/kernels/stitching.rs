use bytemuck::{Pod, Zeroable};
use hdr_core::filters::StitchingParams;
use hdr_core::{ExposureSet, FilterError, PixelBuffer, StatusSink};
use tracing::debug;

use super::{WORKGROUP_SIZE, dispatch, encoder, pixel_workgroups, submit};
use crate::buffer::{
    bind_buffers, check_binding_size, download_pixels, pixel_bytes, storage, storage_init,
    uniform,
};
use crate::context::GpuContext;
use crate::program::{BindingKind, Program, create_layout, create_pipeline_layout};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Config {
    pixel_count: u32,
    images: u32,
    weight_epsilon: f32,
    _pad: u32,
}

/// A single fuse kernel over the whole bracket.
pub struct StitchingKernels {
    layout: wgpu::BindGroupLayout,
    fuse: wgpu::ComputePipeline,
}

impl StitchingKernels {
    pub async fn new(ctx: &GpuContext) -> Result<Self, FilterError> {
        use BindingKind::*;
        let layout = create_layout(
            &ctx.device,
            "stitching_bgl",
            &[Uniform, StorageRead, StorageRead, StorageReadWrite],
        );
        let pipeline_layout = create_pipeline_layout(&ctx.device, "stitching_layout", &[&layout]);
        Program::build(
            &ctx.device,
            "stitching",
            super::shader_source!("stitching.wgsl"),
            |program| Self {
                fuse: program.pipeline("fuse", &pipeline_layout),
                layout,
            },
        )
        .await
    }

    pub fn run(
        &self,
        ctx: &GpuContext,
        set: &ExposureSet,
        params: &StitchingParams,
        status: &StatusSink,
    ) -> Result<PixelBuffer, FilterError> {
        let n = set.width() as usize * set.height() as usize;
        if n == 0 {
            return Ok(PixelBuffer::new(set.width(), set.height()));
        }
        let workgroups = pixel_workgroups(n);
        status.report(&format!(
            "Local size: {WORKGROUP_SIZE} Global size: {}",
            workgroups as usize * WORKGROUP_SIZE
        ));

        let mut images = Vec::with_capacity(n * 4 * set.len());
        for image in set.images() {
            images.extend_from_slice(&image.buffer.data);
        }
        let exposures: Vec<f32> = set.images().iter().map(|image| image.exposure).collect();
        check_binding_size(ctx, "stitching_images", pixel_bytes(n * set.len()))?;

        let config = uniform(
            &ctx.device,
            "stitching_config",
            &Config {
                pixel_count: n as u32,
                images: set.len() as u32,
                weight_epsilon: params.weight_epsilon,
                _pad: 0,
            },
        );
        let images_buf =
            storage_init(&ctx.device, "stitching_images", bytemuck::cast_slice(&images));
        let exposures_buf =
            storage_init(&ctx.device, "stitching_exposures", bytemuck::cast_slice(&exposures));
        let output_buf = storage(&ctx.device, "stitching_output", pixel_bytes(n));
        let bind_group = bind_buffers(
            &ctx.device,
            "stitching_bg",
            &self.layout,
            &[&config, &images_buf, &exposures_buf, &output_buf],
        );

        let mut enc = encoder(ctx, "stitching_encoder");
        dispatch(
            &mut enc,
            "fuse",
            &self.fuse,
            &[(&bind_group, &[])],
            workgroups,
        );
        submit(ctx, enc);

        debug!(pixels = n, images = set.len(), "GPU exposure stitching");
        download_pixels(ctx, &output_buf, set.width(), set.height())
    }
}
