use bytemuck::{Pod, Zeroable};
use hdr_core::filters::ReinhardGlobalParams;
use hdr_core::{FilterError, PixelBuffer, StatusSink};
use tracing::debug;

use super::{WORKGROUP_SIZE, dispatch, encoder, pixel_workgroups, reduction_workgroups, submit};
use crate::buffer::{
    bind_buffers, download_pixels, pixel_bytes, storage, uniform, upload_pixels,
};
use crate::context::GpuContext;
use crate::program::{BindingKind, Program, create_layout, create_pipeline_layout};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Config {
    pixel_count: u32,
    groups: u32,
    key: f32,
    sat: f32,
}

/// reduce_luminance -> final_reduce -> tone_map.
pub struct ReinhardGlobalKernels {
    layout: wgpu::BindGroupLayout,
    reduce: wgpu::ComputePipeline,
    final_reduce: wgpu::ComputePipeline,
    tone_map: wgpu::ComputePipeline,
}

impl ReinhardGlobalKernels {
    pub async fn new(ctx: &GpuContext) -> Result<Self, FilterError> {
        use BindingKind::*;
        let layout = create_layout(
            &ctx.device,
            "reinhard_global_bgl",
            &[
                Uniform,
                StorageRead,
                StorageReadWrite,
                StorageReadWrite,
                StorageReadWrite,
            ],
        );
        let pipeline_layout =
            create_pipeline_layout(&ctx.device, "reinhard_global_layout", &[&layout]);
        Program::build(
            &ctx.device,
            "reinhard_global",
            super::shader_source!("reinhard_global.wgsl"),
            |program| Self {
                reduce: program.pipeline("reduce_luminance", &pipeline_layout),
                final_reduce: program.pipeline("final_reduce", &pipeline_layout),
                tone_map: program.pipeline("tone_map", &pipeline_layout),
                layout,
            },
        )
        .await
    }

    pub fn run(
        &self,
        ctx: &GpuContext,
        input: &PixelBuffer,
        params: &ReinhardGlobalParams,
        status: &StatusSink,
    ) -> Result<PixelBuffer, FilterError> {
        let n = input.pixel_count();
        if n == 0 {
            return Ok(input.clone());
        }
        let groups = reduction_workgroups(n);
        let workgroups = pixel_workgroups(n);
        status.report(&format!(
            "Local size: {WORKGROUP_SIZE} Global size: {}",
            workgroups as usize * WORKGROUP_SIZE
        ));

        let config = uniform(
            &ctx.device,
            "reinhard_global_config",
            &Config {
                pixel_count: n as u32,
                groups,
                key: params.key,
                sat: params.sat,
            },
        );
        let input_buf = upload_pixels(ctx, "reinhard_global_input", input)?;
        let output_buf = storage(&ctx.device, "reinhard_global_output", pixel_bytes(n));
        let partial = storage(&ctx.device, "reinhard_global_partial", u64::from(groups) * 8);
        let stats = storage(&ctx.device, "reinhard_global_stats", 8);
        let bind_group = bind_buffers(
            &ctx.device,
            "reinhard_global_bg",
            &self.layout,
            &[&config, &input_buf, &output_buf, &partial, &stats],
        );
        let groups0: &[(&wgpu::BindGroup, &[u32])] = &[(&bind_group, &[])];

        let mut enc = encoder(ctx, "reinhard_global_encoder");
        for (entry, pipeline, size) in [
            ("reduce_luminance", &self.reduce, groups),
            ("final_reduce", &self.final_reduce, 1),
            ("tone_map", &self.tone_map, workgroups),
        ] {
            dispatch(&mut enc, entry, pipeline, groups0, size);
        }
        submit(ctx, enc);

        debug!(pixels = n, groups, "GPU Reinhard global");
        download_pixels(ctx, &output_buf, input.width, input.height)
    }
}
