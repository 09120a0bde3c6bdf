use bytemuck::{Pod, Zeroable};
use hdr_core::filters::HistEqParams;
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
    bins: u32,
    groups: u32,
    _pad: u32,
}

/// partial_histogram -> merge_histogram -> cumulative (scan and level
/// table) -> remap.
pub struct HistEqKernels {
    layout: wgpu::BindGroupLayout,
    partial_hist: wgpu::ComputePipeline,
    merge_hist: wgpu::ComputePipeline,
    cdf: wgpu::ComputePipeline,
    remap: wgpu::ComputePipeline,
}

impl HistEqKernels {
    pub async fn new(ctx: &GpuContext) -> Result<Self, FilterError> {
        use BindingKind::*;
        let layout = create_layout(
            &ctx.device,
            "hist_eq_bgl",
            &[
                Uniform,
                StorageRead,
                StorageReadWrite,
                StorageReadWrite,
                StorageReadWrite,
                StorageReadWrite,
            ],
        );
        let pipeline_layout = create_pipeline_layout(&ctx.device, "hist_eq_layout", &[&layout]);
        Program::build(
            &ctx.device,
            "hist_eq",
            super::shader_source!("hist_eq.wgsl"),
            |program| Self {
                partial_hist: program.pipeline("partial_histogram", &pipeline_layout),
                merge_hist: program.pipeline("merge_histogram", &pipeline_layout),
                cdf: program.pipeline("cumulative", &pipeline_layout),
                remap: program.pipeline("remap", &pipeline_layout),
                layout,
            },
        )
        .await
    }

    pub fn run(
        &self,
        ctx: &GpuContext,
        input: &PixelBuffer,
        params: &HistEqParams,
        status: &StatusSink,
    ) -> Result<PixelBuffer, FilterError> {
        let n = input.pixel_count();
        if n == 0 {
            return Ok(input.clone());
        }
        let pixel_count = u32::try_from(n).map_err(|_| {
            FilterError::InvalidInput(format!("{n} pixels exceed the GPU histogram counters"))
        })?;
        let bins = params.bins;
        let groups = reduction_workgroups(n);
        let workgroups = pixel_workgroups(n);
        status.report(&format!(
            "Local size: {WORKGROUP_SIZE} Global size: {}",
            workgroups as usize * WORKGROUP_SIZE
        ));

        let config = uniform(
            &ctx.device,
            "hist_eq_config",
            &Config {
                pixel_count,
                bins,
                groups,
                _pad: 0,
            },
        );
        let input_buf = upload_pixels(ctx, "hist_eq_input", input)?;
        let output_buf = storage(&ctx.device, "hist_eq_output", pixel_bytes(n));
        let partial = storage(&ctx.device, "hist_eq_partial", u64::from(groups * bins) * 4);
        let hist = storage(&ctx.device, "hist_eq_hist", u64::from(bins) * 4);
        let cdf = storage(&ctx.device, "hist_eq_cdf", u64::from(bins + 1) * 4);

        let bind_group = bind_buffers(
            &ctx.device,
            "hist_eq_bg",
            &self.layout,
            &[&config, &input_buf, &output_buf, &partial, &hist, &cdf],
        );
        let groups0: &[(&wgpu::BindGroup, &[u32])] = &[(&bind_group, &[])];

        let mut enc = encoder(ctx, "hist_eq_encoder");
        for (entry, pipeline, size) in [
            ("partial_histogram", &self.partial_hist, groups),
            ("merge_histogram", &self.merge_hist, 1),
            ("cumulative", &self.cdf, 1),
            ("remap", &self.remap, workgroups),
        ] {
            dispatch(&mut enc, entry, pipeline, groups0, size);
        }
        submit(ctx, enc);

        debug!(pixels = n, bins, groups, "GPU histogram equalization");
        download_pixels(ctx, &output_buf, input.width, input.height)
    }
}
