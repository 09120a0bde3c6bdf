use bytemuck::{Pod, Zeroable};
use hdr_core::filters::ReinhardLocalParams;
use hdr_core::pyramid::{layout, level_count, total_len};
use hdr_core::{FilterError, PixelBuffer, StatusSink};
use tracing::debug;

use super::{
    WORKGROUP_SIZE, dispatch, encoder, level_table, pixel_workgroups, reduction_workgroups,
    submit,
};
use crate::buffer::{
    Step, StepTable, bind_buffers, check_binding_size, download_pixels, pixel_bytes, storage,
    storage_init, uniform, upload_pixels,
};
use crate::context::GpuContext;
use crate::program::{BindingKind, Program, create_layout, create_pipeline_layout};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Config {
    width: u32,
    height: u32,
    pixel_count: u32,
    groups: u32,
    levels: u32,
    key: f32,
    sat: f32,
    epsilon: f32,
    phi: f32,
    _pad: [u32; 3],
}

/// reduce_luminance -> final_reduce -> downsample per level -> tone_map.
pub struct ReinhardLocalKernels {
    layout: wgpu::BindGroupLayout,
    step_layout: wgpu::BindGroupLayout,
    reduce: wgpu::ComputePipeline,
    final_reduce: wgpu::ComputePipeline,
    downsample: wgpu::ComputePipeline,
    tone_map: wgpu::ComputePipeline,
}

impl ReinhardLocalKernels {
    pub async fn new(ctx: &GpuContext) -> Result<Self, FilterError> {
        use BindingKind::*;
        let layout = create_layout(
            &ctx.device,
            "reinhard_local_bgl",
            &[
                Uniform,
                StorageRead,
                StorageReadWrite,
                StorageReadWrite,
                StorageRead,
                StorageReadWrite,
                StorageReadWrite,
            ],
        );
        let step_layout = create_layout(&ctx.device, "reinhard_local_step_bgl", &[StepUniform]);
        let pipeline_layout = create_pipeline_layout(
            &ctx.device,
            "reinhard_local_layout",
            &[&layout, &step_layout],
        );
        Program::build(
            &ctx.device,
            "reinhard_local",
            super::shader_source!("reinhard_local.wgsl"),
            |program| Self {
                reduce: program.pipeline("reduce_luminance", &pipeline_layout),
                final_reduce: program.pipeline("final_reduce", &pipeline_layout),
                downsample: program.pipeline("downsample", &pipeline_layout),
                tone_map: program.pipeline("tone_map", &pipeline_layout),
                layout,
                step_layout,
            },
        )
        .await
    }

    pub fn run(
        &self,
        ctx: &GpuContext,
        input: &PixelBuffer,
        params: &ReinhardLocalParams,
        status: &StatusSink,
    ) -> Result<PixelBuffer, FilterError> {
        let n = input.pixel_count();
        if n == 0 {
            return Ok(input.clone());
        }
        let count = level_count(input.width, input.height, params.levels);
        let levels = layout(input.width, input.height, count);
        let pyramid_bytes = total_len(&levels) as u64 * 4;
        check_binding_size(ctx, "reinhard_local_pyramid", pyramid_bytes)?;

        let groups = reduction_workgroups(n);
        let workgroups = pixel_workgroups(n);
        status.report(&format!(
            "Local size: {WORKGROUP_SIZE} Global size: {}",
            workgroups as usize * WORKGROUP_SIZE
        ));

        let config = uniform(
            &ctx.device,
            "reinhard_local_config",
            &Config {
                width: input.width,
                height: input.height,
                pixel_count: n as u32,
                groups,
                levels: count as u32,
                key: params.key,
                sat: params.sat,
                epsilon: params.epsilon,
                phi: params.phi,
                _pad: [0; 3],
            },
        );
        let input_buf = upload_pixels(ctx, "reinhard_local_input", input)?;
        let output_buf = storage(&ctx.device, "reinhard_local_output", pixel_bytes(n));
        let pyramid = storage(&ctx.device, "reinhard_local_pyramid", pyramid_bytes);
        let table = storage_init(
            &ctx.device,
            "reinhard_local_levels",
            bytemuck::cast_slice(&level_table(&levels)),
        );
        let partial = storage(&ctx.device, "reinhard_local_partial", u64::from(groups) * 4);
        let stats = storage(&ctx.device, "reinhard_local_stats", 4);
        let bind_group = bind_buffers(
            &ctx.device,
            "reinhard_local_bg",
            &self.layout,
            &[&config, &input_buf, &output_buf, &pyramid, &table, &partial, &stats],
        );

        // step 0 serves the kernels that do not read it
        let steps: Vec<Step> = (0..count.max(1)).map(Step::level).collect();
        let step_table =
            StepTable::new(ctx, &self.step_layout, "reinhard_local_steps", steps.len());
        step_table.write(&ctx.queue, &steps)?;
        let at = |index: usize| [step_table.offset(index)];

        let mut enc = encoder(ctx, "reinhard_local_encoder");
        let first = at(0);
        let plain: &[(&wgpu::BindGroup, &[u32])] =
            &[(&bind_group, &[]), (&step_table.bind_group, &first)];
        for (entry, pipeline, size) in [
            ("reduce_luminance", &self.reduce, groups),
            ("final_reduce", &self.final_reduce, 1),
        ] {
            dispatch(&mut enc, entry, pipeline, plain, size);
        }
        for (k, level) in levels.iter().enumerate().skip(1) {
            let offset = at(k);
            dispatch(
                &mut enc,
                "downsample",
                &self.downsample,
                &[(&bind_group, &[]), (&step_table.bind_group, &offset)],
                pixel_workgroups(level.len()),
            );
        }
        dispatch(&mut enc, "tone_map", &self.tone_map, plain, workgroups);
        submit(ctx, enc);

        debug!(pixels = n, levels = count, groups, "GPU Reinhard local");
        download_pixels(ctx, &output_buf, input.width, input.height)
    }
}
