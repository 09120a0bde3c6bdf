//! Per-filter compute programs and the host-side phase orchestration that
//! drives them.

pub mod grad_dom;
pub mod hist_eq;
pub mod reinhard_global;
pub mod reinhard_local;
pub mod stitching;

use hdr_core::reduce::LaunchConfig;

use crate::context::GpuContext;

pub use grad_dom::GradDomKernels;
pub use hist_eq::HistEqKernels;
pub use reinhard_global::ReinhardGlobalKernels;
pub use reinhard_local::ReinhardLocalKernels;
pub use stitching::StitchingKernels;

/// Lanes per workgroup; must match `WG` in common.wgsl.
pub const WORKGROUP_SIZE: usize = 256;

/// Dispatches beyond this are folded into the shaders' grid-stride loops.
const MAX_WORKGROUPS: usize = 65_535;

/// Program source with the shared helpers prepended.
macro_rules! shader_source {
    ($file:literal) => {
        concat!(
            include_str!("../../shaders/common.wgsl"),
            "\n",
            include_str!(concat!("../../shaders/", $file))
        )
    };
}
pub(crate) use shader_source;

/// Workgroups for one lane per item.
pub fn pixel_workgroups(items: usize) -> u32 {
    LaunchConfig::for_items(items, WORKGROUP_SIZE)
        .groups
        .min(MAX_WORKGROUPS) as u32
}

/// Workgroups of a partial reduction over `items`.
pub fn reduction_workgroups(items: usize) -> u32 {
    LaunchConfig::reduction(items, WORKGROUP_SIZE).groups as u32
}

pub fn encoder(ctx: &GpuContext, label: &str) -> wgpu::CommandEncoder {
    ctx.device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
}

pub fn submit(ctx: &GpuContext, encoder: wgpu::CommandEncoder) {
    ctx.queue.submit(std::iter::once(encoder.finish()));
}

/// Record one compute pass. Bind groups are set in order, each with its
/// dynamic offsets.
pub fn dispatch(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    pipeline: &wgpu::ComputePipeline,
    bind_groups: &[(&wgpu::BindGroup, &[u32])],
    workgroups: u32,
) {
    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some(label),
        timestamp_writes: None,
    });
    pass.set_pipeline(pipeline);
    for (index, (group, offsets)) in bind_groups.iter().enumerate() {
        pass.set_bind_group(index as u32, *group, offsets);
    }
    pass.dispatch_workgroups(workgroups, 1, 1);
}

/// Level table as `array<vec4<u32>>`: width, height, offset, scale.
pub fn level_table(levels: &[hdr_core::pyramid::MipLevel]) -> Vec<[u32; 4]> {
    levels
        .iter()
        .map(|l| [l.width, l.height, l.offset as u32, l.scale])
        .collect()
}
