use bytemuck::{Pod, Zeroable};
use hdr_core::filters::GradDomParams;
use hdr_core::pyramid::{layout, level_count_min_size, total_len};
use hdr_core::reduce::MAX_GROUPS;
use hdr_core::{FilterError, PixelBuffer, StatusSink};
use tracing::{debug, warn};

use super::{
    WORKGROUP_SIZE, dispatch, encoder, level_table, pixel_workgroups, reduction_workgroups,
    submit,
};
use crate::buffer::{
    Step, StepTable, bind_buffers, check_binding_size, download_pixels, pixel_bytes, read_buffer,
    storage, storage_init, uniform, upload_pixels,
};
use crate::context::GpuContext;
use crate::program::{BindingKind, Program, create_layout, create_pipeline_layout};

/// Jacobi sweeps recorded per submission. Convergence counters are read
/// after every batch.
const JACOBI_BATCH: usize = 32;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Config {
    width: u32,
    height: u32,
    pixel_count: u32,
    levels: u32,
    grad_base: u32,
    atten_base: u32,
    div_base: u32,
    _pad: u32,
    beta: f32,
    alpha_scale: f32,
    sat: f32,
    termination: f32,
}

/// Float offsets of the planes packed into the work buffer. The log
/// luminance pyramid starts at 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Planes {
    grad: u32,
    atten: u32,
    div: u32,
    solve_a: u32,
    solve_b: u32,
    snapshot: u32,
    len: usize,
}

impl Planes {
    fn new(pyramid_len: usize, pixels: usize) -> Self {
        let (p, n) = (pyramid_len as u32, pixels as u32);
        Self {
            grad: p,
            atten: 2 * p,
            div: 3 * p,
            solve_a: 3 * p + n,
            solve_b: 3 * p + 2 * n,
            snapshot: 3 * p + 3 * n,
            len: 3 * pyramid_len + 4 * pixels,
        }
    }

    /// Solver plane to write when reading `src`.
    fn other(&self, src: u32) -> u32 {
        if src == self.solve_a {
            self.solve_b
        } else {
            self.solve_a
        }
    }
}

/// Entry points of the GradDom program.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kernel {
    LogLuminance,
    Downsample,
    Gradient,
    PartialSum,
    FinalMean,
    AttenCoarsest,
    AttenUpsample,
    Divergence,
    CopyPlane,
    Jacobi,
    Reconstruct,
}

impl Kernel {
    fn entry(self) -> &'static str {
        match self {
            Kernel::LogLuminance => "log_luminance",
            Kernel::Downsample => "downsample",
            Kernel::Gradient => "gradient",
            Kernel::PartialSum => "partial_sum",
            Kernel::FinalMean => "final_mean",
            Kernel::AttenCoarsest => "atten_coarsest",
            Kernel::AttenUpsample => "atten_upsample",
            Kernel::Divergence => "divergence",
            Kernel::CopyPlane => "copy_plane",
            Kernel::Jacobi => "jacobi",
            Kernel::Reconstruct => "reconstruct",
        }
    }
}

type Plan = Vec<(Kernel, Step, u32)>;

/// partial_sum + final_mean of `count` floats at `src` into `stats[slot]`.
fn mean_steps(src: u32, count: usize, slot: usize) -> Plan {
    let groups = reduction_workgroups(count);
    let step = Step {
        src,
        count: count as u32,
        slot: slot as u32,
        groups,
        ..Default::default()
    };
    vec![(Kernel::PartialSum, step, groups), (Kernel::FinalMean, step, 1)]
}

/// `iterations` Jacobi sweeps starting from the plane at `start`, ping-ponging
/// between the two solver planes. Returns the plan and the plane holding the
/// last iterate.
fn jacobi_chain(
    planes: &Planes,
    start: u32,
    iterations: usize,
    pixels: usize,
    slot: impl Fn(usize) -> u32,
) -> (Plan, u32) {
    let mut src = start;
    let mut plan = Vec::with_capacity(iterations);
    for j in 0..iterations {
        let dst = planes.other(src);
        let step = Step {
            src,
            dst,
            slot: slot(j),
            ..Default::default()
        };
        plan.push((Kernel::Jacobi, step, pixel_workgroups(pixels)));
        src = dst;
    }
    (plan, src)
}

/// log_luminance -> downsample -> gradient -> level means -> attenuation ->
/// divergence -> batched jacobi -> means -> reconstruct.
pub struct GradDomKernels {
    layout: wgpu::BindGroupLayout,
    step_layout: wgpu::BindGroupLayout,
    log_luminance: wgpu::ComputePipeline,
    downsample: wgpu::ComputePipeline,
    gradient: wgpu::ComputePipeline,
    partial_sum: wgpu::ComputePipeline,
    final_mean: wgpu::ComputePipeline,
    atten_coarsest: wgpu::ComputePipeline,
    atten_upsample: wgpu::ComputePipeline,
    divergence: wgpu::ComputePipeline,
    copy_plane: wgpu::ComputePipeline,
    jacobi: wgpu::ComputePipeline,
    reconstruct: wgpu::ComputePipeline,
}

impl GradDomKernels {
    pub async fn new(ctx: &GpuContext) -> Result<Self, FilterError> {
        use BindingKind::*;
        let layout = create_layout(
            &ctx.device,
            "grad_dom_bgl",
            &[
                Uniform,
                StorageRead,
                StorageReadWrite,
                StorageReadWrite,
                StorageRead,
                StorageReadWrite,
                StorageReadWrite,
                StorageReadWrite,
            ],
        );
        let step_layout = create_layout(&ctx.device, "grad_dom_step_bgl", &[StepUniform]);
        let pipeline_layout =
            create_pipeline_layout(&ctx.device, "grad_dom_layout", &[&layout, &step_layout]);
        Program::build(
            &ctx.device,
            "grad_dom",
            super::shader_source!("grad_dom.wgsl"),
            |program| {
                let pipeline = |kernel: Kernel| program.pipeline(kernel.entry(), &pipeline_layout);
                Self {
                    log_luminance: pipeline(Kernel::LogLuminance),
                    downsample: pipeline(Kernel::Downsample),
                    gradient: pipeline(Kernel::Gradient),
                    partial_sum: pipeline(Kernel::PartialSum),
                    final_mean: pipeline(Kernel::FinalMean),
                    atten_coarsest: pipeline(Kernel::AttenCoarsest),
                    atten_upsample: pipeline(Kernel::AttenUpsample),
                    divergence: pipeline(Kernel::Divergence),
                    copy_plane: pipeline(Kernel::CopyPlane),
                    jacobi: pipeline(Kernel::Jacobi),
                    reconstruct: pipeline(Kernel::Reconstruct),
                    layout,
                    step_layout,
                }
            },
        )
        .await
    }

    fn pipeline(&self, kernel: Kernel) -> &wgpu::ComputePipeline {
        match kernel {
            Kernel::LogLuminance => &self.log_luminance,
            Kernel::Downsample => &self.downsample,
            Kernel::Gradient => &self.gradient,
            Kernel::PartialSum => &self.partial_sum,
            Kernel::FinalMean => &self.final_mean,
            Kernel::AttenCoarsest => &self.atten_coarsest,
            Kernel::AttenUpsample => &self.atten_upsample,
            Kernel::Divergence => &self.divergence,
            Kernel::CopyPlane => &self.copy_plane,
            Kernel::Jacobi => &self.jacobi,
            Kernel::Reconstruct => &self.reconstruct,
        }
    }

    /// Record `plan` into one command buffer, after clearing `clear` if
    /// given, and submit it.
    fn execute(
        &self,
        ctx: &GpuContext,
        bind_group: &wgpu::BindGroup,
        plan: &[(Kernel, Step, u32)],
        label: &str,
        clear: Option<&wgpu::Buffer>,
    ) -> Result<(), FilterError> {
        let steps: Vec<Step> = plan.iter().map(|(_, step, _)| *step).collect();
        let table = StepTable::new(ctx, &self.step_layout, label, steps.len());
        table.write(&ctx.queue, &steps)?;

        let mut enc = encoder(ctx, label);
        if let Some(buffer) = clear {
            enc.clear_buffer(buffer, 0, None);
        }
        for (i, (kernel, _, workgroups)) in plan.iter().enumerate() {
            let offset = [table.offset(i)];
            dispatch(
                &mut enc,
                kernel.entry(),
                self.pipeline(*kernel),
                &[(bind_group, &[]), (&table.bind_group, &offset)],
                *workgroups,
            );
        }
        submit(ctx, enc);
        Ok(())
    }

    pub fn run(
        &self,
        ctx: &GpuContext,
        input: &PixelBuffer,
        params: &GradDomParams,
        status: &StatusSink,
    ) -> Result<PixelBuffer, FilterError> {
        let n = input.pixel_count();
        if n == 0 {
            return Ok(input.clone());
        }
        let count = level_count_min_size(input.width, input.height, params.min_level_size);
        let levels = layout(input.width, input.height, count);
        let planes = Planes::new(total_len(&levels), n);
        check_binding_size(ctx, "grad_dom_work", planes.len as u64 * 4)?;

        let workgroups = pixel_workgroups(n);
        status.report(&format!(
            "Local size: {WORKGROUP_SIZE} Global size: {}",
            workgroups as usize * WORKGROUP_SIZE
        ));

        let config = uniform(
            &ctx.device,
            "grad_dom_config",
            &Config {
                width: input.width,
                height: input.height,
                pixel_count: n as u32,
                levels: count as u32,
                grad_base: planes.grad,
                atten_base: planes.atten,
                div_base: planes.div,
                _pad: 0,
                beta: params.beta,
                alpha_scale: params.alpha_scale,
                sat: params.sat,
                termination: params.termination,
            },
        );
        let input_buf = upload_pixels(ctx, "grad_dom_input", input)?;
        let output_buf = storage(&ctx.device, "grad_dom_output", pixel_bytes(n));
        let work = storage(&ctx.device, "grad_dom_work", planes.len as u64 * 4);
        let table = storage_init(
            &ctx.device,
            "grad_dom_levels",
            bytemuck::cast_slice(&level_table(&levels)),
        );
        let partial = storage(&ctx.device, "grad_dom_partial", MAX_GROUPS as u64 * 4);
        let stats = storage(&ctx.device, "grad_dom_stats", (count as u64 + 2) * 4);
        // one slot per sweep of a batch plus a discard slot for replays
        let counters = storage(&ctx.device, "grad_dom_converged", (JACOBI_BATCH as u64 + 1) * 4);
        let bind_group = bind_buffers(
            &ctx.device,
            "grad_dom_bg",
            &self.layout,
            &[&config, &input_buf, &output_buf, &work, &table, &partial, &stats, &counters],
        );

        let mut plan: Plan = vec![(Kernel::LogLuminance, Step::default(), workgroups)];
        for (k, level) in levels.iter().enumerate().skip(1) {
            plan.push((Kernel::Downsample, Step::level(k), pixel_workgroups(level.len())));
        }
        for (k, level) in levels.iter().enumerate() {
            plan.push((Kernel::Gradient, Step::level(k), pixel_workgroups(level.len())));
        }
        for (k, level) in levels.iter().enumerate() {
            plan.extend(mean_steps(planes.grad + level.offset as u32, level.len(), k));
        }
        let coarsest = count - 1;
        plan.push((
            Kernel::AttenCoarsest,
            Step::level(coarsest),
            pixel_workgroups(levels[coarsest].len()),
        ));
        for k in (0..coarsest).rev() {
            plan.push((Kernel::AttenUpsample, Step::level(k), pixel_workgroups(levels[k].len())));
        }
        plan.push((Kernel::Divergence, Step::default(), workgroups));
        self.execute(ctx, &bind_group, &plan, "grad_dom_setup", None)?;

        let required = params.required_converged(n);
        let mut state = 0u32;
        let mut iterations = 0u32;
        let mut converged = false;
        while iterations < params.max_iterations {
            let batch = (params.max_iterations - iterations).min(JACOBI_BATCH as u32) as usize;
            let snapshot = Step {
                src: state,
                dst: planes.snapshot,
                count: n as u32,
                ..Default::default()
            };
            let mut plan: Plan = vec![(Kernel::CopyPlane, snapshot, workgroups)];
            let (sweeps, end) = jacobi_chain(&planes, state, batch, n, |j| j as u32);
            plan.extend(sweeps);
            self.execute(ctx, &bind_group, &plan, "grad_dom_jacobi", Some(&counters))?;

            let counts: Vec<u32> = read_buffer(ctx, &counters, batch)?;
            match counts.iter().position(|&c| c as usize >= required) {
                Some(j) if j + 1 == batch => {
                    iterations += batch as u32;
                    state = end;
                    converged = true;
                    break;
                }
                Some(j) => {
                    // redo the batch from its snapshot, stopping at sweep j
                    let (replay, end) = jacobi_chain(&planes, planes.snapshot, j + 1, n, |_| {
                        JACOBI_BATCH as u32
                    });
                    self.execute(ctx, &bind_group, &replay, "grad_dom_replay", None)?;
                    iterations += j as u32 + 1;
                    state = end;
                    converged = true;
                    break;
                }
                None => {
                    iterations += batch as u32;
                    state = end;
                }
            }
        }
        if !converged {
            warn!(iterations, "Poisson solve stopped at the iteration cap");
        }
        debug!(iterations, converged, levels = count, "GPU Poisson solve finished");

        let mut plan = mean_steps(0, n, count);
        plan.extend(mean_steps(state, n, count + 1));
        let reconstruct = Step {
            src: state,
            ..Default::default()
        };
        plan.push((Kernel::Reconstruct, reconstruct, workgroups));
        self.execute(ctx, &bind_group, &plan, "grad_dom_reconstruct", None)?;

        download_pixels(ctx, &output_buf, input.width, input.height)
    }
}
