use std::fmt::Write as _;

use hdr_core::FilterError;
use tracing::debug;

/// Binding type of one slot in a bind group layout.
#[derive(Clone, Copy, Debug)]
pub enum BindingKind {
    StorageRead,
    StorageReadWrite,
    Uniform,
    /// Uniform addressed with a dynamic offset into a table of steps.
    StepUniform,
}

pub fn layout_entry(binding: u32, kind: BindingKind) -> wgpu::BindGroupLayoutEntry {
    let (ty, has_dynamic_offset) = match kind {
        BindingKind::StorageRead => (wgpu::BufferBindingType::Storage { read_only: true }, false),
        BindingKind::StorageReadWrite => {
            (wgpu::BufferBindingType::Storage { read_only: false }, false)
        }
        BindingKind::Uniform => (wgpu::BufferBindingType::Uniform, false),
        BindingKind::StepUniform => (wgpu::BufferBindingType::Uniform, true),
    };
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Bind group layout with one entry per kind, numbered from 0.
pub fn create_layout(
    device: &wgpu::Device,
    label: &str,
    bindings: &[BindingKind],
) -> wgpu::BindGroupLayout {
    let entries: Vec<_> = bindings
        .iter()
        .enumerate()
        .map(|(i, kind)| layout_entry(i as u32, *kind))
        .collect();
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &entries,
    })
}

pub fn create_pipeline_layout(
    device: &wgpu::Device,
    label: &str,
    groups: &[&wgpu::BindGroupLayout],
) -> wgpu::PipelineLayout {
    device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: groups,
        push_constant_ranges: &[],
    })
}

fn compilation_log(info: &wgpu::CompilationInfo) -> String {
    let mut log = String::new();
    for message in &info.messages {
        let kind = match message.message_type {
            wgpu::CompilationMessageType::Error => "error",
            wgpu::CompilationMessageType::Warning => "warning",
            wgpu::CompilationMessageType::Info => "info",
        };
        match &message.location {
            Some(loc) => {
                let _ = writeln!(
                    log,
                    "{kind} at {}:{}: {}",
                    loc.line_number, loc.line_position, message.message
                );
            }
            None => {
                let _ = writeln!(log, "{kind}: {}", message.message);
            }
        }
    }
    log
}

/// One compiled WGSL module. Kernel structs pull their pipelines out of it
/// inside [`Program::build`], so every handle they hold exists once the
/// build succeeds.
pub struct Program<'a> {
    device: &'a wgpu::Device,
    name: &'a str,
    module: wgpu::ShaderModule,
}

impl<'a> Program<'a> {
    /// Compile `source` and hand the module to `pipelines`. Compiler and
    /// validation messages from either step end up in the returned error.
    pub async fn build<T>(
        device: &'a wgpu::Device,
        name: &'a str,
        source: &str,
        pipelines: impl FnOnce(&Program<'a>) -> T,
    ) -> Result<T, FilterError> {
        debug!(program = name, "compiling compute shader");
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(name),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let program = Program {
            device,
            name,
            module,
        };
        let built = pipelines(&program);

        let info = program.module.get_compilation_info().await;
        if let Some(error) = device.pop_error_scope().await {
            let mut log = compilation_log(&info);
            log.push_str(&error.to_string());
            return Err(FilterError::KernelBuild {
                program: name.to_string(),
                log,
            });
        }
        Ok(built)
    }

    /// Compute pipeline for `entry`. A missing entry point is a validation
    /// error reported by [`Program::build`].
    pub fn pipeline(&self, entry: &str, layout: &wgpu::PipelineLayout) -> wgpu::ComputePipeline {
        self.device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&format!("{}::{entry}", self.name)),
                layout: Some(layout),
                module: &self.module,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            })
    }
}
