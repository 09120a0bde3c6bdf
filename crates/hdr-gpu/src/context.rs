use std::fmt::Write as _;

use hdr_core::{DeviceType, FilterError, Params};
use tracing::info;

/// All adapters of one wgpu backend. Backends play the role of platforms
/// and adapters the role of devices when selecting by index.
pub struct Platform {
    pub backend: wgpu::Backend,
    pub adapters: Vec<wgpu::Adapter>,
}

fn accepts(filter: DeviceType, device_type: wgpu::DeviceType) -> bool {
    match filter {
        DeviceType::All => true,
        DeviceType::Cpu => device_type == wgpu::DeviceType::Cpu,
        DeviceType::Gpu => matches!(
            device_type,
            wgpu::DeviceType::DiscreteGpu
                | wgpu::DeviceType::IntegratedGpu
                | wgpu::DeviceType::VirtualGpu
        ),
    }
}

fn create_instance() -> wgpu::Instance {
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    })
}

/// Adapters grouped by backend, in enumeration order, keeping only those
/// that pass `filter`. Backends without a matching adapter are omitted.
pub fn platforms(instance: &wgpu::Instance, filter: DeviceType) -> Vec<Platform> {
    let mut platforms: Vec<Platform> = Vec::new();
    for adapter in instance.enumerate_adapters(wgpu::Backends::PRIMARY) {
        let info = adapter.get_info();
        if !accepts(filter, info.device_type) {
            continue;
        }
        match platforms.iter_mut().find(|p| p.backend == info.backend) {
            Some(platform) => platform.adapters.push(adapter),
            None => platforms.push(Platform {
                backend: info.backend,
                adapters: vec![adapter],
            }),
        }
    }
    platforms
}

/// Human-readable listing of every platform and device, as printed by
/// `--clinfo`.
pub fn describe_platforms(filter: DeviceType) -> String {
    let platforms = platforms(&create_instance(), filter);
    let mut out = String::new();
    if platforms.is_empty() {
        out.push_str("No GPU platforms found.\n");
        return out;
    }
    for (p, platform) in platforms.iter().enumerate() {
        let _ = writeln!(out, "Platform {p}: {:?}", platform.backend);
        for (d, adapter) in platform.adapters.iter().enumerate() {
            let info = adapter.get_info();
            let limits = adapter.limits();
            let _ = writeln!(out, "  Device {d}: {} ({:?})", info.name, info.device_type);
            if !info.driver.is_empty() {
                let _ = writeln!(out, "    Driver: {} {}", info.driver, info.driver_info);
            }
            let _ = writeln!(
                out,
                "    Max workgroup size: {}, max storage buffer binding: {} MiB",
                limits.max_compute_invocations_per_workgroup,
                limits.max_storage_buffer_binding_size / (1024 * 1024)
            );
        }
    }
    out
}

/// Device and queue of the adapter picked by platform and device index.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub info: wgpu::AdapterInfo,
}

impl GpuContext {
    pub async fn new(params: &Params) -> Result<Self, FilterError> {
        let instance = create_instance();
        let mut platforms = platforms(&instance, params.device_type);
        if params.platform_index >= platforms.len() {
            return Err(FilterError::PlatformOutOfRange {
                index: params.platform_index,
                available: platforms.len(),
            });
        }
        let platform = platforms.swap_remove(params.platform_index);
        let available = platform.adapters.len();
        let adapter = platform
            .adapters
            .into_iter()
            .nth(params.device_index)
            .ok_or(FilterError::DeviceOutOfRange {
                index: params.device_index,
                available,
            })?;

        let info = adapter.get_info();
        info!(
            adapter = info.name,
            backend = ?info.backend,
            device_type = ?info.device_type,
            "selected GPU adapter"
        );

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("hdr"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                ..Default::default()
            })
            .await
            .map_err(|e| FilterError::backend("request device", e))?;

        Ok(Self {
            device,
            queue,
            info,
        })
    }

    /// Largest storage buffer a single binding may cover, in bytes.
    pub fn max_binding_size(&self) -> u64 {
        u64::from(self.device.limits().max_storage_buffer_binding_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_type_filter() {
        use wgpu::DeviceType as W;
        assert!(accepts(DeviceType::All, W::Cpu));
        assert!(accepts(DeviceType::Cpu, W::Cpu));
        assert!(!accepts(DeviceType::Cpu, W::DiscreteGpu));
        assert!(accepts(DeviceType::Gpu, W::IntegratedGpu));
        assert!(!accepts(DeviceType::Gpu, W::Cpu));
        assert!(!accepts(DeviceType::Gpu, W::Other));
    }

    #[test]
    fn platform_index_past_the_end_is_rejected() {
        let params = Params {
            platform_index: 99,
            ..Default::default()
        };
        let err = pollster::block_on(GpuContext::new(&params))
            .err()
            .expect("no machine has 100 wgpu backends");
        assert!(matches!(err, FilterError::PlatformOutOfRange { index: 99, .. }));
    }
}
