use tracing::info;

use crate::error::FilterError;
use crate::filter::{Backend, FilterKind};
use crate::params::{DeviceType, Interop, Params};
use crate::pixel_buf::{FilterInput, PixelBuffer};
use crate::reduce::{DEFAULT_LOCAL_SIZE, LaunchConfig};
use crate::status::StatusSink;

/// Runs the data-parallel path on a dedicated rayon pool.
///
/// The host exposes exactly one platform with one CPU device, so any other
/// selection is out of range.
pub struct HostBackend {
    pool: rayon::ThreadPool,
    local: usize,
}

impl HostBackend {
    /// Select the host device described by `params`. Selection errors are
    /// also reported on `status`.
    pub fn new(params: &Params, status: &StatusSink) -> Result<Self, FilterError> {
        let backend = Self::select(params);
        if let Err(err) = &backend {
            status.report(&err.to_string());
        }
        backend
    }

    fn select(params: &Params) -> Result<Self, FilterError> {
        if params.platform_index != 0 {
            return Err(FilterError::PlatformOutOfRange {
                index: params.platform_index,
                available: 1,
            });
        }
        let available = if params.device_type == DeviceType::Gpu { 0 } else { 1 };
        if params.device_index >= available {
            return Err(FilterError::DeviceOutOfRange {
                index: params.device_index,
                available,
            });
        }
        if params.interop == Interop::Texture {
            return Err(FilterError::Unsupported {
                backend: "host",
                feature: "texture interop",
            });
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(params.threads)
            .thread_name(|i| format!("hdr-host-{i}"))
            .build()
            .map_err(|e| FilterError::backend("create thread pool", e))?;
        info!(threads = pool.current_num_threads(), "host backend ready");
        Ok(Self {
            pool,
            local: DEFAULT_LOCAL_SIZE,
        })
    }

    /// Override the work-group size (lanes per group).
    pub fn with_local_size(mut self, local: usize) -> Self {
        self.local = local.max(1);
        self
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl Backend for HostBackend {
    fn name(&self) -> &str {
        "host"
    }

    fn run(
        &mut self,
        kind: &FilterKind,
        input: &FilterInput,
        status: &StatusSink,
    ) -> Result<PixelBuffer, FilterError> {
        let pixels = input.width() as usize * input.height() as usize;
        let launch = LaunchConfig::for_items(pixels, self.local);
        status.report(&format!(
            "Using device: host CPU ({} threads)",
            self.pool.current_num_threads()
        ));
        status.report(&format!(
            "Local size: {} Global size: {}",
            launch.local,
            launch.global()
        ));
        let local = self.local;
        self.pool.install(|| kind.host_parallel(input, local))
    }
}
