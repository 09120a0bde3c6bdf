use hdr_core::{
    Backend, FilterError, FilterInput, FilterKind, Interop, Params, PixelBuffer, StatusSink,
};
use tracing::{debug, info};

use crate::context::GpuContext;
use crate::kernels::{
    GradDomKernels, HistEqKernels, ReinhardGlobalKernels, ReinhardLocalKernels, StitchingKernels,
};
use crate::texture::GpuTexture;

/// The data-parallel path on a wgpu adapter. Every program is compiled up
/// front so that build failures surface before any filter runs.
pub struct GpuBackend {
    ctx: GpuContext,
    interop: Interop,
    hist_eq: HistEqKernels,
    reinhard_global: ReinhardGlobalKernels,
    reinhard_local: ReinhardLocalKernels,
    grad_dom: GradDomKernels,
    stitching: StitchingKernels,
}

impl GpuBackend {
    pub async fn new(params: &Params, status: &StatusSink) -> Result<Self, FilterError> {
        let built = Self::select(params, status).await;
        if let Err(err) = &built {
            status.report(&err.to_string());
        }
        built
    }

    async fn select(params: &Params, status: &StatusSink) -> Result<Self, FilterError> {
        let ctx = GpuContext::new(params).await?;
        status.report(&format!("Using device: {}", ctx.info.name));
        Self::build(ctx, params.interop).await
    }

    async fn build(ctx: GpuContext, interop: Interop) -> Result<Self, FilterError> {
        let hist_eq = HistEqKernels::new(&ctx).await?;
        let reinhard_global = ReinhardGlobalKernels::new(&ctx).await?;
        let reinhard_local = ReinhardLocalKernels::new(&ctx).await?;
        let grad_dom = GradDomKernels::new(&ctx).await?;
        let stitching = StitchingKernels::new(&ctx).await?;
        info!(adapter = ctx.info.name, ?interop, "GPU backend ready");
        Ok(Self {
            ctx,
            interop,
            hist_eq,
            reinhard_global,
            reinhard_local,
            grad_dom,
            stitching,
        })
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    fn dispatch(
        &self,
        kind: &FilterKind,
        input: &FilterInput,
        status: &StatusSink,
    ) -> Result<PixelBuffer, FilterError> {
        let ctx = &self.ctx;
        match kind {
            FilterKind::HistEq(p) => self.hist_eq.run(ctx, kind.single_input(input)?, p, status),
            FilterKind::ReinhardGlobal(p) => {
                self.reinhard_global
                    .run(ctx, kind.single_input(input)?, p, status)
            }
            FilterKind::ReinhardLocal(p) => {
                self.reinhard_local
                    .run(ctx, kind.single_input(input)?, p, status)
            }
            FilterKind::GradDom(p) => self.grad_dom.run(ctx, kind.single_input(input)?, p, status),
            FilterKind::Stitching(p) => {
                self.stitching
                    .run(ctx, kind.exposure_input(input)?, p, status)
            }
        }
    }

    /// Run `f` with device errors captured. Validation and out-of-memory
    /// errors raised while it records work are returned as backend errors.
    fn scoped<T>(
        &self,
        operation: &str,
        f: impl FnOnce() -> Result<T, FilterError>,
    ) -> Result<T, FilterError> {
        let device = &self.ctx.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let result = f();
        let validation = pollster::block_on(device.pop_error_scope());
        let oom = pollster::block_on(device.pop_error_scope());
        if let Some(error) = validation.or(oom) {
            return Err(FilterError::backend(operation, error));
        }
        result
    }

    /// Run a single-image filter on a device texture and return the result
    /// as a new texture on the same device.
    pub fn run_texture(
        &self,
        kind: &FilterKind,
        input: &GpuTexture,
        status: &StatusSink,
    ) -> Result<GpuTexture, FilterError> {
        if kind.takes_exposures() {
            return Err(FilterError::WrongInput {
                filter: kind.name(),
                expected: "an exposure set",
            });
        }
        self.scoped(kind.name(), || {
            let pixels = FilterInput::Single(input.download(&self.ctx)?);
            let output = self.dispatch(kind, &pixels, status)?;
            GpuTexture::from_pixel_buffer(&self.ctx, &output, "filter_output")
        })
    }
}

impl Backend for GpuBackend {
    fn name(&self) -> &str {
        "gpu"
    }

    fn run(
        &mut self,
        kind: &FilterKind,
        input: &FilterInput,
        status: &StatusSink,
    ) -> Result<PixelBuffer, FilterError> {
        match (self.interop, input) {
            (Interop::Texture, FilterInput::Single(image)) if image.pixel_count() > 0 => {
                debug!(filter = kind.name(), "running through texture interop");
                let texture = self.scoped("upload texture", || {
                    GpuTexture::from_pixel_buffer(&self.ctx, image, "filter_input")
                })?;
                let output = self.run_texture(kind, &texture, status)?;
                self.scoped("download texture", || output.download(&self.ctx))
            }
            _ => self.scoped(kind.name(), || self.dispatch(kind, input, status)),
        }
    }
}
