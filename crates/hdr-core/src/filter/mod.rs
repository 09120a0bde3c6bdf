pub mod cache;
pub mod verify;

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::FilterError;
use crate::filters::{
    GradDomParams, HistEqParams, ReinhardGlobalParams, ReinhardLocalParams, StitchingParams,
    grad_dom, hist_eq, reinhard_global, reinhard_local, stitching,
};
use crate::params::{FilterSettings, Params};
use crate::pixel_buf::{ExposureSet, FilterInput, PixelBuffer};
use crate::status::StatusSink;

pub use cache::ReferenceCache;
pub use verify::{MAX_REPORTED_MISMATCHES, Mismatch, VerifyReport};

/// An execution engine for the data-parallel path of every filter.
pub trait Backend {
    fn name(&self) -> &str;

    /// Run `kind` on `input`. Launch geometry and device details go to
    /// `status`.
    fn run(
        &mut self,
        kind: &FilterKind,
        input: &FilterInput,
        status: &StatusSink,
    ) -> Result<PixelBuffer, FilterError>;
}

/// The five filters and their tuning.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterKind {
    HistEq(HistEqParams),
    ReinhardGlobal(ReinhardGlobalParams),
    ReinhardLocal(ReinhardLocalParams),
    GradDom(GradDomParams),
    Stitching(StitchingParams),
}

impl FilterKind {
    /// Names accepted on the command line, in usage order.
    pub const CLI_NAMES: [&'static str; 5] = [
        "histEq",
        "reinhardGlobal",
        "reinhardLocal",
        "gradDom",
        "stitching",
    ];

    pub fn from_cli_name(name: &str, settings: &FilterSettings) -> Option<Self> {
        let kind = match name {
            "histEq" => FilterKind::HistEq(settings.hist_eq.clone()),
            "reinhardGlobal" => FilterKind::ReinhardGlobal(settings.reinhard_global.clone()),
            "reinhardLocal" => FilterKind::ReinhardLocal(settings.reinhard_local.clone()),
            "gradDom" => FilterKind::GradDom(settings.grad_dom.clone()),
            "stitching" => FilterKind::Stitching(settings.stitching.clone()),
            _ => return None,
        };
        Some(kind)
    }

    /// Display name, also used for output file naming.
    pub fn name(&self) -> &'static str {
        match self {
            FilterKind::HistEq(_) => "HistEq",
            FilterKind::ReinhardGlobal(_) => "ReinhardGlobal",
            FilterKind::ReinhardLocal(_) => "ReinhardLocal",
            FilterKind::GradDom(_) => "GradDom",
            FilterKind::Stitching(_) => "Stitching",
        }
    }

    /// Whether the filter consumes an exposure bracket rather than one image.
    pub fn takes_exposures(&self) -> bool {
        matches!(self, FilterKind::Stitching(_))
    }

    pub fn validate(&self) -> Result<(), FilterError> {
        match self {
            FilterKind::HistEq(p) => p.validate(),
            FilterKind::ReinhardGlobal(p) => p.validate(),
            FilterKind::ReinhardLocal(p) => p.validate(),
            FilterKind::GradDom(p) => p.validate(),
            FilterKind::Stitching(p) => p.validate(),
        }
    }

    /// The image a tone mapper operates on.
    pub fn single_input<'a>(&self, input: &'a FilterInput) -> Result<&'a PixelBuffer, FilterError> {
        input.single().ok_or(FilterError::WrongInput {
            filter: self.name(),
            expected: "a single image",
        })
    }

    /// The bracket the stitcher fuses.
    pub fn exposure_input<'a>(
        &self,
        input: &'a FilterInput,
    ) -> Result<&'a ExposureSet, FilterError> {
        input.exposures().ok_or(FilterError::WrongInput {
            filter: self.name(),
            expected: "an exposure set",
        })
    }

    /// Sequential ground truth.
    pub fn reference(&self, input: &FilterInput) -> Result<PixelBuffer, FilterError> {
        let output = match self {
            FilterKind::HistEq(p) => hist_eq::reference(self.single_input(input)?, p),
            FilterKind::ReinhardGlobal(p) => {
                reinhard_global::reference(self.single_input(input)?, p)
            }
            FilterKind::ReinhardLocal(p) => reinhard_local::reference(self.single_input(input)?, p),
            FilterKind::GradDom(p) => grad_dom::reference(self.single_input(input)?, p),
            FilterKind::Stitching(p) => stitching::reference(self.exposure_input(input)?, p),
        };
        Ok(output)
    }

    /// Data-parallel host implementation with work-groups of `local` lanes.
    /// Must run inside the caller's rayon pool.
    pub fn host_parallel(
        &self,
        input: &FilterInput,
        local: usize,
    ) -> Result<PixelBuffer, FilterError> {
        let output = match self {
            FilterKind::HistEq(p) => hist_eq::parallel(self.single_input(input)?, p, local),
            FilterKind::ReinhardGlobal(p) => {
                reinhard_global::parallel(self.single_input(input)?, p, local)
            }
            FilterKind::ReinhardLocal(p) => {
                reinhard_local::parallel(self.single_input(input)?, p, local)
            }
            FilterKind::GradDom(p) => grad_dom::parallel(self.single_input(input)?, p, local),
            FilterKind::Stitching(p) => stitching::parallel(self.exposure_input(input)?, p, local),
        };
        Ok(output)
    }
}

/// How [`Filter::run`] should execute.
pub enum Method<'a> {
    Reference,
    Parallel(&'a mut dyn Backend),
}

/// Output and timing of one [`Filter::run`].
#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub output: PixelBuffer,
    pub elapsed: Duration,
    /// Present when the parallel path was verified.
    pub verification: Option<VerifyReport>,
}

/// A configured filter with its reference cache and status sink.
#[derive(Debug)]
pub struct Filter {
    kind: FilterKind,
    cache: ReferenceCache,
    status: StatusSink,
}

impl Filter {
    pub fn new(kind: FilterKind) -> Self {
        Self {
            kind,
            cache: ReferenceCache::new(),
            status: StatusSink::silent(),
        }
    }

    pub fn with_status(mut self, status: StatusSink) -> Self {
        self.status = status;
        self
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn kind(&self) -> &FilterKind {
        &self.kind
    }

    pub fn clear_reference_cache(&mut self) {
        self.cache.clear();
    }

    /// Reference output for `input`, served from the cache when the input
    /// fingerprint matches the last computed one.
    pub fn run_reference(&mut self, input: &FilterInput) -> Result<PixelBuffer, FilterError> {
        self.kind.validate()?;
        let key = input.fingerprint();
        if let Some(cached) = self.cache.get(&key) {
            debug!(filter = self.name(), "reference cache hit");
            return Ok(cached.clone());
        }
        let output = self.kind.reference(input)?;
        self.cache.store(key, output.clone());
        Ok(output)
    }

    pub fn run(
        &mut self,
        method: Method<'_>,
        input: &FilterInput,
        params: &Params,
    ) -> Result<RunOutcome, FilterError> {
        self.kind.validate()?;
        match method {
            Method::Reference => {
                self.status.report("Running reference...");
                let start = Instant::now();
                let output = self.run_reference(input)?;
                let elapsed = start.elapsed();
                self.status
                    .report(&format!("Reference took {:.3} ms", elapsed.as_secs_f64() * 1e3));
                Ok(RunOutcome {
                    output,
                    elapsed,
                    verification: None,
                })
            }
            Method::Parallel(backend) => {
                self.status
                    .report(&format!("Running {} implementation...", backend.name()));
                let start = Instant::now();
                let output = backend.run(&self.kind, input, &self.status)?;
                let elapsed = start.elapsed();
                self.status.report(&format!(
                    "{} implementation took {:.3} ms",
                    backend.name(),
                    elapsed.as_secs_f64() * 1e3
                ));

                let verification = if params.verify {
                    self.status.report("Verifying results...");
                    let reference = self.run_reference(input)?;
                    Some(self.verify(&reference, &output, params.tolerance))
                } else {
                    None
                };
                Ok(RunOutcome {
                    output,
                    elapsed,
                    verification,
                })
            }
        }
    }

    /// Compare `output` against `reference`, reporting the first mismatches
    /// through the status sink.
    pub fn verify(
        &self,
        reference: &PixelBuffer,
        output: &PixelBuffer,
        tolerance: f32,
    ) -> VerifyReport {
        let report = verify::compare(reference, output, tolerance);
        if !report.dimensions_match {
            self.status.report(&format!(
                "Output is {}x{}, reference is {}x{}",
                output.width, output.height, reference.width, reference.height
            ));
        }
        for m in &report.reported {
            self.status.report(&format!(
                "Mismatch at ({},{},{}): {} vs {}",
                m.x, m.y, m.channel, m.expected, m.actual
            ));
        }
        if report.suppressed() {
            self.status.report("Suppressing further errors");
        }
        if report.passed() {
            self.status.report("Verification passed.");
        } else {
            warn!(
                filter = self.name(),
                mismatches = report.mismatches,
                max_diff = report.max_diff,
                "verification failed"
            );
            self.status.report("Verification failed.");
        }
        report
    }
}
