use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::builder::PossibleValuesParser;
use clap::{Parser, ValueEnum};
use hdr_core::{
    DeviceType, Filter, FilterInput, FilterKind, FilterSettings, HostBackend, Interop, Method,
    Params, StatusSink, codec,
};
use hdr_gpu::GpuBackend;
use tracing::info;

pub const DEFAULT_IMAGE: &str = "test_images/lena-300x300.jpg";
pub const DEFAULT_BRACKET: &str = "test_images/exposures";

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum MethodArg {
    /// Sequential ground truth
    Reference,
    /// Data-parallel on a rayon thread pool
    Host,
    /// Data-parallel on a wgpu adapter
    Gpu,
}

#[derive(Debug, Parser)]
#[command(name = "hdr")]
#[command(about = "HDR tone mapping and exposure fusion on the CPU and GPU")]
#[command(version)]
pub struct Cli {
    /// Filter to run
    #[arg(
        value_parser = PossibleValuesParser::new(FilterKind::CLI_NAMES),
        required_unless_present = "clinfo"
    )]
    pub filter: Option<String>,

    /// Implementation to run
    #[arg(value_enum, required_unless_present = "clinfo")]
    pub method: Option<MethodArg>,

    /// Input image, or a directory of exposures for stitching
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// Platform and device index as PLATFORM:DEVICE
    #[arg(long, value_name = "P:D", value_parser = parse_device)]
    pub cldevice: Option<(usize, usize)>,

    /// Restrict device selection to one kind of device
    #[arg(long, default_value = "all", value_parser = parse_device_type)]
    pub device_type: DeviceType,

    /// List platforms and devices, then exit
    #[arg(long)]
    pub clinfo: bool,

    /// Skip comparing the parallel output with the reference
    #[arg(long)]
    pub no_verify: bool,

    /// Largest accepted per-channel difference during verification
    #[arg(long, default_value_t = hdr_core::params::DEFAULT_TOLERANCE)]
    pub tolerance: f32,

    /// JSON file overriding per-filter parameters
    #[arg(long)]
    pub params: Option<PathBuf>,

    /// Directory output images are written to
    #[arg(long, default_value = "output_images")]
    pub output: PathBuf,

    /// Host worker threads (0 = one per core)
    #[arg(long, default_value_t = 0)]
    pub threads: usize,

    /// Pass images to the GPU as textures instead of buffers
    #[arg(long)]
    pub interop: bool,
}

/// Parse `P:D`, both parts non-negative decimal integers.
fn parse_device(s: &str) -> Result<(usize, usize), String> {
    let invalid = || format!("'{s}' is not PLATFORM:DEVICE (e.g. 0:1)");
    let (platform, device) = s.split_once(':').ok_or_else(invalid)?;
    let index = |part: &str| {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        part.parse::<usize>().map_err(|_| invalid())
    };
    Ok((index(platform)?, index(device)?))
}

fn parse_device_type(s: &str) -> Result<DeviceType, String> {
    s.parse()
}

impl Cli {
    pub fn backend_params(&self) -> Params {
        let (platform_index, device_index) = self.cldevice.unwrap_or((0, 0));
        Params {
            platform_index,
            device_index,
            device_type: self.device_type,
            verify: !self.no_verify,
            tolerance: self.tolerance,
            interop: if self.interop {
                Interop::Texture
            } else {
                Interop::Buffer
            },
            threads: self.threads,
        }
    }
}

fn load_input(kind: &FilterKind, path: &Path) -> Result<FilterInput> {
    if kind.takes_exposures() {
        if !path.is_dir() {
            bail!("{} expects a directory of exposures: {}", kind.name(), path.display());
        }
        Ok(codec::load_exposure_set(path)?.into())
    } else {
        Ok(codec::decode(path)?.into())
    }
}

/// Run one filter as described by `cli`, printing status lines to stdout.
pub async fn run(cli: Cli) -> Result<()> {
    let status = StatusSink::new(|msg| println!("{msg}"));

    if cli.clinfo {
        print!("{}", hdr_gpu::describe_platforms(cli.device_type));
        return Ok(());
    }
    let (Some(name), Some(method)) = (cli.filter.as_deref(), cli.method) else {
        bail!("FILTER and METHOD are required");
    };

    let settings = match &cli.params {
        Some(path) => FilterSettings::load(path)?,
        None => FilterSettings::default(),
    };
    let kind = FilterKind::from_cli_name(name, &settings)
        .with_context(|| format!("unknown filter '{name}'"))?;
    let params = cli.backend_params();

    let image = cli.image.clone().unwrap_or_else(|| {
        PathBuf::from(if kind.takes_exposures() {
            DEFAULT_BRACKET
        } else {
            DEFAULT_IMAGE
        })
    });
    let input = load_input(&kind, &image)?;
    info!(filter = kind.name(), ?method, image = %image.display(), "starting run");

    let mut filter = Filter::new(kind).with_status(status.clone());
    let outcome = match method {
        MethodArg::Reference => filter.run(Method::Reference, &input, &params)?,
        MethodArg::Host => {
            let mut backend = HostBackend::new(&params, &status)?;
            filter.run(Method::Parallel(&mut backend), &input, &params)?
        }
        MethodArg::Gpu => {
            let mut backend = GpuBackend::new(&params, &status).await?;
            filter.run(Method::Parallel(&mut backend), &input, &params)?
        }
    };

    std::fs::create_dir_all(&cli.output)
        .with_context(|| format!("failed to create {}", cli.output.display()))?;
    let path = codec::output_path(&cli.output, &image, filter.name());
    codec::encode(&outcome.output, &path)?;
    status.report(&format!("Wrote {}", path.display()));
    Ok(())
}
