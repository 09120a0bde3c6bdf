use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::filters::{
    GradDomParams, HistEqParams, ReinhardGlobalParams, ReinhardLocalParams, StitchingParams,
};

/// Largest per-channel difference accepted when verifying at 8-bit
/// precision.
pub const DEFAULT_TOLERANCE: f32 = 1.0 / 255.0;

/// Which kind of device a backend may select.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    #[default]
    All,
    Cpu,
    Gpu,
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(DeviceType::All),
            "cpu" => Ok(DeviceType::Cpu),
            "gpu" => Ok(DeviceType::Gpu),
            other => Err(format!("unknown device type '{other}' (expected all, cpu or gpu)")),
        }
    }
}

/// How the parallel path receives its input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interop {
    /// Input and output are host pixel buffers.
    #[default]
    Buffer,
    /// Input and output are device-resident textures.
    Texture,
}

/// Run-wide options shared by every filter and backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    pub platform_index: usize,
    pub device_index: usize,
    pub device_type: DeviceType,
    pub verify: bool,
    pub tolerance: f32,
    pub interop: Interop,
    /// Host worker threads; 0 lets rayon decide.
    pub threads: usize,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            platform_index: 0,
            device_index: 0,
            device_type: DeviceType::All,
            verify: true,
            tolerance: DEFAULT_TOLERANCE,
            interop: Interop::Buffer,
            threads: 0,
        }
    }
}

/// Per-filter tuning loaded from a JSON file. Missing sections and fields
/// keep their defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    pub hist_eq: HistEqParams,
    pub reinhard_global: ReinhardGlobalParams,
    pub reinhard_local: ReinhardLocalParams,
    pub grad_dom: GradDomParams,
    pub stitching: StitchingParams,
}

impl FilterSettings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let settings: FilterSettings = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(settings)
    }
}
