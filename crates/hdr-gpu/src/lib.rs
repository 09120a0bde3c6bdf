//! wgpu compute backend for the HDR filters.

pub mod backend;
pub mod buffer;
pub mod context;
pub mod kernels;
pub mod program;
pub mod texture;

pub use backend::GpuBackend;
pub use context::{GpuContext, describe_platforms};
pub use texture::GpuTexture;
