pub mod codec;
pub mod color;
pub mod error;
pub mod filter;
pub mod filters;
pub mod host;
pub mod params;
pub mod pixel_buf;
pub mod pyramid;
pub mod reduce;
pub mod status;

pub use error::FilterError;
pub use filter::{Backend, Filter, FilterKind, Method, RunOutcome, VerifyReport};
pub use host::HostBackend;
pub use params::{DeviceType, FilterSettings, Interop, Params};
pub use pixel_buf::{Exposure, ExposureSet, FilterInput, PixelBuffer};
pub use status::StatusSink;
