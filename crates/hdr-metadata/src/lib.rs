pub mod exposure;

pub use exposure::{ExposureInfo, relative_exposure};
