//! Sequential reference and host data-parallel implementations of each
//! filter. Both paths share the per-pixel arithmetic; they differ only in
//! how reductions and sweeps are scheduled.

pub mod grad_dom;
pub mod hist_eq;
pub mod reinhard_global;
pub mod reinhard_local;
pub mod stitching;

pub use grad_dom::GradDomParams;
pub use hist_eq::HistEqParams;
pub use reinhard_global::ReinhardGlobalParams;
pub use reinhard_local::ReinhardLocalParams;
pub use stitching::StitchingParams;
