use thiserror::Error;

/// Failures surfaced by filters and their execution backends.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{filter} expects {expected}")]
    WrongInput {
        filter: &'static str,
        expected: &'static str,
    },

    #[error("invalid parameter: {0}")]
    InvalidParams(String),

    #[error("platform index {index} out of range ({available} platforms found)")]
    PlatformOutOfRange { index: usize, available: usize },

    #[error("device index {index} out of range ({available} devices found)")]
    DeviceOutOfRange { index: usize, available: usize },

    #[error("failed to build program '{program}':\n{log}")]
    KernelBuild { program: String, log: String },

    #[error("error during operation '{operation}': {message}")]
    Backend { operation: String, message: String },

    #[error("{feature} is not supported by the {backend} backend")]
    Unsupported {
        backend: &'static str,
        feature: &'static str,
    },
}

impl FilterError {
    pub fn backend(operation: impl Into<String>, message: impl std::fmt::Display) -> Self {
        FilterError::Backend {
            operation: operation.into(),
            message: message.to_string(),
        }
    }
}
