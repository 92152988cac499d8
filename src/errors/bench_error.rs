use thiserror::Error;

use crate::backend::BackendError;

/// Top-level harness failures. Any of these aborts the run; a benchmark
/// that continued past one would report meaningless numbers.
#[derive(Error, Debug)]
pub enum BenchError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration file {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration field {field}: {message}")]
    ConfigValidation { field: String, message: String },

    #[error("layer {layer} chains from {previous}, which is not an earlier layer")]
    UnknownPreviousLayer { layer: String, previous: String },

    #[error("duplicate layer name {name}")]
    DuplicateLayerName { name: String },

    #[error("num_executions must be positive, got {value}")]
    InvalidNumExecutions { value: usize },

    #[error("backend call failed: {0}")]
    Backend(#[from] BackendError),
}

pub type BenchResult<T> = Result<T, BenchError>;
