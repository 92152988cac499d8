pub mod bench_error;

pub use crate::backend::BackendError;
pub use bench_error::{BenchError, BenchResult};
