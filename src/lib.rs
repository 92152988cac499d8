//! Micro-benchmark harness for neural-network compute primitives.
//!
//! This library measures the execution latency of individual compute
//! primitives (convolution, pooling, activation, LRN, fully-connected,
//! softmax) by driving an accelerator math library once per primitive,
//! either in isolation or chained into a short pipeline where consecutive
//! layers share buffers through a chunk registry.
//!
//! The accelerator library itself sits behind the [`backend::Backend`]
//! trait; a CPU [`backend::ReferenceBackend`] ships with the crate so the
//! harness runs and is testable without device hardware.

pub mod backend;
pub mod config;
pub mod data_manager;
pub mod errors;
pub mod handle;
pub mod layers;
pub mod params;
pub mod runner;
pub mod shape;

/// Buffer element type. 32-bit by default, 64-bit with the `f64` feature.
#[cfg(not(feature = "f64"))]
pub type Elem = f32;
/// Buffer element type. 32-bit by default, 64-bit with the `f64` feature.
#[cfg(feature = "f64")]
pub type Elem = f64;

pub use config::{BenchmarkConfig, LayerConfig, LayerParams};
pub use data_manager::{Data, DataManager};
pub use handle::Handle;
pub use layers::{create_layer, Layer, LayerKind};
pub use runner::BenchmarkRunner;
pub use shape::DataDim;
