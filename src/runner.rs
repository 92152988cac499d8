//! Benchmark execution: builds the layer list from a configuration,
//! times each layer's kernel calls and prints an analysis report.

use std::time::Instant;

use log::info;

use crate::backend::{BackendError, WorkspaceStats};
use crate::config::BenchmarkConfig;
use crate::data_manager::DataManager;
use crate::errors::{BenchError, BenchResult};
use crate::handle::Handle;
use crate::layers::{create_layer, Layer};

/// Timing measurements for one benchmarked method.
#[derive(Debug, Clone)]
pub struct PerformanceResults {
    pub method: String,
    pub total_time_ns: u128,
    pub average_time_ns: u128,
    pub average_time_ms: f64,
    pub num_executions: usize,
}

impl PerformanceResults {
    pub fn new(method: String, total_time_ns: u128, num_executions: usize) -> Self {
        let average_time_ns = total_time_ns / num_executions as u128;
        let average_time_ms = average_time_ns as f64 / 1_000_000.0;

        Self {
            method,
            total_time_ns,
            average_time_ns,
            average_time_ms,
            num_executions,
        }
    }

    pub fn overhead_ratio(&self, baseline: &PerformanceResults) -> f64 {
        self.average_time_ns as f64 / baseline.average_time_ns as f64
    }

    pub fn overhead_percentage(&self, baseline: &PerformanceResults) -> f64 {
        (self.overhead_ratio(baseline) - 1.0) * 100.0
    }
}

/// Times `benchmark_fn` over `num_executions` calls after the warm-up
/// runs. Any failing call aborts the measurement immediately.
pub fn benchmark_method<F>(
    name: &str,
    warmup_runs: usize,
    num_executions: usize,
    mut benchmark_fn: F,
) -> Result<PerformanceResults, BackendError>
where
    F: FnMut() -> Result<(), BackendError>,
{
    info!("Benchmarking {} ({} executions)...", name, num_executions);

    // Warm-up runs to ensure consistent measurement
    for _ in 0..warmup_runs {
        benchmark_fn()?;
    }

    let start = Instant::now();
    for i in 0..num_executions {
        benchmark_fn()?;
        if num_executions >= 10 && (i + 1) % (num_executions / 10) == 0 {
            info!("  Progress: {}/{}", i + 1, num_executions);
        }
    }
    let duration = start.elapsed();

    Ok(PerformanceResults::new(
        name.to_string(),
        duration.as_nanos(),
        num_executions,
    ))
}

/// Prints detailed per-layer timing analysis.
pub fn print_performance_analysis(results: &[PerformanceResults]) {
    if results.is_empty() {
        return;
    }

    println!("\n{}", "=".repeat(80));
    println!("Detailed Results");
    println!("{}", "=".repeat(80));

    for result in results {
        println!("\n📊 {}", result.method);
        println!(
            "   Average time: {:.3} ms ({} ns)",
            result.average_time_ms, result.average_time_ns
        );
        println!(
            "   Total time: {:.3} ms",
            result.total_time_ns as f64 / 1_000_000.0
        );
        println!("   Executions: {}", result.num_executions);
    }

    println!("\n{}", "=".repeat(80));
    println!("Performance Analysis");
    println!("{}", "=".repeat(80));

    println!("\n🚀 Speed Rankings (fastest to slowest):");
    let mut sorted_results = results.to_vec();
    sorted_results.sort_by_key(|r| r.average_time_ns);

    for (i, result) in sorted_results.iter().enumerate() {
        let rank_marker = match i {
            0 => "🥇",
            1 => "🥈",
            2 => "🥉",
            _ => "  ",
        };
        println!(
            "   {} {}: {:.3} ms",
            rank_marker, result.method, result.average_time_ms
        );
    }

    if sorted_results.len() > 1 {
        let fastest = &sorted_results[0];
        let slowest = &sorted_results[sorted_results.len() - 1];
        println!(
            "\n📈 Slowest vs fastest layer: {:.2}x ({:.1}%)",
            slowest.overhead_ratio(fastest),
            slowest.overhead_percentage(fastest)
        );
    }
}

/// Drives one benchmark run: owns the backend handle, the chunk registry
/// and the fully set-up layer list.
pub struct BenchmarkRunner {
    config: BenchmarkConfig,
    handle: Handle,
    manager: DataManager,
    layers: Vec<Box<dyn Layer>>,
}

impl BenchmarkRunner {
    /// Builds and sets up every configured layer over the reference
    /// backend. Chained layers are bound to the previous layer's outputs
    /// before their own setup runs.
    pub fn from_config(config: BenchmarkConfig) -> BenchResult<Self> {
        Self::with_handle(config, Handle::reference())
    }

    pub fn with_handle(config: BenchmarkConfig, handle: Handle) -> BenchResult<Self> {
        config.validate()?;

        let mut manager = DataManager::new();
        let mut layers: Vec<Box<dyn Layer>> = Vec::new();
        for (layer_id, layer_config) in config.layers.iter().enumerate() {
            let mut layer = create_layer(layer_id, layer_config);
            if let Some(previous_name) = &layer_config.previous {
                let previous = layers
                    .iter()
                    .find(|l| l.base().name() == previous_name)
                    .ok_or_else(|| BenchError::UnknownPreviousLayer {
                        layer: layer_config.name.clone(),
                        previous: previous_name.clone(),
                    })?;
                layer.base_mut().bind_input(
                    previous.output_dim(),
                    previous.top_chunk_ids(),
                    previous.top_diff_chunk_ids(),
                    &manager,
                );
            }
            layer.setup(&handle, &mut manager)?;
            info!(
                "layer {} ({:?}) set up, output shape {:?}",
                layer.base().name(),
                layer.kind(),
                layer.output_dim()
            );
            layers.push(layer);
        }

        Ok(Self {
            config,
            handle,
            manager,
            layers,
        })
    }

    /// Times every layer's forward pass (and backward pass when
    /// configured) and prints the analysis report.
    pub fn run(&mut self) -> BenchResult<Vec<PerformanceResults>> {
        info!("{}", "=".repeat(80));
        info!("Layer Benchmark: {}", self.config.name);
        info!(
            "{} layer(s), {} executions each, {} warm-up runs",
            self.layers.len(),
            self.config.num_executions,
            self.config.warmup_runs
        );
        info!("{}", "=".repeat(80));

        let handle = &self.handle;
        let warmup_runs = self.config.warmup_runs;
        let num_executions = self.config.num_executions;
        let benchmark_backward = self.config.benchmark_backward;

        let mut results = Vec::new();
        for layer in &mut self.layers {
            let name = layer.base().name().to_string();
            results.push(benchmark_method(&name, warmup_runs, num_executions, || {
                layer.forward(handle)
            })?);

            if benchmark_backward {
                let backward_name = format!("{} (backward)", name);
                results.push(benchmark_method(
                    &backward_name,
                    warmup_runs,
                    num_executions,
                    || layer.backward(handle),
                )?);
            }
        }

        print_performance_analysis(&results);
        Ok(results)
    }

    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut Vec<Box<dyn Layer>> {
        &mut self.layers
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn data_manager(&self) -> &DataManager {
        &self.manager
    }

    pub fn workspace_stats(&self) -> WorkspaceStats {
        self.handle.backend().workspace_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benchmark_method_counts_executions() {
        let mut calls = 0;
        let results = benchmark_method("noop", 2, 7, || {
            calls += 1;
            Ok(())
        })
        .unwrap();
        // warm-up calls are not part of the measurement
        assert_eq!(calls, 9);
        assert_eq!(results.num_executions, 7);
    }

    #[test]
    fn test_benchmark_method_propagates_failure() {
        let result = benchmark_method("failing", 0, 3, || {
            Err(BackendError::ExecutionFailed {
                call: "test",
                message: "boom".to_string(),
            })
        });
        assert!(matches!(result, Err(BackendError::ExecutionFailed { .. })));
    }

    #[test]
    fn test_overhead_math() {
        let baseline = PerformanceResults::new("a".to_string(), 1_000, 10);
        let slower = PerformanceResults::new("b".to_string(), 2_000, 10);
        assert!((slower.overhead_ratio(&baseline) - 2.0).abs() < 1e-9);
        assert!((slower.overhead_percentage(&baseline) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_default_config_runs() {
        let mut config = BenchmarkConfig::default();
        config.num_executions = 2;
        config.warmup_runs = 1;

        let mut runner = BenchmarkRunner::from_config(config).unwrap();
        let results = runner.run().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].method, "conv1");
    }
}
