//! Command-line entry point: load a benchmark configuration, run it,
//! exit non-zero on the first failure.

use std::env;
use std::process;

use log::{error, info};

use dnnbench::config::BenchmarkConfig;
use dnnbench::errors::BenchResult;
use dnnbench::runner::BenchmarkRunner;

const DEFAULT_CONFIG_PATH: &str = "configs/benchmark.json";

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let config_path = args
        .get(1)
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_PATH);

    if let Err(e) = run(config_path) {
        error!("Benchmark failed: {}", e);
        process::exit(1);
    }
}

fn run(config_path: &str) -> BenchResult<()> {
    let config = BenchmarkConfig::load(config_path)?;
    info!("Running benchmark '{}'", config.name);

    let mut runner = BenchmarkRunner::from_config(config)?;
    runner.run()?;
    Ok(())
}
