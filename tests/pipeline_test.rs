//! End-to-end chained pipeline behavior through the benchmark runner.

use dnnbench::config::BenchmarkConfig;
use dnnbench::errors::BenchError;
use dnnbench::layers::Layer;
use dnnbench::runner::BenchmarkRunner;
use dnnbench::shape::DataDim;
use dnnbench::Elem;

const DELTA: Elem = 1e-4;

const PIPELINE_JSON: &str = r#"{
    "name": "lenet_forward",
    "num_executions": 3,
    "warmup_runs": 1,
    "layers": [
        {
            "name": "conv1",
            "type": "CONVOLUTION",
            "input_dim": [1, 3, 32, 32],
            "output_num": 16,
            "kernel_size_h": 5,
            "kernel_size_w": 5
        },
        {
            "name": "pool1",
            "type": "POOLING",
            "previous": "conv1",
            "mode": "MAX",
            "kernel_size": 2,
            "stride": 2
        },
        {
            "name": "relu1",
            "type": "ACTIVATION",
            "previous": "pool1",
            "mode": "RELU"
        },
        {
            "name": "fc1",
            "type": "FC",
            "previous": "relu1",
            "output_num": 10
        },
        {
            "name": "softmax1",
            "type": "SOFTMAX",
            "previous": "fc1",
            "mode": "INSTANCE"
        }
    ]
}"#;

fn pipeline_config() -> BenchmarkConfig {
    serde_json::from_str(PIPELINE_JSON).unwrap()
}

#[test]
fn test_chained_layers_share_buffers() {
    let runner = BenchmarkRunner::from_config(pipeline_config()).unwrap();
    let layers = runner.layers();

    for pair in layers.windows(2) {
        assert_eq!(pair[1].base().bottom_chunk_ids(), pair[0].top_chunk_ids());
        assert!(!pair[1].base().is_standalone());
    }
}

#[test]
fn test_shapes_propagate_through_pipeline() {
    let runner = BenchmarkRunner::from_config(pipeline_config()).unwrap();
    let layers = runner.layers();

    assert_eq!(layers[0].output_dim(), DataDim::new(1, 16, 28, 28));
    assert_eq!(layers[1].output_dim(), DataDim::new(1, 16, 14, 14));
    assert_eq!(layers[2].output_dim(), DataDim::new(1, 16, 14, 14));
    assert_eq!(layers[3].output_dim(), DataDim::new(1, 10, 1, 1));
    assert_eq!(layers[4].output_dim(), DataDim::new(1, 10, 1, 1));
}

#[test]
fn test_pipeline_run_completes() {
    let mut runner = BenchmarkRunner::from_config(pipeline_config()).unwrap();
    let results = runner.run().unwrap();

    assert_eq!(results.len(), 5);
    assert_eq!(results[0].method, "conv1");
    assert_eq!(results[4].method, "softmax1");
    assert!(results.iter().all(|r| r.num_executions == 3));
}

#[test]
fn test_softmax_output_is_a_distribution() {
    let mut runner = BenchmarkRunner::from_config(pipeline_config()).unwrap();
    runner.run().unwrap();

    let softmax = &runner.layers()[4];
    let top = runner.data_manager().get_data(softmax.top_chunk_ids()[0]);
    let sum: Elem = top.borrow().as_slice().iter().sum();
    assert!((sum - 1.0).abs() < DELTA);
    assert!(top.borrow().as_slice().iter().all(|&v| v > 0.0 && v < 1.0));
}

#[test]
fn test_run_leaves_no_live_workspace() {
    let mut runner = BenchmarkRunner::from_config(pipeline_config()).unwrap();
    runner.run().unwrap();

    let stats = runner.workspace_stats();
    assert_eq!(stats.allocs, stats.frees);
    assert_eq!(stats.live, 0);
}

#[test]
fn test_backward_timings_are_reported_when_enabled() {
    let mut config = pipeline_config();
    config.benchmark_backward = true;

    let mut runner = BenchmarkRunner::from_config(config).unwrap();
    let results = runner.run().unwrap();
    assert_eq!(results.len(), 10);
    assert_eq!(results[1].method, "conv1 (backward)");
}

#[test]
fn test_unknown_previous_layer_is_rejected() {
    let mut config = pipeline_config();
    config.layers[1].previous = Some("missing".to_string());

    let result = BenchmarkRunner::from_config(config);
    assert!(matches!(result, Err(BenchError::UnknownPreviousLayer { .. })));
}

#[test]
fn test_pooling_window_larger_than_chained_input_is_an_error() {
    // fc1 produces a 1x1 spatial map; a 2x2 pooling window cannot fit.
    // The shape only becomes known at setup time, so this must surface
    // as a backend error from the runner, never a panic.
    let json = r#"{
        "name": "fc_into_pool",
        "num_executions": 1,
        "layers": [
            {
                "name": "fc1",
                "type": "FC",
                "input_dim": [1, 3, 8, 8],
                "output_num": 10
            },
            {
                "name": "pool1",
                "type": "POOLING",
                "previous": "fc1",
                "mode": "MAX",
                "kernel_size": 2,
                "stride": 2
            }
        ]
    }"#;
    let config: BenchmarkConfig = serde_json::from_str(json).unwrap();
    assert!(config.validate().is_ok());

    let result = BenchmarkRunner::from_config(config);
    assert!(matches!(result, Err(BenchError::Backend(_))));
}

#[test]
fn test_empty_layer_list_is_rejected() {
    let mut config = pipeline_config();
    config.layers.clear();

    let result = BenchmarkRunner::from_config(config);
    assert!(matches!(result, Err(BenchError::ConfigValidation { .. })));
}
