//! Setup-phase and workspace-lifetime behavior of individual layers.

use dnnbench::backend::{ConvolutionAlgorithm, ConvolutionPreference};
use dnnbench::config::{LayerConfig, LayerParams};
use dnnbench::data_manager::DataManager;
use dnnbench::handle::Handle;
use dnnbench::layers::{create_layer, ConvolutionLayer, FullyConnectedLayer, Layer};
use dnnbench::params::{ConvolutionParam, FullyConnectedParam, WorkspacePolicy};
use dnnbench::shape::DataDim;

fn conv_param(policy: WorkspacePolicy, pref: ConvolutionPreference) -> ConvolutionParam {
    ConvolutionParam {
        output_num: 16,
        kernel_size_h: 5,
        kernel_size_w: 5,
        pad_h: 0,
        pad_w: 0,
        stride_u: 1,
        stride_v: 1,
        pref,
        workspace_policy: policy,
    }
}

fn conv_config(name: &str, policy: WorkspacePolicy, pref: ConvolutionPreference) -> LayerConfig {
    LayerConfig {
        name: name.to_string(),
        previous: None,
        input_dim: [1, 3, 32, 32],
        params: LayerParams::Convolution(conv_param(policy, pref)),
    }
}

#[test]
fn test_standalone_convolution_setup_allocations() {
    let handle = Handle::reference();
    let mut manager = DataManager::new();
    let config = conv_config(
        "conv1",
        WorkspacePolicy::PerCall,
        ConvolutionPreference::NoWorkspace,
    );

    let mut layer = create_layer(0, &config);
    layer.setup(&handle, &mut manager).unwrap();

    // bottom + bottom diff + top + top diff + weights + weight diff
    assert_eq!(manager.num_chunks(), 6);
    assert_eq!(layer.base().bottoms().len(), 1);
    assert_eq!(layer.base().bottoms()[0].borrow().len(), 3072);
    assert_eq!(layer.output_dim(), DataDim::new(1, 16, 28, 28));
    assert!(layer.has_learnable_params());
}

#[test]
fn test_convolution_weight_buffer_size() {
    let handle = Handle::reference();
    let mut manager = DataManager::new();
    let config = conv_config(
        "conv1",
        WorkspacePolicy::PerCall,
        ConvolutionPreference::NoWorkspace,
    );
    let mut layer = ConvolutionLayer::new(
        0,
        &config,
        conv_param(WorkspacePolicy::PerCall, ConvolutionPreference::NoWorkspace),
    );
    layer.setup(&handle, &mut manager).unwrap();

    // output_num * input channels * kernel area = 16 * 3 * 5 * 5
    let weight_id = layer.weight_chunk_id().unwrap();
    assert_eq!(manager.get_data(weight_id).borrow().len(), 1200);
    let weight_diff_id = layer.weight_diff_chunk_id().unwrap();
    assert_eq!(manager.get_data(weight_diff_id).borrow().len(), 1200);
}

#[test]
fn test_fully_connected_weight_buffer_size() {
    let handle = Handle::reference();
    let mut manager = DataManager::new();
    let config = LayerConfig {
        name: "fc1".to_string(),
        previous: None,
        input_dim: [1, 3, 8, 8],
        params: LayerParams::FullyConnected(FullyConnectedParam { output_num: 10 }),
    };
    let mut layer = FullyConnectedLayer::new(0, &config, FullyConnectedParam { output_num: 10 });
    layer.setup(&handle, &mut manager).unwrap();

    // output_num * flattened input = 10 * 3 * 8 * 8
    let weight_id = layer.weight_chunk_id().unwrap();
    assert_eq!(manager.get_data(weight_id).borrow().len(), 1920);
    let weight_diff_id = layer.weight_diff_chunk_id().unwrap();
    assert_eq!(manager.get_data(weight_diff_id).borrow().len(), 1920);
}

#[test]
fn test_convolution_forward_produces_output() {
    let handle = Handle::reference();
    let mut manager = DataManager::new();
    let config = conv_config(
        "conv1",
        WorkspacePolicy::PerCall,
        ConvolutionPreference::PreferFastest,
    );

    let mut layer = create_layer(0, &config);
    layer.setup(&handle, &mut manager).unwrap();
    layer.forward(&handle).unwrap();

    // inputs and weights are filled with positive values, so every
    // output element must be strictly positive
    let top = manager.get_data(layer.top_chunk_ids()[0]);
    assert_eq!(top.borrow().len(), 16 * 28 * 28);
    assert!(top.borrow().as_slice().iter().all(|&v| v > 0.0));
}

#[test]
fn test_per_call_workspace_is_freed_every_forward() {
    let handle = Handle::reference();
    let mut manager = DataManager::new();
    let config = conv_config(
        "conv1",
        WorkspacePolicy::PerCall,
        ConvolutionPreference::PreferFastest,
    );

    let mut layer = create_layer(0, &config);
    layer.setup(&handle, &mut manager).unwrap();
    for _ in 0..5 {
        layer.forward(&handle).unwrap();
    }

    let stats = handle.backend().workspace_stats();
    assert_eq!(stats.allocs, stats.frees);
    assert_eq!(stats.live, 0);
    // the first forward reuses the setup allocation, each of the four
    // later forwards re-allocates after the per-call free
    assert_eq!(stats.allocs, 5);
}

#[test]
fn test_hoisted_workspace_is_allocated_once() {
    let handle = Handle::reference();
    let mut manager = DataManager::new();
    let config = conv_config(
        "conv1",
        WorkspacePolicy::Hoisted,
        ConvolutionPreference::PreferFastest,
    );
    let mut layer = ConvolutionLayer::new(
        0,
        &config,
        conv_param(WorkspacePolicy::Hoisted, ConvolutionPreference::PreferFastest),
    );
    layer.setup(&handle, &mut manager).unwrap();

    assert_eq!(layer.chosen_algorithm(), Some(ConvolutionAlgorithm::Gemm));
    assert!(layer.workspace_bytes() > 0);

    for _ in 0..5 {
        layer.forward(&handle).unwrap();
    }

    let stats = handle.backend().workspace_stats();
    assert_eq!(stats.allocs, 1);
    assert_eq!(stats.frees, 0);
    assert_eq!(stats.live, 1);
}

#[test]
fn test_no_workspace_preference_never_allocates() {
    let handle = Handle::reference();
    let mut manager = DataManager::new();
    let config = conv_config(
        "conv1",
        WorkspacePolicy::PerCall,
        ConvolutionPreference::NoWorkspace,
    );
    let mut layer = ConvolutionLayer::new(
        0,
        &config,
        conv_param(WorkspacePolicy::PerCall, ConvolutionPreference::NoWorkspace),
    );
    layer.setup(&handle, &mut manager).unwrap();

    assert_eq!(layer.chosen_algorithm(), Some(ConvolutionAlgorithm::Direct));
    assert_eq!(layer.workspace_bytes(), 0);

    layer.forward(&handle).unwrap();

    let stats = handle.backend().workspace_stats();
    assert_eq!(stats.allocs, 0);
}

#[test]
fn test_strided_padded_convolution_shape() {
    let handle = Handle::reference();
    let mut manager = DataManager::new();
    let mut config = conv_config(
        "conv1",
        WorkspacePolicy::PerCall,
        ConvolutionPreference::NoWorkspace,
    );
    if let LayerParams::Convolution(param) = &mut config.params {
        param.pad_h = 2;
        param.pad_w = 2;
        param.stride_u = 2;
        param.stride_v = 2;
    }

    let mut layer = create_layer(0, &config);
    layer.setup(&handle, &mut manager).unwrap();

    // (32 + 2*2 - 5) / 2 + 1 = 16
    assert_eq!(layer.output_dim(), DataDim::new(1, 16, 16, 16));
}
