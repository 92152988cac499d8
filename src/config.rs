//! Benchmark configuration: a named list of layer descriptions plus run
//! controls, loaded from JSON.

use std::fs;
use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::errors::{BenchError, BenchResult};
use crate::params::{
    ActivationParam, ConvolutionParam, FullyConnectedParam, LrnParam, PoolingParam, SoftmaxParam,
};
use crate::shape::DataDim;

/// Primitive selector plus its hyperparameters, dispatched on the
/// config's `type` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LayerParams {
    #[serde(rename = "CONVOLUTION")]
    Convolution(ConvolutionParam),
    #[serde(rename = "POOLING")]
    Pooling(PoolingParam),
    #[serde(rename = "ACTIVATION")]
    Activation(ActivationParam),
    #[serde(rename = "LRN")]
    Lrn(LrnParam),
    #[serde(rename = "FC")]
    FullyConnected(FullyConnectedParam),
    #[serde(rename = "SOFTMAX")]
    Softmax(SoftmaxParam),
}

/// One layer entry of a benchmark configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerConfig {
    pub name: String,
    /// Name of the layer whose outputs feed this one. Absent for
    /// standalone layers.
    #[serde(default)]
    pub previous: Option<String>,
    /// NCHW input shape. All four values must be non-zero for a
    /// standalone layer; chained layers leave it zeroed and inherit the
    /// previous layer's output shape.
    #[serde(default)]
    pub input_dim: [usize; 4],
    #[serde(flatten)]
    pub params: LayerParams,
}

impl LayerConfig {
    pub fn input_dim(&self) -> DataDim {
        DataDim::new(
            self.input_dim[0],
            self.input_dim[1],
            self.input_dim[2],
            self.input_dim[3],
        )
    }
}

fn default_num_executions() -> usize {
    50
}

fn default_warmup_runs() -> usize {
    5
}

/// Full benchmark description: run controls plus the layer list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    pub name: String,
    #[serde(default = "default_num_executions")]
    pub num_executions: usize,
    #[serde(default = "default_warmup_runs")]
    pub warmup_runs: usize,
    #[serde(default)]
    pub benchmark_backward: bool,
    pub layers: Vec<LayerConfig>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            name: "default_convolution".to_string(),
            num_executions: default_num_executions(),
            warmup_runs: default_warmup_runs(),
            benchmark_backward: false,
            layers: vec![LayerConfig {
                name: "conv1".to_string(),
                previous: None,
                input_dim: [1, 3, 32, 32],
                params: LayerParams::Convolution(ConvolutionParam {
                    output_num: 16,
                    kernel_size_h: 5,
                    kernel_size_w: 5,
                    pad_h: 0,
                    pad_w: 0,
                    stride_u: 1,
                    stride_v: 1,
                    pref: Default::default(),
                    workspace_policy: Default::default(),
                }),
            }],
        }
    }
}

impl BenchmarkConfig {
    /// Loads and validates a configuration file. A missing file falls
    /// back to the built-in default configuration; a malformed one is an
    /// error.
    pub fn load(path: &str) -> BenchResult<Self> {
        let config = if Path::new(path).exists() {
            let contents = fs::read_to_string(path).map_err(|source| BenchError::Io {
                path: path.to_string(),
                source,
            })?;
            let config: Self =
                serde_json::from_str(&contents).map_err(|source| BenchError::ConfigParse {
                    path: path.to_string(),
                    source,
                })?;
            info!("loaded benchmark configuration from {}", path);
            config
        } else {
            warn!("configuration file {} not found, using default", path);
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Structural checks that would otherwise surface as confusing
    /// backend failures mid-run.
    pub fn validate(&self) -> BenchResult<()> {
        if self.num_executions == 0 {
            return Err(BenchError::InvalidNumExecutions { value: 0 });
        }
        if self.layers.is_empty() {
            return Err(BenchError::ConfigValidation {
                field: "layers".to_string(),
                message: "at least one layer is required".to_string(),
            });
        }

        let mut seen: Vec<&str> = Vec::new();
        for layer in &self.layers {
            if seen.contains(&layer.name.as_str()) {
                return Err(BenchError::DuplicateLayerName {
                    name: layer.name.clone(),
                });
            }
            match &layer.previous {
                Some(previous) => {
                    if !seen.contains(&previous.as_str()) {
                        return Err(BenchError::UnknownPreviousLayer {
                            layer: layer.name.clone(),
                            previous: previous.clone(),
                        });
                    }
                }
                None => {
                    if !layer.input_dim().is_fully_specified() {
                        return Err(BenchError::ConfigValidation {
                            field: format!("{}.input_dim", layer.name),
                            message: "standalone layer needs a fully specified shape".to_string(),
                        });
                    }
                }
            }
            validate_params(layer)?;
            seen.push(&layer.name);
        }
        Ok(())
    }
}

fn validate_params(layer: &LayerConfig) -> BenchResult<()> {
    let invalid = |field: &str, message: &str| {
        Err(BenchError::ConfigValidation {
            field: format!("{}.{}", layer.name, field),
            message: message.to_string(),
        })
    };
    match &layer.params {
        LayerParams::Convolution(param) => {
            if param.output_num == 0 {
                return invalid("output_num", "must be positive");
            }
            if param.kernel_size_h == 0 || param.kernel_size_w == 0 {
                return invalid("kernel_size", "must be positive");
            }
            if param.stride_u == 0 || param.stride_v == 0 {
                return invalid("stride", "must be positive");
            }
        }
        LayerParams::Pooling(param) => {
            if param.kernel_size == 0 {
                return invalid("kernel_size", "must be positive");
            }
            if param.stride == 0 {
                return invalid("stride", "must be positive");
            }
        }
        LayerParams::Lrn(param) => {
            if param.local_size == 0 || param.local_size % 2 == 0 {
                return invalid("local_size", "must be odd");
            }
        }
        LayerParams::FullyConnected(param) => {
            if param.output_num == 0 {
                return invalid("output_num", "must be positive");
            }
        }
        LayerParams::Activation(_) | LayerParams::Softmax(_) => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::PoolingMode;

    const PIPELINE_JSON: &str = r#"{
        "name": "conv_pool",
        "num_executions": 10,
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
            }
        ]
    }"#;

    #[test]
    fn test_parse_chained_pipeline() {
        let config: BenchmarkConfig = serde_json::from_str(PIPELINE_JSON).unwrap();
        config.validate().unwrap();

        assert_eq!(config.num_executions, 10);
        assert_eq!(config.warmup_runs, 5);
        assert_eq!(config.layers.len(), 2);
        assert!(matches!(
            &config.layers[0].params,
            LayerParams::Convolution(p) if p.output_num == 16
        ));
        assert!(matches!(
            &config.layers[1].params,
            LayerParams::Pooling(p) if p.mode == PoolingMode::Max
        ));
        assert_eq!(config.layers[1].previous.as_deref(), Some("conv1"));
    }

    #[test]
    fn test_default_config_validates() {
        BenchmarkConfig::default().validate().unwrap();
    }

    #[test]
    fn test_zero_executions_rejected() {
        let mut config = BenchmarkConfig::default();
        config.num_executions = 0;
        assert!(matches!(
            config.validate(),
            Err(BenchError::InvalidNumExecutions { value: 0 })
        ));
    }

    #[test]
    fn test_unknown_previous_rejected() {
        let mut config: BenchmarkConfig = serde_json::from_str(PIPELINE_JSON).unwrap();
        config.layers[1].previous = Some("missing".to_string());
        assert!(matches!(
            config.validate(),
            Err(BenchError::UnknownPreviousLayer { .. })
        ));
    }

    #[test]
    fn test_forward_reference_rejected() {
        let mut config: BenchmarkConfig = serde_json::from_str(PIPELINE_JSON).unwrap();
        // a layer may only chain from an earlier one
        config.layers.swap(0, 1);
        assert!(matches!(
            config.validate(),
            Err(BenchError::UnknownPreviousLayer { .. })
        ));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut config: BenchmarkConfig = serde_json::from_str(PIPELINE_JSON).unwrap();
        config.layers[1].name = "conv1".to_string();
        assert!(matches!(
            config.validate(),
            Err(BenchError::DuplicateLayerName { .. })
        ));
    }

    #[test]
    fn test_standalone_layer_needs_shape() {
        let mut config = BenchmarkConfig::default();
        config.layers[0].input_dim = [1, 3, 0, 32];
        assert!(matches!(
            config.validate(),
            Err(BenchError::ConfigValidation { .. })
        ));
    }

    #[test]
    fn test_even_lrn_window_rejected() {
        let json = r#"{
            "name": "lrn",
            "layers": [{
                "name": "lrn1",
                "type": "LRN",
                "input_dim": [1, 8, 4, 4],
                "local_size": 4
            }]
        }"#;
        let config: BenchmarkConfig = serde_json::from_str(json).unwrap();
        assert!(matches!(
            config.validate(),
            Err(BenchError::ConfigValidation { .. })
        ));
    }
}
