//! Layer hyperparameters as configuration.
//!
//! The layers with many hyperparameters take them as an options struct. Each struct
//! deserializes from JSON with per-field defaults, so a config file only names what differs:
//!
//! ```json
//! {
//!   "filter": [5, 5, 3, 32],
//!   "stride": 2,
//!   "activation": "relu"
//! }
//! ```

use crate::nn::{ActivationKind, InitializerKind, PoolingKind, UpscaleFactor};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

fn one() -> usize {
    1
}

/// Hyperparameters of a [`crate::nn::ConvolutionLayer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvolutionOptions {
    /// `[height, width, in_channels, out_channels]`
    pub filter: [usize; 4],
    #[serde(default = "one")]
    pub stride: usize,
    #[serde(default)]
    pub activation: ActivationKind,
    #[serde(default)]
    pub initializer: InitializerKind,
    #[serde(default)]
    pub regularization_coefficient: f64,
}

impl ConvolutionOptions {
    pub fn new(filter: [usize; 4]) -> Self {
        Self {
            filter,
            stride: 1,
            activation: ActivationKind::default(),
            initializer: InitializerKind::default(),
            regularization_coefficient: 0.0,
        }
    }
}

/// Hyperparameters of a [`crate::nn::UpsampleLayer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsampleOptions {
    /// Side of the square filter.
    pub filter_size: usize,
    /// Output channels of the transposed convolution.
    pub num_filters: usize,
    pub upscale_factor: UpscaleFactor,
    #[serde(default)]
    pub activation: ActivationKind,
    /// Declared batch size. Bookkeeping only: forward uses the runtime batch.
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub initializer: InitializerKind,
    #[serde(default)]
    pub regularization_coefficient: f64,
}

impl UpsampleOptions {
    pub fn new(filter_size: usize, num_filters: usize, upscale_factor: impl Into<UpscaleFactor>) -> Self {
        Self {
            filter_size,
            num_filters,
            upscale_factor: upscale_factor.into(),
            activation: ActivationKind::default(),
            batch_size: None,
            initializer: InitializerKind::default(),
            regularization_coefficient: 0.0,
        }
    }
}

/// Hyperparameters of a [`crate::nn::FullyConnectedLayer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullyConnectedOptions {
    pub output_size: usize,
    /// Flatten a spatial input to `[batch, features]` first.
    #[serde(default)]
    pub flatten: bool,
    /// Batch used when flattening; the runtime batch when absent.
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub activation: ActivationKind,
    #[serde(default)]
    pub initializer: InitializerKind,
    #[serde(default)]
    pub regularization_coefficient: f64,
}

impl FullyConnectedOptions {
    pub fn new(output_size: usize) -> Self {
        Self {
            output_size,
            flatten: false,
            batch_size: None,
            activation: ActivationKind::default(),
            initializer: InitializerKind::default(),
            regularization_coefficient: 0.0,
        }
    }
}

/// Hyperparameters of a [`crate::nn::PoolingLayer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolingOptions {
    pub kernel_size: usize,
    pub stride: usize,
    #[serde(default)]
    pub kind: PoolingKind,
}

impl PoolingOptions {
    pub fn new(kernel_size: usize, stride: usize) -> Self {
        Self {
            kernel_size,
            stride,
            kind: PoolingKind::default(),
        }
    }
}

/// Settings of a [`crate::nn::ParameterRegistry`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Seed of the initializer RNG. Drawn from the OS when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Reads any options struct from a JSON file.
pub fn load_options<O: DeserializeOwned>(path: impl AsRef<Path>) -> Result<O, ConfigError> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convolution_defaults() {
        let opts: ConvolutionOptions = serde_json::from_str(r#"{"filter": [3, 3, 1, 8]}"#).unwrap();
        assert_eq!(opts, ConvolutionOptions::new([3, 3, 1, 8]));
        assert_eq!(opts.stride, 1);
        assert_eq!(opts.initializer, InitializerKind::Xavier);
    }

    #[test]
    fn test_upsample_factor_forms() {
        let opts: UpsampleOptions = serde_json::from_str(
            r#"{"filter_size": 3, "num_filters": 2, "upscale_factor": [2, 3], "activation": "tanh"}"#,
        )
        .unwrap();
        assert_eq!(opts.upscale_factor, UpscaleFactor::PerAxis([2, 3]));
        assert_eq!(opts.activation, ActivationKind::Tanh);
        assert_eq!(opts.batch_size, None);
    }

    #[test]
    fn test_permissive_names() {
        let opts: FullyConnectedOptions = serde_json::from_str(
            r#"{"output_size": 10, "activation": "swish", "initializer": "he"}"#,
        )
        .unwrap();
        assert_eq!(opts.activation, ActivationKind::Identity);
        assert_eq!(opts.initializer, InitializerKind::Normal);
    }

    #[test]
    fn test_pooling_kind_default() {
        let opts: PoolingOptions = serde_json::from_str(r#"{"kernel_size": 3, "stride": 2}"#).unwrap();
        assert_eq!(opts.kind, PoolingKind::Max);
        let avg: PoolingOptions =
            serde_json::from_str(r#"{"kernel_size": 2, "stride": 2, "kind": "avg"}"#).unwrap();
        assert_eq!(avg.kind, PoolingKind::Avg);
    }

    #[test]
    fn test_missing_required_field() {
        let err = serde_json::from_str::<PoolingOptions>(r#"{"kernel_size": 3}"#);
        assert!(err.is_err());
    }
}
