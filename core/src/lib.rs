//! # phenonet
//!
//! `phenonet` is a small library of shape-inferring neural network layers on a pure Rust CPU
//! tensor engine.
//!
//! Layers are built in two phases: construction infers the output shape from the predecessor's
//! output shape and the hyperparameters, and materialization allocates named parameters from a
//! parameter store. Forward passes then run on NHWC batches under a training or deterministic
//! [`nn::Mode`].
//!
//! ## Modules
//!
//! - [`mod@tensor`]: Const-rank tensor and the operations the layers need.
//! - [`nn`]: Layers, shape arithmetic, parameters and initializers.
//! - [`config`]: Hyperparameter option structs loadable from JSON.
//!
//! ## Example
//!
//! ```rust
//! use phenonet::config::{ConvolutionOptions, PoolingOptions};
//! use phenonet::nn::{
//!     ConvolutionLayer, LayerTensor, Mode, Module, ParameterRegistry, PoolingLayer, Shape,
//! };
//! use phenonet::tensor::Tensor;
//!
//! let input = Shape::spatial(None, 28, 28, 3);
//! let mut conv = ConvolutionLayer::<f32>::new("conv1", input, ConvolutionOptions::new([5, 5, 3, 8])).unwrap();
//! let mut pool = PoolingLayer::new(conv.output_shape().clone(), PoolingOptions::new(3, 2)).unwrap();
//! assert_eq!(Module::<f32>::output_shape(&pool), &Shape::spatial(None, 14, 14, 8));
//!
//! conv.materialize(&mut ParameterRegistry::seeded(0)).unwrap();
//!
//! let x = LayerTensor::Spatial(Tensor::<f32, 4>::ones([2, 28, 28, 3]));
//! let y = pool.forward(conv.forward(x, Mode::Training).unwrap(), Mode::Training).unwrap();
//! assert_eq!(y.dims(), vec![2, 14, 14, 8]);
//! ```

pub mod config;
pub mod nn;
pub mod tensor;

pub use nn::{Layer, LayerError, LayerTensor, Mode, Module, Shape};
pub use tensor::{Tensor, TensorElem, TensorError, TensorView};
