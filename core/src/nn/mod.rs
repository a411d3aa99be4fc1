//! Neural network layers.
//!
//! Every layer infers its output [`Shape`] when constructed, materializes its parameters from a
//! [`ParameterStore`] in a separate step, and runs forward passes on [`LayerTensor`]s under a
//! [`Mode`]. [`Layer`] is the closed set of kinds; [`Module`] is the contract they share.

pub mod activation;
pub mod batch_norm;
pub mod conv;
pub mod dropout;
pub mod input;
pub mod layer;
pub mod linear;
pub mod moderation;
pub mod module;
pub mod norm;
pub mod parameter;
pub mod pool;
pub mod shape;
pub mod upsample;

pub use activation::ActivationKind;
pub use batch_norm::BatchNormLayer;
pub use conv::ConvolutionLayer;
pub use dropout::DropoutLayer;
pub use input::InputLayer;
pub use layer::{Layer, LayerError, LayerKind, LayerTensor, Mode};
pub use linear::FullyConnectedLayer;
pub use moderation::ModerationLayer;
pub use module::Module;
pub use norm::NormalizationLayer;
pub use parameter::{
    Initializer, InitializerKind, Parameter, ParameterRegistry, ParameterSpec, ParameterStore,
};
pub use pool::{PoolingKind, PoolingLayer};
pub use shape::{
    conv_output_dim, flatten_size, pool_output_dim, transpose_conv_output_dim, Shape,
    UpscaleFactor,
};
pub use upsample::UpsampleLayer;
