//! Activation functions.
//!
//! Layers name their non-linearity by string in configuration (`"relu"`, `"tanh"`). Anything
//! else, including an empty string, means no activation.

use crate::tensor::{Tensor, TensorElem};
use log::warn;
use num_traits::Float;
use serde::{Deserialize, Serialize};

/// $f(x) = \max(0, x)$
pub fn relu<T: TensorElem + Float>(x: T) -> T {
    x.max(T::zero())
}

pub fn tanh<T: TensorElem + Float>(x: T) -> T {
    x.tanh()
}

/// The non-linearity applied after an affine layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActivationKind {
    #[default]
    Identity,
    Relu,
    Tanh,
}

impl ActivationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivationKind::Identity => "identity",
            ActivationKind::Relu => "relu",
            ActivationKind::Tanh => "tanh",
        }
    }

    /// Applies the activation element-wise.
    pub fn apply<T, const RANK: usize>(self, x: Tensor<T, RANK>) -> Tensor<T, RANK>
    where
        T: TensorElem + Float,
    {
        match self {
            ActivationKind::Identity => x,
            ActivationKind::Relu => x.map(relu),
            ActivationKind::Tanh => x.map(tanh),
        }
    }
}

impl From<&str> for ActivationKind {
    /// Unknown names fall back to [`ActivationKind::Identity`].
    fn from(name: &str) -> Self {
        match name {
            "relu" => ActivationKind::Relu,
            "tanh" => ActivationKind::Tanh,
            "identity" | "" => ActivationKind::Identity,
            other => {
                warn!("unknown activation {other:?}, using identity");
                ActivationKind::Identity
            }
        }
    }
}

impl From<String> for ActivationKind {
    fn from(name: String) -> Self {
        ActivationKind::from(name.as_str())
    }
}

impl From<ActivationKind> for String {
    fn from(kind: ActivationKind) -> Self {
        kind.as_str().to_string()
    }
}
