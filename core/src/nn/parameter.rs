//! Named parameters and the store that materializes them.
//!
//! Layers never allocate their own weights. They describe what they need as a
//! [`ParameterSpec`] (name, shape, initializer, trainable flag) and hand it to a
//! [`ParameterStore`], which returns the filled [`Parameter`]. [`ParameterRegistry`] is the
//! CPU store: it owns a seeded RNG and refuses to create two parameters with the same name.

use super::layer::LayerError;
use crate::config::RegistryConfig;
use crate::tensor::{Tensor, TensorElem, TensorError, TensorView};
use log::{debug, warn};
use rand::distr::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// How a parameter's initial values are drawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Initializer {
    /// Glorot uniform in `[-limit, limit]`, `limit = sqrt(6 / (fan_in + fan_out))`.
    ///
    /// Fans come from the shape: `[in, out]` for matrices, and for `[k_h, k_w, in, out]`
    /// filters both fans are multiplied by the receptive field `k_h * k_w`.
    Xavier,
    /// Normal with mean 0, redrawn until within two standard deviations.
    TruncatedNormal { stddev: f64 },
    Constant(f64),
}

impl Initializer {
    /// Draws `shape.iter().product()` values. `name` only labels errors.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        name: &str,
        shape: &[usize],
        rng: &mut R,
    ) -> Result<Vec<f64>, LayerError> {
        let size: usize = shape.iter().product();
        match *self {
            Initializer::Constant(value) => Ok(vec![value; size]),
            Initializer::Xavier => {
                let (fan_in, fan_out) = fans(shape);
                let limit = (6.0 / (fan_in + fan_out).max(1) as f64).sqrt();
                let dist = Uniform::new_inclusive(-limit, limit).map_err(|e| {
                    LayerError::InvalidHyperparameter {
                        layer: name.to_string(),
                        reason: format!("xavier limit {limit}: {e}"),
                    }
                })?;
                Ok((0..size).map(|_| dist.sample(rng)).collect())
            }
            Initializer::TruncatedNormal { stddev } => {
                // The redraw loop only terminates for a non-negative finite bound.
                if !(stddev.is_finite() && stddev >= 0.0) {
                    return Err(LayerError::InvalidHyperparameter {
                        layer: name.to_string(),
                        reason: format!("truncated normal stddev {stddev} must be finite and >= 0"),
                    });
                }
                let dist =
                    Normal::new(0.0, stddev).map_err(|e| LayerError::InvalidHyperparameter {
                        layer: name.to_string(),
                        reason: format!("truncated normal stddev {stddev}: {e}"),
                    })?;
                let bound = 2.0 * stddev;
                Ok((0..size)
                    .map(|_| loop {
                        let v: f64 = dist.sample(rng);
                        if v.abs() <= bound {
                            break v;
                        }
                    })
                    .collect())
            }
        }
    }
}

/// Weight initializer policy as named in layer configuration.
///
/// `"xavier"` selects [`Initializer::Xavier`]. Every other name selects a truncated normal
/// whose standard deviation is chosen by the layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InitializerKind {
    #[default]
    Xavier,
    Normal,
}

impl InitializerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InitializerKind::Xavier => "xavier",
            InitializerKind::Normal => "normal",
        }
    }

    /// The concrete weight initializer, given the layer's truncated-normal stddev.
    pub fn weights(self, stddev: f64) -> Initializer {
        match self {
            InitializerKind::Xavier => Initializer::Xavier,
            InitializerKind::Normal => Initializer::TruncatedNormal { stddev },
        }
    }
}

impl From<&str> for InitializerKind {
    fn from(name: &str) -> Self {
        match name {
            "xavier" => InitializerKind::Xavier,
            "normal" => InitializerKind::Normal,
            other => {
                warn!("unknown initializer {other:?}, using truncated normal");
                InitializerKind::Normal
            }
        }
    }
}

impl From<String> for InitializerKind {
    fn from(name: String) -> Self {
        InitializerKind::from(name.as_str())
    }
}

impl From<InitializerKind> for String {
    fn from(kind: InitializerKind) -> Self {
        kind.as_str().to_string()
    }
}

/// `(fan_in, fan_out)` for a parameter shape.
fn fans(shape: &[usize]) -> (usize, usize) {
    match shape {
        [] => (1, 1),
        [n] => (*n, *n),
        [.., fan_in, fan_out] => {
            let receptive: usize = shape[..shape.len() - 2].iter().product();
            (receptive * fan_in, receptive * fan_out)
        }
    }
}

/// Request for one parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub initializer: Initializer,
    pub trainable: bool,
}

impl ParameterSpec {
    /// A trainable parameter.
    pub fn new(name: impl Into<String>, shape: Vec<usize>, initializer: Initializer) -> Self {
        Self {
            name: name.into(),
            shape,
            initializer,
            trainable: true,
        }
    }

    /// Marks the parameter as state the optimizer must not touch.
    pub fn frozen(mut self) -> Self {
        self.trainable = false;
        self
    }
}

/// A named tensor owned by exactly one layer.
///
/// Values are stored flat; [`Parameter::view`] borrows them at the rank a kernel expects.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter<T: TensorElem> {
    name: String,
    shape: Vec<usize>,
    value: Tensor<T, 1>,
    trainable: bool,
}

impl<T: TensorElem> Parameter<T> {
    pub fn new(
        name: impl Into<String>,
        shape: Vec<usize>,
        data: Vec<T>,
        trainable: bool,
    ) -> Result<Self, TensorError> {
        let size = shape.iter().product();
        let value = Tensor::new(data, [size])?;
        Ok(Self {
            name: name.into(),
            shape,
            value,
            trainable,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn trainable(&self) -> bool {
        self.trainable
    }

    /// The flat values.
    pub fn value(&self) -> &Tensor<T, 1> {
        &self.value
    }

    /// Borrows the values at the parameter's declared shape.
    pub fn view<const RANK: usize>(&self) -> Result<TensorView<'_, T, RANK>, TensorError> {
        TensorView::from_dims(self.value.data(), &self.shape)
    }

    /// Replaces the values in place. The element count must not change.
    pub fn assign(&mut self, value: Tensor<T, 1>) -> Result<(), TensorError> {
        if value.shape() != self.value.shape() {
            return Err(TensorError::ShapeMismatch {
                expected: self.value.shape().to_vec(),
                got: value.shape().to_vec(),
            });
        }
        self.value = value;
        Ok(())
    }
}

/// Materializes named parameters from a shape and an initializer.
pub trait ParameterStore<T: TensorElem> {
    fn materialize(&mut self, spec: ParameterSpec) -> Result<Parameter<T>, LayerError>;

    /// Whether `name` has already been handed out.
    fn contains(&self, name: &str) -> bool;
}

/// Fails with `DuplicateParameter` on the first name the store already holds.
///
/// Layers that materialize several parameters call this first, so a collision on a later name
/// leaves nothing registered and the layer can be retried against another store.
pub(crate) fn ensure_available<T: TensorElem>(
    store: &dyn ParameterStore<T>,
    names: &[String],
) -> Result<(), LayerError> {
    match names.iter().find(|name| store.contains(name)) {
        Some(name) => Err(LayerError::DuplicateParameter(name.clone())),
        None => Ok(()),
    }
}

/// CPU parameter store with a seeded RNG and a registry of every name it has handed out.
#[derive(Debug)]
pub struct ParameterRegistry {
    rng: StdRng,
    names: HashSet<String>,
}

impl ParameterRegistry {
    pub fn new(config: &RegistryConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        Self {
            rng,
            names: HashSet::new(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self::new(&RegistryConfig { seed: Some(seed) })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for ParameterRegistry {
    fn default() -> Self {
        Self::new(&RegistryConfig::default())
    }
}

impl<T: TensorElem> ParameterStore<T> for ParameterRegistry {
    fn materialize(&mut self, spec: ParameterSpec) -> Result<Parameter<T>, LayerError> {
        if self.names.contains(&spec.name) {
            return Err(LayerError::DuplicateParameter(spec.name));
        }

        let values = spec
            .initializer
            .sample(&spec.name, &spec.shape, &mut self.rng)?
            .into_iter()
            .map(|v| {
                T::from_f64(v).ok_or_else(|| {
                    TensorError::Unsupported(format!("{v} is not representable in the element type"))
                })
            })
            .collect::<Result<Vec<T>, TensorError>>()?;

        debug!(
            "materialized {} {:?} ({:?}, trainable: {})",
            spec.name, spec.shape, spec.initializer, spec.trainable
        );
        self.names.insert(spec.name.clone());
        Ok(Parameter::new(spec.name, spec.shape, values, spec.trainable)?)
    }

    fn contains(&self, name: &str) -> bool {
        ParameterRegistry::contains(self, name)
    }
}

/// Two-phase parameter state of a layer.
#[derive(Debug, Clone)]
pub(crate) enum Parameters<P> {
    Unmaterialized,
    Materialized(P),
}

impl<P> Parameters<P> {
    pub(crate) fn is_materialized(&self) -> bool {
        matches!(self, Parameters::Materialized(_))
    }

    pub(crate) fn as_option(&self) -> Option<&P> {
        match self {
            Parameters::Materialized(p) => Some(p),
            Parameters::Unmaterialized => None,
        }
    }

    pub(crate) fn get(&self, layer: &str) -> Result<&P, LayerError> {
        self.as_option()
            .ok_or_else(|| LayerError::UninitializedParameter {
                layer: layer.to_string(),
            })
    }

    pub(crate) fn get_mut(&mut self, layer: &str) -> Result<&mut P, LayerError> {
        match self {
            Parameters::Materialized(p) => Ok(p),
            Parameters::Unmaterialized => Err(LayerError::UninitializedParameter {
                layer: layer.to_string(),
            }),
        }
    }

    /// Fails if already materialized. Call before touching the store.
    pub(crate) fn ensure_unmaterialized(&self, layer: &str) -> Result<(), LayerError> {
        if self.is_materialized() {
            return Err(LayerError::AlreadyMaterialized {
                layer: layer.to_string(),
            });
        }
        Ok(())
    }
}

/// Weights plus a per-output bias, shared by the convolution, upsample and dense layers.
#[derive(Debug, Clone)]
pub(crate) struct Affine<T: TensorElem> {
    pub(crate) weights: Parameter<T>,
    pub(crate) bias: Parameter<T>,
}

/// Bias initial value of every affine layer.
pub(crate) const BIAS_INIT: f64 = 0.1;

impl<T: TensorElem> Affine<T> {
    pub(crate) fn materialize(
        store: &mut dyn ParameterStore<T>,
        layer: &str,
        weight_shape: Vec<usize>,
        weight_init: Initializer,
    ) -> Result<Self, LayerError> {
        let outputs = weight_shape.last().copied().unwrap_or(1);
        let names = [format!("{layer}_weights"), format!("{layer}_bias")];
        ensure_available(store, &names)?;
        let [weights_name, bias_name] = names;

        let weights =
            store.materialize(ParameterSpec::new(weights_name, weight_shape, weight_init))?;
        let bias = store.materialize(ParameterSpec::new(
            bias_name,
            vec![outputs],
            Initializer::Constant(BIAS_INIT),
        ))?;
        Ok(Self { weights, bias })
    }

    pub(crate) fn parameters(&self) -> Vec<&Parameter<T>> {
        vec![&self.weights, &self.bias]
    }
}
