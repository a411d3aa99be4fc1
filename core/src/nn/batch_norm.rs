use super::layer::{LayerError, LayerTensor, Mode, Result};
use super::parameter::{ensure_available, Parameters};
use super::{Initializer, Module, Parameter, ParameterSpec, ParameterStore, Shape};
use crate::tensor::{Tensor, TensorElem, TensorError};
use log::{debug, trace};
use num_traits::Float;

pub const BATCH_NORM_EPSILON: f64 = 1e-3;
pub const BATCH_NORM_DECAY: f64 = 0.9;

#[derive(Debug, Clone)]
struct Statistics<T: TensorElem> {
    offset: Parameter<T>,
    scale: Parameter<T>,
    pop_mean: Parameter<T>,
    pop_var: Parameter<T>,
}

/// Batch normalization over axis 0.
///
/// Every statistic has one entry per position within a batch entry, so a spatial input gets
/// per-pixel-per-channel statistics.
///
/// Running statistics follow an inverted protocol: a `Deterministic` forward folds the batch
/// moments into them (`running * decay + batch * (1 - decay)`) and normalizes with the updated
/// values, while a `Training` forward normalizes with the raw batch moments and leaves them
/// untouched.
#[derive(Debug)]
pub struct BatchNormLayer<T: TensorElem> {
    name: String,
    shape: Shape,
    params: Parameters<Statistics<T>>,
}

impl<T: TensorElem + Float> BatchNormLayer<T> {
    pub fn new(name: impl Into<String>, input_shape: Shape) -> Self {
        let name = name.into();
        debug!("{name}: batch norm over {input_shape}");
        Self {
            name,
            shape: input_shape,
            params: Parameters::Unmaterialized,
        }
    }

    /// Shape of each statistic: the input's non-batch dimensions.
    pub fn statistics_shape(&self) -> &[usize] {
        self.shape.dims()
    }

    /// `(running mean, running variance)`, once materialized.
    pub fn running_statistics(&self) -> Option<(&Parameter<T>, &Parameter<T>)> {
        self.params
            .as_option()
            .map(|stats| (&stats.pop_mean, &stats.pop_var))
    }

    fn normalize<const RANK: usize>(&mut self, x: Tensor<T, RANK>, mode: Mode) -> Result<Tensor<T, RANK>> {
        let stats = self.params.get_mut(&self.name)?;
        let inner = stats.offset.value().size();
        if RANK == 0 || x.shape()[0] == 0 || x.size() / x.shape()[0] != inner {
            return Err(LayerError::ShapeMismatch {
                layer: self.name.clone(),
                expected: self.shape.dims().to_vec(),
                got: x.shape().to_vec(),
            });
        }

        let epsilon = constant::<T>(BATCH_NORM_EPSILON)?;
        let (mean, var) = x.moments()?;
        let (mean, var) = if mode.is_deterministic() {
            let decay = constant::<T>(BATCH_NORM_DECAY)?;
            let keep = T::one() - decay;
            let mean = (&stats.pop_mean.value().map(|v| v * decay) + &mean.map(|v| v * keep))?;
            let var = (&stats.pop_var.value().map(|v| v * decay) + &var.map(|v| v * keep))?;
            stats.pop_mean.assign(mean.clone())?;
            stats.pop_var.assign(var.clone())?;
            (mean, var)
        } else {
            (mean, var)
        };

        Ok(x.batch_normalize(
            &mean,
            &var,
            stats.offset.value(),
            stats.scale.value(),
            epsilon,
        )?)
    }
}

fn constant<T: TensorElem>(value: f64) -> std::result::Result<T, TensorError> {
    T::from_f64(value).ok_or_else(|| {
        TensorError::Unsupported(format!("{value} is not representable in the element type"))
    })
}

impl<T: TensorElem + Float> Module<T> for BatchNormLayer<T> {
    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn input_shape(&self) -> &Shape {
        &self.shape
    }

    fn output_shape(&self) -> &Shape {
        &self.shape
    }

    fn materialize(&mut self, store: &mut dyn ParameterStore<T>) -> Result<()> {
        self.params.ensure_unmaterialized(&self.name)?;
        let names = ["offset", "scale", "pop_mean", "pop_var"].map(|s| format!("{}_{s}", self.name));
        ensure_available(store, &names)?;
        let [offset, scale, pop_mean, pop_var] = names;

        let shape = self.shape.dims().to_vec();
        let mut make = |name: String, value: f64, trainable: bool| {
            let spec = ParameterSpec::new(name, shape.clone(), Initializer::Constant(value));
            store.materialize(if trainable { spec } else { spec.frozen() })
        };
        let stats = Statistics {
            offset: make(offset, 0.0, true)?,
            scale: make(scale, 1.0, true)?,
            pop_mean: make(pop_mean, 0.0, false)?,
            pop_var: make(pop_var, 1.0, false)?,
        };
        self.params = Parameters::Materialized(stats);
        Ok(())
    }

    fn is_materialized(&self) -> bool {
        self.params.is_materialized()
    }

    fn forward(&mut self, input: LayerTensor<T>, mode: Mode) -> Result<LayerTensor<T>> {
        trace!("{}: forward {:?} ({mode:?})", self.name, input.dims());
        Ok(match input {
            LayerTensor::Flat(x) => LayerTensor::Flat(self.normalize(x, mode)?),
            LayerTensor::Squeezed(x) => LayerTensor::Squeezed(self.normalize(x, mode)?),
            LayerTensor::Spatial(x) => LayerTensor::Spatial(self.normalize(x, mode)?),
        })
    }

    fn parameters(&self) -> Vec<&Parameter<T>> {
        self.params
            .as_option()
            .map(|s| vec![&s.offset, &s.scale, &s.pop_mean, &s.pop_var])
            .unwrap_or_default()
    }
}
