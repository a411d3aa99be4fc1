use phenonet::config::{ConvolutionOptions, FullyConnectedOptions, PoolingOptions, UpsampleOptions};
use phenonet::nn::{
    conv_output_dim, pool_output_dim, BatchNormLayer, ConvolutionLayer, DropoutLayer,
    FullyConnectedLayer, InputLayer, Layer, LayerError, LayerKind, LayerTensor, Mode,
    ModerationLayer, Module, NormalizationLayer, ParameterRegistry, PoolingLayer, Shape,
    UpsampleLayer,
};
use phenonet::tensor::Tensor;

fn ramp(shape: [usize; 4]) -> Tensor<f32, 4> {
    let size = shape.iter().product::<usize>();
    Tensor::new((0..size).map(|i| (i % 7) as f32 * 0.25 - 0.5).collect(), shape).unwrap()
}

#[test]
fn test_shape_arithmetic_examples() {
    assert_eq!(pool_output_dim(10, 2, 2), 5);
    assert_eq!(pool_output_dim(10, 3, 2), 5);
    assert_eq!(conv_output_dim(28, 5, 1), 28);
    assert_eq!(conv_output_dim(28, 3, 2), 14);
}

#[test]
fn test_conv_declared_shape_matches_runtime_for_odd_kernels() {
    let mut registry = ParameterRegistry::seeded(0);
    for (kernel, stride) in [(3, 1), (3, 2), (5, 2), (7, 3)] {
        let input = Shape::spatial(None, 28, 28, 3);
        let opts = ConvolutionOptions {
            stride,
            ..ConvolutionOptions::new([kernel, kernel, 3, 4])
        };
        let name = format!("conv_k{kernel}_s{stride}");
        let mut conv = ConvolutionLayer::<f32>::new(name, input, opts).unwrap();
        conv.materialize(&mut registry).unwrap();

        let out = conv
            .forward(LayerTensor::Spatial(ramp([2, 28, 28, 3])), Mode::Training)
            .unwrap();
        assert_eq!(out.dims(), conv.output_shape().resolved(2));
    }
}

#[test]
fn test_pool_declared_shape_vs_runtime() {
    let run = |kernel: usize, stride: usize| {
        let mut pool =
            PoolingLayer::new(Shape::spatial(None, 28, 28, 3), PoolingOptions::new(kernel, stride))
                .unwrap();
        let out = pool
            .forward(LayerTensor::Spatial(ramp([2, 28, 28, 3])), Mode::Training)
            .unwrap();
        (Module::<f32>::output_shape(&pool).resolved(2), out.dims())
    };

    for (kernel, stride) in [(2, 2), (3, 2)] {
        let (declared, runtime) = run(kernel, stride);
        assert_eq!(declared, runtime);
    }

    // The odd-kernel formula drifts from same padding away from kernel 3 / stride 2.
    let (declared, runtime) = run(5, 2);
    assert_eq!(declared, vec![2, 13, 13, 3]);
    assert_eq!(runtime, vec![2, 14, 14, 3]);
}

#[test]
fn test_upsample_uses_runtime_shape() {
    let mut layer = UpsampleLayer::<f32>::new(
        "up1",
        Shape::spatial(Some(1), 8, 8, 16),
        UpsampleOptions {
            batch_size: Some(1),
            ..UpsampleOptions::new(3, 16, 2usize)
        },
    )
    .unwrap();
    layer.materialize(&mut ParameterRegistry::seeded(0)).unwrap();

    let out = layer
        .forward(LayerTensor::Spatial(ramp([4, 8, 8, 16])), Mode::Deterministic)
        .unwrap();
    let dims = out.dims();
    assert_eq!(dims[0], 4);
    assert_eq!(&dims[1..3], &[16, 16]);
}

#[test]
fn test_single_channel_output_is_squeezed() {
    let mut registry = ParameterRegistry::seeded(0);
    let input = Shape::spatial(None, 8, 8, 2);

    let ranks: Vec<usize> = [1, 2]
        .into_iter()
        .map(|out_channels| {
            let mut conv = ConvolutionLayer::<f32>::new(
                format!("conv_{out_channels}"),
                input.clone(),
                ConvolutionOptions::new([3, 3, 2, out_channels]),
            )
            .unwrap();
            conv.materialize(&mut registry).unwrap();
            conv.forward(LayerTensor::Spatial(ramp([3, 8, 8, 2])), Mode::Training)
                .unwrap()
                .rank()
        })
        .collect();
    assert_eq!(ranks, vec![3, 4]);

    let ranks: Vec<usize> = [1, 2]
        .into_iter()
        .map(|num_filters| {
            let mut up = UpsampleLayer::<f32>::new(
                format!("up_{num_filters}"),
                input.clone(),
                UpsampleOptions::new(3, num_filters, 2usize),
            )
            .unwrap();
            up.materialize(&mut registry).unwrap();
            let out = up
                .forward(LayerTensor::Spatial(ramp([3, 8, 8, 2])), Mode::Training)
                .unwrap();
            // Cached activations keep the channel axis.
            assert_eq!(up.activations().map(LayerTensor::rank), Some(4));
            out.rank()
        })
        .collect();
    assert_eq!(ranks, vec![3, 4]);
}

#[test]
fn test_batch_norm_running_statistics_protocol() {
    let mut layer = BatchNormLayer::<f32>::new("bn1", Shape::spatial(None, 2, 2, 3));
    layer.materialize(&mut ParameterRegistry::seeded(0)).unwrap();
    let snapshot = |layer: &BatchNormLayer<f32>| {
        let (mean, var) = layer.running_statistics().unwrap();
        (mean.value().clone(), var.value().clone())
    };

    let before = snapshot(&layer);
    layer
        .forward(LayerTensor::Spatial(ramp([4, 2, 2, 3])), Mode::Training)
        .unwrap();
    assert_eq!(snapshot(&layer), before);

    layer
        .forward(LayerTensor::Spatial(ramp([4, 2, 2, 3])), Mode::Deterministic)
        .unwrap();
    let after = snapshot(&layer);
    assert_ne!(after.0, before.0);
    assert_ne!(after.1, before.1);
}

#[test]
fn test_dropout_identity_cases() {
    let x = LayerTensor::Spatial(ramp([2, 4, 4, 3]));

    let mut half = DropoutLayer::new(Shape::spatial(None, 4, 4, 3), 0.5).unwrap();
    assert_eq!(half.forward(x.clone(), Mode::Deterministic).unwrap(), x);

    let mut keep_all = DropoutLayer::new(Shape::spatial(None, 4, 4, 3), 1.0).unwrap();
    assert_eq!(keep_all.forward(x.clone(), Mode::Training).unwrap(), x);
}

#[test]
fn test_moderation_feature_count() {
    for (dims, features) in [((4, 4, 2), 3), ((1, 1, 1), 1), ((7, 5, 3), 10)] {
        let (h, w, c) = dims;
        let mut layer = ModerationLayer::new(Shape::spatial(None, h, w, c), features, true, None).unwrap();
        assert_eq!(
            Module::<f32>::output_shape(&layer).dims(),
            &[h * w * c + features]
        );

        let x = LayerTensor::Spatial(Tensor::<f32, 4>::zeros([2, h, w, c]));
        let f = Tensor::<f32, 2>::ones([2, features]);
        let out = layer.forward_with_features(x, Mode::Training, Some(&f)).unwrap();
        assert_eq!(out.dims(), vec![2, h * w * c + features]);
    }
}

#[test]
fn test_small_network_through_layer_enum() {
    let input = Shape::spatial(None, 16, 16, 3);
    let mut layers: Vec<Layer<f32>> = Vec::new();
    layers.push(InputLayer::new(input.clone()).into());

    let conv =
        ConvolutionLayer::<f32>::new("conv1", input, ConvolutionOptions::new([3, 3, 3, 8])).unwrap();
    let next = conv.output_shape().clone();
    layers.push(conv.into());

    let pool = PoolingLayer::new(next, PoolingOptions::new(3, 2)).unwrap();
    let next = Module::<f32>::output_shape(&pool).clone();
    layers.push(pool.into());

    layers.push(NormalizationLayer::new(next.clone()).into());
    layers.push(BatchNormLayer::new("bn1", next.clone()).into());

    let fc = FullyConnectedLayer::<f32>::new(
        "fc1",
        next,
        FullyConnectedOptions {
            flatten: true,
            ..FullyConnectedOptions::new(10)
        },
    )
    .unwrap();
    let next = fc.output_shape().clone();
    layers.push(fc.into());
    layers.push(DropoutLayer::new(next, 0.5).unwrap().with_seed(1).into());

    let mut registry = ParameterRegistry::seeded(3);
    for layer in &mut layers {
        layer.materialize(&mut registry).unwrap();
    }
    assert!(layers.iter().all(|l| l.is_materialized()));
    // conv weights + bias, bn offset/scale/mean/var, fc weights + bias
    assert_eq!(registry.len(), 8);
    let trainable: usize = layers.iter().map(|l| l.trainable_parameters().len()).sum();
    assert_eq!(trainable, 6);

    let kinds: Vec<LayerKind> = layers.iter().map(Layer::kind).collect();
    assert_eq!(kinds[1], LayerKind::Convolution);

    let mut x = LayerTensor::Spatial(ramp([2, 16, 16, 3]));
    for layer in &mut layers {
        x = layer.forward(x, Mode::Training).unwrap();
        assert_eq!(x.dims()[1..], layer.output_shape().dims()[..]);
    }
    assert_eq!(x.dims(), vec![2, 10]);
}

#[test]
fn test_lifecycle_errors() {
    let mut layer: Layer<f32> = FullyConnectedLayer::new("fc1", Shape::flat(None, 4), FullyConnectedOptions::new(2))
        .unwrap()
        .into();
    let x = LayerTensor::Flat(Tensor::zeros([1, 4]));
    assert!(matches!(
        layer.forward(x.clone(), Mode::Training),
        Err(LayerError::UninitializedParameter { .. })
    ));

    let mut registry = ParameterRegistry::seeded(0);
    layer.materialize(&mut registry).unwrap();
    assert!(matches!(
        layer.materialize(&mut registry),
        Err(LayerError::AlreadyMaterialized { .. })
    ));

    // A second layer reusing the name collides in the same registry.
    let mut twin: Layer<f32> = FullyConnectedLayer::new("fc1", Shape::flat(None, 4), FullyConnectedOptions::new(2))
        .unwrap()
        .into();
    assert!(matches!(
        twin.materialize(&mut registry),
        Err(LayerError::DuplicateParameter(name)) if name == "fc1_weights"
    ));

    assert_eq!(layer.regularization_coefficient(), Some(0.0));
    assert!(layer.forward(x, Mode::Deterministic).is_ok());
}

#[test]
fn test_forward_with_features_dispatch() {
    let mut layer: Layer<f32> = ModerationLayer::new(Shape::flat(None, 3), 2, false, None)
        .unwrap()
        .into();
    let x = LayerTensor::Flat(Tensor::<f32, 2>::zeros([4, 3]));
    let f = Tensor::<f32, 2>::ones([4, 2]);
    assert!(matches!(
        layer.forward(x.clone(), Mode::Training),
        Err(LayerError::MissingFeatures { .. })
    ));
    let out = layer.forward_with_features(x, Mode::Training, Some(&f)).unwrap();
    assert_eq!(out.dims(), vec![4, 5]);
}
