use burn_core::tensor::backend::Backend;
use burn_ndarray::NdArray;
use ndarray::Array2;
use ssaae::data::Normalization;
use ssaae::layers::ndarray_to_burn_2;
use ssaae::metrics::reconstruction_loss;
use ssaae::model::{AaeConfig, DropoutRates, Networks, Variant};
use ssaae::phase::TrainState;
use ssaae::schedule::LearningRates;
use ssaae::BurnBackend;

#[test]
fn reconstruction_steps_drive_loss_toward_zero() {
    let device = <BurnBackend as Backend>::Device::default();
    let cfg = AaeConfig {
        x_dim: 16,
        hidden: 32,
        z_dim: 4,
        n_classes: 4,
        variant: Variant::SemiSupervised,
        dropout: DropoutRates::none(),
    };
    // Eight small binary patterns.
    let x = Array2::from_shape_fn((8, 16), |(i, k)| {
        let bit = (i >> (k % 3)) & 1;
        let parity = (k / 3 + i) % 2;
        (bit * parity) as f32
    });
    let rates = LearningRates {
        reconstruction: 5e-3,
        ..LearningRates::default()
    };
    let nets = Networks::<BurnBackend>::new(&device, &cfg, 1).unwrap();
    let mut state = TrainState::new(device, nets, cfg, rates, 1).unwrap();

    let eval = |state: &TrainState<BurnBackend>| {
        let nets = state.networks().valid();
        reconstruction_loss::<NdArray<f32>>(
            &nets.encoder,
            &nets.decoder,
            &x,
            &Normalization::identity(),
            state.device(),
        )
        .unwrap()
    };
    let initial = eval(&state);

    let xt = ndarray_to_burn_2::<BurnBackend>(state.device(), &x);
    for _ in 0..300 {
        state.reconstruction_step(xt.clone());
    }
    let fin = eval(&state);
    assert!(fin < 0.05, "final reconstruction loss {fin} (initial {initial})");
    assert!(fin < initial / 10.0);
}
