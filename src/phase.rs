//! The per-batch training state machine.
//!
//! ## Gradient contract
//!
//! Every phase computes its own loss, calls `backward()` once, pulls out the gradients of exactly
//! the module(s) it updates with [`GradientsParams::from_module`], steps exactly its optimizer(s)
//! and drops the remaining gradient container before returning. Inputs a phase must not update
//! (fake codes in the discriminator phase, prior samples, one-hot targets) carry no graph.
//!
//! | phase                      | loss                                   | updates                    |
//! |----------------------------|----------------------------------------|----------------------------|
//! | `Reconstruction`           | BCE(P(Q(x)), x)                        | decoder, encoder (recon)   |
//! | `Regularization(Disc.)`    | D loss on prior vs. detached Q(x)      | `D_cat`, `D_gauss`         |
//! | `Regularization(Gen.)`     | `-log D(Q(x))` summed over both codes  | encoder (generator)        |
//! | `SemiSupervised`           | CE(Q_cat(x), y)                        | encoder (classifier)       |

use burn_core as burn;

use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Tensor;
use burn_optim::{GradientsParams, LearningRate, Optimizer};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::data::{Batch, BatchKind, Normalization};
use crate::encoder::Codes;
use crate::layers::{ndarray_to_burn_2, scalar, Mode};
use crate::model::{AaeConfig, Networks, Variant};
use crate::prior::sample_codes;
use crate::schedule::LearningRates;
use crate::simplex::one_hot;
use crate::solvers::Solvers;
use crate::{loss, Error, Result};

/// Half-steps of the regularization phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegStep {
    Discriminator,
    Generator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Reconstruction,
    Regularization(RegStep),
    SemiSupervised,
}

const AUTOENCODER_PLAN: &[Phase] = &[
    Phase::Reconstruction,
    Phase::Regularization(RegStep::Discriminator),
    Phase::Regularization(RegStep::Generator),
];
const LABELED_PLAN: &[Phase] = &[Phase::SemiSupervised];

impl Phase {
    /// Ordered phases for one batch.
    ///
    /// The unsupervised variant ignores labels, so every batch runs the autoencoder plan.
    pub fn plan(kind: BatchKind, variant: Variant) -> &'static [Phase] {
        match (variant, kind) {
            (Variant::SemiSupervised, BatchKind::Labeled) => LABELED_PLAN,
            _ => AUTOENCODER_PLAN,
        }
    }
}

/// Losses observed during one batch. A field is `None` when its phase did not run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepLosses {
    pub reconstruction: Option<f32>,
    pub d_cat: Option<f32>,
    pub d_gauss: Option<f32>,
    pub generator: Option<f32>,
    pub classification: Option<f32>,
}

/// Discriminator losses of one update, measured before the step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscriminatorLosses {
    pub d_cat: Option<f32>,
    pub d_gauss: f32,
}

/// Networks, optimizers, RNG and device of one run.
pub struct TrainState<B: AutodiffBackend> {
    nets: Networks<B>,
    solvers: Solvers<B>,
    rng: ChaCha8Rng,
    device: B::Device,
    cfg: AaeConfig,
}

fn step_module<B, M, O>(optim: &mut O, lr: LearningRate, module: &M, grads: GradientsParams) -> M
where
    B: AutodiffBackend,
    M: burn::module::AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    optim.step(lr, module.clone(), grads)
}

impl<B: AutodiffBackend> TrainState<B> {
    /// `seed` drives dropout masks and prior samples (stream 1 of its ChaCha8 generator).
    pub fn new(
        device: B::Device,
        nets: Networks<B>,
        cfg: AaeConfig,
        rates: LearningRates,
        seed: u64,
    ) -> Result<Self> {
        cfg.validate()?;
        if nets.d_cat.is_some() != cfg.has_categorical()
            || nets.encoder.has_categorical() != cfg.has_categorical()
        {
            return Err(Error::Domain("networks do not match the configured variant"));
        }
        let d_cat_dim = nets.d_cat.as_ref().map_or(cfg.n_classes, |d| d.in_dim());
        if nets.d_gauss.in_dim() != cfg.z_dim || d_cat_dim != cfg.n_classes {
            return Err(Error::Shape("discriminator input widths do not match the configuration"));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(1);
        Ok(Self {
            solvers: Solvers::new(rates, &cfg),
            nets,
            rng,
            device,
            cfg,
        })
    }

    pub fn networks(&self) -> &Networks<B> {
        &self.nets
    }

    pub fn into_networks(self) -> Networks<B> {
        self.nets
    }

    pub fn config(&self) -> &AaeConfig {
        &self.cfg
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn rates(&self) -> LearningRates {
        self.solvers.rates()
    }

    /// Replace all optimizers with fresh ones at `rates`, discarding their moment estimates.
    pub fn reset_optimizers(&mut self, rates: LearningRates) {
        self.solvers = Solvers::new(rates, &self.cfg);
    }

    /// Run [`Phase::plan`] for `batch`.
    pub fn step_batch(&mut self, batch: &Batch, norm: &Normalization) -> Result<StepLosses> {
        if batch.images.ncols() != self.cfg.x_dim {
            return Err(Error::Shape("batch width must equal x_dim"));
        }
        let x: Tensor<B, 2> = ndarray_to_burn_2(&self.device, &norm.apply(&batch.images));
        let mut out = StepLosses::default();
        for &phase in Phase::plan(batch.kind(), self.cfg.variant) {
            match phase {
                Phase::Reconstruction => {
                    out.reconstruction = Some(self.reconstruction_step(x.clone()));
                }
                Phase::Regularization(RegStep::Discriminator) => {
                    let d = self.discriminator_step(x.clone())?;
                    out.d_cat = d.d_cat;
                    out.d_gauss = Some(d.d_gauss);
                }
                Phase::Regularization(RegStep::Generator) => {
                    out.generator = Some(self.generator_step(x.clone()));
                }
                Phase::SemiSupervised => {
                    let classes = batch.classes()?;
                    out.classification = Some(self.classification_step(x.clone(), &classes)?);
                }
            }
        }
        Ok(out)
    }

    /// Reconstruction phase: updates the decoder and the encoder-as-reconstructor.
    pub fn reconstruction_step(&mut self, x: Tensor<B, 2>) -> f32 {
        let lr = self.solvers.rates().reconstruction;
        let codes = self.nets.encoder.forward(x.clone(), Mode::Train, &mut self.rng);
        let recon = self
            .nets
            .decoder
            .forward(codes.latent(), Mode::Train, &mut self.rng);
        let loss = loss::reconstruction(recon, x);
        let value = scalar(&loss);

        let mut grads = loss.backward();
        let dec_grads = GradientsParams::from_module(&mut grads, &self.nets.decoder);
        let enc_grads = GradientsParams::from_module(&mut grads, &self.nets.encoder);
        drop(grads);

        self.nets.decoder = step_module(&mut self.solvers.decoder, lr, &self.nets.decoder, dec_grads);
        self.nets.encoder =
            step_module(&mut self.solvers.encoder_recon, lr, &self.nets.encoder, enc_grads);
        value
    }

    /// Discriminator half of the regularization phase.
    ///
    /// Fake codes come from the encoder in eval mode and are detached; the encoder is untouched.
    pub fn discriminator_step(&mut self, x: Tensor<B, 2>) -> Result<DiscriminatorLosses> {
        let n = x.dims()[0];
        let real = sample_codes::<B>(&self.device, n, &self.cfg, &mut self.rng);
        let fake = self.nets.encoder.forward(x, Mode::Eval, &mut self.rng).detach();
        self.update_discriminators(real, fake)
    }

    /// One update of both discriminators on explicit real (prior) and fake codes.
    pub fn update_discriminators(
        &mut self,
        real: Codes<B>,
        fake: Codes<B>,
    ) -> Result<DiscriminatorLosses> {
        let lr = self.solvers.rates().regularization;
        let d_gauss = &self.nets.d_gauss;
        let gauss_loss = loss::discriminator(
            d_gauss.forward(real.gauss, Mode::Train, &mut self.rng),
            d_gauss.forward(fake.gauss.detach(), Mode::Train, &mut self.rng),
        );
        let cat_loss = match (self.nets.d_cat.as_ref(), real.cat, fake.cat) {
            (Some(d_cat), Some(real_cat), Some(fake_cat)) => Some(loss::discriminator(
                d_cat.forward(real_cat, Mode::Train, &mut self.rng),
                d_cat.forward(fake_cat.detach(), Mode::Train, &mut self.rng),
            )),
            (None, None, None) => None,
            _ => return Err(Error::Shape("categorical codes do not match the variant")),
        };

        let losses = DiscriminatorLosses {
            d_cat: cat_loss.as_ref().map(scalar),
            d_gauss: scalar(&gauss_loss),
        };
        let total = match cat_loss {
            Some(cat) => gauss_loss + cat,
            None => gauss_loss,
        };

        let mut grads = total.backward();
        let gauss_grads = GradientsParams::from_module(&mut grads, &self.nets.d_gauss);
        let cat_grads = self
            .nets
            .d_cat
            .as_ref()
            .map(|d| GradientsParams::from_module(&mut grads, d));
        drop(grads);

        self.nets.d_gauss = step_module(&mut self.solvers.d_gauss, lr, &self.nets.d_gauss, gauss_grads);
        if let Some(cat_grads) = cat_grads {
            let (d_cat, optim) = self
                .nets
                .d_cat
                .as_ref()
                .zip(self.solvers.d_cat.as_mut())
                .ok_or(Error::Domain("D_cat has no optimizer"))?;
            let next = step_module(optim, lr, d_cat, cat_grads);
            self.nets.d_cat = Some(next);
        }
        Ok(losses)
    }

    /// Generator half of the regularization phase: updates the encoder-as-generator only.
    pub fn generator_step(&mut self, x: Tensor<B, 2>) -> f32 {
        let lr = self.solvers.rates().regularization;
        let fake = self.nets.encoder.forward(x, Mode::Train, &mut self.rng);
        let mut loss = loss::generator(self.nets.d_gauss.forward(fake.gauss, Mode::Train, &mut self.rng));
        if let (Some(d_cat), Some(cat)) = (self.nets.d_cat.as_ref(), fake.cat) {
            loss = loss + loss::generator(d_cat.forward(cat, Mode::Train, &mut self.rng));
        }
        let value = scalar(&loss);

        let mut grads = loss.backward();
        let enc_grads = GradientsParams::from_module(&mut grads, &self.nets.encoder);
        drop(grads);

        self.nets.encoder =
            step_module(&mut self.solvers.encoder_gen, lr, &self.nets.encoder, enc_grads);
        value
    }

    /// Semi-supervised phase: cross-entropy of the categorical head against `classes`.
    pub fn classification_step(&mut self, x: Tensor<B, 2>, classes: &[usize]) -> Result<f32> {
        if classes.len() != x.dims()[0] {
            return Err(Error::Shape("one class per row is required"));
        }
        let lr = self.solvers.rates().semi_supervised;
        let targets: Tensor<B, 2> =
            ndarray_to_burn_2(&self.device, &one_hot(classes, self.cfg.n_classes)?);
        let probs = self
            .nets
            .encoder
            .forward(x, Mode::Train, &mut self.rng)
            .cat
            .ok_or(Error::Domain("classification needs a categorical head"))?;
        let loss = loss::classification(probs, targets);
        let value = scalar(&loss);

        let mut grads = loss.backward();
        let enc_grads = GradientsParams::from_module(&mut grads, &self.nets.encoder);
        drop(grads);

        let optim = self
            .solvers
            .encoder_semi
            .as_mut()
            .ok_or(Error::Domain("encoder has no classifier optimizer"))?;
        self.nets.encoder = step_module(optim, lr, &self.nets.encoder, enc_grads);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::burn_to_ndarray_2;
    use crate::model::DropoutRates;
    use crate::schedule::LrSchedule;
    use crate::BurnBackend;
    use burn::tensor::backend::Backend;
    use ndarray::Array2;

    type TestState = TrainState<BurnBackend>;

    fn cfg(variant: Variant) -> AaeConfig {
        AaeConfig {
            x_dim: 12,
            hidden: 16,
            z_dim: 2,
            n_classes: 3,
            variant,
            dropout: DropoutRates::none(),
        }
    }

    fn state(variant: Variant, seed: u64) -> TestState {
        state_with(cfg(variant), seed)
    }

    fn state_with(cfg: AaeConfig, seed: u64) -> TestState {
        let device = <BurnBackend as Backend>::Device::default();
        let nets = Networks::new(&device, &cfg, seed).unwrap();
        TrainState::new(device, nets, cfg, LearningRates::default(), seed).unwrap()
    }

    /// Encoder dropout only, so train and eval forwards of the encoder differ.
    fn noisy_encoder_cfg() -> AaeConfig {
        AaeConfig {
            dropout: DropoutRates {
                encoder: 0.25,
                ..DropoutRates::none()
            },
            ..cfg(Variant::SemiSupervised)
        }
    }

    /// Same sequence as `discriminator_step`, with the encoder forward in `mode`.
    fn discriminator_step_in(st: &mut TestState, x: Tensor<BurnBackend, 2>, mode: Mode) {
        let n = x.dims()[0];
        let real = sample_codes::<BurnBackend>(&st.device, n, &st.cfg, &mut st.rng);
        let fake = st.nets.encoder.forward(x, mode, &mut st.rng).detach();
        st.update_discriminators(real, fake).unwrap();
    }

    fn images(n: usize) -> Array2<f32> {
        Array2::from_shape_fn((n, 12), |(i, k)| if k % 3 == i % 3 { 1.0 } else { 0.0 })
    }

    #[test]
    fn plans_follow_batch_kind_and_variant() {
        use BatchKind::*;
        assert_eq!(Phase::plan(Labeled, Variant::SemiSupervised), LABELED_PLAN);
        assert_eq!(Phase::plan(Unlabeled, Variant::SemiSupervised), AUTOENCODER_PLAN);
        assert_eq!(Phase::plan(Labeled, Variant::Unsupervised), AUTOENCODER_PLAN);
        assert_eq!(
            AUTOENCODER_PLAN,
            &[
                Phase::Reconstruction,
                Phase::Regularization(RegStep::Discriminator),
                Phase::Regularization(RegStep::Generator),
            ]
        );
    }

    #[test]
    fn discriminator_update_freezes_autoencoder_and_reduces_loss() {
        let mut st = state(Variant::SemiSupervised, 3);
        let device = st.device().clone();
        let before = st.networks().param_norms();

        // Separable: real codes near +1, fake codes near -1.
        let n = 8;
        let codes = |v: f32| Codes::<BurnBackend> {
            cat: Some(ndarray_to_burn_2(&device, &Array2::from_elem((n, 3), (v + 1.0) / 2.0))),
            gauss: ndarray_to_burn_2(&device, &Array2::from_elem((n, 2), v)),
        };
        let mut losses = Vec::new();
        for _ in 0..25 {
            let l = st.update_discriminators(codes(1.0), codes(-1.0)).unwrap();
            losses.push(l.d_gauss + l.d_cat.unwrap());
        }
        for w in losses.windows(2) {
            assert!(w[1] <= w[0] + 1e-6, "loss went up: {losses:?}");
        }
        assert!(losses[24] < losses[0]);

        let after = st.networks().param_norms();
        assert_eq!(after.encoder, before.encoder);
        assert_eq!(after.decoder, before.decoder);
        assert_ne!(after.d_gauss, before.d_gauss);
        assert_ne!(after.d_cat, before.d_cat);
    }

    #[test]
    fn discriminator_step_never_touches_the_encoder() {
        let mut st = state(Variant::SemiSupervised, 4);
        let before = st.networks().param_norms();
        let x = ndarray_to_burn_2(st.device(), &images(6));
        let l = st.discriminator_step(x).unwrap();
        assert!(l.d_cat.is_some() && l.d_gauss.is_finite());
        let after = st.networks().param_norms();
        assert_eq!(after.encoder, before.encoder);
        assert_eq!(after.decoder, before.decoder);
    }

    #[test]
    fn discriminator_step_uses_eval_mode_fakes() {
        let device = <BurnBackend as Backend>::Device::default();
        let x: Tensor<BurnBackend, 2> = ndarray_to_burn_2(&device, &images(6));
        let mut stepped = state_with(noisy_encoder_cfg(), 11);
        let mut eval = state_with(noisy_encoder_cfg(), 11);
        let mut train = state_with(noisy_encoder_cfg(), 11);

        stepped.discriminator_step(x.clone()).unwrap();
        discriminator_step_in(&mut eval, x.clone(), Mode::Eval);
        discriminator_step_in(&mut train, x, Mode::Train);

        let (s, e, t) = (
            stepped.networks().param_norms(),
            eval.networks().param_norms(),
            train.networks().param_norms(),
        );
        assert_eq!((s.d_gauss, s.d_cat), (e.d_gauss, e.d_cat));
        assert_ne!((s.d_gauss, s.d_cat), (t.d_gauss, t.d_cat));
    }

    #[test]
    fn generator_step_runs_the_encoder_in_train_mode() {
        let mut st = state_with(noisy_encoder_cfg(), 12);
        let x = ndarray_to_burn_2(st.device(), &images(6));

        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let nets = st.networks();
        let codes = nets.encoder.forward(x.clone(), Mode::Eval, &mut rng);
        let eval_loss = loss::generator(nets.d_gauss.forward(codes.gauss, Mode::Eval, &mut rng))
            + loss::generator(nets.d_cat.as_ref().unwrap().forward(
                codes.cat.unwrap(),
                Mode::Eval,
                &mut rng,
            ));
        let eval_loss = scalar(&eval_loss);

        let train_loss = st.generator_step(x);
        assert!(train_loss.is_finite());
        assert_ne!(train_loss, eval_loss);
    }

    #[test]
    fn reconstruction_step_only_moves_autoencoder() {
        let mut st = state(Variant::SemiSupervised, 13);
        let before = st.networks().param_norms();
        let x = ndarray_to_burn_2(st.device(), &images(6));
        assert!(st.reconstruction_step(x) > 0.0);
        let after = st.networks().param_norms();
        assert_ne!(after.encoder, before.encoder);
        assert_ne!(after.decoder, before.decoder);
        assert_eq!(after.d_gauss, before.d_gauss);
        assert_eq!(after.d_cat, before.d_cat);
    }

    #[test]
    fn classification_step_only_moves_encoder() {
        let mut st = state(Variant::SemiSupervised, 14);
        let before = st.networks().param_norms();
        let x = ndarray_to_burn_2(st.device(), &images(6));
        assert!(st.classification_step(x, &[0, 1, 2, 0, 1, 2]).unwrap() > 0.0);
        let after = st.networks().param_norms();
        assert_ne!(after.encoder, before.encoder);
        assert_eq!(after.decoder, before.decoder);
        assert_eq!(after.d_gauss, before.d_gauss);
        assert_eq!(after.d_cat, before.d_cat);
    }

    #[test]
    fn networks_of_another_shape_are_rejected() {
        let device = <BurnBackend as Backend>::Device::default();
        let wide = AaeConfig {
            z_dim: 3,
            ..cfg(Variant::SemiSupervised)
        };
        let nets = Networks::<BurnBackend>::new(&device, &wide, 1).unwrap();
        let err = TrainState::new(device, nets, cfg(Variant::SemiSupervised), LearningRates::default(), 1)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Shape(_)), "{err}");
    }

    #[test]
    fn generator_step_only_moves_the_encoder() {
        let mut st = state(Variant::SemiSupervised, 5);
        let before = st.networks().param_norms();
        let x = ndarray_to_burn_2(st.device(), &images(6));
        assert!(st.generator_step(x).is_finite());
        let after = st.networks().param_norms();
        assert_ne!(after.encoder, before.encoder);
        assert_eq!(after.decoder, before.decoder);
        assert_eq!(after.d_gauss, before.d_gauss);
        assert_eq!(after.d_cat, before.d_cat);
    }

    #[test]
    fn step_batch_dispatches_on_batch_kind() {
        let mut st = state(Variant::SemiSupervised, 6);
        let norm = Normalization::identity();
        let unlabeled = Batch::new(images(6), vec![crate::data::UNLABELED; 6]).unwrap();
        let l = st.step_batch(&unlabeled, &norm).unwrap();
        assert!(l.reconstruction.is_some() && l.generator.is_some());
        assert!(l.d_cat.is_some() && l.d_gauss.is_some());
        assert!(l.classification.is_none());

        let labeled = Batch::new(images(6), vec![0, 1, 2, 0, 1, 2]).unwrap();
        let l = st.step_batch(&labeled, &norm).unwrap();
        assert_eq!(
            l,
            StepLosses {
                classification: l.classification,
                ..StepLosses::default()
            }
        );
        assert!(l.classification.unwrap() > 0.0);
    }

    #[test]
    fn unsupervised_variant_ignores_labels() {
        let mut st = state(Variant::Unsupervised, 7);
        let labeled = Batch::new(images(6), vec![0, 1, 2, 0, 1, 2]).unwrap();
        let l = st.step_batch(&labeled, &Normalization::identity()).unwrap();
        assert!(l.classification.is_none() && l.d_cat.is_none());
        assert!(l.reconstruction.is_some() && l.d_gauss.is_some());
        let x = ndarray_to_burn_2(st.device(), &images(6));
        assert!(st.classification_step(x, &[0; 6]).is_err());
    }

    #[test]
    fn reset_optimizers_match_brand_new_ones() {
        let norm = Normalization::identity();
        let unlabeled = Batch::new(images(6), vec![crate::data::UNLABELED; 6]).unwrap();
        let labeled = Batch::new(images(6), vec![0, 1, 2, 0, 1, 2]).unwrap();

        let mut warmed = state(Variant::SemiSupervised, 8);
        for _ in 0..3 {
            warmed.step_batch(&unlabeled, &norm).unwrap();
            warmed.step_batch(&labeled, &norm).unwrap();
        }
        let decayed = LrSchedule::default().rates_at(75);
        warmed.reset_optimizers(decayed);

        let device = warmed.device().clone();
        let mut fresh = TrainState::new(
            device,
            warmed.networks().clone(),
            warmed.config().clone(),
            decayed,
            99,
        )
        .unwrap();

        // Same input, no dropout: only optimizer state could make these differ.
        let x = ndarray_to_burn_2(fresh.device(), &images(6));
        warmed.reconstruction_step(x.clone());
        fresh.reconstruction_step(x);
        assert_eq!(decode_fixed_codes(&warmed), decode_fixed_codes(&fresh));
        assert_eq!(warmed.networks().param_norms(), fresh.networks().param_norms());
        assert_eq!(warmed.rates(), decayed);
    }

    fn decode_fixed_codes(st: &TestState) -> Array2<f32> {
        let z = ndarray_to_burn_2(st.device(), &Array2::from_elem((2, 5), 0.5));
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        burn_to_ndarray_2(st.networks().decoder.forward(z, Mode::Eval, &mut rng)).unwrap()
    }
}
