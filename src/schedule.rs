//! Learning-rate schedule: a pure function of the epoch.

use burn_optim::LearningRate;

use crate::{Error, Result};

/// One learning rate per objective family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LearningRates {
    /// Decoder and encoder-as-reconstructor.
    pub reconstruction: LearningRate,
    /// Encoder-as-classifier.
    pub semi_supervised: LearningRate,
    /// Encoder-as-generator and both discriminators.
    pub regularization: LearningRate,
}

impl Default for LearningRates {
    fn default() -> Self {
        Self {
            reconstruction: 6e-4,
            semi_supervised: 1e-3,
            regularization: 8e-4,
        }
    }
}

impl LearningRates {
    pub fn scaled(self, factor: f64) -> Self {
        Self {
            reconstruction: self.reconstruction * factor,
            semi_supervised: self.semi_supervised * factor,
            regularization: self.regularization * factor,
        }
    }

    fn is_valid(&self) -> bool {
        [self.reconstruction, self.semi_supervised, self.regularization]
            .iter()
            .all(|&lr| lr.is_finite() && lr > 0.0)
    }
}

/// Step decay: `base` before `decay_epoch`, `base / factor` from `decay_epoch` on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LrSchedule {
    pub base: LearningRates,
    pub decay_epoch: usize,
    pub factor: f64,
}

impl Default for LrSchedule {
    fn default() -> Self {
        Self {
            base: LearningRates::default(),
            decay_epoch: 75,
            factor: 10.0,
        }
    }
}

impl LrSchedule {
    pub fn validate(&self) -> Result<()> {
        if !self.base.is_valid() {
            return Err(Error::Domain("learning rates must be finite and > 0"));
        }
        if !(self.factor.is_finite() && self.factor > 0.0) {
            return Err(Error::Domain("decay factor must be finite and > 0"));
        }
        Ok(())
    }

    pub fn rates_at(&self, epoch: usize) -> LearningRates {
        if epoch >= self.decay_epoch {
            self.base.scaled(1.0 / self.factor)
        } else {
            self.base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_drop_tenfold_at_the_decay_epoch() {
        let s = LrSchedule::default();
        assert_eq!(s.rates_at(0), LearningRates::default());
        assert_eq!(s.rates_at(74), LearningRates::default());
        let late = s.rates_at(75);
        assert!((late.reconstruction - 6e-5).abs() < 1e-12);
        assert!((late.semi_supervised - 1e-4).abs() < 1e-12);
        assert!((late.regularization - 8e-5).abs() < 1e-12);
        assert_eq!(s.rates_at(4999), late);
    }

    #[test]
    fn schedule_is_pure() {
        let s = LrSchedule {
            decay_epoch: 3,
            ..LrSchedule::default()
        };
        let forward: Vec<_> = (0..6).map(|e| s.rates_at(e)).collect();
        let backward: Vec<_> = (0..6).rev().map(|e| s.rates_at(e)).collect();
        assert!(forward.iter().eq(backward.iter().rev()));
    }

    #[test]
    fn invalid_schedules_are_rejected() {
        let mut s = LrSchedule::default();
        s.base.semi_supervised = 0.0;
        assert!(s.validate().is_err());
        let s = LrSchedule {
            factor: f64::NAN,
            ..LrSchedule::default()
        };
        assert!(s.validate().is_err());
        LrSchedule::default().validate().unwrap();
    }
}
