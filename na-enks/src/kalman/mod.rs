//! Ensemble Kalman analysis variants and the smoother driving them.
//!
//! Every variant reduces the analysis to an `N x N` ensemble transform `X`, with
//! `E_a = E_f X`.

use nd::prelude::*;
use rand::RngCore;

use na_core::{CovarianceOperator, ObservationOperator, Result};

use crate::ensemble::inflate_in_place;

pub use self::enks::EnKS;
pub use self::estks::ESTKS;

pub mod enks;
pub mod estks;
pub mod smoother;

pub trait EnKSVariant: Send + Sync {
  /// Called once with the state and ensemble sizes.
  fn init(&mut self, _n: usize, _ens: usize) { }

  /// Inflates `e` in place around its mean. Called at the start of every analysis,
  /// `factor == 1` included. Variants may instead remember `factor` and fold it into
  /// the transform.
  fn apply_cov_inflation(&mut self, e: ArrayViewMut<f64, Ix2>, factor: f64, _k: usize) {
    inflate_in_place(e, factor);
  }

  /// Computes whatever `ensemble_transform` needs from the full, global ensemble
  /// (typically some form of `H(E)`).
  fn process_global_ensemble(&self, eg: ArrayView<f64, Ix2>,
                             h: &dyn ObservationOperator,
                             k: usize) -> Result<Vec<Array<f64, Ix2>>>;

  /// Computes the transform for observations `z` into `x` and applies it to the
  /// (possibly local) ensemble `e`.
  fn ensemble_transform(&self, e: ArrayViewMut<f64, Ix2>,
                        global: &[Array<f64, Ix2>],
                        z: ArrayView<f64, Ix1>,
                        r: &dyn CovarianceOperator,
                        k: usize,
                        rng: &mut dyn RngCore,
                        x: ArrayViewMut<f64, Ix2>) -> Result<()>;
}

/// `e <- e x`
fn apply_transform(mut e: ArrayViewMut<f64, Ix2>, x: ArrayView<f64, Ix2>) {
  let ex = e.dot(&x);
  e.assign(&ex);
}
