//! Common stuffs for ensembles.
//!
//! Members are stored in the columns of an `n x N` array.

use nd::prelude::*;
use nd::linalg::general_mat_mul;
use nd::parallel::prelude::*;
use nd::Zip;
use rand::RngCore;

use na_core::{CovarianceOperator, EvolutionModel, Result};

pub fn ensemble_mean(e: ArrayView<f64, Ix2>) -> Array<f64, Ix1> {
  let ens = e.dim().1;
  assert!(ens > 0, "empty ensemble");
  e.sum_axis(Axis(1)) / ens as f64
}

/// Subtracts the ensemble mean from every member in place, returning the mean.
pub fn to_anomaly(mut e: ArrayViewMut<f64, Ix2>) -> Array<f64, Ix1> {
  let mean = ensemble_mean(e.view());
  e.axis_iter_mut(Axis(1))
    .into_par_iter()
    .for_each(|mut member| {
      member -= &mean;
    });
  mean
}

/// `E <- (E - mean) factor + mean`
pub fn inflate_in_place(mut e: ArrayViewMut<f64, Ix2>, factor: f64) {
  if factor == 1.0 { return; }

  let mean = ensemble_mean(e.view());
  e.axis_iter_mut(Axis(1))
    .into_par_iter()
    .for_each(|mut member| {
      Zip::from(&mut member)
        .and(&mean)
        .for_each(|v, &m| {
          *v = (*v - m) * factor + m;
        });
    });
}

/// Sample covariance, `A A^T / (N - 1)` where `A` holds the anomalies.
pub fn ensemble_covariance(e: ArrayView<f64, Ix2>) -> Array<f64, Ix2> {
  let (n, ens) = e.dim();
  assert!(ens > 1, "need at least two members");

  let mut a = e.to_owned();
  to_anomaly(a.view_mut());

  let mut c = Array::zeros((n, n));
  general_mat_mul(1.0 / (ens - 1) as f64, &a, &a.t(), 0.0, &mut c);
  c
}

/// The trace of the sample covariance.
pub fn ensemble_spread(e: ArrayView<f64, Ix2>) -> f64 {
  let ens = e.dim().1;
  assert!(ens > 1, "need at least two members");

  let mut a = e.to_owned();
  to_anomaly(a.view_mut());
  a.iter().map(|v| v * v ).sum::<f64>() / (ens - 1) as f64
}

/// Fills `out` with members drawn from `N(u, cov)`. The sampled perturbations are
/// re-centered so the ensemble mean is exactly `u`.
pub fn generate_ensemble(u: ArrayView<f64, Ix1>,
                         cov: &dyn CovarianceOperator,
                         mut out: ArrayViewMut<f64, Ix2>,
                         rng: &mut dyn RngCore) -> Result<()> {
  assert_eq!(out.dim().0, u.dim());
  assert_eq!(cov.size(), u.dim());

  cov.sample_zero_mean_normal(out.view_mut(), rng)?;
  to_anomaly(out.view_mut());
  for mut member in out.axis_iter_mut(Axis(1)) {
    member += &u;
  }

  Ok(())
}

/// Propagates every member through `model` and adds model error sampled from `q`.
pub fn ensemble_forecast(mut e: ArrayViewMut<f64, Ix2>,
                         model: &mut dyn EvolutionModel,
                         q: &dyn CovarianceOperator,
                         k: usize, dt: f64,
                         rng: &mut dyn RngCore) -> Result<()> {
  assert_eq!(q.size(), e.dim().0);

  model.apply(e.view_mut(), k, dt, false)?;

  let mut noise = Array::zeros(e.dim());
  q.sample_zero_mean_normal(noise.view_mut(), rng)?;
  e += &noise;

  Ok(())
}
