//! The stochastic ensemble Kalman smoother: analysis with perturbed observations.

use nd::prelude::*;
use nd::linalg::general_mat_mul;
use rand::RngCore;

use na_core::{CovarianceOperator, ObservationOperator, Result};
use nla_factorize::{cholesky_solve, Cholesky};

use super::{apply_transform, EnKSVariant};
use crate::ensemble::{ensemble_mean, to_anomaly};

#[derive(Debug, Clone, Copy, Default)]
pub struct EnKS;

impl EnKS {
  pub fn new() -> EnKS { EnKS }
}

impl EnKSVariant for EnKS {
  fn process_global_ensemble(&self, eg: ArrayView<f64, Ix2>,
                             h: &dyn ObservationOperator,
                             _k: usize) -> Result<Vec<Array<f64, Ix2>>> {
    let ens = eg.dim().1;
    let nobs = h.nobs();

    let mut anomalies = eg.to_owned();
    let mean = ensemble_mean(eg);
    for mut member in anomalies.axis_iter_mut(Axis(1)) {
      member -= &mean;
    }

    // H(E - mean)
    let mut hx = Array::zeros((nobs, ens));
    h.apply(anomalies.view(), hx.view_mut())?;
    // H(E)
    let mut he = Array::zeros((nobs, ens));
    h.apply(eg, he.view_mut())?;

    Ok(vec![hx, he])
  }

  fn ensemble_transform(&self, e: ArrayViewMut<f64, Ix2>,
                        global: &[Array<f64, Ix2>],
                        z: ArrayView<f64, Ix1>,
                        r: &dyn CovarianceOperator,
                        _k: usize,
                        rng: &mut dyn RngCore,
                        mut x: ArrayViewMut<f64, Ix2>) -> Result<()> {
    assert_eq!(global.len(), 2);
    let hx = &global[0];
    let he = &global[1];
    let ens = e.dim().1;
    let nobs = he.dim().0;
    assert_eq!(z.dim(), nobs);
    assert_eq!(x.dim(), (ens, ens));

    x.fill(0.0);
    x.diag_mut().fill(1.0);
    if nobs == 0 { return Ok(()); }

    // F = HX HX^T + (N-1) R
    let mut f = Array::zeros((nobs, nobs));
    general_mat_mul(1.0, hx, &hx.t(), 0.0, &mut f);
    r.fmadd(f.view_mut(), (ens - 1) as f64)?;

    // K = (F^-1 HX)^T, N x nobs
    let rf = f.l_lstar()?;
    let mut finv_hx = hx.clone();
    cholesky_solve(&rf, &mut finv_hx)?;
    let gain = finv_hx.reversed_axes();

    // D = z + N(0, R) - H(E), perturbations re-centered to zero mean
    let mut d = Array::zeros((nobs, ens));
    r.sample_zero_mean_normal(d.view_mut(), rng)?;
    to_anomaly(d.view_mut());
    for mut member in d.axis_iter_mut(Axis(1)) {
      member += &z;
    }
    d -= he;

    // X = I + K D
    general_mat_mul(1.0, &gain, &d, 1.0, &mut x);

    apply_transform(e, x.view());
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use approx::assert_abs_diff_eq;
  use na_core::{DiagonalCovariance, MatrixObservationOperator};
  use rand::SeedableRng;
  use rand::rngs::StdRng;

  use crate::ensemble::ensemble_spread;

  fn members() -> Array<f64, Ix2> {
    arr2(&[
      [1.0, 1.1, 0.9, 1.0],
      [1.0, 0.9, 1.1, 1.0],
      [1.0, 1.0, 1.0, 0.9],
    ])
  }

  fn analyse(e: &mut Array<f64, Ix2>, z: ArrayView<f64, Ix1>, seed: u64) -> Array<f64, Ix2> {
    let h = MatrixObservationOperator::identity(3);
    let r = DiagonalCovariance::spherical(3, 0.01);
    let variant = EnKS::new();
    let mut rng = StdRng::seed_from_u64(seed);

    let global = variant.process_global_ensemble(e.view(), &h, 0).unwrap();
    let mut x = Array::zeros((4, 4));
    variant.ensemble_transform(e.view_mut(), &global, z, &r, 0, &mut rng, x.view_mut())
      .unwrap();
    x
  }

  #[test]
  fn columns_of_transform_sum_to_one() {
    // de-meaned perturbations keep the analysis an affine combination of members
    let mut e = members();
    let x = analyse(&mut e, arr1(&[1.0, 1.0, 1.0]).view(), 3);
    assert_abs_diff_eq!(x.sum_axis(Axis(0)), Array1::<f64>::ones(4), epsilon = 1e-12);
  }

  #[test]
  fn mean_moves_toward_observation() {
    let z = arr1(&[1.0, 1.0, 1.0]);
    let mut e = members();
    let before = ensemble_mean(e.view());
    analyse(&mut e, z.view(), 1);
    let after = ensemble_mean(e.view());

    let dist = |m: &Array<f64, Ix1>| (m - &z).mapv(|v| v * v ).sum().sqrt();
    assert!(dist(&after) < dist(&before));
  }

  #[test]
  fn spread_shrinks_on_average() {
    let z = arr1(&[1.0, 1.0, 1.0]);
    let before = ensemble_spread(members().view());

    let trials = 200;
    let mut total = 0.0;
    for seed in 0..trials {
      let mut e = members();
      analyse(&mut e, z.view(), seed);
      total += ensemble_spread(e.view());
    }
    assert!(total / (trials as f64) < before);
  }

  #[test]
  fn no_observations_is_identity() {
    let h = MatrixObservationOperator::new(Array::zeros((0, 3)));
    let r = DiagonalCovariance::new(Array::zeros(0));
    let variant = EnKS::new();
    let mut rng = StdRng::seed_from_u64(0);
    let mut e = members();

    let global = variant.process_global_ensemble(e.view(), &h, 0).unwrap();
    let mut x = Array::zeros((4, 4));
    variant.ensemble_transform(e.view_mut(), &global, Array1::zeros(0).view(), &r, 0,
                               &mut rng, x.view_mut())
      .unwrap();
    assert_eq!(x, Array2::<f64>::eye(4));
    assert_eq!(e, members());
  }
}
