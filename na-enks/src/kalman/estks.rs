//! The error subspace transform Kalman smoother.
//!
//! A deterministic square root analysis carried out in the `N - 1` dimensional error
//! subspace spanned by the columns of a fixed deviation matrix `T`.

use nd::prelude::*;
use nd::linalg::general_mat_mul;
use rand::RngCore;

use na_core::{CovarianceOperator, ObservationOperator, Result};
use nla_factorize::{cholesky_solve, inverse_symmetric_sqrt, Cholesky};

use super::{apply_transform, EnKSVariant};
use crate::ensemble::ensemble_mean;

/// Builds the `N x (N - 1)` matrix `T` with `T^T 1 = 0`, `T^T T = I` and
/// `T T^T = I - 1 1^T / N`.
pub fn deviation_matrix(ens: usize) -> Array<f64, Ix2> {
  assert!(ens > 1, "need at least two members");
  let nf = ens as f64;
  let a = 1.0 / (nf * (1.0 / nf.sqrt() + 1.0));

  let mut t = Array::from_elem((ens, ens - 1), -a);
  t.diag_mut().fill(1.0 - a);
  t.row_mut(ens - 1).fill(-1.0 / nf.sqrt());
  t
}

#[derive(Debug, Clone)]
pub struct ESTKS {
  t: Array<f64, Ix2>,
  /// Folded into the transform instead of rescaling the ensemble.
  inflation: f64,
}

impl Default for ESTKS {
  fn default() -> ESTKS {
    ESTKS {
      t: Array::zeros((0, 0)),
      inflation: 1.0,
    }
  }
}

impl ESTKS {
  pub fn new() -> ESTKS { Default::default() }

  pub fn deviation_basis(&self) -> ArrayView<f64, Ix2> { self.t.view() }
}

impl EnKSVariant for ESTKS {
  fn init(&mut self, _n: usize, ens: usize) {
    self.t = deviation_matrix(ens);
  }

  /// The ensemble is left alone; the factor enters the transform as
  /// `rho = 2 - factor`, which must stay positive, so `factor < 2`.
  fn apply_cov_inflation(&mut self, _e: ArrayViewMut<f64, Ix2>, factor: f64, _k: usize) {
    assert!(factor >= 1.0, "inflation factor must be at least 1");
    assert!(factor < 2.0, "square root transform needs an inflation factor below 2");
    self.inflation = factor;
  }

  fn process_global_ensemble(&self, eg: ArrayView<f64, Ix2>,
                             h: &dyn ObservationOperator,
                             _k: usize) -> Result<Vec<Array<f64, Ix2>>> {
    let ens = eg.dim().1;
    let nobs = h.nobs();

    // H(mean)
    let mean = ensemble_mean(eg);
    let mut hm = Array::zeros((nobs, 1));
    h.apply(mean.view().insert_axis(Axis(1)), hm.view_mut())?;
    // H(E)
    let mut he = Array::zeros((nobs, ens));
    h.apply(eg, he.view_mut())?;

    Ok(vec![hm, he])
  }

  fn ensemble_transform(&self, e: ArrayViewMut<f64, Ix2>,
                        global: &[Array<f64, Ix2>],
                        z: ArrayView<f64, Ix1>,
                        r: &dyn CovarianceOperator,
                        _k: usize,
                        _rng: &mut dyn RngCore,
                        mut x: ArrayViewMut<f64, Ix2>) -> Result<()> {
    assert_eq!(global.len(), 2);
    let hm = &global[0];
    let he = &global[1];
    let ens = e.dim().1;
    let nobs = he.dim().0;
    assert_eq!(self.t.dim(), (ens, ens - 1), "variant was initialized for another ensemble size");
    assert_eq!(z.dim(), nobs);
    assert_eq!(x.dim(), (ens, ens));

    let rho = 1.0 - (self.inflation - 1.0);
    let n1 = ens - 1;

    // A^-1 = rho (N-1) I + (HL)^T R^-1 HL, and (HL)^T R^-1 (z - H(mean))
    let mut ainv = Array::zeros((n1, n1));
    let mut w = Array::zeros((n1, 1));
    if nobs > 0 {
      let hl = he.dot(&self.t);
      let mut rinv_hl = Array::zeros((nobs, n1));
      r.solve(hl.view(), rinv_hl.view_mut())?;
      general_mat_mul(1.0, &hl.t(), &rinv_hl, 0.0, &mut ainv);

      let dz = (&z - &hm.column(0)).insert_axis(Axis(1));
      let mut rinv_dz = Array::zeros((nobs, 1));
      r.solve(dz.view(), rinv_dz.view_mut())?;
      general_mat_mul(1.0, &hl.t(), &rinv_dz, 0.0, &mut w);
    }
    let shift = rho * n1 as f64;
    ainv.diag_mut().mapv_inplace(|v| v + shift );

    // W = C T^T sqrt(N-1) + w, where C = A^-1/2
    let c = inverse_symmetric_sqrt(&ainv)?;
    let mut wm = c.dot(&self.t.t());
    wm *= (n1 as f64).sqrt();

    let ra = ainv.l_lstar()?;
    cholesky_solve(&ra, &mut w)?;
    wm += &w;

    let inv_n = 1.0 / ens as f64;
    x.fill(inv_n);
    general_mat_mul(1.0, &self.t, &wm, 1.0, &mut x);

    apply_transform(e, x.view());

    // the smoother gets the transform without the inflation
    if rho != 1.0 {
      x.fill(inv_n);
      general_mat_mul(rho, &self.t, &wm, 1.0, &mut x);
    }

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

  use crate::ensemble::{ensemble_covariance, ensemble_spread};

  fn members() -> Array<f64, Ix2> {
    arr2(&[
      [1.0, 1.1, 0.9, 1.0],
      [1.0, 0.9, 1.1, 1.0],
      [1.0, 1.0, 1.0, 0.9],
    ])
  }

  #[test]
  fn deviation_matrix_properties() {
    for &ens in [2usize, 3, 4, 7, 20].iter() {
      let t = deviation_matrix(ens);
      assert_eq!(t.dim(), (ens, ens - 1));

      assert_abs_diff_eq!(t.sum_axis(Axis(0)), Array1::<f64>::zeros(ens - 1), epsilon = 1e-12);
      assert_abs_diff_eq!(t.t().dot(&t), Array2::<f64>::eye(ens - 1), epsilon = 1e-12);

      let centering = Array2::<f64>::eye(ens) - 1.0 / ens as f64;
      assert_abs_diff_eq!(t.dot(&t.t()), centering, epsilon = 1e-12);
    }
  }

  #[test]
  fn matches_kalman_update() {
    let mut e = members();
    let z = arr1(&[1.0, 1.0, 1.0]);
    let sigma2 = 0.01;

    // reference: mean + G (z - mean), (I - G) P with G = P (P + R)^-1
    let mean = ensemble_mean(e.view());
    let p = ensemble_covariance(e.view());
    let mut s = p.clone();
    s.diag_mut().mapv_inplace(|v| v + sigma2 );
    let rs = s.l_lstar().unwrap();
    let mut gt = p.clone();
    cholesky_solve(&rs, &mut gt).unwrap();
    let g = gt.reversed_axes();
    let expected_mean = &mean + &g.dot(&(&z - &mean));
    let expected_cov = (Array2::<f64>::eye(3) - &g).dot(&p);

    let mut variant = ESTKS::new();
    variant.init(3, 4);
    let h = MatrixObservationOperator::identity(3);
    let r = DiagonalCovariance::spherical(3, sigma2);
    let mut rng = StdRng::seed_from_u64(0);
    let global = variant.process_global_ensemble(e.view(), &h, 0).unwrap();
    let mut x = Array::zeros((4, 4));
    variant.ensemble_transform(e.view_mut(), &global, z.view(), &r, 0, &mut rng, x.view_mut())
      .unwrap();

    assert_abs_diff_eq!(ensemble_mean(e.view()), expected_mean, epsilon = 1e-10);
    assert_abs_diff_eq!(ensemble_covariance(e.view()), expected_cov, epsilon = 1e-10);
    assert!(ensemble_spread(e.view()) < p.diag().sum());
  }

  #[test]
  fn empty_observations_give_identity() {
    let mut variant = ESTKS::new();
    variant.init(3, 4);
    let h = MatrixObservationOperator::new(Array::zeros((0, 3)));
    let r = DiagonalCovariance::new(Array::zeros(0));
    let mut rng = StdRng::seed_from_u64(0);
    let mut e = members();

    let global = variant.process_global_ensemble(e.view(), &h, 0).unwrap();
    let mut x = Array::zeros((4, 4));
    variant.ensemble_transform(e.view_mut(), &global, Array1::zeros(0).view(), &r, 0,
                               &mut rng, x.view_mut())
      .unwrap();
    assert_abs_diff_eq!(x, Array2::<f64>::eye(4), epsilon = 1e-12);
    assert_abs_diff_eq!(e, members(), epsilon = 1e-12);
  }

  #[test]
  fn inflation_is_folded_into_transform() {
    let mut variant = ESTKS::new();
    variant.init(3, 4);
    let mut e = members();
    let before = ensemble_spread(e.view());
    variant.apply_cov_inflation(e.view_mut(), 1.2, 0);
    // not touched yet
    assert_eq!(e, members());

    let h = MatrixObservationOperator::new(Array::zeros((0, 3)));
    let r = DiagonalCovariance::new(Array::zeros(0));
    let mut rng = StdRng::seed_from_u64(0);
    let global = variant.process_global_ensemble(e.view(), &h, 0).unwrap();
    let mut x = Array::zeros((4, 4));
    variant.ensemble_transform(e.view_mut(), &global, Array1::zeros(0).view(), &r, 0,
                               &mut rng, x.view_mut())
      .unwrap();

    // rho = 0.8 scales the anomalies by 1 / sqrt(rho)
    assert_abs_diff_eq!(ensemble_spread(e.view()), before / 0.8, epsilon = 1e-12);
    assert_abs_diff_eq!(ensemble_mean(e.view()), ensemble_mean(members().view()),
                        epsilon = 1e-12);
  }
}
