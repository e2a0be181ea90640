//! Error covariance operators.
//!
//! Filters only ever ask a covariance for a handful of primitives (sampling, `C^-1 b` and
//! `A += c C`), so none of them depend on a concrete representation.

use nd::prelude::*;
use nla_factorize::{cholesky_solve, Cholesky};
use rand::{Rng, RngCore};
use rand_distr::StandardNormal;

use std::sync::Arc;

use crate::error::{Error, Result};

pub trait CovarianceOperator: Send + Sync {
  fn size(&self) -> usize;

  fn is_diagonal(&self) -> bool { false }

  /// Fills each column of `out` (`size x m`) with an independent sample of `N(0, C)`.
  fn sample_zero_mean_normal(&self, out: ArrayViewMut<f64, Ix2>,
                             rng: &mut dyn RngCore) -> Result<()>;

  /// `out = C^-1 b`
  fn solve(&self, _b: ArrayView<f64, Ix2>, _out: ArrayViewMut<f64, Ix2>) -> Result<()> {
    Err(Error::NotSupported("covariance operator can't solve"))
  }
  /// `a += c C`
  fn fmadd(&self, _a: ArrayViewMut<f64, Ix2>, _c: f64) -> Result<()> {
    Err(Error::NotSupported("covariance operator can't be added to a matrix"))
  }
  fn to_dense_matrix(&self) -> Result<Array<f64, Ix2>> {
    Err(Error::NotSupported("covariance operator has no dense matrix form"))
  }
  /// The covariance of the variables in `indices` only.
  fn subset(&self, _indices: &[usize]) -> Result<Arc<dyn CovarianceOperator>> {
    Err(Error::NotSupported("covariance operator can't be subset"))
  }

  fn as_diagonal(&self) -> Option<&DiagonalCovariance> { None }
}

fn fill_standard_normal(mut out: ArrayViewMut<f64, Ix2>, rng: &mut dyn RngCore) {
  for v in out.iter_mut() {
    *v = rng.sample(StandardNormal);
  }
}

#[derive(Debug, Clone)]
pub struct DiagonalCovariance {
  diag: Array<f64, Ix1>,
  inv_diag: Array<f64, Ix1>,
  sd: Array<f64, Ix1>,
}

impl DiagonalCovariance {
  pub fn new(diag: Array<f64, Ix1>) -> DiagonalCovariance {
    assert!(diag.iter().all(|&v| v > 0.0 ), "variances must be positive");
    let inv_diag = diag.mapv(|v| 1.0 / v );
    DiagonalCovariance::from_parts(diag, inv_diag)
  }
  /// Constructs the covariance from its inverse diagonal, `1 / sigma_i^2`.
  pub fn from_inverse(inv_diag: Array<f64, Ix1>) -> DiagonalCovariance {
    assert!(inv_diag.iter().all(|&v| v > 0.0 ), "inverse variances must be positive");
    let diag = inv_diag.mapv(|v| 1.0 / v );
    DiagonalCovariance::from_parts(diag, inv_diag)
  }
  /// `sigma2 I`
  pub fn spherical(n: usize, sigma2: f64) -> DiagonalCovariance {
    DiagonalCovariance::new(Array::from_elem(n, sigma2))
  }

  fn from_parts(diag: Array<f64, Ix1>, inv_diag: Array<f64, Ix1>) -> DiagonalCovariance {
    let sd = diag.mapv(f64::sqrt);
    DiagonalCovariance {
      diag: diag,
      inv_diag: inv_diag,
      sd: sd,
    }
  }

  pub fn diagonal(&self) -> ArrayView<f64, Ix1> { self.diag.view() }
  pub fn inverse_diagonal(&self) -> ArrayView<f64, Ix1> { self.inv_diag.view() }
}

impl CovarianceOperator for DiagonalCovariance {
  fn size(&self) -> usize { self.diag.dim() }
  fn is_diagonal(&self) -> bool { true }

  fn sample_zero_mean_normal(&self, mut out: ArrayViewMut<f64, Ix2>,
                             rng: &mut dyn RngCore) -> Result<()> {
    assert_eq!(out.dim().0, self.size());
    fill_standard_normal(out.view_mut(), rng);
    for (mut row, &sd) in out.axis_iter_mut(Axis(0)).zip(self.sd.iter()) {
      row *= sd;
    }
    Ok(())
  }

  fn solve(&self, b: ArrayView<f64, Ix2>, mut out: ArrayViewMut<f64, Ix2>) -> Result<()> {
    assert_eq!(b.dim().0, self.size());
    assert_eq!(b.dim(), out.dim());
    out.assign(&b);
    for (mut row, &inv) in out.axis_iter_mut(Axis(0)).zip(self.inv_diag.iter()) {
      row *= inv;
    }
    Ok(())
  }

  fn fmadd(&self, mut a: ArrayViewMut<f64, Ix2>, c: f64) -> Result<()> {
    assert_eq!(a.dim(), (self.size(), self.size()));
    a.diag_mut().scaled_add(c, &self.diag);
    Ok(())
  }

  fn to_dense_matrix(&self) -> Result<Array<f64, Ix2>> {
    Ok(Array::from_diag(&self.diag))
  }

  fn subset(&self, indices: &[usize]) -> Result<Arc<dyn CovarianceOperator>> {
    let diag = self.diag.select(Axis(0), indices);
    let inv_diag = self.inv_diag.select(Axis(0), indices);
    Ok(Arc::new(DiagonalCovariance::from_parts(diag, inv_diag)))
  }

  fn as_diagonal(&self) -> Option<&DiagonalCovariance> { Some(self) }
}

/// A full symmetric positive definite covariance, sampled and solved through its
/// Cholesky factor `C = R^T R`.
#[derive(Debug, Clone)]
pub struct DenseCovariance {
  c: Array<f64, Ix2>,
  r: Array<f64, Ix2>,
}
impl DenseCovariance {
  pub fn new(c: Array<f64, Ix2>) -> Result<DenseCovariance> {
    let r = c.clone().l_lstar()?;
    Ok(DenseCovariance {
      c: c,
      r: r,
    })
  }
  pub fn matrix(&self) -> ArrayView<f64, Ix2> { self.c.view() }
}
impl CovarianceOperator for DenseCovariance {
  fn size(&self) -> usize { self.c.dim().0 }

  fn sample_zero_mean_normal(&self, mut out: ArrayViewMut<f64, Ix2>,
                             rng: &mut dyn RngCore) -> Result<()> {
    assert_eq!(out.dim().0, self.size());
    let mut z = Array::zeros(out.dim());
    fill_standard_normal(z.view_mut(), rng);
    nd::linalg::general_mat_mul(1.0, &self.r.t(), &z, 0.0, &mut out);
    Ok(())
  }

  fn solve(&self, b: ArrayView<f64, Ix2>, mut out: ArrayViewMut<f64, Ix2>) -> Result<()> {
    assert_eq!(b.dim(), out.dim());
    out.assign(&b);
    cholesky_solve(&self.r, &mut out)?;
    Ok(())
  }

  fn fmadd(&self, mut a: ArrayViewMut<f64, Ix2>, c: f64) -> Result<()> {
    assert_eq!(a.dim(), self.c.dim());
    a.scaled_add(c, &self.c);
    Ok(())
  }

  fn to_dense_matrix(&self) -> Result<Array<f64, Ix2>> {
    Ok(self.c.clone())
  }

  fn subset(&self, indices: &[usize]) -> Result<Arc<dyn CovarianceOperator>> {
    let sub = self.c
      .select(Axis(0), indices)
      .select(Axis(1), indices);
    Ok(Arc::new(DenseCovariance::new(sub)?))
  }
}

/// The covariance of a perfect model.
#[derive(Debug, Clone, Copy)]
pub struct ZeroCovariance {
  n: usize,
}
impl ZeroCovariance {
  pub fn new(n: usize) -> ZeroCovariance {
    ZeroCovariance { n: n, }
  }
}
impl CovarianceOperator for ZeroCovariance {
  fn size(&self) -> usize { self.n }
  fn is_diagonal(&self) -> bool { true }

  fn sample_zero_mean_normal(&self, mut out: ArrayViewMut<f64, Ix2>,
                             _rng: &mut dyn RngCore) -> Result<()> {
    assert_eq!(out.dim().0, self.n);
    out.fill(0.0);
    Ok(())
  }

  fn fmadd(&self, a: ArrayViewMut<f64, Ix2>, _c: f64) -> Result<()> {
    assert_eq!(a.dim(), (self.n, self.n));
    Ok(())
  }

  fn to_dense_matrix(&self) -> Result<Array<f64, Ix2>> {
    Ok(Array::zeros((self.n, self.n)))
  }

  fn subset(&self, indices: &[usize]) -> Result<Arc<dyn CovarianceOperator>> {
    Ok(Arc::new(ZeroCovariance::new(indices.len())))
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use approx::assert_abs_diff_eq;
  use rand::SeedableRng;
  use rand::rngs::StdRng;

  #[test]
  fn diagonal_solve_and_fmadd() {
    let r = DiagonalCovariance::new(arr1(&[0.5, 2.0, 4.0]));
    let b = arr2(&[[1.0, 2.0], [2.0, 4.0], [4.0, 8.0]]);
    let mut x = Array::zeros((3, 2));
    r.solve(b.view(), x.view_mut()).unwrap();
    assert_abs_diff_eq!(x, arr2(&[[2.0, 4.0], [1.0, 2.0], [1.0, 2.0]]));

    let mut a = Array::ones((3, 3));
    r.fmadd(a.view_mut(), 2.0).unwrap();
    assert_abs_diff_eq!(a.diag(), arr1(&[2.0, 5.0, 9.0]));
    assert_eq!(a[[0, 1]], 1.0);
  }

  #[test]
  fn diagonal_from_inverse_and_subset() {
    let r = DiagonalCovariance::from_inverse(arr1(&[4.0, 0.25, 1.0]));
    assert_abs_diff_eq!(r.diagonal(), arr1(&[0.25, 4.0, 1.0]));

    let sub = r.subset(&[1, 2]).unwrap();
    assert_eq!(sub.size(), 2);
    let diag = sub.as_diagonal().unwrap();
    assert_abs_diff_eq!(diag.inverse_diagonal(), arr1(&[0.25, 1.0]));
  }

  #[test]
  fn diagonal_sample_variance() {
    let r = DiagonalCovariance::new(arr1(&[0.01, 4.0]));
    let mut rng = StdRng::seed_from_u64(7);
    let mut out = Array::zeros((2, 20000));
    r.sample_zero_mean_normal(out.view_mut(), &mut rng).unwrap();

    let var = out.map_axis(Axis(1), |row| row.iter().map(|v| v * v ).sum::<f64>() / 20000.0 );
    assert_abs_diff_eq!(var[0], 0.01, epsilon = 1e-3);
    assert_abs_diff_eq!(var[1], 4.0, epsilon = 0.2);
  }

  #[test]
  fn dense_solve_and_subset() {
    let c = arr2(&[
      [4.0, 1.0, 0.0],
      [1.0, 3.0, 1.0],
      [0.0, 1.0, 2.0],
    ]);
    let r = DenseCovariance::new(c.clone()).unwrap();
    let x = arr2(&[[1.0], [-1.0], [2.0]]);
    let b = c.dot(&x);
    let mut out = Array::zeros((3, 1));
    r.solve(b.view(), out.view_mut()).unwrap();
    assert_abs_diff_eq!(out, x, epsilon = 1e-12);

    let sub = r.subset(&[0, 2]).unwrap();
    assert_abs_diff_eq!(sub.to_dense_matrix().unwrap(), arr2(&[[4.0, 0.0], [0.0, 2.0]]));
    assert!(sub.as_diagonal().is_none());
  }

  #[test]
  fn dense_rejects_indefinite() {
    let c = arr2(&[[1.0, 2.0], [2.0, 1.0]]);
    match DenseCovariance::new(c) {
      Err(Error::Factorize(_)) => {},
      other => panic!("unexpected {:?}", other),
    }
  }

  #[test]
  fn zero_covariance() {
    let r = ZeroCovariance::new(2);
    let mut rng = StdRng::seed_from_u64(0);
    let mut out = Array::ones((2, 3));
    r.sample_zero_mean_normal(out.view_mut(), &mut rng).unwrap();
    assert!(out.iter().all(|&v| v == 0.0 ));

    let mut a = Array::ones((2, 2));
    r.fmadd(a.view_mut(), 10.0).unwrap();
    assert!(a.iter().all(|&v| v == 1.0 ));

    let b = Array::ones((2, 1));
    let mut x = Array::zeros((2, 1));
    assert!(r.solve(b.view(), x.view_mut()).unwrap_err().is_not_supported());
  }
}
