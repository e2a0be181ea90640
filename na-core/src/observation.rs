//! Observation operators, `H`, mapping state space into observation space.

use nd::prelude::*;
use nd::linalg::general_mat_mul;

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

pub trait ObservationOperator: Send + Sync {
  fn nobs(&self) -> usize;
  fn nstate(&self) -> usize;

  fn is_linear(&self) -> bool { false }
  /// Can this operator be represented as a dense `nobs x nstate` matrix?
  fn is_matrix(&self) -> bool { false }

  /// Applies the operator to each column of `x`, writing into the matching column of `out`.
  fn apply(&self, x: ArrayView<f64, Ix2>, out: ArrayViewMut<f64, Ix2>) -> Result<()>;

  fn to_dense_matrix(&self) -> Result<Array<f64, Ix2>> {
    Err(Error::NotSupported("observation operator has no dense matrix form"))
  }

  /// An operator producing only the observations in `obs`, in that order.
  ///
  /// The default falls back to the dense matrix when there is one.
  fn subset(&self, obs: &[usize]) -> Result<Arc<dyn ObservationOperator>> {
    if !self.is_matrix() {
      return Err(Error::NotSupported("observation operator can't be subset"));
    }

    let h = self.to_dense_matrix()?;
    Ok(Arc::new(MatrixObservationOperator::new(h.select(Axis(0), obs))))
  }
}

fn check_apply_dims(nobs: usize, nstate: usize,
                    x: &ArrayView<f64, Ix2>, out: &ArrayViewMut<f64, Ix2>) {
  assert_eq!(x.dim().0, nstate, "state size mismatch");
  assert_eq!(out.dim(), (nobs, x.dim().1), "output dimension mismatch");
}

#[derive(Debug, Clone)]
pub struct MatrixObservationOperator {
  h: Array<f64, Ix2>,
}
impl MatrixObservationOperator {
  pub fn new(h: Array<f64, Ix2>) -> MatrixObservationOperator {
    MatrixObservationOperator { h: h, }
  }
  pub fn identity(n: usize) -> MatrixObservationOperator {
    MatrixObservationOperator::new(Array::eye(n))
  }
  pub fn matrix(&self) -> ArrayView<f64, Ix2> { self.h.view() }
}
impl ObservationOperator for MatrixObservationOperator {
  fn nobs(&self) -> usize { self.h.dim().0 }
  fn nstate(&self) -> usize { self.h.dim().1 }
  fn is_linear(&self) -> bool { true }
  fn is_matrix(&self) -> bool { true }

  fn apply(&self, x: ArrayView<f64, Ix2>, mut out: ArrayViewMut<f64, Ix2>) -> Result<()> {
    check_apply_dims(self.nobs(), self.nstate(), &x, &out);
    general_mat_mul(1.0, &self.h, &x, 0.0, &mut out);
    Ok(())
  }

  fn to_dense_matrix(&self) -> Result<Array<f64, Ix2>> {
    Ok(self.h.clone())
  }

  fn subset(&self, obs: &[usize]) -> Result<Arc<dyn ObservationOperator>> {
    Ok(Arc::new(MatrixObservationOperator::new(self.h.select(Axis(0), obs))))
  }
}

type ApplyFn = dyn Fn(ArrayView<f64, Ix2>, ArrayViewMut<f64, Ix2>) -> Result<()> + Send + Sync;

/// An operator backed by a closure producing all `nobs` observations.
///
/// Subsets are evaluated by applying the full operator and picking out the
/// requested rows.
#[derive(Clone)]
pub struct CustomObservationOperator {
  nobs: usize,
  nstate: usize,
  linear: bool,
  f: Arc<ApplyFn>,
  rows: Option<Arc<[usize]>>,
}
impl CustomObservationOperator {
  pub fn new<F>(nobs: usize, nstate: usize, linear: bool, f: F) -> CustomObservationOperator
    where F: Fn(ArrayView<f64, Ix2>, ArrayViewMut<f64, Ix2>) -> Result<()> + Send + Sync + 'static,
  {
    CustomObservationOperator {
      nobs: nobs,
      nstate: nstate,
      linear: linear,
      f: Arc::new(f),
      rows: None,
    }
  }
}
impl fmt::Debug for CustomObservationOperator {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.debug_struct("CustomObservationOperator")
      .field("nobs", &self.nobs())
      .field("nstate", &self.nstate)
      .field("linear", &self.linear)
      .finish()
  }
}
impl ObservationOperator for CustomObservationOperator {
  fn nobs(&self) -> usize {
    match self.rows {
      Some(ref rows) => rows.len(),
      None => self.nobs,
    }
  }
  fn nstate(&self) -> usize { self.nstate }
  fn is_linear(&self) -> bool { self.linear }

  fn apply(&self, x: ArrayView<f64, Ix2>, mut out: ArrayViewMut<f64, Ix2>) -> Result<()> {
    check_apply_dims(self.nobs(), self.nstate, &x, &out);
    match self.rows {
      None => (self.f)(x, out),
      Some(ref rows) => {
        let mut full = Array::zeros((self.nobs, x.dim().1));
        (self.f)(x, full.view_mut())?;
        for (mut dst, &src) in out.axis_iter_mut(Axis(0)).zip(rows.iter()) {
          dst.assign(&full.row(src));
        }
        Ok(())
      },
    }
  }

  fn subset(&self, obs: &[usize]) -> Result<Arc<dyn ObservationOperator>> {
    let rows: Arc<[usize]> = match self.rows {
      Some(ref rows) => obs.iter().map(|&i| rows[i] ).collect(),
      None => {
        assert!(obs.iter().all(|&i| i < self.nobs ), "observation index out of range");
        obs.iter().cloned().collect()
      },
    };

    let mut sub = self.clone();
    sub.rows = Some(rows);
    Ok(Arc::new(sub))
  }
}
