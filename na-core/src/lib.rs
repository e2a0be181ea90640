extern crate ndarray as nd;
extern crate nla_factorize;
extern crate rand;
extern crate rand_distr;
extern crate thiserror;

use nd::prelude::*;
use nd::linalg::general_mat_mul;

pub use covariance::{CovarianceOperator, DenseCovariance, DiagonalCovariance,
                     ZeroCovariance};
pub use error::{Error, Result};
pub use observation::{CustomObservationOperator, MatrixObservationOperator,
                      ObservationOperator};

pub mod covariance;
pub mod error;
pub mod observation;

/// Propagates a state (or every member of an ensemble) forward in time.
/// States are stored in the columns of `x`.
pub trait EvolutionModel: Send {
  /// Advance `x` in place from step `k` to `k + 1`. `store` asks the model to keep the
  /// trajectory around for later tangent linear/adjoint calls.
  fn apply(&mut self, x: ArrayViewMut<f64, Ix2>, k: usize, dt: f64,
           store: bool) -> Result<()>;
}

pub trait LinearizedEvolutionModel: EvolutionModel {
  fn tangent_linear(&mut self, x: ArrayViewMut<f64, Ix2>, k: usize) -> Result<()>;
  fn adjoint(&mut self, x: ArrayViewMut<f64, Ix2>, k: usize) -> Result<()>;

  /// The trajectory stored at step `k` won't be asked for again.
  fn trajectory_no_longer_needed(&mut self, _k: usize) { }
}

/// `x_{k+1} = M x_k`.
#[derive(Debug, Clone)]
pub struct MatrixModel {
  m: Array<f64, Ix2>,
  tmp: Array<f64, Ix2>,
}
impl MatrixModel {
  pub fn new(m: Array<f64, Ix2>) -> MatrixModel {
    assert_eq!(m.dim().0, m.dim().1, "model matrix must be square");
    MatrixModel {
      m: m,
      tmp: Array::zeros((0, 0)),
    }
  }
  pub fn identity(n: usize) -> MatrixModel {
    MatrixModel::new(Array::eye(n))
  }
  pub fn matrix(&self) -> ArrayView<f64, Ix2> { self.m.view() }

  fn mul(&mut self, mut x: ArrayViewMut<f64, Ix2>, transpose: bool) {
    assert_eq!(x.dim().0, self.m.dim().0);
    if self.tmp.dim() != x.dim() {
      self.tmp = Array::zeros(x.dim());
    }
    if transpose {
      general_mat_mul(1.0, &self.m.t(), &x, 0.0, &mut self.tmp);
    } else {
      general_mat_mul(1.0, &self.m, &x, 0.0, &mut self.tmp);
    }
    x.assign(&self.tmp);
  }
}
impl EvolutionModel for MatrixModel {
  fn apply(&mut self, x: ArrayViewMut<f64, Ix2>, _k: usize, _dt: f64,
           _store: bool) -> Result<()> {
    self.mul(x, false);
    Ok(())
  }
}
impl LinearizedEvolutionModel for MatrixModel {
  fn tangent_linear(&mut self, x: ArrayViewMut<f64, Ix2>, _k: usize) -> Result<()> {
    self.mul(x, false);
    Ok(())
  }
  fn adjoint(&mut self, x: ArrayViewMut<f64, Ix2>, _k: usize) -> Result<()> {
    self.mul(x, true);
    Ok(())
  }
}

/// Wraps a closure run once for each state column: `f(x, k, dt)`.
pub struct FnModel<F>
  where F: FnMut(ArrayViewMut<f64, Ix1>, usize, f64) + Send,
{
  f: F,
  /// Don't modify this; safe to read though.
  pub calls: u64,
}
impl<F> FnModel<F>
  where F: FnMut(ArrayViewMut<f64, Ix1>, usize, f64) + Send,
{
  pub fn new(f: F) -> FnModel<F> {
    FnModel {
      f: f,
      calls: 0,
    }
  }
}
impl<F> EvolutionModel for FnModel<F>
  where F: FnMut(ArrayViewMut<f64, Ix1>, usize, f64) + Send,
{
  fn apply(&mut self, mut x: ArrayViewMut<f64, Ix2>, k: usize, dt: f64,
           _store: bool) -> Result<()> {
    for col in x.axis_iter_mut(Axis(1)) {
      (self.f)(col, k, dt);
      self.calls += 1;
    }
    Ok(())
  }
}
