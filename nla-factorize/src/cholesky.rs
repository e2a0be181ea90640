use nd::{ArrayBase, Data, DataMut, Ix2};
use num_traits::{Float, Zero};

use crate::error::{FactorizeError, Result};

pub trait Cholesky {
  type LMatrix: Sized;
  /// Returns the upper triangular factor, R, of A = R^*R.
  ///
  /// Only the upper triangle of `self` is read.
  fn l_lstar(self) -> Result<Self::LMatrix>;
}

impl<S> Cholesky for ArrayBase<S, Ix2>
  where S: DataMut,
        S::Elem: Float,
{
  type LMatrix = ArrayBase<S, Ix2>;

  fn l_lstar(self) -> Result<Self::LMatrix> {
    let (m, cols) = self.dim();
    if m != cols {
      return Err(FactorizeError::NotSquare { rows: m, cols: cols, });
    }

    let mut r = self;
    for k in 0..m {
      let pivot = r[[k, k]];
      if !(pivot > S::Elem::zero()) {
        return Err(FactorizeError::NotPositiveDefinite { pivot: k, });
      }

      for j in k + 1..m {
        let f = r[[k, j]] / pivot;
        if f.is_zero() { continue; }

        for i in j..m {
          let t = r[[k, i]];
          r[[j, i]] = r[[j, i]] - t * f;
        }
      }

      let t = pivot.sqrt().recip();
      r.row_mut(k)
        .slice_mut(s![k..])
        .mapv_inplace(|v| v * t );
    }

    let zero = S::Elem::zero();
    for k in 0..m {
      r.row_mut(k)
        .slice_mut(s![..k])
        .fill(zero);
    }

    Ok(r)
  }
}

/// Solves `A X = B` in place given the upper factor `R` of `A = R^T R`.
/// `b` may hold any number of right hand side columns.
pub fn cholesky_solve<S1, S2>(r: &ArrayBase<S1, Ix2>,
                              b: &mut ArrayBase<S2, Ix2>) -> Result<()>
  where S1: Data,
        S2: DataMut<Elem = S1::Elem>,
        S1::Elem: Float,
{
  let m = r.dim().0;
  if m != r.dim().1 {
    return Err(FactorizeError::NotSquare { rows: m, cols: r.dim().1, });
  }
  if b.dim().0 != m {
    return Err(FactorizeError::DimensionMismatch { rows: b.dim().0, expected: m, });
  }

  for c in 0..b.dim().1 {
    // R^T y = b
    for i in 0..m {
      let mut acc = b[[i, c]];
      for k in 0..i {
        acc = acc - r[[k, i]] * b[[k, c]];
      }
      b[[i, c]] = acc / r[[i, i]];
    }
    // R x = y
    for i in (0..m).rev() {
      let mut acc = b[[i, c]];
      for k in i + 1..m {
        acc = acc - r[[i, k]] * b[[k, c]];
      }
      b[[i, c]] = acc / r[[i, i]];
    }
  }

  Ok(())
}

#[test]
fn cholesky_llstar() {
  use nd::arr2;

  let a = arr2(&[
    [4.0, 12.0, -16.0],
    [12.0, 37.0, -43.0],
    [-16.0, -43.0, 98.0],
  ]);

  let l = a.l_lstar().expect("cholesky factorization failed");

  let expected = arr2(&[
    [2.0, 6.0, -8.0],
    [0.0, 1.0, 5.0],
    [0.0, 0.0, 3.0],
  ]);
  assert_eq!(l, expected);
}

#[test]
fn cholesky_rejects_indefinite() {
  use nd::arr2;

  let a = arr2(&[
    [1.0, 2.0],
    [2.0, 1.0],
  ]);
  assert_eq!(a.l_lstar(), Err(FactorizeError::NotPositiveDefinite { pivot: 1, }));

  let b = nd::Array2::<f64>::zeros((2, 3));
  assert_eq!(b.l_lstar(), Err(FactorizeError::NotSquare { rows: 2, cols: 3, }));
}

#[test]
fn cholesky_solve_multi_rhs() {
  use approx::assert_abs_diff_eq;
  use nd::arr2;

  let a = arr2(&[
    [4.0, 12.0, -16.0],
    [12.0, 37.0, -43.0],
    [-16.0, -43.0, 98.0],
  ]);
  let x = arr2(&[
    [1.0, -2.0],
    [0.5, 0.0],
    [3.0, 1.0],
  ]);
  let mut b = a.dot(&x);

  let r = a.clone().l_lstar().unwrap();
  cholesky_solve(&r, &mut b).unwrap();
  assert_abs_diff_eq!(b, x, epsilon = 1e-10);
}

#[test]
fn cholesky_empty_system() {
  let a = nd::Array2::<f64>::zeros((0, 0));
  let r = a.l_lstar().unwrap();
  let mut b = nd::Array2::<f64>::zeros((0, 4));
  cholesky_solve(&r, &mut b).unwrap();
  assert_eq!(b.dim(), (0, 4));
}
