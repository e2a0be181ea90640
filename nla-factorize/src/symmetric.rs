//! Eigendecomposition of real symmetric matrices, backed by nalgebra.

use nalgebra::DMatrix;
use nd::{Array, ArrayBase, Data, Ix1, Ix2};
use nd::linalg::general_mat_mul;

use crate::error::{FactorizeError, Result};

#[derive(Debug, Clone)]
pub struct SymmetricEigen {
  /// Unordered eigenvalues.
  pub values: Array<f64, Ix1>,
  /// Eigenvectors stored in columns, matching `values`.
  pub vectors: Array<f64, Ix2>,
}

impl SymmetricEigen {
  /// Only the upper triangle of `a` is read.
  pub fn compute<S>(a: &ArrayBase<S, Ix2>) -> Result<SymmetricEigen>
    where S: Data<Elem = f64>,
  {
    let (n, cols) = a.dim();
    if n != cols {
      return Err(FactorizeError::NotSquare { rows: n, cols: cols, });
    }

    let m = DMatrix::from_fn(n, n, |i, j| if i <= j { a[[i, j]] } else { a[[j, i]] } );
    let eig = nalgebra::SymmetricEigen::new(m);

    Ok(SymmetricEigen {
      values: eig.eigenvalues.iter().cloned().collect(),
      vectors: Array::from_shape_fn((n, n), |(i, j)| eig.eigenvectors[(i, j)] ),
    })
  }
}

/// Computes `U diag(l^-1/2) U^T` for a symmetric positive definite `a = U diag(l) U^T`.
pub fn inverse_symmetric_sqrt<S>(a: &ArrayBase<S, Ix2>) -> Result<Array<f64, Ix2>>
  where S: Data<Elem = f64>,
{
  let SymmetricEigen { values, vectors, } = SymmetricEigen::compute(a)?;
  let n = values.dim();

  let mut scaled = vectors.clone();
  for (j, &lambda) in values.iter().enumerate() {
    if !(lambda > 0.0) {
      return Err(FactorizeError::NotPositiveDefinite { pivot: j, });
    }
    let f = lambda.sqrt().recip();
    scaled.column_mut(j).mapv_inplace(|v| v * f );
  }

  let mut out = Array::zeros((n, n));
  general_mat_mul(1.0, &scaled, &vectors.t(), 0.0, &mut out);
  Ok(out)
}

#[cfg(test)]
mod test {
  use super::*;
  use approx::assert_abs_diff_eq;
  use nd::{arr1, arr2};

  #[test]
  fn reconstructs_matrix() {
    let a = arr2(&[
      [4.0, 1.0, -2.0],
      [1.0, 3.0, 0.5],
      [-2.0, 0.5, 6.0],
    ]);
    let SymmetricEigen { values, vectors, } = SymmetricEigen::compute(&a).unwrap();

    let mut d = Array::zeros((3, 3));
    d.diag_mut().assign(&values);
    let back = vectors.dot(&d).dot(&vectors.t());
    assert_abs_diff_eq!(back, a, epsilon = 1e-10);

    let id: Array<f64, Ix2> = Array::eye(3);
    assert_abs_diff_eq!(vectors.t().dot(&vectors), id, epsilon = 1e-10);
  }

  #[test]
  fn reads_upper_triangle() {
    let upper = arr2(&[
      [2.0, 1.0],
      [-7.0, 2.0],
    ]);
    let SymmetricEigen { mut values, .. } = SymmetricEigen::compute(&upper).unwrap();
    values.as_slice_mut().unwrap().sort_by(|a, b| a.partial_cmp(b).unwrap() );
    assert_abs_diff_eq!(values, arr1(&[1.0, 3.0]), epsilon = 1e-12);
  }

  #[test]
  fn rejects_rectangular() {
    let a = Array::<f64, Ix2>::zeros((2, 3));
    match SymmetricEigen::compute(&a) {
      Err(FactorizeError::NotSquare { rows: 2, cols: 3, }) => {},
      other => panic!("unexpected {:?}", other),
    }
  }

  #[test]
  fn inverse_sqrt_squares_to_inverse() {
    let a = arr2(&[
      [5.0, 2.0],
      [2.0, 3.0],
    ]);
    let c = inverse_symmetric_sqrt(&a).unwrap();
    assert_abs_diff_eq!(c, c.t(), epsilon = 1e-12);

    let id: Array<f64, Ix2> = Array::eye(2);
    assert_abs_diff_eq!(c.dot(&c).dot(&a), id, epsilon = 1e-10);
  }

  #[test]
  fn inverse_sqrt_of_diagonal() {
    let a = arr2(&[
      [4.0, 0.0],
      [0.0, 0.25],
    ]);
    let c = inverse_symmetric_sqrt(&a).unwrap();
    assert_abs_diff_eq!(c, arr2(&[[0.5, 0.0], [0.0, 2.0]]), epsilon = 1e-14);
  }

  #[test]
  fn inverse_sqrt_rejects_indefinite() {
    let a = arr2(&[
      [1.0, 2.0],
      [2.0, 1.0],
    ]);
    match inverse_symmetric_sqrt(&a) {
      Err(FactorizeError::NotPositiveDefinite { .. }) => {},
      other => panic!("unexpected {:?}", other),
    }
  }
}
