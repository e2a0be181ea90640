use thiserror::Error;

pub type Result<T> = ::std::result::Result<T, FactorizeError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FactorizeError {
  #[error("expected a square matrix, got {rows}x{cols}")]
  NotSquare { rows: usize, cols: usize },
  #[error("matrix is not positive definite (non-positive pivot at {pivot})")]
  NotPositiveDefinite { pivot: usize },
  #[error("right hand side has {rows} rows, factor is {expected}x{expected}")]
  DimensionMismatch { rows: usize, expected: usize },
}
