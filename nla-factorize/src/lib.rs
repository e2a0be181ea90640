extern crate nalgebra;
#[macro_use]
extern crate ndarray as nd;
extern crate num_traits;
extern crate thiserror;

pub use cholesky::*;
pub use error::{FactorizeError, Result};
pub use symmetric::*;

pub mod cholesky;
pub mod error;
pub mod symmetric;
