use nla_factorize::FactorizeError;
use thiserror::Error;

pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
  /// The operator's representation can't provide this operation.
  #[error("not supported: {0}")]
  NotSupported(&'static str),
  #[error("not implemented: {0}")]
  NotImplemented(&'static str),
  #[error(transparent)]
  Factorize(#[from] FactorizeError),
}

impl Error {
  pub fn is_not_supported(&self) -> bool {
    match self {
      &Error::NotSupported(_) => true,
      _ => false,
    }
  }
  pub fn is_not_implemented(&self) -> bool {
    match self {
      &Error::NotImplemented(_) => true,
      _ => false,
    }
  }
}
