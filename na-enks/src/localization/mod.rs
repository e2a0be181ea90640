//! Splitting the state space into local analysis domains.

use nd::prelude::*;

use na_core::Result;

pub use self::aabox::AABox;
pub use self::grid::{GridDomainPartitioning, RegularGrid};
pub use self::query::IndexedPartitionPointQuery;
pub use self::taper::{GaspariCohnTaper, LinearTaper, NoTaper, SphericalTaper, TaperFn};

pub mod aabox;
pub mod grid;
pub mod query;
pub mod taper;

/// Splits a global state vector into (possibly overlapping) local domains.
///
/// `get_local` followed by `put_local` with unmodified data must leave the global
/// state untouched. Local domains may be empty.
pub trait DomainPartitioning: Send + Sync {
  /// Number of spatial coordinates used to locate points.
  fn partition_coord_dim(&self) -> usize;
  fn num_local_domains(&self) -> usize;
  fn local_size(&self, d: usize) -> usize;

  /// Copies the rows of domain `d` from `xg` into `out` (`local_size(d) x m`).
  fn get_local(&self, d: usize, xg: ArrayView<f64, Ix2>, out: ArrayViewMut<f64, Ix2>);
  /// Writes the local rows `xl` of domain `d` back into `xg`.
  fn put_local(&self, d: usize, xl: ArrayView<f64, Ix2>, xg: ArrayViewMut<f64, Ix2>);

  /// Builds a spatial index over points stored in the columns of `coords`
  /// (`partition_coord_dim() x npoints`).
  fn index_points(&self, coords: Array<f64, Ix2>) -> Result<Box<dyn PartitionPointQuery>>;
}

/// Partitionings whose domains can be bounded by axis aligned boxes.
pub trait AABoxDomainPartitioning: DomainPartitioning {
  fn local_box(&self, d: usize) -> AABox;
}

pub trait PartitionPointQuery: Send + Sync {
  /// Appends `(point index, distance)` of every indexed point within `range` of
  /// domain `d` to `out`, ordered by point index.
  fn range_query(&self, d: usize, range: f64, out: &mut Vec<(usize, f64)>);
}
