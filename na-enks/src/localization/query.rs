use nd::prelude::*;

use std::cmp::Ordering;

use super::{AABox, AABoxDomainPartitioning, PartitionPointQuery};

/// Range queries against the boxes of an `AABoxDomainPartitioning`.
///
/// Points are kept sorted along their first coordinate so a query only has to scan
/// the slab the inflated domain box covers.
#[derive(Debug, Clone)]
pub struct IndexedPartitionPointQuery {
  coords: Array<f64, Ix2>,
  /// Point indices sorted by first coordinate.
  order: Vec<usize>,
  keys: Vec<f64>,
  boxes: Vec<AABox>,
}

impl IndexedPartitionPointQuery {
  pub fn new(partitioner: &dyn AABoxDomainPartitioning,
             coords: Array<f64, Ix2>) -> IndexedPartitionPointQuery {
    let dim = partitioner.partition_coord_dim();
    assert_eq!(coords.dim().0, dim, "point coordinates have the wrong dimension");
    assert!(coords.iter().all(|v| !v.is_nan() ), "NaN point coordinate");

    let boxes = (0..partitioner.num_local_domains())
      .map(|d| partitioner.local_box(d) )
      .collect();

    let first = coords.row(0);
    let mut order: Vec<usize> = (0..coords.dim().1).collect();
    order.sort_by(|&a, &b| {
      first[a].partial_cmp(&first[b]).unwrap_or(Ordering::Equal)
    });
    let keys = order.iter().map(|&i| first[i] ).collect();

    IndexedPartitionPointQuery {
      coords: coords,
      order: order,
      keys: keys,
      boxes: boxes,
    }
  }

  pub fn len(&self) -> usize { self.order.len() }
  pub fn is_empty(&self) -> bool { self.order.is_empty() }
}

impl PartitionPointQuery for IndexedPartitionPointQuery {
  fn range_query(&self, d: usize, range: f64, out: &mut Vec<(usize, f64)>) {
    assert!(d < self.boxes.len(), "local domain {} out of range", d);
    let core = &self.boxes[d];
    let lo = core.min()[0] - range;
    let hi = core.max()[0] + range;
    let range2 = range * range;

    let start = out.len();
    let first = self.keys.partition_point(|&k| k < lo );
    for (&key, &i) in self.keys[first..].iter().zip(self.order[first..].iter()) {
      if key > hi { break; }

      let dist2 = core.squared_exterior_distance(self.coords.column(i));
      if dist2 <= range2 {
        out.push((i, dist2.sqrt()));
      }
    }
    out[start..].sort_by_key(|&(i, _)| i );
  }
}
