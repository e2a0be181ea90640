use nd::prelude::*;

use na_core::{Error, Result};

use super::{AABox, AABoxDomainPartitioning, DomainPartitioning, IndexedPartitionPointQuery,
            PartitionPointQuery};

/// A regular grid of cells. State elements are laid out row-major, one per cell.
///
/// Cell `i` along axis `a` covers `[origin[a] + i spacing[a], origin[a] + (i + 1) spacing[a])`.
#[derive(Debug, Clone, PartialEq)]
pub struct RegularGrid {
  shape: Vec<usize>,
  origin: Vec<f64>,
  spacing: Vec<f64>,
}

impl RegularGrid {
  pub fn new(shape: Vec<usize>, origin: Vec<f64>, spacing: Vec<f64>) -> RegularGrid {
    assert!(!shape.is_empty(), "grid needs at least one dimension");
    assert_eq!(shape.len(), origin.len());
    assert_eq!(shape.len(), spacing.len());
    assert!(spacing.iter().all(|&s| s > 0.0 ), "cell spacing must be positive");
    RegularGrid {
      shape: shape,
      origin: origin,
      spacing: spacing,
    }
  }
  pub fn line(n: usize, x0: f64, dx: f64) -> RegularGrid {
    RegularGrid::new(vec![n], vec![x0], vec![dx])
  }
  pub fn plane(shape: (usize, usize), origin: (f64, f64), spacing: (f64, f64)) -> RegularGrid {
    RegularGrid::new(vec![shape.0, shape.1],
                     vec![origin.0, origin.1],
                     vec![spacing.0, spacing.1])
  }

  pub fn coord_dim(&self) -> usize { self.shape.len() }
  pub fn shape(&self) -> &[usize] { &self.shape[..] }
  pub fn size(&self) -> usize { self.shape.iter().product() }

  /// Centers of every cell, one column per state element.
  pub fn cell_centers(&self) -> Array<f64, Ix2> {
    let dim = self.coord_dim();
    let mut out = Array::zeros((dim, self.size()));
    for (i, mut col) in out.axis_iter_mut(Axis(1)).enumerate() {
      let mut rem = i;
      for a in (0..dim).rev() {
        let idx = rem % self.shape[a];
        rem /= self.shape[a];
        col[a] = self.origin[a] + (idx as f64 + 0.5) * self.spacing[a];
      }
    }
    out
  }

  /// Extent of the cells `[lo[a], hi[a])` along every axis.
  pub fn block_extent(&self, lo: &[usize], hi: &[usize]) -> AABox {
    let dim = self.coord_dim();
    let min = Array::from_shape_fn(dim, |a| self.origin[a] + lo[a] as f64 * self.spacing[a] );
    let max = Array::from_shape_fn(dim, |a| self.origin[a] + hi[a] as f64 * self.spacing[a] );
    AABox::new(min, max)
  }
}

#[derive(Debug, Clone)]
struct LocalDomain {
  /// Global index of each local row, padding included.
  indices: Vec<usize>,
  /// Local rows that belong to the unpadded core.
  core_rows: Vec<usize>,
  core: AABox,
}

/// Splits a 1-d or 2-d grid into square blocks of `block_size` cells, each
/// optionally padded with `padding` cells taken from the neighbouring blocks.
///
/// `get_local` reads the padded block; `put_local` writes back only the core, so
/// neighbouring domains never clobber each other.
#[derive(Debug, Clone)]
pub struct GridDomainPartitioning {
  grid: RegularGrid,
  block_size: usize,
  padding: usize,
  domains: Vec<LocalDomain>,
}

fn padded_range(start: usize, len: usize, padding: usize, n: usize) -> (usize, usize, usize) {
  let end = (start + len).min(n);
  let lo = start.saturating_sub(padding);
  let hi = (end + padding).min(n);
  (lo, hi, end)
}

impl GridDomainPartitioning {
  pub fn new(grid: RegularGrid, block_size: usize, padding: usize) -> Result<GridDomainPartitioning> {
    assert!(block_size > 0, "block size must be positive");

    let domains = match grid.coord_dim() {
      1 => GridDomainPartitioning::blocks_1d(&grid, block_size, padding),
      2 => GridDomainPartitioning::blocks_2d(&grid, block_size, padding),
      _ => {
        return Err(Error::NotImplemented("only one or two-dimensional grids can be partitioned"));
      },
    };

    Ok(GridDomainPartitioning {
      grid: grid,
      block_size: block_size,
      padding: padding,
      domains: domains,
    })
  }

  fn blocks_1d(grid: &RegularGrid, bs: usize, padding: usize) -> Vec<LocalDomain> {
    let n = grid.shape()[0];
    let mut out = Vec::new();
    for i in (0..n).step_by(bs) {
      let (lo, hi, end) = padded_range(i, bs, padding, n);
      out.push(LocalDomain {
        indices: (lo..hi).collect(),
        core_rows: (i - lo..end - lo).collect(),
        core: grid.block_extent(&[i], &[end]),
      });
    }
    out
  }

  fn blocks_2d(grid: &RegularGrid, bs: usize, padding: usize) -> Vec<LocalDomain> {
    let (nr, nc) = (grid.shape()[0], grid.shape()[1]);
    let mut out = Vec::new();
    for i in (0..nr).step_by(bs) {
      let (rlo, rhi, rend) = padded_range(i, bs, padding, nr);
      for j in (0..nc).step_by(bs) {
        let (clo, chi, cend) = padded_range(j, bs, padding, nc);

        let mut indices = Vec::with_capacity((rhi - rlo) * (chi - clo));
        let mut core_rows = Vec::new();
        for r in rlo..rhi {
          for c in clo..chi {
            if r >= i && r < rend && c >= j && c < cend {
              core_rows.push(indices.len());
            }
            indices.push(r * nc + c);
          }
        }

        out.push(LocalDomain {
          indices: indices,
          core_rows: core_rows,
          core: grid.block_extent(&[i, j], &[rend, cend]),
        });
      }
    }
    out
  }

  pub fn grid(&self) -> &RegularGrid { &self.grid }
  pub fn block_size(&self) -> usize { self.block_size }
  pub fn padding(&self) -> usize { self.padding }

  fn domain(&self, d: usize) -> &LocalDomain {
    assert!(d < self.domains.len(), "local domain {} out of range", d);
    &self.domains[d]
  }
}

impl DomainPartitioning for GridDomainPartitioning {
  fn partition_coord_dim(&self) -> usize { self.grid.coord_dim() }
  fn num_local_domains(&self) -> usize { self.domains.len() }
  fn local_size(&self, d: usize) -> usize { self.domain(d).indices.len() }

  fn get_local(&self, d: usize, xg: ArrayView<f64, Ix2>, mut out: ArrayViewMut<f64, Ix2>) {
    let domain = self.domain(d);
    assert_eq!(xg.dim().0, self.grid.size());
    assert_eq!(out.dim(), (domain.indices.len(), xg.dim().1));

    for (mut row, &g) in out.axis_iter_mut(Axis(0)).zip(domain.indices.iter()) {
      row.assign(&xg.row(g));
    }
  }

  fn put_local(&self, d: usize, xl: ArrayView<f64, Ix2>, mut xg: ArrayViewMut<f64, Ix2>) {
    let domain = self.domain(d);
    assert_eq!(xg.dim().0, self.grid.size());
    assert_eq!(xl.dim(), (domain.indices.len(), xg.dim().1));

    for &r in domain.core_rows.iter() {
      xg.row_mut(domain.indices[r]).assign(&xl.row(r));
    }
  }

  fn index_points(&self, coords: Array<f64, Ix2>) -> Result<Box<dyn PartitionPointQuery>> {
    Ok(Box::new(IndexedPartitionPointQuery::new(self, coords)))
  }
}

impl AABoxDomainPartitioning for GridDomainPartitioning {
  fn local_box(&self, d: usize) -> AABox {
    self.domain(d).core.clone()
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn numbered(n: usize, m: usize) -> Array<f64, Ix2> {
    Array::from_shape_fn((n, m), |(i, j)| (i * 10 + j) as f64 )
  }

  #[test]
  fn blocks_1d_with_padding() {
    let p = GridDomainPartitioning::new(RegularGrid::line(10, 0.0, 1.0), 4, 1).unwrap();
    assert_eq!(p.num_local_domains(), 3);
    assert_eq!(p.local_size(0), 5);
    assert_eq!(p.local_size(1), 6);
    assert_eq!(p.local_size(2), 3);
    assert_eq!(p.local_box(2), AABox::new(arr1(&[8.0]), arr1(&[10.0])));
  }

  #[test]
  fn round_trip_1d() {
    let p = GridDomainPartitioning::new(RegularGrid::line(10, 0.0, 1.0), 3, 2).unwrap();
    let x = numbered(10, 4);
    let mut back = Array::zeros((10, 4));
    for d in 0..p.num_local_domains() {
      let mut local = Array::zeros((p.local_size(d), 4));
      p.get_local(d, x.view(), local.view_mut());
      p.put_local(d, local.view(), back.view_mut());
    }
    assert_eq!(back, x);
  }

  #[test]
  fn round_trip_2d() {
    let grid = RegularGrid::plane((5, 7), (0.0, 0.0), (1.0, 0.5));
    let p = GridDomainPartitioning::new(grid, 2, 1).unwrap();
    assert_eq!(p.num_local_domains(), 3 * 4);
    // corner block: rows 0..3, cols 0..3
    assert_eq!(p.local_size(0), 9);
    assert_eq!(p.local_box(0), AABox::new(arr1(&[0.0, 0.0]), arr1(&[2.0, 1.0])));

    let x = numbered(35, 3);
    let mut back = Array::zeros((35, 3));
    for d in 0..p.num_local_domains() {
      let mut local = Array::zeros((p.local_size(d), 3));
      p.get_local(d, x.view(), local.view_mut());
      p.put_local(d, local.view(), back.view_mut());
    }
    assert_eq!(back, x);
  }

  #[test]
  fn put_local_leaves_padding_alone() {
    let p = GridDomainPartitioning::new(RegularGrid::line(6, 0.0, 1.0), 3, 1).unwrap();
    let mut xg = Array::zeros((6, 1));
    let local = Array::ones((p.local_size(0), 1));
    p.put_local(0, local.view(), xg.view_mut());
    assert_eq!(xg.column(0).to_vec(), vec![1.0, 1.0, 1.0, 0.0, 0.0, 0.0]);
  }

  #[test]
  fn cell_centers_row_major() {
    let grid = RegularGrid::plane((2, 3), (0.0, 10.0), (1.0, 2.0));
    let c = grid.cell_centers();
    assert_eq!(c.dim(), (2, 6));
    assert_eq!(c.column(4).to_vec(), vec![1.5, 13.0]);
  }

  #[test]
  fn three_dimensional_grids_unsupported() {
    let grid = RegularGrid::new(vec![2, 2, 2], vec![0.0; 3], vec![1.0; 3]);
    match GridDomainPartitioning::new(grid, 1, 0) {
      Err(Error::NotImplemented(_)) => {},
      other => panic!("unexpected {:?}", other.map(|p| p.num_local_domains() )),
    }
  }
}
