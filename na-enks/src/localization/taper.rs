//! Distance based tapering of observation influence.

use nd::prelude::*;
use nd::Zip;

use std::fmt::Debug;

pub trait TaperFn: Debug + Send + Sync {
  /// Observations farther away than this have no influence at all.
  fn support_range(&self) -> f64;

  /// Weight in `[0, 1]` for an observation at distance `d`.
  fn weight(&self, d: f64) -> f64;

  /// Whether the observation error covariance should be tapered at all. Hard
  /// cut-off functions return `false`.
  fn tapers(&self) -> bool {
    self.support_range() > 0.0
  }

  /// `out = x * weight(d)`, elementwise.
  fn taper(&self, x: ArrayView<f64, Ix1>, d: ArrayView<f64, Ix1>,
           mut out: ArrayViewMut<f64, Ix1>) {
    Zip::from(&mut out)
      .and(&x)
      .and(&d)
      .for_each(|out, &x, &d| {
        *out = x * self.weight(d);
      });
  }
}

/// Fifth order piecewise rational function of Gaspari and Cohn (1999). `l` is the
/// half width, so the support is `2 l`.
#[derive(Debug, Clone, Copy)]
pub struct GaspariCohnTaper {
  l: f64,
}
impl GaspariCohnTaper {
  pub fn new(l: f64) -> GaspariCohnTaper {
    assert!(l > 0.0);
    GaspariCohnTaper { l: l, }
  }
}
impl TaperFn for GaspariCohnTaper {
  fn support_range(&self) -> f64 { 2.0 * self.l }

  fn weight(&self, d: f64) -> f64 {
    let r = d.abs() / self.l;
    if r <= 1.0 {
      let r2 = r * r;
      let r3 = r2 * r;
      -0.25 * r3 * r2 + 0.5 * r2 * r2 + 0.625 * r3 - 5.0 / 3.0 * r2 + 1.0
    } else if r < 2.0 {
      let r2 = r * r;
      let r3 = r2 * r;
      let w = r3 * r2 / 12.0 - 0.5 * r2 * r2 + 0.625 * r3 + 5.0 / 3.0 * r2 - 5.0 * r + 4.0
        - 2.0 / (3.0 * r);
      w.max(0.0)
    } else {
      0.0
    }
  }
}

/// `max(0, 1 - d / l)`
#[derive(Debug, Clone, Copy)]
pub struct LinearTaper {
  l: f64,
}
impl LinearTaper {
  pub fn new(l: f64) -> LinearTaper {
    assert!(l > 0.0);
    LinearTaper { l: l, }
  }
}
impl TaperFn for LinearTaper {
  fn support_range(&self) -> f64 { self.l }
  fn weight(&self, d: f64) -> f64 {
    (1.0 - d.abs() / self.l).max(0.0)
  }
}

/// `1 - 3/2 (d / l) + 1/2 (d / l)^3` inside the support.
#[derive(Debug, Clone, Copy)]
pub struct SphericalTaper {
  l: f64,
}
impl SphericalTaper {
  pub fn new(l: f64) -> SphericalTaper {
    assert!(l > 0.0);
    SphericalTaper { l: l, }
  }
}
impl TaperFn for SphericalTaper {
  fn support_range(&self) -> f64 { self.l }
  fn weight(&self, d: f64) -> f64 {
    let r = d.abs() / self.l;
    if r < 1.0 {
      1.0 - 1.5 * r + 0.5 * r * r * r
    } else {
      0.0
    }
  }
}

/// Hard cut-off: every observation within `range` counts in full.
#[derive(Debug, Clone, Copy)]
pub struct NoTaper {
  range: f64,
}
impl NoTaper {
  pub fn new(range: f64) -> NoTaper {
    assert!(range >= 0.0);
    NoTaper { range: range, }
  }
}
impl TaperFn for NoTaper {
  fn support_range(&self) -> f64 { self.range }
  fn weight(&self, d: f64) -> f64 {
    if d.abs() <= self.range { 1.0 } else { 0.0 }
  }
  fn tapers(&self) -> bool { false }
}
