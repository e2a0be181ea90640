use nd::prelude::*;
use nd::Zip;

#[derive(Debug, Clone, PartialEq)]
pub struct AABox {
  min: Array<f64, Ix1>,
  max: Array<f64, Ix1>,
}

impl AABox {
  pub fn new(min: Array<f64, Ix1>, max: Array<f64, Ix1>) -> AABox {
    assert_eq!(min.dim(), max.dim());
    assert!(Zip::from(&min).and(&max).all(|&lo, &hi| lo <= hi ), "inverted box");
    AABox {
      min: min,
      max: max,
    }
  }

  pub fn dim(&self) -> usize { self.min.dim() }
  pub fn min(&self) -> ArrayView<f64, Ix1> { self.min.view() }
  pub fn max(&self) -> ArrayView<f64, Ix1> { self.max.view() }

  pub fn contains(&self, p: ArrayView<f64, Ix1>) -> bool {
    self.squared_exterior_distance(p) == 0.0
  }

  /// Squared distance from `p` to the nearest point of the box; zero inside.
  pub fn squared_exterior_distance(&self, p: ArrayView<f64, Ix1>) -> f64 {
    assert_eq!(p.dim(), self.dim());
    let mut acc = 0.0;
    for ((&v, &lo), &hi) in p.iter().zip(self.min.iter()).zip(self.max.iter()) {
      let d = if v < lo {
        lo - v
      } else if v > hi {
        v - hi
      } else {
        0.0
      };
      acc += d * d;
    }
    acc
  }

  /// The box grown by `r` on every side.
  pub fn inflated(&self, r: f64) -> AABox {
    AABox::new(self.min.mapv(|v| v - r ), self.max.mapv(|v| v + r ))
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn exterior_distance() {
    let b = AABox::new(arr1(&[0.0, 0.0]), arr1(&[2.0, 1.0]));
    assert_eq!(b.squared_exterior_distance(arr1(&[1.0, 0.5]).view()), 0.0);
    assert_eq!(b.squared_exterior_distance(arr1(&[3.0, 0.5]).view()), 1.0);
    assert_eq!(b.squared_exterior_distance(arr1(&[-3.0, 5.0]).view()), 25.0);
    assert!(b.contains(arr1(&[2.0, 1.0]).view()));

    let big = b.inflated(1.0);
    assert!(big.contains(arr1(&[3.0, 0.5]).view()));
    assert_eq!(big.min(), arr1(&[-1.0, -1.0]));
  }
}
