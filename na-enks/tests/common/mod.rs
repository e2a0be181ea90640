//! Twin experiments: a known truth advected around a periodic line, observed
//! everywhere with white noise.

#![allow(dead_code)]

use ndarray::prelude::*;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;

use std::f64::consts::PI;
use std::sync::Arc;

use na_core::DiagonalCovariance;
use na_core::MatrixObservationOperator;
use na_enks::ensemble::{ensemble_mean, generate_ensemble};
use na_enks::localization::RegularGrid;
use na_enks::{CovarianceOperator, EnKSVariant, EnsembleKalmanSmoother,
              SimpleObservationManager};

pub const OBS_VARIANCE: f64 = 0.01;

pub struct Twin {
  pub n: usize,
  pub model: Array<f64, Ix2>,
  /// Truth at steps `0..=steps`.
  pub truth: Vec<Array<f64, Ix1>>,
  /// Observations at steps `0..=steps`; step zero is never assimilated.
  pub obs: Vec<Array<f64, Ix1>>,
  pub e0: Array<f64, Ix2>,
}

/// Periodic shift by one cell.
pub fn shift_model(n: usize) -> Array<f64, Ix2> {
  let mut m = Array::zeros((n, n));
  for i in 0..n {
    m[[i, (i + n - 1) % n]] = 1.0;
  }
  m
}

pub fn twin(n: usize, ens: usize, steps: usize, seed: u64) -> Twin {
  let mut rng = StdRng::seed_from_u64(seed);
  let model = shift_model(n);
  let r = DiagonalCovariance::spherical(n, OBS_VARIANCE);

  let mut x = Array::from_shape_fn(n, |i| (2.0 * PI * i as f64 / n as f64).sin() );
  let mut truth = Vec::with_capacity(steps + 1);
  let mut obs = Vec::with_capacity(steps + 1);
  for _ in 0..steps + 1 {
    let mut noise = Array::zeros((n, 1));
    r.sample_zero_mean_normal(noise.view_mut(), &mut rng).unwrap();
    obs.push(&x + &noise.column(0));
    truth.push(x.clone());
    x = model.dot(&x);
  }

  let mut e0 = Array::zeros((n, ens));
  let prior = DiagonalCovariance::spherical(n, 1.0);
  generate_ensemble(Array::zeros(n).view(), &prior, e0.view_mut(), &mut rng).unwrap();

  Twin {
    n: n,
    model: model,
    truth: truth,
    obs: obs,
    e0: e0,
  }
}

pub fn coords(n: usize) -> Array<f64, Ix2> {
  RegularGrid::line(n, 0.0, 1.0).cell_centers()
}

/// Observes the state elements `rows` at step `k`.
pub fn observe(twin: &Twin, k: usize, rows: &[usize]) -> SimpleObservationManager {
  let h = Array::<f64, Ix2>::eye(twin.n).select(Axis(0), rows);
  let z = twin.obs[k].select(Axis(0), rows);
  let c = coords(twin.n).select(Axis(1), rows);
  SimpleObservationManager::new(z, Some(c),
                                Arc::new(MatrixObservationOperator::new(h)),
                                Arc::new(DiagonalCovariance::spherical(rows.len(), OBS_VARIANCE)))
}

pub fn everything(twin: &Twin) -> Vec<usize> { (0..twin.n).collect() }

pub type Emitted = Vec<(usize, Array<f64, Ix2>)>;

/// Runs the twin experiment, assimilating `batches` (one manager per entry) at
/// every step, and returns everything the smoother emitted.
pub fn run<V>(twin: &Twin, s: &mut EnsembleKalmanSmoother<V>,
              batches: &[Vec<usize>]) -> Emitted
  where V: EnKSVariant,
{
  let out = Arc::new(Mutex::new(Vec::new()));
  let sink = out.clone();
  s.set_on_result(move |e, k| {
    sink.lock().push((k, e.to_owned()));
  });

  let mut e = twin.e0.clone();
  s.begin_smoother(e.view(), 0);
  for k in 1..twin.obs.len() {
    e = twin.model.dot(&e);
    let mut a = s.begin_analysis(e.view_mut(), k);
    for rows in batches.iter() {
      a.assimilate(&mut observe(twin, k, &rows[..])).unwrap();
    }
    a.end();
  }
  s.end_smoother();

  let emitted = out.lock().clone();
  emitted
}

pub fn rmse(e: ArrayView<f64, Ix2>, truth: &Array<f64, Ix1>) -> f64 {
  let m = ensemble_mean(e);
  ((&m - truth).mapv(|v| v * v ).sum() / truth.len() as f64).sqrt()
}
