//! The ensemble Kalman smoother: drives analysis steps, localization and the
//! fixed-lag backward recursion over cached ensembles.

use nd::prelude::*;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use std::collections::VecDeque;
use std::sync::Arc;

use na_core::Result;

use super::EnKSVariant;
use crate::cache::{ArrayCache, Handle, MemoryArrayCache};
use crate::localization::{DomainPartitioning, TaperFn};
use crate::observation::{AnalysisDomain, ObservationData, ObservationManager};

/// How local domain analyses within one observation batch are run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Executor {
  Serial,
  /// Spread domains over the rayon thread pool.
  Parallel,
}
impl Default for Executor {
  fn default() -> Executor { Executor::Serial }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SmootherConfig {
  /// Number of past steps the smoother still revises. Zero runs a filter.
  pub lag: usize,
  /// Multiplicative spread inflation applied at the start of each analysis; `>= 1`.
  pub cov_inflation: f64,
  /// Damps the transforms propagated back to older steps; `<= 1`.
  pub forgetting_factor: f64,
  pub executor: Executor,
  /// Seeds the generator used for observation perturbations.
  pub seed: u64,
}

impl Default for SmootherConfig {
  fn default() -> SmootherConfig {
    SmootherConfig {
      lag: 0,
      cov_inflation: 1.0,
      forgetting_factor: 1.0,
      executor: Executor::Serial,
      seed: 0,
    }
  }
}

impl SmootherConfig {
  pub fn lag(mut self, lag: usize) -> SmootherConfig {
    self.lag = lag;
    self
  }
  pub fn cov_inflation(mut self, factor: f64) -> SmootherConfig {
    self.cov_inflation = factor;
    self
  }
  pub fn forgetting_factor(mut self, factor: f64) -> SmootherConfig {
    self.forgetting_factor = factor;
    self
  }
  pub fn executor(mut self, executor: Executor) -> SmootherConfig {
    self.executor = executor;
    self
  }
  pub fn seed(mut self, seed: u64) -> SmootherConfig {
    self.seed = seed;
    self
  }

  fn check(&self) {
    assert!(self.cov_inflation >= 1.0, "inflation factor must be at least 1");
    assert!(self.forgetting_factor <= 1.0 && self.forgetting_factor >= 0.0,
            "forgetting factor must be in [0, 1]");
  }
}

/// Called with each finished estimate and the step it belongs to.
pub type OnResultFn = Box<dyn FnMut(ArrayView<f64, Ix2>, usize) + Send>;

#[derive(Debug, Clone, Copy)]
struct SmootherStep {
  k: usize,
  e: Handle,
}

#[derive(Debug, Clone, Copy)]
struct DomainLimits {
  /// First row in the augmented ensemble.
  start: usize,
  size: usize,
}

struct Localization {
  partitioner: Arc<dyn DomainPartitioning>,
  taper: Option<Arc<dyn TaperFn>>,
  limits: Vec<DomainLimits>,
  nonempty: usize,
  /// Every local domain stacked row-wise.
  e_aug: Array<f64, Ix2>,
  /// One `N x N` transform per non-empty domain, stacked row-wise.
  x: Array<f64, Ix2>,
  have_x: Vec<bool>,
  /// Reassembles cached augmented ensembles for emission.
  scratch: Array<f64, Ix2>,
}

impl Localization {
  fn unpack(&self, e: ArrayView<f64, Ix2>, mut e_aug: ArrayViewMut<f64, Ix2>) {
    for (d, lim) in self.limits.iter().enumerate() {
      if lim.size == 0 { continue; }
      let block = e_aug.slice_mut(s![lim.start..lim.start + lim.size, ..]);
      self.partitioner.get_local(d, e, block);
    }
  }
  fn pack(&self, e_aug: ArrayView<f64, Ix2>, mut e: ArrayViewMut<f64, Ix2>) {
    for (d, lim) in self.limits.iter().enumerate() {
      if lim.size == 0 { continue; }
      let block = e_aug.slice(s![lim.start..lim.start + lim.size, ..]);
      self.partitioner.put_local(d, block, e.view_mut());
    }
  }
}

/// The analysis work of one local domain for one `assimilate` call.
struct DomainJob<'a> {
  d: usize,
  e: ArrayViewMut<'a, f64, Ix2>,
  x: ArrayViewMut<'a, f64, Ix2>,
  have_x: &'a mut bool,
  batches: Vec<(ObservationData, u64)>,
}

/// `X <- (X - I) f + I`
fn apply_forgetting_factor(mut x: ArrayViewMut<f64, Ix2>, f: f64) {
  if f == 1.0 { return; }
  x.mapv_inplace(|v| v * f );
  x.diag_mut().mapv_inplace(|v| v + (1.0 - f) );
}

/// Runs one batch of observations against one (global or local) ensemble, composing
/// the new transform with any transform already accumulated for this step.
fn assimilate_one<V>(variant: &V, data: &ObservationData, seed: u64, k: usize,
                     eg: ArrayView<f64, Ix2>,
                     e: ArrayViewMut<f64, Ix2>,
                     mut x: ArrayViewMut<f64, Ix2>,
                     have_x: &mut bool,
                     keep_x: bool) -> Result<()>
  where V: EnKSVariant + ?Sized,
{
  assert_eq!(data.h.nobs(), data.obs.dim(), "observation operator size mismatch");
  assert_eq!(data.r.size(), data.obs.dim(), "observation covariance size mismatch");

  let global = variant.process_global_ensemble(eg, &*data.h, k)?;
  let mut rng = StdRng::seed_from_u64(seed);

  if !*have_x {
    variant.ensemble_transform(e, &global, data.obs.view(), &*data.r, k,
                               &mut rng, x.view_mut())?;
  } else {
    let ens = x.dim().0;
    let mut xx = Array::zeros((ens, ens));
    variant.ensemble_transform(e, &global, data.obs.view(), &*data.r, k,
                               &mut rng, xx.view_mut())?;
    let composed = x.dot(&xx);
    x.assign(&composed);
  }

  // filters don't need the transform once it has been applied
  *have_x = *have_x || keep_x;
  Ok(())
}

/// Sequential ensemble Kalman filter/smoother.
///
/// Each step is bracketed by `begin_analysis` and `Analysis::end`; any number of
/// observation batches may be assimilated in between. With `lag > 0` every finished
/// analysis is kept in an `ArrayCache` and revised by the transforms of the next `lag`
/// steps before it is handed to the result callback.
pub struct EnsembleKalmanSmoother<V> {
  variant: V,
  n: usize,
  ens: usize,
  config: SmootherConfig,
  cache: Box<dyn ArrayCache>,
  rng: StdRng,
  on_result: Option<OnResultFn>,

  analysis_active: bool,
  up_k: usize,
  up_x: Array<f64, Ix2>,
  up_have_x: bool,
  up_assimilated: bool,

  steps: VecDeque<SmootherStep>,
  loc: Option<Localization>,
}

impl<V> EnsembleKalmanSmoother<V>
  where V: EnKSVariant,
{
  pub fn new(mut variant: V, n: usize, ens: usize,
             config: SmootherConfig) -> EnsembleKalmanSmoother<V> {
    assert!(n > 0, "empty state");
    assert!(ens > 1, "need at least two members");
    config.check();
    variant.init(n, ens);

    EnsembleKalmanSmoother {
      variant: variant,
      n: n,
      ens: ens,
      rng: StdRng::seed_from_u64(config.seed),
      config: config,
      cache: Box::new(MemoryArrayCache::new()),
      on_result: None,

      analysis_active: false,
      up_k: 0,
      up_x: Array::zeros((ens, ens)),
      up_have_x: false,
      up_assimilated: false,

      steps: VecDeque::new(),
      loc: None,
    }
  }

  /// Replaces the default in-memory cache.
  pub fn with_cache(mut self, cache: Box<dyn ArrayCache>) -> EnsembleKalmanSmoother<V> {
    assert!(self.steps.is_empty(), "can't swap the cache of a running smoother");
    self.cache = cache;
    self
  }
  pub fn set_rng(&mut self, rng: StdRng) {
    self.rng = rng;
  }
  pub fn set_on_result<F>(&mut self, f: F)
    where F: FnMut(ArrayView<f64, Ix2>, usize) + Send + 'static,
  {
    self.on_result = Some(Box::new(f));
  }

  pub fn config(&self) -> &SmootherConfig { &self.config }
  pub fn variant(&self) -> &V { &self.variant }
  pub fn state_size(&self) -> usize { self.n }
  pub fn ensemble_size(&self) -> usize { self.ens }
  pub fn lag(&self) -> usize { self.config.lag }
  pub fn is_localized(&self) -> bool { self.loc.is_some() }

  pub fn set_cov_inflation(&mut self, factor: f64) {
    assert!(factor >= 1.0, "inflation factor must be at least 1");
    self.config.cov_inflation = factor;
  }
  pub fn set_forgetting_factor(&mut self, factor: f64) {
    assert!(factor <= 1.0 && factor >= 0.0, "forgetting factor must be in [0, 1]");
    self.config.forgetting_factor = factor;
  }

  /// Localizes the analysis over the domains of `partitioner`. A single domain is
  /// just a global analysis.
  pub fn localize(&mut self, partitioner: Arc<dyn DomainPartitioning>,
                  taper: Option<Arc<dyn TaperFn>>) {
    assert!(!self.analysis_active, "can't localize during an analysis");
    assert!(self.steps.is_empty(), "can't localize a running smoother");

    let num_domains = partitioner.num_local_domains();
    assert!(num_domains > 0, "partitioner has no domains");
    if num_domains == 1 {
      warn!("partitioner has a single domain, using global analysis");
      self.globalize();
      return;
    }

    let mut limits = Vec::with_capacity(num_domains);
    let mut total = 0;
    let mut nonempty = 0;
    for d in 0..num_domains {
      let size = partitioner.local_size(d);
      limits.push(DomainLimits {
        start: total,
        size: size,
      });
      total += size;
      if size > 0 { nonempty += 1; }
    }

    debug!("localized analysis: {} domains ({} non-empty), augmented state size {}",
           num_domains, nonempty, total);

    self.loc = Some(Localization {
      partitioner: partitioner,
      taper: taper,
      limits: limits,
      nonempty: nonempty,
      e_aug: Array::zeros((total, self.ens)),
      x: Array::zeros((nonempty * self.ens, self.ens)),
      have_x: vec![false; num_domains],
      scratch: Array::zeros((self.n, self.ens)),
    });
  }

  /// Switches back to global analysis.
  pub fn globalize(&mut self) {
    assert!(!self.analysis_active, "can't globalize during an analysis");
    assert!(self.steps.is_empty(), "can't globalize a running smoother");
    self.loc = None;
  }

  /// Starts a new smoother run from the initial ensemble `e0` at step `k0`.
  pub fn begin_smoother(&mut self, e0: ArrayView<f64, Ix2>, k0: usize) {
    assert!(!self.analysis_active, "analysis in progress");
    assert_eq!(e0.dim(), (self.n, self.ens), "ensemble dimension mismatch");
    if self.config.lag == 0 { return; }

    for step in self.steps.drain(..) {
      self.cache.remove(step.e);
    }

    let h = match self.loc {
      None => self.cache.put(e0),
      Some(ref mut loc) => {
        let mut e_aug = ::std::mem::replace(&mut loc.e_aug, Array::zeros((0, 0)));
        loc.unpack(e0, e_aug.view_mut());
        let h = self.cache.put(e_aug.view());
        loc.e_aug = e_aug;
        h
      },
    };
    self.steps.push_back(SmootherStep { k: k0, e: h, });
  }

  /// Starts the analysis of `e` at step `k`. The returned guard assimilates
  /// observations into `e`; call `end` on it to finish the step.
  pub fn begin_analysis<'s, 'e>(&'s mut self, mut e: ArrayViewMut<'e, f64, Ix2>,
                                k: usize) -> Analysis<'s, 'e, V> {
    assert!(!self.analysis_active, "analysis already in progress");
    assert_eq!(e.dim(), (self.n, self.ens), "ensemble dimension mismatch");

    debug!("analysis at step {}", k);

    self.up_k = k;
    self.up_have_x = false;
    self.up_assimilated = false;

    // also with a factor of one, so variants that store the factor drop an old one
    self.variant.apply_cov_inflation(e.view_mut(), self.config.cov_inflation, k);

    if let Some(ref mut loc) = self.loc {
      for h in loc.have_x.iter_mut() {
        *h = false;
      }
      let mut e_aug = ::std::mem::replace(&mut loc.e_aug, Array::zeros((0, 0)));
      loc.unpack(e.view(), e_aug.view_mut());
      loc.e_aug = e_aug;
    }

    self.analysis_active = true;
    Analysis {
      smoother: self,
      e: e,
    }
  }

  /// Flushes every step still held by the smoother, oldest first.
  pub fn end_smoother(&mut self) {
    assert!(!self.analysis_active, "analysis in progress");
    if self.config.lag == 0 { return; }
    self.lagged_smoother(true);
  }

  fn assimilate(&mut self, mut e: ArrayViewMut<f64, Ix2>,
                omgr: &mut dyn ObservationManager) -> Result<()> {
    assert!(self.analysis_active, "no analysis in progress");
    let k = self.up_k;
    let keep_x = self.config.lag > 0;

    let (partitioner, taper) = match self.loc {
      Some(ref loc) => (Some(loc.partitioner.clone()), loc.taper.clone()),
      None => (None, None),
    };
    omgr.begin_fetch(k, partitioner, taper)?;

    let loc = match self.loc {
      None => {
        if let Some(data) = omgr.fetch_observations()? {
          assert_eq!(data.domain, AnalysisDomain::Global, "got local observations for a global analysis");
          if !data.is_empty() {
            let seed = self.rng.gen();
            let eg = e.to_owned();
            assimilate_one(&self.variant, &data, seed, k, eg.view(), e.view_mut(),
                           self.up_x.view_mut(), &mut self.up_have_x, keep_x)?;
            self.up_assimilated = true;
          }
        }
        return Ok(());
      },
      Some(ref mut loc) => loc,
    };

    // H() needs the global ensemble, so fold in what earlier batches of this step did
    if self.up_assimilated {
      loc.pack(loc.e_aug.view(), e.view_mut());
    }

    let num_domains = loc.limits.len();
    let mut batches: Vec<Vec<(ObservationData, u64)>> = (0..num_domains).map(|_| Vec::new() ).collect();
    let mut total = 0;
    while let Some(data) = omgr.fetch_observations()? {
      let d = match data.domain {
        AnalysisDomain::Local(d) if d < num_domains => d,
        other => panic!("got observations for {:?} in a localized analysis", other),
      };
      if data.is_empty() || loc.limits[d].size == 0 { continue; }

      // drawn in fetch order, so the executor doesn't change the outcome
      let seed = self.rng.gen();
      total += data.nobs();
      batches[d].push((data, seed));
    }
    if total == 0 { return Ok(()); }

    let ens = self.ens;
    let mut jobs = Vec::new();
    {
      let mut e_rest = loc.e_aug.view_mut();
      let mut x_rest = loc.x.view_mut();
      let domains = batches.into_iter().zip(loc.have_x.iter_mut()).enumerate();
      for (d, (domain_batches, have_x)) in domains {
        let size = loc.limits[d].size;
        if size == 0 { continue; }

        let (e_d, e_tail) = e_rest.split_at(Axis(0), size);
        let (x_d, x_tail) = x_rest.split_at(Axis(0), ens);
        e_rest = e_tail;
        x_rest = x_tail;

        if domain_batches.is_empty() { continue; }
        jobs.push(DomainJob {
          d: d,
          e: e_d,
          x: x_d,
          have_x: have_x,
          batches: domain_batches,
        });
      }
    }

    let variant = &self.variant;
    let eg = e.view();
    let run = |job: DomainJob| -> Result<()> {
      let DomainJob { d, mut e, mut x, have_x, batches, } = job;
      trace!("step {}: analysis of domain {} ({} batches)", k, d, batches.len());
      for (data, seed) in batches.iter() {
        assimilate_one(variant, data, *seed, k, eg.view(), e.view_mut(), x.view_mut(),
                       &mut *have_x, keep_x)?;
      }
      Ok(())
    };

    match self.config.executor {
      Executor::Serial => {
        for job in jobs {
          run(job)?;
        }
      },
      Executor::Parallel => {
        jobs.into_par_iter()
          .map(run)
          .collect::<Result<Vec<()>>>()?;
      },
    }

    self.up_assimilated = true;
    Ok(())
  }

  fn end_analysis(&mut self, mut e: ArrayViewMut<f64, Ix2>) {
    assert!(self.analysis_active, "no analysis in progress");

    self.lagged_smoother(false);

    let lag = self.config.lag;
    if let Some(ref loc) = self.loc {
      if self.up_assimilated || lag > 0 {
        loc.pack(loc.e_aug.view(), e.view_mut());
      }
    }

    if lag == 0 {
      if let Some(ref mut f) = self.on_result {
        f(e.view(), self.up_k);
      }
    } else {
      let h = match self.loc {
        None => self.cache.put(e.view()),
        Some(ref loc) => self.cache.put(loc.e_aug.view()),
      };
      self.steps.push_back(SmootherStep { k: self.up_k, e: h, });
    }

    self.analysis_active = false;
  }

  /// Propagates the transforms of the current step back to the cached steps within
  /// the lag window and emits the steps that leave it. When `finishing`, every
  /// remaining step is emitted as is.
  fn lagged_smoother(&mut self, finishing: bool) {
    if self.steps.is_empty() { return; }

    let EnsembleKalmanSmoother {
      ref mut cache,
      ref mut steps,
      ref mut on_result,
      ref mut up_x,
      ref mut loc,
      up_have_x,
      ens,
      ref config,
      ..
    } = *self;
    let lag = config.lag;
    let f = config.forgetting_factor;

    let mut emit = |cache: &mut Box<dyn ArrayCache>, loc: &mut Option<Localization>,
                    step: SmootherStep| {
      let entry = cache.pop(step.e);
      let guard = entry.lock();
      debug!("smoother result for step {}", step.k);
      if let Some(ref mut cb) = *on_result {
        match *loc {
          None => cb(guard.array.view(), step.k),
          Some(ref mut loc) => {
            let mut scratch = ::std::mem::replace(&mut loc.scratch, Array::zeros((0, 0)));
            loc.pack(guard.array.view(), scratch.view_mut());
            cb(scratch.view(), step.k);
            loc.scratch = scratch;
          },
        }
      }
    };

    if finishing {
      while let Some(step) = steps.pop_front() {
        emit(&mut *cache, &mut *loc, step);
      }
      return;
    }

    let kend = steps.len();
    for j in (kend.saturating_sub(lag)..kend).rev() {
      let step = steps[j];
      {
        let entry = cache.get(step.e);
        let mut guard = entry.lock();
        match *loc {
          None => if up_have_x {
            apply_forgetting_factor(up_x.view_mut(), f);
            let ex = guard.array.dot(&*up_x);
            guard.array.assign(&ex);
          },
          Some(ref mut loc) => {
            let mut i = 0;
            for (d, lim) in loc.limits.iter().enumerate() {
              if lim.size == 0 { continue; }
              let xi = i;
              i += 1;
              if !loc.have_x[d] { continue; }

              let mut xd = loc.x.slice_mut(s![xi * ens..(xi + 1) * ens, ..]);
              apply_forgetting_factor(xd.view_mut(), f);
              let mut ed = guard.array.slice_mut(s![lim.start..lim.start + lim.size, ..]);
              let ex = ed.dot(&xd);
              ed.assign(&ex);
            }
            debug_assert_eq!(i, loc.nonempty);
          },
        }
      }

      if j + lag == kend {
        // the oldest step has left the window
        assert_eq!(j, 0);
        steps.pop_front();
        emit(&mut *cache, &mut *loc, step);
      } else {
        cache.mark_dirty(step.e);
      }
    }
  }
}

/// An analysis step in progress. Finish it with `end`.
#[must_use = "an analysis must be finished with `end`"]
pub struct Analysis<'s, 'e, V>
  where V: EnKSVariant,
{
  smoother: &'s mut EnsembleKalmanSmoother<V>,
  e: ArrayViewMut<'e, f64, Ix2>,
}

impl<'s, 'e, V> Analysis<'s, 'e, V>
  where V: EnKSVariant,
{
  pub fn step(&self) -> usize { self.smoother.up_k }

  /// The global ensemble. In localized analyses it is only current after `end`.
  pub fn ensemble(&self) -> ArrayView<f64, Ix2> { self.e.view() }

  /// Assimilates every batch `omgr` hands out for this step.
  pub fn assimilate(&mut self, omgr: &mut dyn ObservationManager) -> Result<()> {
    self.smoother.assimilate(self.e.view_mut(), omgr)
  }

  /// Finishes the step: runs the backward smoother pass and emits (filter) or caches
  /// (smoother) the analysis.
  pub fn end(self) {
    let Analysis { smoother, e, } = self;
    smoother.end_analysis(e);
  }
}
