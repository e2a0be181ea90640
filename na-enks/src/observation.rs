//! Supplying observations to the analysis, optionally split by local domain.

use nd::prelude::*;
use nd::Zip;

use std::fmt;
use std::sync::Arc;

use na_core::{CovarianceOperator, DiagonalCovariance, Error, ObservationOperator, Result};

use crate::localization::{DomainPartitioning, PartitionPointQuery, TaperFn};

/// Tapered observations with a weight at or below this are dropped.
const MIN_TAPER_WEIGHT: f64 = 1.0e-10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalysisDomain {
  /// No localization.
  Global,
  Local(usize),
}

/// Observed values together with their operator and error covariance.
#[derive(Clone)]
pub struct ObservationData {
  pub domain: AnalysisDomain,
  pub obs: Array<f64, Ix1>,
  pub h: Arc<dyn ObservationOperator>,
  pub r: Arc<dyn CovarianceOperator>,
}
impl ObservationData {
  pub fn new(domain: AnalysisDomain, obs: Array<f64, Ix1>,
             h: Arc<dyn ObservationOperator>,
             r: Arc<dyn CovarianceOperator>) -> ObservationData {
    ObservationData {
      domain: domain,
      obs: obs,
      h: h,
      r: r,
    }
  }

  pub fn nobs(&self) -> usize { self.obs.dim() }
  pub fn is_empty(&self) -> bool { self.obs.is_empty() }
}
impl fmt::Debug for ObservationData {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.debug_struct("ObservationData")
      .field("domain", &self.domain)
      .field("obs", &self.obs)
      .finish()
  }
}

pub trait ObservationManager {
  /// Prepares for fetching the observations of analysis step `k`. A partitioner is
  /// passed iff the analysis is localized.
  fn begin_fetch(&mut self, k: usize,
                 partitioner: Option<Arc<dyn DomainPartitioning>>,
                 taper: Option<Arc<dyn TaperFn>>) -> Result<()>;

  /// Returns the next batch of observations, or `None` once every batch for this
  /// step was handed out.
  ///
  /// Global analyses get all observations in one `AnalysisDomain::Global` batch.
  /// Localized analyses get one batch per local domain that has observations.
  fn fetch_observations(&mut self) -> Result<Option<ObservationData>>;
}

struct LocalFetch {
  query: Box<dyn PartitionPointQuery>,
  taper: Arc<dyn TaperFn>,
  num_domains: usize,
  next_domain: usize,
}

/// Serves a fixed set of observations at every analysis step.
///
/// In localized mode a domain receives every observation within the taper support
/// range of its core. A diagonal error covariance is tapered through its inverse
/// diagonal, `1 / sigma_i^2 <- taper(d_i) / sigma_i^2`.
pub struct SimpleObservationManager {
  obs: Array<f64, Ix1>,
  coords: Option<Array<f64, Ix2>>,
  h: Arc<dyn ObservationOperator>,
  r: Arc<dyn CovarianceOperator>,

  global_done: bool,
  local: Option<LocalFetch>,
}

impl SimpleObservationManager {
  /// `coords` holds the location of each observation in its columns and is only
  /// needed for localized analyses.
  pub fn new(obs: Array<f64, Ix1>, coords: Option<Array<f64, Ix2>>,
             h: Arc<dyn ObservationOperator>,
             r: Arc<dyn CovarianceOperator>) -> SimpleObservationManager {
    assert_eq!(h.nobs(), obs.dim(), "observation operator size mismatch");
    assert_eq!(r.size(), obs.dim(), "observation covariance size mismatch");
    if let Some(ref coords) = coords {
      assert_eq!(coords.dim().1, obs.dim(), "need one coordinate per observation");
    }

    SimpleObservationManager {
      obs: obs,
      coords: coords,
      h: h,
      r: r,
      global_done: false,
      local: None,
    }
  }

  fn fetch_local(&mut self) -> Result<Option<ObservationData>> {
    let local = match self.local {
      Some(ref mut local) => local,
      None => unreachable!(),
    };

    let tapering = local.taper.tapers();
    let range = local.taper.support_range();
    let mut found = Vec::new();

    while local.next_domain < local.num_domains {
      let d = local.next_domain;
      local.next_domain += 1;

      found.clear();
      local.query.range_query(d, range, &mut found);

      let mut weights = Vec::with_capacity(found.len());
      if tapering {
        let before = found.len();
        found.retain(|&(_, dist)| local.taper.weight(dist) > MIN_TAPER_WEIGHT );
        weights.extend(found.iter().map(|&(_, dist)| local.taper.weight(dist) ));
        if found.len() != before {
          trace!("domain {}: taper discarded {} of {} observations",
                 d, before - found.len(), before);
        }
      }
      if found.is_empty() { continue; }

      let indices: Vec<usize> = found.iter().map(|&(i, _)| i ).collect();
      let obs = self.obs.select(Axis(0), &indices);
      let h = self.h.subset(&indices)?;
      let mut r = self.r.subset(&indices)?;
      assert_eq!(h.nobs(), indices.len());
      assert_eq!(r.size(), indices.len());

      if tapering {
        let tapered = match r.as_diagonal() {
          Some(diag) => {
            let inv = Zip::from(&diag.inverse_diagonal())
              .and(&weights[..])
              .map_collect(|&inv, &w| inv * w );
            DiagonalCovariance::from_inverse(inv)
          },
          None => {
            return Err(Error::NotImplemented("tapering of a non-diagonal observation error covariance"));
          },
        };
        r = Arc::new(tapered);
      }

      trace!("domain {}: {} observations", d, indices.len());
      return Ok(Some(ObservationData::new(AnalysisDomain::Local(d), obs, h, r)));
    }

    Ok(None)
  }
}

impl ObservationManager for SimpleObservationManager {
  fn begin_fetch(&mut self, _k: usize,
                 partitioner: Option<Arc<dyn DomainPartitioning>>,
                 taper: Option<Arc<dyn TaperFn>>) -> Result<()> {
    self.global_done = false;
    self.local = None;

    let partitioner = match partitioner {
      Some(p) if p.num_local_domains() > 1 => p,
      _ => { return Ok(()); },
    };
    let taper = match taper {
      Some(t) => t,
      None => panic!("localized analysis needs a taper function"),
    };

    let coords = match self.coords {
      Some(ref coords) => coords.clone(),
      None => {
        assert!(self.obs.is_empty(), "localized analysis needs observation coordinates");
        Array::zeros((partitioner.partition_coord_dim(), 0))
      },
    };

    self.local = Some(LocalFetch {
      query: partitioner.index_points(coords)?,
      taper: taper,
      num_domains: partitioner.num_local_domains(),
      next_domain: 0,
    });

    Ok(())
  }

  fn fetch_observations(&mut self) -> Result<Option<ObservationData>> {
    if self.local.is_some() {
      return self.fetch_local();
    }

    if self.global_done || self.obs.is_empty() {
      return Ok(None);
    }
    self.global_done = true;
    Ok(Some(ObservationData::new(AnalysisDomain::Global, self.obs.clone(),
                                 self.h.clone(), self.r.clone())))
  }
}
