//! Ensemble Kalman filtering and fixed-lag smoothing with optional analysis
//! localization.
//!
//! Ensembles are `n x N` arrays, one member per column.

#[macro_use]
extern crate log;
extern crate ndarray as nd;
extern crate na_core;
extern crate nla_factorize;
extern crate parking_lot;
extern crate rand;
extern crate rayon;
#[cfg(feature = "serde")]
extern crate serde;

pub use na_core::{CovarianceOperator, EvolutionModel, ObservationOperator};
pub use na_core::{Error, Result};

pub use cache::{ArrayCache, Handle, MemoryArrayCache};
pub use kalman::{EnKSVariant, EnKS, ESTKS};
pub use kalman::smoother::{Analysis, EnsembleKalmanSmoother, Executor, SmootherConfig};
pub use localization::{DomainPartitioning, PartitionPointQuery, TaperFn};
pub use observation::{AnalysisDomain, ObservationData, ObservationManager,
                      SimpleObservationManager};

pub mod cache;
pub mod ensemble;
pub mod kalman;
pub mod localization;
pub mod observation;
