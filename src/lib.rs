//! Certified reduced basis methods for parametrized PDE models with an affine parameter
//! dependence.
//!
//! Offline, [`Crb::offline`] builds a small reduced basis by greedy sampling of a training set,
//! driven by an a posteriori error estimator. Online, [`Crb::lb`], [`Crb::delta`] and
//! [`Crb::ub`] evaluate an output functional and a bound for its error at a cost that only
//! depends on the size of the reduced basis.
//!
//! The full-order model is supplied through the [`TruthModel`] trait.
pub mod basis;
pub mod config;
pub mod convergence;
pub mod db;
pub mod error;
pub mod model;
pub mod models;
pub mod offline;
pub mod online;
pub mod orthonormalize;
pub mod parameter;
pub mod reduced;
pub mod residual;
pub mod state;

mod crb;

pub use crate::crb::{CheckReport, Crb, EffectivityReport, RunResult};
pub use config::{CrbConfig, DatabaseLocation, ErrorType};
pub use error::CrbError;
pub use model::{CoercivityBound, MinThetaCoercivityBound, TruthModel};
pub use parameter::{Parameter, ParameterSpace, Sampling, SamplingKind};

pub extern crate crb_sparse;
pub extern crate nalgebra;
