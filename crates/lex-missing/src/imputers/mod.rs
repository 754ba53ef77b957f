//! Imputation strategies.
//!
//! Every imputer fills missing cells and leaves observed cells untouched:
//! - [`CentralSubstitution`] / [`ModeSubstitution`]: one statistic per column
//! - [`RegressionImputer`]: least-squares prediction from complete cases
//! - [`LocfImputer`]: last observation carried forward
//! - [`EmImputer`]: conditional expectation under an EM-fitted normal
//! - [`MultipleImputer`]: M stochastic draws, pooled with Rubin's rules

pub mod em;
mod locf;
mod multiple;
pub(crate) mod regression;
mod statistical;

pub use em::{Conditional, EmEstimator, EmFit, EmImputer, MultivariateData};
pub use locf::LocfImputer;
pub use multiple::{MultipleImputer, pool_estimates};
pub use regression::RegressionImputer;
pub use statistical::{CentralStatistic, CentralSubstitution, ModeSubstitution};
