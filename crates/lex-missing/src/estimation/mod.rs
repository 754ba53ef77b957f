//! Likelihood-based estimation.
//!
//! [`MaximumLikelihoodEstimator`] fits a distributional family to observed
//! cells and reports parameters plus the achieved log-likelihood.
//! [`LikelihoodImputer`] turns such a fit into a remediation strategy.

mod families;
mod likelihood;

pub use likelihood::{LikelihoodEstimate, LikelihoodImputer, MaximumLikelihoodEstimator};
