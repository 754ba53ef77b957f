//! Missing-Value Detection and Remediation Engine
//!
//! A library for finding missing cells in tabular data and repairing them
//! with a family of interchangeable strategies, built on Polars.
//!
//! # Overview
//!
//! - **Detection**: a cell-level [`MissingnessMask`], per-column and total
//!   counts, row completeness, fully-missing column flags
//! - **Deletion**: listwise (complete-case) deletion
//! - **Substitution**: mean, median and mode substitution
//! - **Model-based imputation**: regression, LOCF, maximum likelihood and
//!   expectation-maximization
//! - **Multiple imputation**: M stochastic draws pooled with Rubin's rules
//! - **Sensitivity analysis**: how much a summary statistic moves when the
//!   strategy changes
//!
//! Polars null is the missing marker. A `NaN` produced by undefined
//! arithmetic is a value, and is never counted as missing.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use lex_missing::{Dataset, MissingnessAnalyzer, RemediationConfig, Strategy, StrategyRunner};
//! use polars::prelude::*;
//!
//! let dataset = Dataset::new(df!["Ozone" => [Some(41.0), None, Some(12.0)]]?);
//!
//! let mask = MissingnessAnalyzer::compute_mask(&dataset);
//! println!("missing: {}", MissingnessAnalyzer::count_total(&mask));
//!
//! let config = RemediationConfig::builder()
//!     .strategy(Strategy::MeanSubstitution)
//!     .build()?;
//!
//! let result = StrategyRunner::run(&dataset, &config)?
//!     .into_single()
//!     .expect("mean substitution yields one dataset");
//! println!("{:?}", result.provenance);
//! ```
//!
//! # Strategies
//!
//! Every strategy implements [`Remediator`] and never mutates its input, so
//! several strategies can be run against the same [`Dataset`] and compared
//! with [`SensitivityAnalyzer`].
//!
//! ```rust,ignore
//! use lex_missing::{SensitivityAnalyzer, RemediationConfig};
//!
//! let report = SensitivityAnalyzer::new(RemediationConfig::default())
//!     .analyze(&dataset, &mask)?;
//! for column in report.flagged_columns() {
//!     println!("strategy choice matters for {}", column);
//! }
//! ```

pub mod cleaner;
pub mod config;
pub mod dataset;
pub mod error;
pub mod estimation;
pub mod imputers;
pub mod math;
pub mod profiler;
pub mod quality;
pub mod strategy;
pub mod types;
pub mod utils;

// Re-exports for convenient access
pub use cleaner::ListwiseDeletion;
pub use config::{
    ConfigValidationError, DistributionFamily, ImputationModel, MissingnessMechanism,
    RemediationConfig, RemediationConfigBuilder, Strategy, SummaryStatistic,
};
pub use dataset::Dataset;
pub use error::{RemediationError, Result as EngineResult, ResultExt};
pub use estimation::{LikelihoodEstimate, LikelihoodImputer, MaximumLikelihoodEstimator};
pub use imputers::{
    CentralStatistic, CentralSubstitution, EmEstimator, EmFit, EmImputer, LocfImputer,
    ModeSubstitution, MultipleImputer, RegressionImputer, pool_estimates,
};
pub use profiler::{MissingnessAnalyzer, MissingnessMask};
pub use quality::{SensitivityAnalyzer, SensitivityReport};
pub use strategy::{Remediator, StrategyRunner};
pub use types::{
    CellIssue, ColumnMissingness, ColumnRemediation, ImputationEnsemble, MissingnessSummary,
    PooledEstimate, Provenance, Remediation, RemediationResult, UnresolvedKind,
};
pub use utils::ColumnKind;
