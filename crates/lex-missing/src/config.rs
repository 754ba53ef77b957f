//! Configuration types for the remediation engine.
//!
//! This module provides per-invocation configuration using the builder
//! pattern, plus the closed enums that select strategies and models.

use crate::error::RemediationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Remediation strategy applied to a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Strategy {
    /// Drop every row that has a missing cell in the considered columns
    ListwiseDeletion,
    /// Replace missing numeric cells with the column mean
    #[default]
    MeanSubstitution,
    /// Replace missing numeric cells with the column median
    MedianSubstitution,
    /// Replace missing cells with the most frequent observed value
    ModeSubstitution,
    /// Predict missing cells from a least-squares fit on complete cases
    RegressionImputation,
    /// Carry the last observation forward in row order
    Locf,
    /// Fill with the expected value of a maximum-likelihood fit
    MaximumLikelihood,
    /// Fill with conditional expectations from a multivariate normal EM fit
    ExpectationMaximization,
    /// Draw several completed datasets and pool their estimates
    MultipleImputation,
}

impl Strategy {
    /// Every strategy, in registry order.
    pub const ALL: [Strategy; 9] = [
        Strategy::ListwiseDeletion,
        Strategy::MeanSubstitution,
        Strategy::MedianSubstitution,
        Strategy::ModeSubstitution,
        Strategy::RegressionImputation,
        Strategy::Locf,
        Strategy::MaximumLikelihood,
        Strategy::ExpectationMaximization,
        Strategy::MultipleImputation,
    ];

    /// Short machine-friendly name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::ListwiseDeletion => "listwise_deletion",
            Strategy::MeanSubstitution => "mean_substitution",
            Strategy::MedianSubstitution => "median_substitution",
            Strategy::ModeSubstitution => "mode_substitution",
            Strategy::RegressionImputation => "regression_imputation",
            Strategy::Locf => "locf",
            Strategy::MaximumLikelihood => "maximum_likelihood",
            Strategy::ExpectationMaximization => "expectation_maximization",
            Strategy::MultipleImputation => "multiple_imputation",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Distributional family assumed by the maximum-likelihood estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DistributionFamily {
    /// Univariate normal (closed form)
    #[default]
    Normal,
    /// Exponential with rate parameter (closed form, positive data)
    Exponential,
    /// Poisson with rate parameter (closed form, non-negative data)
    Poisson,
    /// Gamma with shape and rate (Newton-Raphson on the shape)
    Gamma,
    /// Joint multivariate normal over all selected columns (EM)
    MultivariateNormal,
}

impl DistributionFamily {
    /// Whether the family models several columns jointly.
    pub fn is_joint(&self) -> bool {
        matches!(self, DistributionFamily::MultivariateNormal)
    }
}

/// Assumed missingness mechanism, recorded with every likelihood estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MissingnessMechanism {
    /// Missing completely at random
    Mcar,
    /// Missing at random (conditional on observed columns)
    #[default]
    Mar,
}

/// Predictive model the multiple imputer draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ImputationModel {
    /// Per-target least squares with drawn coefficients and residual noise
    #[default]
    Regression,
    /// Conditional normal draws under the EM-fitted joint distribution
    Em,
}

/// Summary statistic compared across strategies by the sensitivity analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SummaryStatistic {
    #[default]
    Mean,
    Median,
    StdDev,
}

/// Per-invocation configuration for the engine.
///
/// Use [`RemediationConfig::builder()`] to create a validated configuration.
///
/// # Example
///
/// ```rust,ignore
/// use lex_missing::config::{RemediationConfig, Strategy};
///
/// let config = RemediationConfig::builder()
///     .strategy(Strategy::RegressionImputation)
///     .columns(["Ozone"])
///     .predictor_columns(["Temp", "Wind"])
///     .build()?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemediationConfig {
    /// Strategy to apply.
    /// Default: MeanSubstitution
    pub strategy: Strategy,

    /// Columns the strategy operates on. Empty means every applicable column.
    pub columns: Vec<String>,

    /// Predictor columns for regression. Empty means every other numeric column.
    pub predictor_columns: Vec<String>,

    /// Convergence tolerance for iterative estimators.
    /// Default: 1e-6
    pub tolerance: f64,

    /// Iteration budget for iterative estimators.
    /// Default: 200
    pub max_iterations: usize,

    /// Number of completed datasets produced by multiple imputation.
    /// Default: 5
    pub ensemble_size: usize,

    /// Seed for every random draw.
    /// Default: 42
    pub random_seed: u64,

    /// Relative spread above which strategy choice is flagged as material.
    /// Default: 0.05
    pub sensitivity_threshold: f64,

    /// Statistic compared by the sensitivity analyzer.
    /// Default: Mean
    pub sensitivity_statistic: SummaryStatistic,

    /// Strategies compared by the sensitivity analyzer.
    pub sensitivity_strategies: Vec<Strategy>,

    /// Fail instead of returning a partial result when cells stay unresolved.
    /// Default: false
    pub strict_unresolved: bool,

    /// Fail instead of returning a best-effort estimate on non-convergence.
    /// Default: false
    pub strict_convergence: bool,

    /// Distribution family for maximum likelihood.
    /// Default: Normal
    pub distribution: DistributionFamily,

    /// Missingness mechanism assumed by likelihood-based strategies.
    /// Default: Mar
    pub mechanism: MissingnessMechanism,

    /// Predictive model used by multiple imputation.
    /// Default: Regression
    pub imputation_model: ImputationModel,
}

/// Strategies compared by default: one of each deterministic family plus
/// multiple imputation.
fn default_sensitivity_strategies() -> Vec<Strategy> {
    vec![
        Strategy::ListwiseDeletion,
        Strategy::MeanSubstitution,
        Strategy::MedianSubstitution,
        Strategy::RegressionImputation,
        Strategy::ExpectationMaximization,
        Strategy::MultipleImputation,
    ]
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            columns: Vec::new(),
            predictor_columns: Vec::new(),
            tolerance: 1e-6,
            max_iterations: 200,
            ensemble_size: 5,
            random_seed: 42,
            sensitivity_threshold: 0.05,
            sensitivity_statistic: SummaryStatistic::default(),
            sensitivity_strategies: default_sensitivity_strategies(),
            strict_unresolved: false,
            strict_convergence: false,
            distribution: DistributionFamily::default(),
            mechanism: MissingnessMechanism::default(),
            imputation_model: ImputationModel::default(),
        }
    }
}

impl RemediationConfig {
    /// Create a new configuration builder.
    pub fn builder() -> RemediationConfigBuilder {
        RemediationConfigBuilder::default()
    }

    /// Copy of this configuration with a different strategy.
    pub fn with_strategy(&self, strategy: Strategy) -> Self {
        Self {
            strategy,
            ..self.clone()
        }
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(ConfigValidationError::InvalidTolerance(self.tolerance));
        }

        if self.max_iterations == 0 {
            return Err(ConfigValidationError::InvalidMaxIterations(
                self.max_iterations,
            ));
        }

        if !(1..=1000).contains(&self.ensemble_size) {
            return Err(ConfigValidationError::InvalidEnsembleSize(
                self.ensemble_size,
            ));
        }

        if !(self.sensitivity_threshold.is_finite() && self.sensitivity_threshold >= 0.0) {
            return Err(ConfigValidationError::InvalidThreshold {
                field: "sensitivity_threshold".to_string(),
                value: self.sensitivity_threshold,
            });
        }

        if self.sensitivity_strategies.is_empty() {
            return Err(ConfigValidationError::EmptySensitivitySet);
        }

        Ok(())
    }
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid tolerance: {0} (must be a positive finite number)")]
    InvalidTolerance(f64),

    #[error("Invalid max iterations: {0} (must be at least 1)")]
    InvalidMaxIterations(usize),

    #[error("Invalid ensemble size: {0} (must be between 1 and 1000)")]
    InvalidEnsembleSize(usize),

    #[error("Invalid threshold for '{field}': {value} (must be a non-negative finite number)")]
    InvalidThreshold { field: String, value: f64 },

    #[error("Sensitivity analysis needs at least one strategy")]
    EmptySensitivitySet,
}

impl From<ConfigValidationError> for RemediationError {
    fn from(err: ConfigValidationError) -> Self {
        RemediationError::InvalidConfig(err.to_string())
    }
}

/// Builder for [`RemediationConfig`] with fluent API.
#[derive(Debug, Default)]
pub struct RemediationConfigBuilder {
    strategy: Option<Strategy>,
    columns: Vec<String>,
    predictor_columns: Vec<String>,
    tolerance: Option<f64>,
    max_iterations: Option<usize>,
    ensemble_size: Option<usize>,
    random_seed: Option<u64>,
    sensitivity_threshold: Option<f64>,
    sensitivity_statistic: Option<SummaryStatistic>,
    sensitivity_strategies: Option<Vec<Strategy>>,
    strict_unresolved: Option<bool>,
    strict_convergence: Option<bool>,
    distribution: Option<DistributionFamily>,
    mechanism: Option<MissingnessMechanism>,
    imputation_model: Option<ImputationModel>,
}

impl RemediationConfigBuilder {
    /// Set the strategy to apply.
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Restrict the strategy to these columns.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Set the regression predictor columns.
    pub fn predictor_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.predictor_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Set the convergence tolerance for EM and iterative ML.
    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    /// Set the iteration budget for EM and iterative ML.
    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    /// Set the number of completed datasets for multiple imputation.
    pub fn ensemble_size(mut self, size: usize) -> Self {
        self.ensemble_size = Some(size);
        self
    }

    /// Set the random seed.
    pub fn random_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    /// Set the relative-spread threshold for sensitivity flags.
    pub fn sensitivity_threshold(mut self, threshold: f64) -> Self {
        self.sensitivity_threshold = Some(threshold);
        self
    }

    /// Set the statistic compared across strategies.
    pub fn sensitivity_statistic(mut self, statistic: SummaryStatistic) -> Self {
        self.sensitivity_statistic = Some(statistic);
        self
    }

    /// Set the strategies compared by the sensitivity analyzer.
    pub fn sensitivity_strategies(mut self, strategies: impl Into<Vec<Strategy>>) -> Self {
        self.sensitivity_strategies = Some(strategies.into());
        self
    }

    /// Escalate unresolved cells to an error.
    pub fn strict_unresolved(mut self, strict: bool) -> Self {
        self.strict_unresolved = Some(strict);
        self
    }

    /// Escalate non-convergence to an error.
    pub fn strict_convergence(mut self, strict: bool) -> Self {
        self.strict_convergence = Some(strict);
        self
    }

    /// Set the distribution family for maximum likelihood.
    pub fn distribution(mut self, family: DistributionFamily) -> Self {
        self.distribution = Some(family);
        self
    }

    /// Set the assumed missingness mechanism.
    pub fn mechanism(mut self, mechanism: MissingnessMechanism) -> Self {
        self.mechanism = Some(mechanism);
        self
    }

    /// Set the predictive model for multiple imputation.
    pub fn imputation_model(mut self, model: ImputationModel) -> Self {
        self.imputation_model = Some(model);
        self
    }

    /// Build the configuration.
    ///
    /// Returns a validated `RemediationConfig` or an error if validation fails.
    pub fn build(self) -> Result<RemediationConfig, ConfigValidationError> {
        let defaults = RemediationConfig::default();
        let config = RemediationConfig {
            strategy: self.strategy.unwrap_or_default(),
            columns: self.columns,
            predictor_columns: self.predictor_columns,
            tolerance: self.tolerance.unwrap_or(defaults.tolerance),
            max_iterations: self.max_iterations.unwrap_or(defaults.max_iterations),
            ensemble_size: self.ensemble_size.unwrap_or(defaults.ensemble_size),
            random_seed: self.random_seed.unwrap_or(defaults.random_seed),
            sensitivity_threshold: self
                .sensitivity_threshold
                .unwrap_or(defaults.sensitivity_threshold),
            sensitivity_statistic: self.sensitivity_statistic.unwrap_or_default(),
            sensitivity_strategies: self
                .sensitivity_strategies
                .unwrap_or(defaults.sensitivity_strategies),
            strict_unresolved: self.strict_unresolved.unwrap_or(false),
            strict_convergence: self.strict_convergence.unwrap_or(false),
            distribution: self.distribution.unwrap_or_default(),
            mechanism: self.mechanism.unwrap_or_default(),
            imputation_model: self.imputation_model.unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }
}
