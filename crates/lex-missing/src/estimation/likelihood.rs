//! Maximum-likelihood estimation from observed data.
//!
//! Univariate families maximize the likelihood of a column's observed cells.
//! The multivariate normal family maximizes the observed-data likelihood of
//! several columns jointly, which is what makes it valid under MAR: a row
//! with some cells missing still informs the parameters through the cells
//! it does have.

use super::families::{UnivariateFit, fit_exponential, fit_gamma, fit_normal, fit_poisson};
use crate::config::{DistributionFamily, MissingnessMechanism, RemediationConfig, Strategy};
use crate::dataset::Dataset;
use crate::error::{RemediationError, Result};
use crate::imputers::{EmEstimator, EmFit, MultivariateData};
use crate::profiler::MissingnessMask;
use crate::strategy::{Remediator, require_kind, resolve_columns};
use crate::types::{ColumnRemediation, Provenance, Remediation, RemediationResult};
use crate::utils::{ColumnKind, fill_numeric_nulls, float_series, observed};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Parameters and fit quality of one likelihood maximization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LikelihoodEstimate {
    pub family: DistributionFamily,
    pub mechanism: MissingnessMechanism,
    /// One column for univariate families, all modeled columns otherwise.
    pub columns: Vec<String>,
    /// Named parameters, e.g. `mean`, `variance`, `rate`, `shape`. The joint
    /// family uses `mean.<col>` and `cov.<col>.<col>`.
    pub parameters: BTreeMap<String, f64>,
    pub log_likelihood: f64,
    /// Observed values (univariate) or rows (joint) the fit used.
    pub observations: usize,
    pub iterations: usize,
    pub converged: bool,
    /// Expected value per column under the fitted distribution.
    pub expected: BTreeMap<String, f64>,
}

/// Fits a [`DistributionFamily`] by maximum likelihood over observed cells.
#[derive(Debug, Clone, Copy)]
pub struct MaximumLikelihoodEstimator {
    pub family: DistributionFamily,
    pub mechanism: MissingnessMechanism,
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Fail with `NonConvergence` instead of returning an unconverged fit.
    pub strict: bool,
}

impl MaximumLikelihoodEstimator {
    pub fn new(family: DistributionFamily, mechanism: MissingnessMechanism) -> Self {
        Self {
            family,
            mechanism,
            tolerance: 1e-6,
            max_iterations: 200,
            strict: false,
        }
    }

    pub fn from_config(config: &RemediationConfig) -> Self {
        Self {
            family: config.distribution,
            mechanism: config.mechanism,
            tolerance: config.tolerance,
            max_iterations: config.max_iterations,
            strict: config.strict_convergence,
        }
    }

    /// Estimate parameters for `columns`: one estimate per column for a
    /// univariate family, a single joint estimate otherwise.
    pub fn estimate(&self, dataset: &Dataset, columns: &[String]) -> Result<Vec<LikelihoodEstimate>> {
        if self.family.is_joint() {
            let (estimate, _) = self.estimate_joint(dataset, columns)?;
            return Ok(vec![estimate]);
        }

        columns
            .par_iter()
            .map(|column| self.estimate_column(dataset, column))
            .collect()
    }

    /// Univariate fit of a single column.
    pub fn estimate_column(&self, dataset: &Dataset, column: &str) -> Result<LikelihoodEstimate> {
        if self.mechanism == MissingnessMechanism::Mar {
            warn!(
                "'{}': a {:?} fit has no covariates to condition on, so it is only unbiased under MCAR",
                column, self.family
            );
        }

        require_kind(
            dataset,
            column,
            &[ColumnKind::Numeric],
            Strategy::MaximumLikelihood,
        )?;
        let x = observed(&dataset.finite_numeric_values(column)?);
        if x.is_empty() {
            return Err(RemediationError::AllValuesMissing(column.to_string()));
        }

        let fit = match self.family {
            DistributionFamily::Normal => fit_normal(column, &x)?,
            DistributionFamily::Exponential => fit_exponential(column, &x)?,
            DistributionFamily::Poisson => fit_poisson(column, &x)?,
            DistributionFamily::Gamma => {
                fit_gamma(column, &x, self.tolerance, self.max_iterations)?
            }
            DistributionFamily::MultivariateNormal => {
                return Err(RemediationError::InvalidConfig(
                    "the multivariate normal family is joint; use estimate_joint".into(),
                ));
            }
        };
        self.check_convergence(fit.converged, fit.iterations, fit.last_change)?;

        debug!(
            "{:?} fit for '{}': log-likelihood {:.6}",
            self.family, column, fit.log_likelihood
        );
        Ok(self.univariate_estimate(column, x.len(), fit))
    }

    /// Joint multivariate normal fit, returning the EM state for imputation.
    pub fn estimate_joint(
        &self,
        dataset: &Dataset,
        columns: &[String],
    ) -> Result<(LikelihoodEstimate, EmFit)> {
        let data = MultivariateData::from_dataset(dataset, columns, Strategy::MaximumLikelihood)?;
        let fit = EmEstimator::new(self.tolerance, self.max_iterations).fit(&data)?;
        self.check_convergence(fit.converged, fit.iterations, fit.last_change)?;

        let mut parameters = BTreeMap::new();
        let mut expected = BTreeMap::new();
        for (i, a) in fit.columns.iter().enumerate() {
            parameters.insert(format!("mean.{}", a), fit.mean[i]);
            expected.insert(a.clone(), fit.mean[i]);
            for (j, b) in fit.columns.iter().enumerate() {
                parameters.insert(format!("cov.{}.{}", a, b), fit.covariance[(i, j)]);
            }
        }

        let estimate = LikelihoodEstimate {
            family: DistributionFamily::MultivariateNormal,
            mechanism: self.mechanism,
            columns: fit.columns.clone(),
            parameters,
            log_likelihood: fit.log_likelihood(),
            observations: data.len(),
            iterations: fit.iterations,
            converged: fit.converged,
            expected,
        };
        Ok((estimate, fit))
    }

    fn univariate_estimate(
        &self,
        column: &str,
        observations: usize,
        fit: UnivariateFit,
    ) -> LikelihoodEstimate {
        LikelihoodEstimate {
            family: self.family,
            mechanism: self.mechanism,
            columns: vec![column.to_string()],
            parameters: fit
                .parameters
                .iter()
                .map(|(name, value)| (name.to_string(), *value))
                .collect(),
            log_likelihood: fit.log_likelihood,
            observations,
            iterations: fit.iterations,
            converged: fit.converged,
            expected: BTreeMap::from([(column.to_string(), fit.expected_value)]),
        }
    }

    fn check_convergence(&self, converged: bool, iterations: usize, last_change: f64) -> Result<()> {
        if !converged {
            warn!(
                "{:?} likelihood did not converge within {} iteration(s)",
                self.family, iterations
            );
            if self.strict {
                return Err(RemediationError::NonConvergence {
                    iterations,
                    last_change,
                });
            }
        }
        Ok(())
    }
}

/// Fills missing numeric cells with the expected value of the fitted
/// distribution (the conditional expectation for the joint family).
pub struct LikelihoodImputer {
    estimator: MaximumLikelihoodEstimator,
    columns: Vec<String>,
}

impl LikelihoodImputer {
    pub fn new(estimator: MaximumLikelihoodEstimator, columns: Vec<String>) -> Self {
        Self { estimator, columns }
    }

    pub fn from_config(config: &RemediationConfig) -> Self {
        Self::new(
            MaximumLikelihoodEstimator::from_config(config),
            config.columns.clone(),
        )
    }

    fn remediate_joint(
        &self,
        dataset: &Dataset,
        columns: &[String],
        provenance: &mut Provenance,
    ) -> Result<(Dataset, bool)> {
        let (estimate, fit) = self.estimator.estimate_joint(dataset, columns)?;
        let data = MultivariateData::from_dataset(dataset, columns, Strategy::MaximumLikelihood)?;
        let completed = fit.expected_rows(&data)?;

        let mut replacements = Vec::new();
        for (j, name) in columns.iter().enumerate() {
            let replaced = data.column(j).iter().filter(|c| c.is_none()).count();
            if replaced == 0 {
                continue;
            }
            replacements.push(float_series(
                name,
                completed.iter().map(|row| Some(row[j])).collect(),
            ));
            provenance.column(ColumnRemediation {
                column: name.clone(),
                substituted_value: None,
                cells_replaced: replaced,
            });
        }

        let converged = estimate.converged;
        provenance.parameter("estimate", &estimate);
        Ok((dataset.with_replaced(replacements)?, converged))
    }

    fn remediate_univariate(
        &self,
        dataset: &Dataset,
        mask: &MissingnessMask,
        columns: &[String],
        provenance: &mut Provenance,
    ) -> Result<(Dataset, bool)> {
        let targets: Vec<&String> = columns
            .iter()
            .filter(|name| {
                mask.column(name)
                    .map(|flags| flags.iter().any(|&m| m))
                    .unwrap_or(false)
            })
            .collect();

        let fitted = targets
            .par_iter()
            .map(|name| {
                let estimate = self.estimator.estimate_column(dataset, name)?;
                let fill = estimate.expected.get(name.as_str()).copied().ok_or_else(|| {
                    RemediationError::Internal(format!("no expected value for '{}'", name))
                })?;
                let series = fill_numeric_nulls(dataset.require_column(name)?, fill)?;
                Ok((estimate, fill, series))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut converged = true;
        let mut replacements = Vec::new();
        for ((estimate, fill, series), name) in fitted.into_iter().zip(targets) {
            converged &= estimate.converged;
            provenance.column(ColumnRemediation {
                column: name.clone(),
                substituted_value: Some(fill),
                cells_replaced: mask.column(name)?.iter().filter(|&&m| m).count(),
            });
            provenance.parameter(format!("{}.estimate", name), &estimate);
            replacements.push(series);
        }
        Ok((dataset.with_replaced(replacements)?, converged))
    }
}

impl Remediator for LikelihoodImputer {
    fn strategy(&self) -> Strategy {
        Strategy::MaximumLikelihood
    }

    fn remediate(&self, dataset: &Dataset, mask: &MissingnessMask) -> Result<Remediation> {
        mask.ensure_matches(dataset)?;
        let columns = resolve_columns(dataset, &self.columns, &[ColumnKind::Numeric])?;

        let mut provenance = Provenance::new(Strategy::MaximumLikelihood);
        provenance.parameter("family", self.estimator.family);
        provenance.parameter("mechanism", self.estimator.mechanism);

        let (completed, converged) = if self.estimator.family.is_joint() {
            self.remediate_joint(dataset, &columns, &mut provenance)?
        } else {
            self.remediate_univariate(dataset, mask, &columns, &mut provenance)?
        };

        provenance.steps.push(format!(
            "Filled {} cell(s) with {:?} expected values",
            provenance.cells_imputed, self.estimator.family
        ));
        info!(
            "Maximum likelihood ({:?}) imputed {} cell(s)",
            self.estimator.family, provenance.cells_imputed
        );

        let mut result = RemediationResult::new(completed, provenance);
        result.converged = Some(converged);
        Ok(Remediation::Single(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiler::MissingnessAnalyzer;
    use polars::prelude::*;
    use pretty_assertions::assert_eq;

    fn estimator(family: DistributionFamily) -> MaximumLikelihoodEstimator {
        MaximumLikelihoodEstimator::new(family, MissingnessMechanism::Mcar)
    }

    // ========================================================================
    // Estimator
    // ========================================================================

    #[test]
    fn test_normal_estimate_uses_observed_cells_only() {
        let ds = Dataset::new(df!["x" => [Some(1.0), None, Some(3.0), Some(2.0)]].unwrap());
        let estimate = estimator(DistributionFamily::Normal)
            .estimate_column(&ds, "x")
            .unwrap();

        assert_eq!(estimate.observations, 3);
        assert_eq!(estimate.parameters["mean"], 2.0);
        assert!((estimate.parameters["variance"] - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(estimate.mechanism, MissingnessMechanism::Mcar);
    }

    #[test]
    fn test_estimate_one_per_column_for_univariate_family() {
        let ds = Dataset::new(
            df![
                "a" => [Some(1.0), Some(2.0), None],
                "b" => [Some(3.0), Some(5.0), Some(4.0)],
            ]
            .unwrap(),
        );
        let columns = ds.numeric_column_names();
        let estimates = estimator(DistributionFamily::Exponential)
            .estimate(&ds, &columns)
            .unwrap();

        assert_eq!(estimates.len(), 2);
        assert_eq!(estimates[1].columns, vec!["b".to_string()]);
        assert_eq!(estimates[1].parameters["rate"], 0.25);
    }

    #[test]
    fn test_joint_estimate() {
        let ds = Dataset::new(
            df![
                "a" => [Some(1.0), Some(2.0), Some(3.0), None, Some(5.0)],
                "b" => [Some(2.0), None, Some(6.1), Some(8.0), Some(9.9)],
            ]
            .unwrap(),
        );
        let columns = ds.numeric_column_names();
        let estimates = estimator(DistributionFamily::MultivariateNormal)
            .estimate(&ds, &columns)
            .unwrap();

        assert_eq!(estimates.len(), 1);
        let joint = &estimates[0];
        assert!(joint.converged);
        assert!(joint.parameters.contains_key("cov.a.b"));
        assert!(joint.parameters["cov.a.b"] > 0.0);
        assert_eq!(joint.observations, 5);
    }

    #[test]
    fn test_gamma_strict_non_convergence() {
        let ds = Dataset::new(df!["g" => [0.5, 1.0, 4.0, 9.0]].unwrap());
        let mut strict = estimator(DistributionFamily::Gamma);
        strict.tolerance = 1e-300;
        strict.max_iterations = 1;
        strict.strict = true;

        let err = strict.estimate_column(&ds, "g").unwrap_err();
        assert!(matches!(err, RemediationError::NonConvergence { iterations: 1, .. }));

        strict.strict = false;
        let estimate = strict.estimate_column(&ds, "g").unwrap();
        assert!(!estimate.converged);
    }

    #[test]
    fn test_rejects_categorical_column() {
        let ds = Dataset::new(df!["c" => ["a", "b"]].unwrap());
        let err = estimator(DistributionFamily::Normal)
            .estimate_column(&ds, "c")
            .unwrap_err();
        assert!(matches!(err, RemediationError::UnsupportedColumnType { .. }));
    }

    // ========================================================================
    // Imputer
    // ========================================================================

    #[test]
    fn test_imputer_fills_expected_value() {
        let ds = Dataset::new(df!["k" => [Some(1i64), None, Some(3), Some(2)]].unwrap());
        let mask = MissingnessAnalyzer::compute_mask(&ds);
        let imputer = LikelihoodImputer::new(estimator(DistributionFamily::Poisson), Vec::new());
        let result = imputer
            .remediate(&ds, &mask)
            .unwrap()
            .into_single()
            .unwrap();

        let k = result.dataset.numeric_values("k").unwrap();
        assert_eq!(k[1], Some(2.0));
        assert_eq!(result.converged, Some(true));
        assert_eq!(
            result.provenance.column_report("k").unwrap().substituted_value,
            Some(2.0)
        );
    }

    #[test]
    fn test_joint_imputer_completes_dataset() {
        let ds = Dataset::new(
            df![
                "a" => [Some(1.0), Some(2.0), Some(3.0), None, Some(5.0), Some(6.0)],
                "b" => [Some(2.0), None, Some(6.1), Some(8.0), Some(9.9), Some(12.2)],
            ]
            .unwrap(),
        );
        let mask = MissingnessAnalyzer::compute_mask(&ds);
        let imputer = LikelihoodImputer::new(
            estimator(DistributionFamily::MultivariateNormal),
            Vec::new(),
        );
        let result = imputer
            .remediate(&ds, &mask)
            .unwrap()
            .into_single()
            .unwrap();

        let after = MissingnessAnalyzer::compute_mask(&result.dataset);
        assert_eq!(MissingnessAnalyzer::count_total(&after), 0);
        assert_eq!(result.provenance.cells_imputed, 2);
        // b ≈ 2a, so the conditional fill for a = 2 is near 4
        let b = result.dataset.numeric_values("b").unwrap();
        assert!((b[1].unwrap() - 4.0).abs() < 1.0);
    }
}
