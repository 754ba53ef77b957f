//! Multiple imputation and Rubin's-rules pooling.
//!
//! Each of the M draws gets its own generator seeded with `seed + draw`, so
//! draws are independent, run in parallel, and the whole ensemble is
//! reproducible from the configured seed.

use crate::config::{ImputationModel, RemediationConfig, Strategy};
use crate::dataset::Dataset;
use crate::error::{RemediationError, Result};
use crate::imputers::em::{Conditional, EmEstimator, MultivariateData, Pattern};
use crate::imputers::regression::{TargetModel, plan_targets};
use crate::math::{cholesky_lower, predict_with};
use crate::profiler::MissingnessMask;
use crate::strategy::{Remediator, resolve_columns};
use crate::types::{
    CellIssue, ColumnRemediation, ImputationEnsemble, PooledEstimate, Provenance, Remediation,
    UnresolvedKind,
};
use crate::utils::{ColumnKind, float_series, mean, observed, sample_variance};
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{ChiSquared, Distribution, StandardNormal};
use rayon::prelude::*;
use serde_json::json;
use tracing::{debug, info, warn};

/// Produces M completed datasets by sampling from a fitted predictive
/// distribution instead of writing a single best guess.
pub struct MultipleImputer {
    columns: Vec<String>,
    predictors: Vec<String>,
    model: ImputationModel,
    ensemble_size: usize,
    seed: u64,
    estimator: EmEstimator,
    strict_unresolved: bool,
    strict_convergence: bool,
}

impl MultipleImputer {
    pub fn new(model: ImputationModel, ensemble_size: usize, seed: u64) -> Self {
        Self {
            columns: Vec::new(),
            predictors: Vec::new(),
            model,
            ensemble_size,
            seed,
            estimator: EmEstimator::new(1e-6, 200),
            strict_unresolved: false,
            strict_convergence: false,
        }
    }

    pub fn from_config(config: &RemediationConfig) -> Self {
        Self {
            columns: config.columns.clone(),
            predictors: config.predictor_columns.clone(),
            model: config.imputation_model,
            ensemble_size: config.ensemble_size,
            seed: config.random_seed,
            estimator: EmEstimator::from_config(config),
            strict_unresolved: config.strict_unresolved,
            strict_convergence: config.strict_convergence,
        }
    }

    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_predictors(mut self, predictors: Vec<String>) -> Self {
        self.predictors = predictors;
        self
    }

    fn rng(&self, draw: usize) -> StdRng {
        StdRng::seed_from_u64(self.seed.wrapping_add(draw as u64))
    }

    fn validate(&self) -> Result<()> {
        if self.ensemble_size == 0 {
            return Err(RemediationError::InvalidConfig(
                "ensemble size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    // ========================================================================
    // Regression draws
    // ========================================================================

    fn regression_ensemble(
        &self,
        dataset: &Dataset,
        mask: &MissingnessMask,
    ) -> Result<ImputationEnsemble> {
        let plan = plan_targets(dataset, mask, &self.columns, &self.predictors)?;
        let models = plan
            .par_iter()
            .map(|(target, predictors)| TargetModel::fit(dataset, target, predictors))
            .collect::<Result<Vec<_>>>()?;

        // Rows that cannot be predicted are the same in every draw
        let mut unresolved = Vec::new();
        for model in &models {
            for (row, cell) in model.target_values.iter().enumerate() {
                if cell.is_none() && model.predictors_at(row).is_none() {
                    unresolved.push(CellIssue {
                        row,
                        column: model.target.clone(),
                        kind: UnresolvedKind::UnresolvedRow,
                    });
                }
            }
        }
        self.check_unresolved(&unresolved)?;

        let datasets = (0..self.ensemble_size)
            .into_par_iter()
            .map(|draw| {
                let mut rng = self.rng(draw);
                let mut replacements = Vec::with_capacity(models.len());
                for model in &models {
                    let values = draw_regression(model, &mut rng)?;
                    replacements.push(float_series(&model.target, values));
                }
                dataset.with_replaced(replacements)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut provenance = self.provenance();
        for model in &models {
            let replaced = model
                .target_values
                .iter()
                .enumerate()
                .filter(|(row, cell)| cell.is_none() && model.predictors_at(*row).is_some())
                .count();
            provenance.parameter(
                format!("{}.model", model.target),
                json!({
                    "predictors": model.predictors,
                    "coefficients": model.coefficients_json(),
                    "residual_variance": model.fit.residual_variance,
                    "residual_df": model.fit.residual_df(),
                }),
            );
            provenance.column(ColumnRemediation {
                column: model.target.clone(),
                substituted_value: None,
                cells_replaced: replaced,
            });
        }

        Ok(ImputationEnsemble {
            datasets,
            provenance,
            columns: models.iter().map(|m| m.target.clone()).collect(),
            unresolved,
        })
    }

    // ========================================================================
    // EM draws
    // ========================================================================

    fn em_ensemble(&self, dataset: &Dataset) -> Result<ImputationEnsemble> {
        let columns = resolve_columns(dataset, &self.columns, &[ColumnKind::Numeric])?;
        let data = MultivariateData::from_dataset(dataset, &columns, Strategy::MultipleImputation)?;
        let fit = self.estimator.fit(&data)?;
        if !fit.converged && self.strict_convergence {
            return Err(RemediationError::NonConvergence {
                iterations: fit.iterations,
                last_change: fit.last_change,
            });
        }

        let mut prepared = Vec::new();
        for pattern in data.patterns() {
            if pattern.missing.is_empty() {
                continue;
            }
            let conditional = Conditional::new(
                &fit.mean,
                &fit.covariance,
                pattern.observed.clone(),
                pattern.missing.clone(),
            )?;
            let factor = cholesky_lower(&conditional.covariance).ok_or_else(|| {
                RemediationError::Internal("conditional covariance is not factorizable".into())
            })?;
            prepared.push((pattern, conditional, factor));
        }

        let imputed: Vec<usize> = (0..data.dims())
            .filter(|&j| data.missing_count(j) > 0)
            .collect();

        let datasets = (0..self.ensemble_size)
            .into_par_iter()
            .map(|draw| {
                let mut rng = self.rng(draw);
                let completed = draw_conditional(&data, &prepared, &mut rng);
                let replacements = imputed
                    .iter()
                    .map(|&j| float_series(&columns[j], completed[j].clone()))
                    .collect();
                dataset.with_replaced(replacements)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut provenance = self.provenance();
        provenance.parameter("em_iterations", fit.iterations);
        provenance.parameter("em_converged", fit.converged);
        provenance.parameter("mean", fit.mean_json());
        provenance.parameter("covariance", fit.covariance_rows());
        for &j in &imputed {
            provenance.column(ColumnRemediation {
                column: columns[j].clone(),
                substituted_value: None,
                cells_replaced: data.missing_count(j),
            });
        }

        Ok(ImputationEnsemble {
            datasets,
            provenance,
            columns: imputed.iter().map(|&j| columns[j].clone()).collect(),
            unresolved: Vec::new(),
        })
    }

    fn provenance(&self) -> Provenance {
        let mut provenance = Provenance::new(Strategy::MultipleImputation);
        provenance.parameter("model", self.model);
        provenance.parameter("ensemble_size", self.ensemble_size);
        provenance.parameter("random_seed", self.seed);
        provenance
    }

    fn check_unresolved(&self, unresolved: &[CellIssue]) -> Result<()> {
        if unresolved.is_empty() {
            return Ok(());
        }
        warn!(
            "{} cell(s) cannot be drawn: a predictor is missing in the same row",
            unresolved.len()
        );
        if self.strict_unresolved {
            return Err(RemediationError::UnresolvedCells {
                strategy: Strategy::MultipleImputation.to_string(),
                count: unresolved.len(),
            });
        }
        Ok(())
    }
}

impl Remediator for MultipleImputer {
    fn strategy(&self) -> Strategy {
        Strategy::MultipleImputation
    }

    fn remediate(&self, dataset: &Dataset, mask: &MissingnessMask) -> Result<Remediation> {
        mask.ensure_matches(dataset)?;
        self.validate()?;

        let mut ensemble = match self.model {
            ImputationModel::Regression => self.regression_ensemble(dataset, mask)?,
            ImputationModel::Em => self.em_ensemble(dataset)?,
        };
        ensemble.provenance.steps.push(format!(
            "Drew {} completed dataset(s) for {:?}",
            ensemble.len(),
            ensemble.columns
        ));

        info!(
            "Multiple imputation produced {} dataset(s) with the {:?} model",
            ensemble.len(),
            self.model
        );
        Ok(Remediation::Ensemble(ensemble))
    }
}

/// One proper draw for a regression target: σ² from its scaled inverse
/// chi-square posterior, β from N(β̂, σ²(X'X)⁻¹), then a noisy prediction.
fn draw_regression(model: &TargetModel, rng: &mut StdRng) -> Result<Vec<Option<f64>>> {
    let fit = &model.fit;
    let df = fit.residual_df();

    let sigma2 = if df > 0 && fit.residual_sum_of_squares > 0.0 {
        let chi = ChiSquared::new(df as f64)
            .map_err(|e| RemediationError::Internal(format!("chi-square({}): {}", df, e)))?;
        fit.residual_sum_of_squares / chi.sample(rng)
    } else {
        0.0
    };

    let beta = perturb(&fit.coefficients, &fit.xtx_inverse, sigma2, rng);
    let sd = sigma2.sqrt();

    let mut values = model.target_values.clone();
    for (row, cell) in values.iter_mut().enumerate() {
        if cell.is_some() {
            continue;
        }
        if let Some(x) = model.predictors_at(row) {
            let z: f64 = rng.sample(StandardNormal);
            *cell = Some(predict_with(&beta, &x) + sd * z);
        }
    }
    Ok(values)
}

/// center + √scale · L z, with L the Cholesky factor of `covariance`.
fn perturb(center: &[f64], covariance: &DMatrix<f64>, scale: f64, rng: &mut StdRng) -> Vec<f64> {
    if scale <= 0.0 {
        return center.to_vec();
    }
    let Some(factor) = cholesky_lower(covariance) else {
        debug!("Coefficient covariance is not factorizable, drawing residual noise only");
        return center.to_vec();
    };

    let z = DVector::from_fn(center.len(), |_, _| rng.sample::<f64, _>(StandardNormal));
    let shift = factor * z * scale.sqrt();
    center.iter().zip(shift.iter()).map(|(c, s)| c + s).collect()
}

/// Column-major draw of every missing cell from its conditional normal.
fn draw_conditional(
    data: &MultivariateData,
    prepared: &[(Pattern, Conditional, DMatrix<f64>)],
    rng: &mut StdRng,
) -> Vec<Vec<Option<f64>>> {
    let mut columns: Vec<Vec<Option<f64>>> = (0..data.dims()).map(|j| data.column(j)).collect();

    for (pattern, conditional, factor) in prepared {
        for &row in &pattern.rows {
            let expected = conditional.expected(data.row(row));
            let z = DVector::from_fn(pattern.missing.len(), |_, _| {
                rng.sample::<f64, _>(StandardNormal)
            });
            let draw = expected + factor * z;
            for (k, &j) in pattern.missing.iter().enumerate() {
                columns[j][row] = Some(draw[k]);
            }
        }
    }
    columns
}

// ============================================================================
// Pooling
// ============================================================================

/// Combine per-dataset (estimate, within-variance) pairs by Rubin's rules.
pub fn pool_estimates(column: &str, estimates: &[(f64, f64)]) -> PooledEstimate {
    let m = estimates.len() as f64;
    let q_bar = estimates.iter().map(|(q, _)| q).sum::<f64>() / m;
    let u_bar = estimates.iter().map(|(_, u)| u).sum::<f64>() / m;
    let between = if estimates.len() > 1 {
        estimates.iter().map(|(q, _)| (q - q_bar).powi(2)).sum::<f64>() / (m - 1.0)
    } else {
        0.0
    };

    let inflated = (1.0 + 1.0 / m) * between;
    let total = u_bar + inflated;

    let degrees_of_freedom = if between > 0.0 {
        if u_bar > 0.0 {
            let r = inflated / u_bar;
            Some((m - 1.0) * (1.0 + 1.0 / r).powi(2))
        } else {
            Some(m - 1.0)
        }
    } else {
        None
    };

    PooledEstimate {
        column: column.to_string(),
        estimate: q_bar,
        within_variance: u_bar,
        between_variance: between,
        total_variance: total,
        standard_error: total.sqrt(),
        degrees_of_freedom,
        fraction_missing_information: if total > 0.0 { inflated / total } else { 0.0 },
    }
}

impl ImputationEnsemble {
    /// Pool the mean of every imputed column across the ensemble.
    ///
    /// Within-imputation variance is the squared standard error of the mean,
    /// s²/n, over the observed cells of each completed dataset.
    pub fn pool(&self) -> Result<Vec<PooledEstimate>> {
        if self.datasets.is_empty() {
            return Err(RemediationError::InvalidConfig(
                "cannot pool an empty ensemble".into(),
            ));
        }

        self.columns
            .iter()
            .map(|column| {
                let estimates = self
                    .datasets
                    .iter()
                    .map(|dataset| {
                        let values = observed(&dataset.numeric_values(column)?);
                        let q = mean(&values)
                            .ok_or_else(|| RemediationError::AllValuesMissing(column.clone()))?;
                        let u = sample_variance(&values).unwrap_or(0.0) / values.len() as f64;
                        Ok((q, u))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(pool_estimates(column, &estimates))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiler::MissingnessAnalyzer;
    use polars::prelude::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Dataset {
        Dataset::new(
            df![
                "x" => [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
                "y" => [Some(2.2), Some(3.9), None, Some(8.1), Some(9.7), None, Some(14.3), Some(15.8)],
            ]
            .unwrap(),
        )
    }

    fn ensemble(ds: &Dataset, imputer: &MultipleImputer) -> ImputationEnsemble {
        let mask = MissingnessAnalyzer::compute_mask(ds);
        imputer
            .remediate(ds, &mask)
            .unwrap()
            .into_ensemble()
            .unwrap()
    }

    fn bits(ds: &Dataset, column: &str) -> Vec<Option<u64>> {
        ds.numeric_values(column)
            .unwrap()
            .into_iter()
            .map(|v| v.map(f64::to_bits))
            .collect()
    }

    // ========================================================================
    // Draws
    // ========================================================================

    #[test]
    fn test_same_seed_same_ensemble() {
        let ds = sample();
        let imputer = MultipleImputer::new(ImputationModel::Regression, 5, 7);
        let first = ensemble(&ds, &imputer);
        let second = ensemble(&ds, &imputer);

        assert_eq!(first.len(), 5);
        for (a, b) in first.datasets.iter().zip(&second.datasets) {
            assert_eq!(bits(a, "y"), bits(b, "y"));
        }
    }

    #[test]
    fn test_draws_differ_and_keep_observed_cells() {
        let ds = sample();
        let result = ensemble(&ds, &MultipleImputer::new(ImputationModel::Regression, 3, 1));

        let y0 = result.datasets[0].numeric_values("y").unwrap();
        let y1 = result.datasets[1].numeric_values("y").unwrap();
        assert_ne!(y0[2], y1[2]);
        for ds in &result.datasets {
            let y = ds.numeric_values("y").unwrap();
            assert_eq!(y[0], Some(2.2));
            assert!(y.iter().all(Option::is_some));
        }
    }

    #[test]
    fn test_single_draw_is_deterministic() {
        let ds = sample();
        let imputer = MultipleImputer::new(ImputationModel::Regression, 1, 99);
        let a = ensemble(&ds, &imputer);
        let b = ensemble(&ds, &imputer);

        assert_eq!(a.len(), 1);
        assert_eq!(bits(&a.datasets[0], "y"), bits(&b.datasets[0], "y"));

        let pooled = a.pool().unwrap();
        assert_eq!(pooled[0].between_variance, 0.0);
        assert_eq!(pooled[0].degrees_of_freedom, None);
    }

    #[test]
    fn test_em_model_fills_every_cell() {
        let ds = Dataset::new(
            df![
                "a" => [Some(1.0), Some(2.0), None, Some(4.0), Some(5.0), Some(6.0)],
                "b" => [Some(1.1), None, Some(2.9), Some(4.2), Some(4.8), Some(6.1)],
            ]
            .unwrap(),
        );
        let result = ensemble(&ds, &MultipleImputer::new(ImputationModel::Em, 4, 3));

        assert_eq!(result.columns, vec!["a".to_string(), "b".to_string()]);
        for completed in &result.datasets {
            let mask = MissingnessAnalyzer::compute_mask(completed);
            assert_eq!(MissingnessAnalyzer::count_total(&mask), 0);
        }
    }

    #[test]
    fn test_unpredictable_rows_stay_missing_in_every_draw() {
        // Row 3 misses both the target and its predictor
        let ds = Dataset::new(
            df![
                "x" => [Some(1.0), Some(2.0), Some(3.0), None, Some(5.0), Some(6.0)],
                "y" => [Some(2.1), None, Some(6.2), None, Some(9.9), Some(12.1)],
            ]
            .unwrap(),
        );
        let imputer = MultipleImputer::new(ImputationModel::Regression, 3, 11)
            .with_columns(vec!["y".into()])
            .with_predictors(vec!["x".into()]);
        let result = ensemble(&ds, &imputer);

        assert_eq!(result.unresolved.len(), 1);
        assert_eq!(result.unresolved[0].row, 3);
        assert_eq!(result.unresolved[0].kind, UnresolvedKind::UnresolvedRow);
        for completed in &result.datasets {
            let y = completed.numeric_values("y").unwrap();
            assert_eq!(y[3], None);
            assert!(y[1].is_some());
        }

        // Pooling runs over the cells each draw actually holds
        let pooled = result.pool().unwrap();
        let first = observed(&result.datasets[0].numeric_values("y").unwrap());
        assert_eq!(first.len(), 5);
        assert!(pooled[0].estimate.is_finite());
        assert!(pooled[0].within_variance > 0.0);
    }

    #[test]
    fn test_strict_unresolved_rejects_unpredictable_rows() {
        let ds = Dataset::new(
            df![
                "x" => [Some(1.0), Some(2.0), Some(3.0), None, Some(5.0)],
                "y" => [Some(2.1), Some(3.8), Some(6.2), None, Some(9.9)],
            ]
            .unwrap(),
        );
        let config = RemediationConfig::builder()
            .strategy(Strategy::MultipleImputation)
            .imputation_model(ImputationModel::Regression)
            .columns(["y"])
            .predictor_columns(["x"])
            .strict_unresolved(true)
            .build()
            .unwrap();
        let mask = MissingnessAnalyzer::compute_mask(&ds);
        let err = MultipleImputer::from_config(&config)
            .remediate(&ds, &mask)
            .unwrap_err();
        assert!(matches!(err, RemediationError::UnresolvedCells { count: 1, .. }));
    }

    #[test]
    fn test_zero_ensemble_size_rejected() {
        let ds = sample();
        let mask = MissingnessAnalyzer::compute_mask(&ds);
        let err = MultipleImputer::new(ImputationModel::Regression, 0, 1)
            .remediate(&ds, &mask)
            .unwrap_err();
        assert!(matches!(err, RemediationError::InvalidConfig(_)));
    }

    // ========================================================================
    // Pooling
    // ========================================================================

    #[test]
    fn test_rubins_rules() {
        let pooled = pool_estimates("y", &[(10.0, 1.0), (12.0, 1.0), (14.0, 1.0)]);

        assert_eq!(pooled.estimate, 12.0);
        assert_eq!(pooled.within_variance, 1.0);
        assert_eq!(pooled.between_variance, 4.0);
        let total: f64 = 1.0 + (4.0 / 3.0) * 4.0;
        assert!((pooled.total_variance - total).abs() < 1e-12);
        assert!((pooled.standard_error - total.sqrt()).abs() < 1e-12);

        let r: f64 = (4.0 / 3.0) * 4.0;
        let df = 2.0 * (1.0 + 1.0 / r).powi(2);
        assert!((pooled.degrees_of_freedom.unwrap() - df).abs() < 1e-12);
        assert!((pooled.fraction_missing_information - r / total).abs() < 1e-12);
    }

    #[test]
    fn test_pool_total_variance_exceeds_within() {
        let ds = sample();
        let result = ensemble(&ds, &MultipleImputer::new(ImputationModel::Regression, 10, 5));
        let pooled = result.pool().unwrap();

        assert_eq!(pooled.len(), 1);
        assert_eq!(pooled[0].column, "y");
        assert!(pooled[0].total_variance >= pooled[0].within_variance);
        assert!(pooled[0].between_variance > 0.0);
    }
}
