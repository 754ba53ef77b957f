//! Expectation-maximization under a multivariate normal model.
//!
//! Rows are grouped by missingness pattern so each conditional block is
//! factored once per iteration. Within an iteration the patterns are
//! processed in parallel and their sufficient statistics summed in pattern
//! order, which keeps every iteration deterministic.
//!
//! The loop has two exits: the observed-data log-likelihood changes by less
//! than the tolerance, or the iteration budget runs out. In the second case
//! the latest parameters are still returned, flagged as not converged.

use crate::config::{RemediationConfig, Strategy};
use crate::dataset::Dataset;
use crate::error::{RemediationError, Result};
use crate::math::{select, spd_inverse_and_log_det};
use crate::profiler::MissingnessMask;
use crate::strategy::{Remediator, require_kind, resolve_columns};
use crate::types::{ColumnRemediation, Provenance, Remediation, RemediationResult};
use crate::utils::{ColumnKind, float_series, mean, observed, sample_variance};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// ln(2π)
const LN_2PI: f64 = 1.837_877_066_409_345_5;

// ============================================================================
// Data
// ============================================================================

/// Numeric columns laid out row by row, `None` for missing cells.
#[derive(Debug, Clone)]
pub struct MultivariateData {
    columns: Vec<String>,
    rows: Vec<Vec<Option<f64>>>,
}

/// Rows sharing the same set of observed columns.
#[derive(Debug, Clone)]
pub(crate) struct Pattern {
    pub observed: Vec<usize>,
    pub missing: Vec<usize>,
    pub rows: Vec<usize>,
}

impl MultivariateData {
    /// Collect `columns` from `dataset`. Every column must be numeric, finite
    /// and have at least one observed value.
    pub fn from_dataset(dataset: &Dataset, columns: &[String], strategy: Strategy) -> Result<Self> {
        if columns.is_empty() {
            return Err(RemediationError::InvalidConfig(format!(
                "{} needs at least one numeric column",
                strategy
            )));
        }

        let mut by_column = Vec::with_capacity(columns.len());
        for name in columns {
            require_kind(dataset, name, &[ColumnKind::Numeric], strategy)?;
            let values = dataset.finite_numeric_values(name)?;
            if values.iter().all(Option::is_none) {
                return Err(RemediationError::AllValuesMissing(name.clone()));
            }
            by_column.push(values);
        }

        let rows = (0..dataset.height())
            .map(|row| by_column.iter().map(|col| col[row]).collect())
            .collect();

        Ok(Self {
            columns: columns.to_vec(),
            rows,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of variables.
    pub fn dims(&self) -> usize {
        self.columns.len()
    }

    pub fn row(&self, row: usize) -> &[Option<f64>] {
        &self.rows[row]
    }

    /// Cells of one variable.
    pub fn column(&self, index: usize) -> Vec<Option<f64>> {
        self.rows.iter().map(|row| row[index]).collect()
    }

    pub(crate) fn missing_count(&self, index: usize) -> usize {
        self.rows.iter().filter(|row| row[index].is_none()).count()
    }

    /// Missingness patterns in a stable order.
    pub(crate) fn patterns(&self) -> Vec<Pattern> {
        let mut groups: BTreeMap<Vec<bool>, Vec<usize>> = BTreeMap::new();
        for (index, row) in self.rows.iter().enumerate() {
            let key: Vec<bool> = row.iter().map(Option::is_none).collect();
            groups.entry(key).or_default().push(index);
        }

        groups
            .into_iter()
            .map(|(key, rows)| {
                let (missing, observed): (Vec<usize>, Vec<usize>) =
                    (0..key.len()).partition(|&j| key[j]);
                Pattern {
                    observed,
                    missing,
                    rows,
                }
            })
            .collect()
    }

    /// Starting point: observed means and a diagonal of observed variances.
    fn seed(&self) -> (DVector<f64>, DMatrix<f64>) {
        let p = self.dims();
        let mut means = DVector::zeros(p);
        let mut variances = DVector::from_element(p, 1.0);

        for j in 0..p {
            let values = observed(&self.column(j));
            means[j] = mean(&values).unwrap_or(0.0);
            if let Some(var) = sample_variance(&values).filter(|v| *v > 0.0) {
                variances[j] = var;
            }
        }

        (means, DMatrix::from_diagonal(&variances))
    }
}

// ============================================================================
// Conditional Normal
// ============================================================================

/// Distribution of a row's missing block given its observed block.
#[derive(Debug, Clone)]
pub struct Conditional {
    pub observed: Vec<usize>,
    pub missing: Vec<usize>,
    mean_observed: DVector<f64>,
    mean_missing: DVector<f64>,
    /// Σ_mo Σ_oo⁻¹
    gain: Option<DMatrix<f64>>,
    /// Σ_mm − Σ_mo Σ_oo⁻¹ Σ_om
    pub covariance: DMatrix<f64>,
    /// Σ_oo⁻¹ and log|Σ_oo|
    precision: Option<(DMatrix<f64>, f64)>,
}

impl Conditional {
    pub fn new(
        mean: &DVector<f64>,
        covariance: &DMatrix<f64>,
        observed: Vec<usize>,
        missing: Vec<usize>,
    ) -> Result<Self> {
        let precision = if observed.is_empty() {
            None
        } else {
            let block = select(covariance, &observed, &observed);
            Some(spd_inverse_and_log_det(&block).ok_or_else(|| {
                RemediationError::Internal("observed covariance block is not invertible".into())
            })?)
        };

        let (gain, conditional_covariance) = match &precision {
            Some((inverse, _)) if !missing.is_empty() => {
                let cross = select(covariance, &missing, &observed);
                let gain = &cross * inverse;
                let reduced = select(covariance, &missing, &missing) - &gain * cross.transpose();
                (Some(gain), reduced)
            }
            _ => (None, select(covariance, &missing, &missing)),
        };

        Ok(Self {
            mean_observed: DVector::from_iterator(observed.len(), observed.iter().map(|&j| mean[j])),
            mean_missing: DVector::from_iterator(missing.len(), missing.iter().map(|&j| mean[j])),
            observed,
            missing,
            gain,
            covariance: conditional_covariance,
            precision,
        })
    }

    fn deviation(&self, cells: &[Option<f64>]) -> DVector<f64> {
        DVector::from_iterator(
            self.observed.len(),
            self.observed
                .iter()
                .zip(self.mean_observed.iter())
                .map(|(&j, mu)| cells[j].map_or(0.0, |x| x - mu)),
        )
    }

    /// E[x_m | x_o].
    pub fn expected(&self, cells: &[Option<f64>]) -> DVector<f64> {
        match &self.gain {
            Some(gain) => &self.mean_missing + gain * self.deviation(cells),
            None => self.mean_missing.clone(),
        }
    }

    /// Log density of the observed block; zero when nothing is observed.
    pub fn observed_log_density(&self, cells: &[Option<f64>]) -> f64 {
        match &self.precision {
            Some((inverse, log_det)) => {
                let d = self.deviation(cells);
                let quad = d.dot(&(inverse * &d));
                -0.5 * (d.len() as f64 * LN_2PI + log_det + quad)
            }
            None => 0.0,
        }
    }
}

// ============================================================================
// Estimator
// ============================================================================

/// Result of an EM run.
#[derive(Debug, Clone)]
pub struct EmFit {
    pub columns: Vec<String>,
    pub mean: DVector<f64>,
    pub covariance: DMatrix<f64>,
    /// Observed-data log-likelihood, one entry per evaluated parameter set
    /// starting from the seed.
    pub trace: Vec<f64>,
    /// Completed E/M cycles.
    pub iterations: usize,
    pub converged: bool,
    /// |Δ log-likelihood| of the last cycle.
    pub last_change: f64,
}

impl EmFit {
    /// Log-likelihood of the returned parameters, the highest in `trace`.
    pub fn log_likelihood(&self) -> f64 {
        self.trace.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Conditional distribution of the missing cells of `cells`.
    pub fn conditional(&self, cells: &[Option<f64>]) -> Result<Conditional> {
        let (missing, observed): (Vec<usize>, Vec<usize>) =
            (0..cells.len()).partition(|&j| cells[j].is_none());
        Conditional::new(&self.mean, &self.covariance, observed, missing)
    }

    /// Every row with its missing cells replaced by their conditional mean.
    pub fn expected_rows(&self, data: &MultivariateData) -> Result<Vec<Vec<f64>>> {
        let mut completed: Vec<Vec<f64>> = data
            .rows
            .iter()
            .map(|row| row.iter().map(|cell| cell.unwrap_or(0.0)).collect())
            .collect();

        for pattern in data.patterns() {
            if pattern.missing.is_empty() {
                continue;
            }
            let conditional = Conditional::new(
                &self.mean,
                &self.covariance,
                pattern.observed.clone(),
                pattern.missing.clone(),
            )?;
            for &row in &pattern.rows {
                let expected = conditional.expected(data.row(row));
                for (k, &j) in pattern.missing.iter().enumerate() {
                    completed[row][j] = expected[k];
                }
            }
        }

        Ok(completed)
    }

    pub fn mean_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .columns
            .iter()
            .zip(self.mean.iter())
            .map(|(name, mu)| (name.clone(), json!(mu)))
            .collect();
        serde_json::Value::Object(map)
    }

    pub fn covariance_rows(&self) -> Vec<Vec<f64>> {
        self.covariance
            .row_iter()
            .map(|row| row.iter().copied().collect())
            .collect()
    }
}

struct SufficientStatistics {
    sum: DVector<f64>,
    cross: DMatrix<f64>,
    log_likelihood: f64,
}

/// Iterates E and M steps for a multivariate normal.
#[derive(Debug, Clone, Copy)]
pub struct EmEstimator {
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl EmEstimator {
    pub fn new(tolerance: f64, max_iterations: usize) -> Self {
        Self {
            tolerance,
            max_iterations,
        }
    }

    pub fn from_config(config: &RemediationConfig) -> Self {
        Self::new(config.tolerance, config.max_iterations)
    }

    pub fn fit(&self, data: &MultivariateData) -> Result<EmFit> {
        let patterns = data.patterns();
        let n = data.len() as f64;
        let (mut mean, mut covariance) = data.seed();

        let mut trace: Vec<f64> = Vec::new();
        let mut iterations = 0;
        let mut converged = false;
        let mut last_change = f64::INFINITY;
        // Highest-likelihood parameters seen so far
        let mut best: Option<(f64, DVector<f64>, DMatrix<f64>)> = None;

        loop {
            let stats = e_step(data, &patterns, &mean, &covariance)?;
            if let Some(&previous) = trace.last() {
                last_change = (stats.log_likelihood - previous).abs();
            }
            trace.push(stats.log_likelihood);
            if best
                .as_ref()
                .is_none_or(|(log_likelihood, _, _)| stats.log_likelihood > *log_likelihood)
            {
                best = Some((stats.log_likelihood, mean.clone(), covariance.clone()));
            }
            debug!(
                "EM iteration {}: log-likelihood {:.6}",
                iterations, stats.log_likelihood
            );

            if last_change < self.tolerance {
                converged = true;
                break;
            }
            if iterations >= self.max_iterations {
                break;
            }

            // M-step
            mean = &stats.sum / n;
            let raw = &stats.cross / n - &mean * mean.transpose();
            covariance = (&raw + raw.transpose()) * 0.5;
            iterations += 1;
        }

        if converged {
            debug!("EM converged after {} iteration(s)", iterations);
        } else {
            warn!(
                "EM stopped after {} iteration(s) without converging (last change {:e})",
                iterations, last_change
            );
        }

        if let Some((_, best_mean, best_covariance)) = best {
            mean = best_mean;
            covariance = best_covariance;
        }

        Ok(EmFit {
            columns: data.columns.clone(),
            mean,
            covariance,
            trace,
            iterations,
            converged,
            last_change,
        })
    }
}

fn e_step(
    data: &MultivariateData,
    patterns: &[Pattern],
    mean: &DVector<f64>,
    covariance: &DMatrix<f64>,
) -> Result<SufficientStatistics> {
    let p = data.dims();

    let partials = patterns
        .par_iter()
        .map(|pattern| pattern_statistics(data, pattern, mean, covariance))
        .collect::<Result<Vec<_>>>()?;

    let mut total = SufficientStatistics {
        sum: DVector::zeros(p),
        cross: DMatrix::zeros(p, p),
        log_likelihood: 0.0,
    };
    for partial in partials {
        total.sum += partial.sum;
        total.cross += partial.cross;
        total.log_likelihood += partial.log_likelihood;
    }
    Ok(total)
}

fn pattern_statistics(
    data: &MultivariateData,
    pattern: &Pattern,
    mean: &DVector<f64>,
    covariance: &DMatrix<f64>,
) -> Result<SufficientStatistics> {
    let p = data.dims();
    let conditional = Conditional::new(
        mean,
        covariance,
        pattern.observed.clone(),
        pattern.missing.clone(),
    )?;

    let mut sum = DVector::zeros(p);
    let mut cross = DMatrix::zeros(p, p);
    let mut log_likelihood = 0.0;

    for &row in &pattern.rows {
        let cells = data.row(row);
        log_likelihood += conditional.observed_log_density(cells);

        let mut x = DVector::zeros(p);
        for &j in &pattern.observed {
            x[j] = cells[j].unwrap_or(0.0);
        }
        let expected = conditional.expected(cells);
        for (k, &j) in pattern.missing.iter().enumerate() {
            x[j] = expected[k];
        }

        sum += &x;
        cross += &x * x.transpose();
    }

    // E[x_m x_mᵀ] adds the conditional covariance once per row
    let count = pattern.rows.len() as f64;
    for (a, &i) in pattern.missing.iter().enumerate() {
        for (b, &j) in pattern.missing.iter().enumerate() {
            cross[(i, j)] += count * conditional.covariance[(a, b)];
        }
    }

    Ok(SufficientStatistics {
        sum,
        cross,
        log_likelihood,
    })
}

// ============================================================================
// Imputer
// ============================================================================

/// Fills missing numeric cells with their conditional expectation under the
/// EM-fitted multivariate normal.
pub struct EmImputer {
    columns: Vec<String>,
    estimator: EmEstimator,
    strict: bool,
}

impl EmImputer {
    pub fn new(columns: Vec<String>, estimator: EmEstimator) -> Self {
        Self {
            columns,
            estimator,
            strict: false,
        }
    }

    /// Fail with `NonConvergence` when the budget runs out.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn from_config(config: &RemediationConfig) -> Self {
        Self::new(config.columns.clone(), EmEstimator::from_config(config))
            .strict(config.strict_convergence)
    }
}

impl Remediator for EmImputer {
    fn strategy(&self) -> Strategy {
        Strategy::ExpectationMaximization
    }

    fn remediate(&self, dataset: &Dataset, mask: &MissingnessMask) -> Result<Remediation> {
        mask.ensure_matches(dataset)?;
        let columns = resolve_columns(dataset, &self.columns, &[ColumnKind::Numeric])?;
        let data =
            MultivariateData::from_dataset(dataset, &columns, Strategy::ExpectationMaximization)?;

        let fit = self.estimator.fit(&data)?;
        if !fit.converged && self.strict {
            return Err(RemediationError::NonConvergence {
                iterations: fit.iterations,
                last_change: fit.last_change,
            });
        }

        let completed = fit.expected_rows(&data)?;

        let mut provenance = Provenance::new(Strategy::ExpectationMaximization);
        provenance.parameter("tolerance", self.estimator.tolerance);
        provenance.parameter("max_iterations", self.estimator.max_iterations);
        provenance.parameter("iterations", fit.iterations);
        provenance.parameter("converged", fit.converged);
        provenance.parameter("log_likelihood_trace", &fit.trace);
        provenance.parameter("mean", fit.mean_json());
        provenance.parameter("covariance", fit.covariance_rows());

        let mut replacements = Vec::new();
        for (j, name) in columns.iter().enumerate() {
            let replaced = data.missing_count(j);
            if replaced == 0 {
                continue;
            }
            let values = completed.iter().map(|row| Some(row[j])).collect();
            replacements.push(float_series(name, values));
            provenance.column(ColumnRemediation {
                column: name.clone(),
                substituted_value: None,
                cells_replaced: replaced,
            });
        }
        provenance.steps.push(format!(
            "EM over {:?}: {} iteration(s), final log-likelihood {:.6}",
            columns,
            fit.iterations,
            fit.log_likelihood()
        ));

        info!(
            "EM imputed {} cell(s), converged: {}",
            provenance.cells_imputed, fit.converged
        );

        let mut result = RemediationResult::new(dataset.with_replaced(replacements)?, provenance);
        result.converged = Some(fit.converged);
        Ok(Remediation::Single(result))
    }
}
