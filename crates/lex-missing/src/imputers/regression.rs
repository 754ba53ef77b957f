//! Regression imputation.
//!
//! For each target column a least-squares model is fitted on the complete
//! cases (target and every predictor observed), then used to predict the
//! target wherever it is missing and the predictors are present. Targets are
//! fitted independently from the original observed data, so they run in
//! parallel and never see each other's imputations.

use crate::config::{RemediationConfig, Strategy};
use crate::dataset::Dataset;
use crate::error::{RemediationError, Result, ResultExt};
use crate::math::{OlsFit, ols};
use crate::profiler::MissingnessMask;
use crate::strategy::{Remediator, require_kind};
use crate::types::{
    CellIssue, ColumnRemediation, Provenance, Remediation, RemediationResult, UnresolvedKind,
};
use crate::utils::{ColumnKind, float_series};
use rayon::prelude::*;
use serde_json::json;
use tracing::{debug, info, warn};

/// A fitted model for one target column plus the data it was fitted from.
#[derive(Debug, Clone)]
pub(crate) struct TargetModel {
    pub target: String,
    pub predictors: Vec<String>,
    pub fit: OlsFit,
    /// Target cells, `None` where missing.
    pub target_values: Vec<Option<f64>>,
    /// Predictor cells per predictor column.
    pub predictor_values: Vec<Vec<Option<f64>>>,
}

impl TargetModel {
    /// Fit `target ~ predictors` on complete cases.
    pub fn fit(dataset: &Dataset, target: &str, predictors: &[String]) -> Result<Self> {
        require_kind(
            dataset,
            target,
            &[ColumnKind::Numeric],
            Strategy::RegressionImputation,
        )?;
        for predictor in predictors {
            require_kind(
                dataset,
                predictor,
                &[ColumnKind::Numeric],
                Strategy::RegressionImputation,
            )?;
        }

        let target_values = dataset.finite_numeric_values(target)?;
        if target_values.iter().all(Option::is_none) {
            return Err(RemediationError::AllValuesMissing(target.to_string()));
        }
        let predictor_values = predictors
            .iter()
            .map(|name| dataset.finite_numeric_values(name))
            .collect::<Result<Vec<_>>>()?;

        let mut rows = Vec::new();
        let mut response = Vec::new();
        for (row, value) in target_values.iter().enumerate() {
            let Some(y) = value else { continue };
            if let Some(x) = row_predictors(&predictor_values, row) {
                rows.push(x);
                response.push(*y);
            }
        }

        let required = predictors.len() + 1;
        if rows.len() < required {
            return Err(RemediationError::InsufficientCompleteCases {
                column: target.to_string(),
                required,
                available: rows.len(),
            });
        }

        let fit = ols(&rows, &response).ok_or_else(|| {
            RemediationError::Internal(format!("least-squares system for '{}' is singular", target))
        })?;

        debug!(
            "Fitted '{}' on {} complete case(s) with {} predictor(s)",
            target,
            rows.len(),
            predictors.len()
        );

        Ok(Self {
            target: target.to_string(),
            predictors: predictors.to_vec(),
            fit,
            target_values,
            predictor_values,
        })
    }

    /// Predictor values of `row`, `None` if any is missing.
    pub fn predictors_at(&self, row: usize) -> Option<Vec<f64>> {
        row_predictors(&self.predictor_values, row)
    }

    /// Coefficients keyed by predictor name, for provenance.
    pub fn coefficients_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("intercept".to_string(), json!(self.fit.coefficients[0]));
        for (name, coefficient) in self.predictors.iter().zip(&self.fit.coefficients[1..]) {
            map.insert(name.clone(), json!(coefficient));
        }
        serde_json::Value::Object(map)
    }
}

fn row_predictors(predictor_values: &[Vec<Option<f64>>], row: usize) -> Option<Vec<f64>> {
    predictor_values.iter().map(|col| col[row]).collect()
}

/// Targets and predictor sets for a regression-style strategy.
///
/// Explicit targets are used as given; otherwise every numeric column with at
/// least one missing cell is a target. Explicit predictors are shared by all
/// targets (minus the target itself); otherwise each target uses every other
/// numeric column that is usable as a predictor: not fully missing and free
/// of non-finite values.
pub(crate) fn plan_targets(
    dataset: &Dataset,
    mask: &MissingnessMask,
    targets: &[String],
    predictors: &[String],
) -> Result<Vec<(String, Vec<String>)>> {
    let numeric = dataset.numeric_column_names();

    let targets: Vec<String> = if targets.is_empty() {
        numeric
            .iter()
            .filter(|name| {
                mask.column(name)
                    .map(|flags| flags.iter().any(|&m| m))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    } else {
        targets.to_vec()
    };

    let usable: Vec<String> = if predictors.is_empty() {
        numeric
            .iter()
            .filter(|name| usable_predictor(dataset, mask, name))
            .cloned()
            .collect()
    } else {
        Vec::new()
    };

    targets
        .into_iter()
        .map(|target| {
            dataset.require_column(&target)?;
            let pool = if predictors.is_empty() {
                &usable
            } else {
                predictors
            };
            let chosen: Vec<String> = pool.iter().filter(|p| **p != target).cloned().collect();
            Ok((target, chosen))
        })
        .collect()
}

fn usable_predictor(dataset: &Dataset, mask: &MissingnessMask, name: &str) -> bool {
    let fully_missing = mask
        .column(name)
        .map(|flags| !flags.is_empty() && flags.iter().all(|&m| m))
        .unwrap_or(false);
    if fully_missing {
        warn!("Skipping predictor '{}': every value is missing", name);
        return false;
    }
    if let Err(e) = dataset.finite_numeric_values(name) {
        warn!("Skipping predictor '{}': {}", name, e);
        return false;
    }
    true
}

/// Deterministic regression imputation.
pub struct RegressionImputer {
    targets: Vec<String>,
    predictors: Vec<String>,
    strict: bool,
}

impl RegressionImputer {
    pub fn new(targets: Vec<String>, predictors: Vec<String>) -> Self {
        Self {
            targets,
            predictors,
            strict: false,
        }
    }

    /// Fail with `UnresolvedCells` instead of leaving unpredictable cells missing.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn from_config(config: &RemediationConfig) -> Self {
        Self::new(config.columns.clone(), config.predictor_columns.clone())
            .strict(config.strict_unresolved)
    }
}

impl Remediator for RegressionImputer {
    fn strategy(&self) -> Strategy {
        Strategy::RegressionImputation
    }

    fn remediate(&self, dataset: &Dataset, mask: &MissingnessMask) -> Result<Remediation> {
        mask.ensure_matches(dataset)?;
        let plan = plan_targets(dataset, mask, &self.targets, &self.predictors)?;

        let models = plan
            .par_iter()
            .map(|(target, predictors)| {
                TargetModel::fit(dataset, target, predictors)
                    .context(format!("regression model for '{}'", target))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut provenance = Provenance::new(Strategy::RegressionImputation);
        let mut unresolved = Vec::new();
        let mut replacements = Vec::new();

        for model in &models {
            let mut filled = model.target_values.clone();
            let mut replaced = 0;

            for (row, cell) in filled.iter_mut().enumerate() {
                if cell.is_some() {
                    continue;
                }
                match model.predictors_at(row) {
                    Some(x) => {
                        *cell = Some(model.fit.predict(&x));
                        replaced += 1;
                    }
                    None => unresolved.push(CellIssue {
                        row,
                        column: model.target.clone(),
                        kind: UnresolvedKind::UnresolvedRow,
                    }),
                }
            }

            provenance.parameter(
                format!("{}.model", model.target),
                json!({
                    "predictors": model.predictors,
                    "coefficients": model.coefficients_json(),
                    "residual_variance": model.fit.residual_variance,
                    "complete_cases": model.fit.observations,
                }),
            );
            provenance.steps.push(format!(
                "Predicted {} cell(s) of '{}' from {:?}",
                replaced, model.target, model.predictors
            ));
            provenance.column(ColumnRemediation {
                column: model.target.clone(),
                substituted_value: None,
                cells_replaced: replaced,
            });
            replacements.push(float_series(&model.target, filled));
        }

        if !unresolved.is_empty() {
            warn!(
                "{} cell(s) left missing: a predictor was missing in the same row",
                unresolved.len()
            );
            if self.strict {
                return Err(RemediationError::UnresolvedCells {
                    strategy: Strategy::RegressionImputation.to_string(),
                    count: unresolved.len(),
                });
            }
        }

        info!(
            "Regression imputation filled {} cell(s) across {} target(s)",
            provenance.cells_imputed,
            models.len()
        );

        let mut result = RemediationResult::new(dataset.with_replaced(replacements)?, provenance);
        result.unresolved = unresolved;
        Ok(Remediation::Single(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiler::MissingnessAnalyzer;
    use polars::prelude::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn impute(ds: &Dataset, imputer: RegressionImputer) -> Result<RemediationResult> {
        let mask = MissingnessAnalyzer::compute_mask(ds);
        imputer
            .remediate(ds, &mask)
            .map(|r| r.into_single().unwrap())
    }

    /// Strip the per-target context wrapper.
    fn root(err: RemediationError) -> RemediationError {
        match err {
            RemediationError::WithContext { source, .. } => root(*source),
            other => other,
        }
    }

    #[test]
    fn test_predicts_missing_target_from_line() {
        // y = 1 + 2x
        let ds = Dataset::new(
            df![
                "x" => [0.0, 1.0, 2.0, 3.0, 4.0],
                "y" => [Some(1.0), Some(3.0), None, Some(7.0), None],
            ]
            .unwrap(),
        );
        let result = impute(&ds, RegressionImputer::new(vec!["y".into()], vec!["x".into()])).unwrap();

        let y = result.dataset.numeric_values("y").unwrap();
        assert!(approx(y[2].unwrap(), 5.0));
        assert!(approx(y[4].unwrap(), 9.0));
        // Observed cells untouched
        assert_eq!(y[0], Some(1.0));
        assert_eq!(y[3], Some(7.0));
        assert!(result.is_complete());

        let model = &result.provenance.parameters["y.model"];
        assert!(approx(model["coefficients"]["x"].as_f64().unwrap(), 2.0));
        assert!(model["residual_variance"].as_f64().unwrap() < 1e-12);
    }

    #[test]
    fn test_unresolved_row_when_predictor_missing() {
        let ds = Dataset::new(
            df![
                "x" => [Some(0.0), Some(1.0), Some(2.0), None],
                "y" => [Some(1.0), Some(3.0), Some(5.0), None],
            ]
            .unwrap(),
        );
        let result = impute(&ds, RegressionImputer::new(vec!["y".into()], vec!["x".into()])).unwrap();

        assert_eq!(result.unresolved.len(), 1);
        assert_eq!(result.unresolved[0].row, 3);
        assert_eq!(result.unresolved[0].kind, UnresolvedKind::UnresolvedRow);
        assert_eq!(result.dataset.numeric_values("y").unwrap()[3], None);
    }

    #[test]
    fn test_strict_escalates_unresolved() {
        let ds = Dataset::new(
            df![
                "x" => [Some(0.0), Some(1.0), Some(2.0), None],
                "y" => [Some(1.0), Some(3.0), Some(5.0), None],
            ]
            .unwrap(),
        );
        let err = impute(
            &ds,
            RegressionImputer::new(vec!["y".into()], vec!["x".into()]).strict(true),
        )
        .unwrap_err();
        assert!(matches!(err, RemediationError::UnresolvedCells { count: 1, .. }));
    }

    #[test]
    fn test_insufficient_complete_cases() {
        let ds = Dataset::new(
            df![
                "a" => [Some(1.0), None, Some(3.0)],
                "b" => [Some(1.0), Some(2.0), None],
                "y" => [Some(1.0), Some(2.0), None],
            ]
            .unwrap(),
        );
        // Only row 0 is complete across y, a, b; need 3.
        let err = impute(
            &ds,
            RegressionImputer::new(vec!["y".into()], vec!["a".into(), "b".into()]),
        )
        .unwrap_err();
        assert_eq!(err.error_code(), "INSUFFICIENT_COMPLETE_CASES");
        assert!(err.to_string().starts_with("regression model for 'y'"));
        assert!(matches!(
            root(err),
            RemediationError::InsufficientCompleteCases {
                required: 3,
                available: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_categorical_predictor() {
        let ds = Dataset::new(
            df![
                "c" => ["a", "b", "c"],
                "y" => [Some(1.0), None, Some(3.0)],
            ]
            .unwrap(),
        );
        let err = impute(&ds, RegressionImputer::new(vec!["y".into()], vec!["c".into()])).unwrap_err();
        assert!(err.is_structural());
        assert!(matches!(root(err), RemediationError::UnsupportedColumnType { .. }));
    }

    #[test]
    fn test_fully_missing_target_rejected() {
        let ds = Dataset::new(
            df![
                "a" => [1.0, 2.0, 3.0],
                "y" => [None::<f64>, None, None],
            ]
            .unwrap(),
        );
        let err = impute(&ds, RegressionImputer::new(vec!["y".into()], Vec::new())).unwrap_err();
        assert!(matches!(root(err), RemediationError::AllValuesMissing(column) if column == "y"));
    }

    #[test]
    fn test_default_plan_uses_other_numeric_columns() {
        let ds = Dataset::new(
            df![
                "x" => [1.0, 2.0, 3.0],
                "y" => [Some(1.0), None, Some(3.0)],
                "label" => ["a", "b", "c"],
            ]
            .unwrap(),
        );
        let mask = MissingnessAnalyzer::compute_mask(&ds);
        let plan = plan_targets(&ds, &mask, &[], &[]).unwrap();
        assert_eq!(plan, vec![("y".to_string(), vec!["x".to_string()])]);
    }

    #[test]
    fn test_default_plan_skips_unusable_predictors() {
        let ds = Dataset::new(
            df![
                "x" => [1.0, 2.0, 3.0, 4.0],
                "y" => [Some(2.0), None, Some(6.0), Some(8.0)],
                "empty" => [None::<f64>, None, None, None],
                "z" => [0.5, f64::NAN, 1.5, 2.0],
            ]
            .unwrap(),
        );
        let mask = MissingnessAnalyzer::compute_mask(&ds);
        let plan = plan_targets(&ds, &mask, &["y".to_string()], &[]).unwrap();
        assert_eq!(plan, vec![("y".to_string(), vec!["x".to_string()])]);

        let result = impute(&ds, RegressionImputer::new(vec!["y".into()], Vec::new())).unwrap();
        assert!(approx(result.dataset.numeric_values("y").unwrap()[1].unwrap(), 4.0));
    }
}
