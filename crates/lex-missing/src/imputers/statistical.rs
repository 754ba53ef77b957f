//! Statistical substitution methods.
//!
//! Mean and median substitution for numeric columns, mode substitution for
//! any column kind. Each column is handled independently (and in parallel).
//!
//! Substitution keeps the row count and the observed mean, but it shrinks the
//! column variance and assumes missingness is unrelated to the value itself.
//! That bias is reported in provenance, not corrected.

use crate::config::{RemediationConfig, Strategy};
use crate::dataset::Dataset;
use crate::error::{RemediationError, Result};
use crate::profiler::MissingnessMask;
use crate::strategy::{Remediator, require_kind, resolve_columns};
use crate::types::{ColumnRemediation, Provenance, Remediation, RemediationResult};
use crate::utils::{ColumnKind, fill_numeric_nulls, mean, median, mode_row_index, observed};
use polars::prelude::*;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

/// Central statistic written into missing numeric cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CentralStatistic {
    Mean,
    Median,
}

impl CentralStatistic {
    fn name(&self) -> &'static str {
        match self {
            CentralStatistic::Mean => "mean",
            CentralStatistic::Median => "median",
        }
    }

    fn strategy(&self) -> Strategy {
        match self {
            CentralStatistic::Mean => Strategy::MeanSubstitution,
            CentralStatistic::Median => Strategy::MedianSubstitution,
        }
    }

    fn compute(&self, values: &[f64]) -> Option<f64> {
        match self {
            CentralStatistic::Mean => mean(values),
            CentralStatistic::Median => median(values),
        }
    }
}

/// Mean or median substitution over numeric columns.
pub struct CentralSubstitution {
    statistic: CentralStatistic,
    columns: Vec<String>,
}

impl CentralSubstitution {
    pub fn new(statistic: CentralStatistic, columns: Vec<String>) -> Self {
        Self { statistic, columns }
    }

    pub fn from_config(statistic: CentralStatistic, config: &RemediationConfig) -> Self {
        Self::new(statistic, config.columns.clone())
    }

    /// Fill one column, returning the new series and what was done.
    fn fill_column(
        &self,
        dataset: &Dataset,
        column: &str,
    ) -> Result<Option<(Series, ColumnRemediation)>> {
        require_kind(
            dataset,
            column,
            &[ColumnKind::Numeric],
            self.statistic.strategy(),
        )?;

        let values = dataset.numeric_values(column)?;
        let present = observed(&values);
        let missing = values.len() - present.len();

        if missing == 0 {
            return Ok(None);
        }

        let fill_value = self
            .statistic
            .compute(&present)
            .ok_or_else(|| RemediationError::AllValuesMissing(column.to_string()))?;

        let series = fill_numeric_nulls(dataset.require_column(column)?, fill_value)?;
        debug!(
            "Filled {} cell(s) of '{}' with {} {:.4}",
            missing,
            column,
            self.statistic.name(),
            fill_value
        );

        Ok(Some((
            series,
            ColumnRemediation {
                column: column.to_string(),
                substituted_value: Some(fill_value),
                cells_replaced: missing,
            },
        )))
    }
}

impl Remediator for CentralSubstitution {
    fn strategy(&self) -> Strategy {
        self.statistic.strategy()
    }

    fn remediate(&self, dataset: &Dataset, mask: &MissingnessMask) -> Result<Remediation> {
        mask.ensure_matches(dataset)?;
        let columns = resolve_columns(dataset, &self.columns, &[ColumnKind::Numeric])?;

        let filled = columns
            .par_iter()
            .map(|column| self.fill_column(dataset, column))
            .collect::<Result<Vec<_>>>()?;

        let mut provenance = Provenance::new(self.statistic.strategy());
        provenance.parameter("statistic", self.statistic);
        provenance.parameter(
            "bias_risk",
            "variance attenuated; assumes missingness unrelated to the value",
        );

        let mut replacements = Vec::new();
        for (series, report) in filled.into_iter().flatten() {
            provenance.steps.push(format!(
                "Filled '{}' with {}: {:.2}",
                report.column,
                self.statistic.name(),
                report.substituted_value.unwrap_or_default()
            ));
            provenance.column(report);
            replacements.push(series);
        }

        info!(
            "{} substitution replaced {} cell(s) across {} column(s)",
            self.statistic.name(),
            provenance.cells_imputed,
            replacements.len()
        );

        let dataset = dataset.with_replaced(replacements)?;
        Ok(Remediation::Single(RemediationResult::new(dataset, provenance)))
    }
}

/// Most-frequent-value substitution for columns of any kind.
///
/// The column dtype is preserved: missing cells are filled by gathering the
/// row that holds the mode.
pub struct ModeSubstitution {
    columns: Vec<String>,
}

impl ModeSubstitution {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    pub fn from_config(config: &RemediationConfig) -> Self {
        Self::new(config.columns.clone())
    }

    fn fill_column(
        dataset: &Dataset,
        column: &str,
    ) -> Result<Option<(Series, ColumnRemediation)>> {
        let kind = require_kind(
            dataset,
            column,
            &[
                ColumnKind::Numeric,
                ColumnKind::Categorical,
                ColumnKind::Temporal,
            ],
            Strategy::ModeSubstitution,
        )?;

        let series = dataset.require_column(column)?;
        let missing = series.null_count();
        if missing == 0 {
            return Ok(None);
        }

        let mode_row = mode_row_index(series)?
            .ok_or_else(|| RemediationError::AllValuesMissing(column.to_string()))?;

        let null_mask = series.is_null();
        let indices: Vec<IdxSize> = null_mask
            .into_iter()
            .enumerate()
            .map(|(row, is_null)| {
                if is_null.unwrap_or(false) {
                    mode_row as IdxSize
                } else {
                    row as IdxSize
                }
            })
            .collect();
        let filled = series.take(&IdxCa::from_vec("idx".into(), indices))?;

        let substituted_value = match kind {
            ColumnKind::Numeric => series.get(mode_row)?.try_extract::<f64>().ok(),
            _ => None,
        };

        Ok(Some((
            filled,
            ColumnRemediation {
                column: column.to_string(),
                substituted_value,
                cells_replaced: missing,
            },
        )))
    }
}

impl Remediator for ModeSubstitution {
    fn strategy(&self) -> Strategy {
        Strategy::ModeSubstitution
    }

    fn remediate(&self, dataset: &Dataset, mask: &MissingnessMask) -> Result<Remediation> {
        mask.ensure_matches(dataset)?;
        let columns = resolve_columns(
            dataset,
            &self.columns,
            &[
                ColumnKind::Numeric,
                ColumnKind::Categorical,
                ColumnKind::Temporal,
            ],
        )?;

        let filled = columns
            .par_iter()
            .map(|column| Self::fill_column(dataset, column))
            .collect::<Result<Vec<_>>>()?;

        let mut provenance = Provenance::new(Strategy::ModeSubstitution);
        let mut replacements = Vec::new();
        for (series, report) in filled.into_iter().flatten() {
            provenance
                .steps
                .push(format!("Filled '{}' with its mode", report.column));
            provenance.column(report);
            replacements.push(series);
        }

        let dataset = dataset.with_replaced(replacements)?;
        Ok(Remediation::Single(RemediationResult::new(dataset, provenance)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiler::MissingnessAnalyzer;

    fn substitute(ds: &Dataset, statistic: CentralStatistic) -> Result<RemediationResult> {
        let mask = MissingnessAnalyzer::compute_mask(ds);
        CentralSubstitution::new(statistic, Vec::new())
            .remediate(ds, &mask)
            .map(|r| r.into_single().unwrap())
    }

    // ========================================================================
    // Mean substitution tests
    // ========================================================================

    #[test]
    fn test_mean_substitution_example_vector() {
        let ds = Dataset::new(
            df![
                "x" => [Some(1.0), Some(2.0), Some(3.0), None, Some(4.0), Some(5.0), None, Some(6.0)],
            ]
            .unwrap(),
        );
        let result = substitute(&ds, CentralStatistic::Mean).unwrap();

        let values = result.dataset.numeric_values("x").unwrap();
        assert_eq!(
            values,
            vec![
                Some(1.0),
                Some(2.0),
                Some(3.0),
                Some(3.5),
                Some(4.0),
                Some(5.0),
                Some(3.5),
                Some(6.0)
            ]
        );

        let report = result.provenance.column_report("x").unwrap();
        assert_eq!(report.substituted_value, Some(3.5));
        assert_eq!(report.cells_replaced, 2);
    }

    #[test]
    fn test_mean_substitution_preserves_mean() {
        let ds = Dataset::new(df!["x" => [Some(10.0), None, Some(20.0), None]].unwrap());
        let result = substitute(&ds, CentralStatistic::Mean).unwrap();

        let filled: Vec<f64> = result
            .dataset
            .numeric_values("x")
            .unwrap()
            .into_iter()
            .flatten()
            .collect();
        assert_eq!(filled.len(), 4);
        assert_eq!(mean(&filled), Some(15.0));
    }

    #[test]
    fn test_mean_substitution_leaves_observed_cells() {
        let ds = Dataset::new(df!["x" => [Some(10i64), None, Some(20)]].unwrap());
        let result = substitute(&ds, CentralStatistic::Mean).unwrap();

        let values = result.dataset.numeric_values("x").unwrap();
        assert_eq!(values, vec![Some(10.0), Some(15.0), Some(20.0)]);
        assert!(matches!(
            result.dataset.require_column("x").unwrap().dtype(),
            DataType::Float64
        ));
    }

    #[test]
    fn test_mean_substitution_rejects_categorical() {
        let ds = Dataset::new(df!["c" => [Some("a"), None]].unwrap());
        let mask = MissingnessAnalyzer::compute_mask(&ds);
        let err = CentralSubstitution::new(CentralStatistic::Mean, vec!["c".to_string()])
            .remediate(&ds, &mask)
            .unwrap_err();
        assert!(matches!(err, RemediationError::UnsupportedColumnType { .. }));
    }

    #[test]
    fn test_mean_substitution_all_missing_fails() {
        let ds = Dataset::new(df!["x" => [Option::<f64>::None, None, None]].unwrap());
        let err = substitute(&ds, CentralStatistic::Mean).unwrap_err();
        assert!(matches!(err, RemediationError::AllValuesMissing(ref c) if c == "x"));
    }

    #[test]
    fn test_no_missing_values_is_noop() {
        let ds = Dataset::new(df!["x" => [1.0, 2.0, 3.0]].unwrap());
        let result = substitute(&ds, CentralStatistic::Mean).unwrap();
        assert!(result.dataset.equals(&ds));
        assert_eq!(result.provenance.cells_imputed, 0);
    }

    #[test]
    fn test_default_columns_skip_categorical() {
        let ds = Dataset::new(
            df![
                "x" => [Some(1.0), None, Some(3.0)],
                "c" => [Some("a"), None, Some("b")],
            ]
            .unwrap(),
        );
        let result = substitute(&ds, CentralStatistic::Mean).unwrap();
        assert_eq!(result.dataset.require_column("x").unwrap().null_count(), 0);
        // Categorical column untouched
        assert_eq!(result.dataset.require_column("c").unwrap().null_count(), 1);
    }

    // ========================================================================
    // Median substitution tests
    // ========================================================================

    #[test]
    fn test_median_substitution_basic() {
        let ds = Dataset::new(
            df!["values" => [Some(1.0), None, Some(3.0), None, Some(50.0)]].unwrap(),
        );
        let result = substitute(&ds, CentralStatistic::Median).unwrap();

        let values = result.dataset.numeric_values("values").unwrap();
        assert_eq!(values[1], Some(3.0));
        assert_eq!(values[3], Some(3.0));
        assert_eq!(result.provenance.strategy, Strategy::MedianSubstitution);
        assert!(result.provenance.steps[0].contains("median"));
    }

    // ========================================================================
    // Mode substitution tests
    // ========================================================================

    #[test]
    fn test_mode_substitution_categorical_preserves_dtype() {
        let ds = Dataset::new(
            df!["category" => [Some("A"), Some("B"), Some("A"), None, Some("A")]].unwrap(),
        );
        let mask = MissingnessAnalyzer::compute_mask(&ds);
        let result = ModeSubstitution::new(Vec::new())
            .remediate(&ds, &mask)
            .unwrap()
            .into_single()
            .unwrap();

        let category = result.dataset.require_column("category").unwrap();
        assert_eq!(category.null_count(), 0);
        assert_eq!(category.dtype(), &DataType::String);
        assert_eq!(category.str().unwrap().get(3), Some("A"));
        assert_eq!(result.provenance.cells_imputed, 1);
    }

    #[test]
    fn test_mode_substitution_numeric_reports_value() {
        let ds = Dataset::new(df!["n" => [Some(7i64), Some(7), Some(2), None]].unwrap());
        let mask = MissingnessAnalyzer::compute_mask(&ds);
        let result = ModeSubstitution::new(Vec::new())
            .remediate(&ds, &mask)
            .unwrap()
            .into_single()
            .unwrap();

        let report = result.provenance.column_report("n").unwrap();
        assert_eq!(report.substituted_value, Some(7.0));
        assert_eq!(
            result.dataset.require_column("n").unwrap().dtype(),
            &DataType::Int64
        );
    }

    #[test]
    fn test_mode_substitution_all_missing_fails() {
        let ds = Dataset::new(df!["c" => [Option::<&str>::None, None]].unwrap());
        let mask = MissingnessAnalyzer::compute_mask(&ds);
        let err = ModeSubstitution::new(Vec::new())
            .remediate(&ds, &mask)
            .unwrap_err();
        assert!(matches!(err, RemediationError::AllValuesMissing(_)));
    }
}
