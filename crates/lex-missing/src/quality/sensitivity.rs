//! Strategy sensitivity analysis.
//!
//! Runs several remediation strategies against the same dataset and compares
//! a summary statistic of each result. A large spread means the conclusion
//! depends on the remediation choice. The report is advisory: nothing here
//! blocks a pipeline.

use crate::config::{RemediationConfig, Strategy, SummaryStatistic};
use crate::dataset::Dataset;
use crate::error::Result;
use crate::profiler::MissingnessMask;
use crate::types::Remediation;
use crate::utils::{mean, median, observed, std_dev};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Guards the relative spread against a near-zero center.
const RELATIVE_SPREAD_FLOOR: f64 = f64::EPSILON;

/// What one strategy produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyOutcome {
    pub strategy: Strategy,
    /// Statistic per column; empty when the strategy failed.
    pub estimates: BTreeMap<String, f64>,
    /// Rows left after remediation (first draw for ensembles).
    pub rows: usize,
    pub cells_imputed: usize,
    pub unresolved: usize,
    /// `CODE: message` when the strategy failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StrategyOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyEstimate {
    pub strategy: Strategy,
    pub value: f64,
}

/// Spread of one column's statistic across strategies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSensitivity {
    pub column: String,
    pub estimates: Vec<StrategyEstimate>,
    pub min: f64,
    pub max: f64,
    /// max − min
    pub spread: f64,
    /// spread / |mean of estimates|
    pub relative_spread: f64,
    pub high_sensitivity: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensitivityReport {
    pub statistic: SummaryStatistic,
    pub threshold: f64,
    pub outcomes: Vec<StrategyOutcome>,
    pub columns: Vec<ColumnSensitivity>,
}

impl SensitivityReport {
    /// Columns flagged as `HighSensitivity`.
    pub fn flagged_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.high_sensitivity)
            .map(|c| c.column.as_str())
            .collect()
    }

    pub fn is_high_sensitivity(&self) -> bool {
        self.columns.iter().any(|c| c.high_sensitivity)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSensitivity> {
        self.columns.iter().find(|c| c.column == name)
    }

    pub fn failed(&self) -> impl Iterator<Item = &StrategyOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }
}

/// Compares strategies on a summary statistic.
pub struct SensitivityAnalyzer {
    config: RemediationConfig,
}

impl SensitivityAnalyzer {
    /// Strategies, statistic and threshold come from `config`; every other
    /// field configures the strategies being compared.
    pub fn new(config: RemediationConfig) -> Self {
        Self { config }
    }

    pub fn analyze(&self, dataset: &Dataset, mask: &MissingnessMask) -> Result<SensitivityReport> {
        self.config.validate()?;
        mask.ensure_matches(dataset)?;

        let columns = if self.config.columns.is_empty() {
            dataset.numeric_column_names()
        } else {
            for name in &self.config.columns {
                dataset.numeric_values(name)?;
            }
            self.config.columns.clone()
        };

        info!(
            "Sensitivity analysis of {} strategies over {} column(s)",
            self.config.sensitivity_strategies.len(),
            columns.len()
        );

        let outcomes: Vec<StrategyOutcome> = self
            .config
            .sensitivity_strategies
            .par_iter()
            .map(|&strategy| self.run_strategy(strategy, dataset, mask, &columns))
            .collect();

        let statistic = self.config.sensitivity_statistic;
        let threshold = self.config.sensitivity_threshold;
        let columns: Vec<ColumnSensitivity> = columns
            .iter()
            .filter_map(|column| compare(column, &outcomes, threshold))
            .collect();

        for flagged in columns.iter().filter(|c| c.high_sensitivity) {
            warn!(
                "HighSensitivity on '{}': {:?} varies by {:.4} ({:.1}%) across strategies",
                flagged.column,
                statistic,
                flagged.spread,
                flagged.relative_spread * 100.0
            );
        }

        Ok(SensitivityReport {
            statistic,
            threshold,
            outcomes,
            columns,
        })
    }

    fn run_strategy(
        &self,
        strategy: Strategy,
        dataset: &Dataset,
        mask: &MissingnessMask,
        columns: &[String],
    ) -> StrategyOutcome {
        let config = self.config.with_strategy(strategy);
        let statistic = self.config.sensitivity_statistic;

        let outcome = strategy
            .remediator(&config)
            .remediate(dataset, mask)
            .and_then(|remediation| summarize(&remediation, columns, statistic));

        match outcome {
            Ok(outcome) => {
                debug!("{} produced {} estimate(s)", strategy, outcome.estimates.len());
                outcome
            }
            Err(e) => {
                if e.is_structural() {
                    warn!("{} does not apply to this dataset: {}", strategy, e);
                } else {
                    warn!("{} failed during sensitivity analysis: {}", strategy, e);
                }
                StrategyOutcome {
                    strategy,
                    estimates: BTreeMap::new(),
                    rows: 0,
                    cells_imputed: 0,
                    unresolved: 0,
                    error: Some(format!("{}: {}", e.error_code(), e)),
                }
            }
        }
    }
}

fn statistic_of(values: &[f64], statistic: SummaryStatistic) -> Option<f64> {
    match statistic {
        SummaryStatistic::Mean => mean(values),
        SummaryStatistic::Median => median(values),
        SummaryStatistic::StdDev => std_dev(values),
    }
}

fn column_statistic(dataset: &Dataset, column: &str, statistic: SummaryStatistic) -> Result<Option<f64>> {
    let values = observed(&dataset.numeric_values(column)?);
    Ok(statistic_of(&values, statistic))
}

/// Statistic per column for one remediation. Ensembles report the average
/// over their draws, i.e. the pooled point estimate.
fn summarize(
    remediation: &Remediation,
    columns: &[String],
    statistic: SummaryStatistic,
) -> Result<StrategyOutcome> {
    let provenance = remediation.provenance();
    let mut estimates = BTreeMap::new();

    let rows = match remediation {
        Remediation::Single(result) => {
            for column in columns {
                if let Some(value) = column_statistic(&result.dataset, column, statistic)? {
                    estimates.insert(column.clone(), value);
                }
            }
            result.dataset.height()
        }
        Remediation::Ensemble(ensemble) => {
            for column in columns {
                let per_draw = ensemble
                    .datasets
                    .iter()
                    .map(|ds| column_statistic(ds, column, statistic))
                    .collect::<Result<Option<Vec<f64>>>>()?;
                if let Some(value) = per_draw.and_then(|draws| mean(&draws)) {
                    estimates.insert(column.clone(), value);
                }
            }
            ensemble.datasets.first().map_or(0, Dataset::height)
        }
    };

    Ok(StrategyOutcome {
        strategy: provenance.strategy,
        estimates,
        rows,
        cells_imputed: provenance.cells_imputed,
        unresolved: remediation.unresolved().len(),
        error: None,
    })
}

fn compare(column: &str, outcomes: &[StrategyOutcome], threshold: f64) -> Option<ColumnSensitivity> {
    let estimates: Vec<StrategyEstimate> = outcomes
        .iter()
        .filter_map(|o| {
            o.estimates.get(column).map(|&value| StrategyEstimate {
                strategy: o.strategy,
                value,
            })
        })
        .collect();
    if estimates.is_empty() {
        return None;
    }

    let values: Vec<f64> = estimates.iter().map(|e| e.value).collect();
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let spread = max - min;
    let center = mean(&values).unwrap_or(0.0).abs().max(RELATIVE_SPREAD_FLOOR);
    let relative_spread = spread / center;

    Some(ColumnSensitivity {
        column: column.to_string(),
        estimates,
        min,
        max,
        spread,
        relative_spread,
        high_sensitivity: relative_spread > threshold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemediationError;
    use crate::profiler::MissingnessAnalyzer;
    use polars::prelude::*;
    use pretty_assertions::assert_eq;

    fn analyze(ds: &Dataset, config: RemediationConfig) -> SensitivityReport {
        let mask = MissingnessAnalyzer::compute_mask(ds);
        SensitivityAnalyzer::new(config).analyze(ds, &mask).unwrap()
    }

    #[test]
    fn test_identical_strategies_not_flagged() {
        // Mean substitution and listwise deletion agree on the mean
        let ds = Dataset::new(df!["x" => [Some(1.0), None, Some(3.0), Some(5.0)]].unwrap());
        let config = RemediationConfig::builder()
            .sensitivity_strategies([Strategy::ListwiseDeletion, Strategy::MeanSubstitution])
            .build()
            .unwrap();
        let report = analyze(&ds, config);

        let x = report.column("x").unwrap();
        assert_eq!(x.estimates.len(), 2);
        assert!(x.spread.abs() < 1e-12);
        assert!(!report.is_high_sensitivity());
    }

    #[test]
    fn test_skewed_missingness_flagged() {
        // Large values are the ones missing from y, and x predicts them
        let ds = Dataset::new(
            df![
                "x" => [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
                "y" => [Some(1.0), Some(2.1), Some(2.9), Some(4.2), Some(5.0), None, None, None],
            ]
            .unwrap(),
        );
        let config = RemediationConfig::builder()
            .columns(["y"])
            .sensitivity_strategies([Strategy::MeanSubstitution, Strategy::RegressionImputation])
            .sensitivity_threshold(0.05)
            .build()
            .unwrap();
        let report = analyze(&ds, config);

        assert_eq!(report.flagged_columns(), vec!["y"]);
        let y = report.column("y").unwrap();
        assert!(y.relative_spread > 0.05);
        assert_eq!(y.max, y.estimates[1].value);
    }

    #[test]
    fn test_failed_strategy_recorded_not_fatal() {
        let ds = Dataset::new(
            df![
                "x" => [Some(1.0), None, Some(3.0)],
                "label" => [Some("a"), None, Some("b")],
            ]
            .unwrap(),
        );
        let config = RemediationConfig::builder()
            .columns(["x", "label"])
            .sensitivity_strategies([Strategy::ListwiseDeletion, Strategy::MeanSubstitution])
            .build()
            .unwrap();
        let mask = MissingnessAnalyzer::compute_mask(&ds);

        // A categorical column cannot be summarized
        let err = SensitivityAnalyzer::new(config.clone())
            .analyze(&ds, &mask)
            .unwrap_err();
        assert!(matches!(err, RemediationError::UnsupportedColumnType { .. }));

        // Mean substitution of a categorical column fails, listwise does not
        let config = RemediationConfig {
            columns: vec!["label".to_string()],
            ..config
        };
        let outcome = SensitivityAnalyzer::new(config.clone()).run_strategy(
            Strategy::MeanSubstitution,
            &ds,
            &mask,
            &[],
        );
        assert!(!outcome.succeeded());
        assert!(outcome.error.unwrap().starts_with("UNSUPPORTED_COLUMN_TYPE"));
    }

    #[test]
    fn test_ensemble_contributes_pooled_estimate() {
        let ds = Dataset::new(
            df![
                "x" => [1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
                "y" => [Some(2.0), Some(4.1), None, Some(8.0), Some(9.8), Some(12.1)],
            ]
            .unwrap(),
        );
        let config = RemediationConfig::builder()
            .columns(["y"])
            .sensitivity_strategies([Strategy::MultipleImputation])
            .ensemble_size(4)
            .build()
            .unwrap();
        let report = analyze(&ds, config);

        let outcome = &report.outcomes[0];
        assert!(outcome.succeeded());
        assert_eq!(outcome.strategy, Strategy::MultipleImputation);
        assert_eq!(outcome.rows, 6);
        assert!(outcome.estimates.contains_key("y"));
    }
}
