//! Strategy registry.
//!
//! Every remediation policy implements [`Remediator`] over the same
//! `(Dataset, MissingnessMask)` input. [`Strategy`] is the closed set of
//! policies; [`Strategy::remediator`] turns a configured variant into its
//! implementation so callers (and the sensitivity analyzer) can treat them
//! uniformly.

use crate::cleaner::ListwiseDeletion;
use crate::config::{RemediationConfig, Strategy};
use crate::dataset::Dataset;
use crate::error::{RemediationError, Result};
use crate::estimation::LikelihoodImputer;
use crate::imputers::{
    CentralStatistic, CentralSubstitution, EmImputer, LocfImputer, ModeSubstitution,
    MultipleImputer, RegressionImputer,
};
use crate::profiler::{MissingnessAnalyzer, MissingnessMask};
use crate::types::Remediation;
use crate::utils::ColumnKind;
use tracing::info;

/// A remediation policy.
pub trait Remediator: Send + Sync {
    /// Which registry entry this is.
    fn strategy(&self) -> Strategy;

    /// Produce a new dataset (or ensemble) from `dataset`; the input is never
    /// modified. `mask` must have been computed from `dataset`.
    fn remediate(&self, dataset: &Dataset, mask: &MissingnessMask) -> Result<Remediation>;
}

impl Strategy {
    /// Build the configured implementation of this strategy.
    pub fn remediator(&self, config: &RemediationConfig) -> Box<dyn Remediator> {
        match self {
            Strategy::ListwiseDeletion => Box::new(ListwiseDeletion::from_config(config)),
            Strategy::MeanSubstitution => Box::new(CentralSubstitution::from_config(
                CentralStatistic::Mean,
                config,
            )),
            Strategy::MedianSubstitution => Box::new(CentralSubstitution::from_config(
                CentralStatistic::Median,
                config,
            )),
            Strategy::ModeSubstitution => Box::new(ModeSubstitution::from_config(config)),
            Strategy::RegressionImputation => Box::new(RegressionImputer::from_config(config)),
            Strategy::Locf => Box::new(LocfImputer::from_config(config)),
            Strategy::MaximumLikelihood => Box::new(LikelihoodImputer::from_config(config)),
            Strategy::ExpectationMaximization => Box::new(EmImputer::from_config(config)),
            Strategy::MultipleImputation => Box::new(MultipleImputer::from_config(config)),
        }
    }
}

/// Convenience entry point: validate, compute the mask, dispatch.
pub struct StrategyRunner;

impl StrategyRunner {
    /// Run `config.strategy` against `dataset`.
    pub fn run(dataset: &Dataset, config: &RemediationConfig) -> Result<Remediation> {
        config.validate()?;
        let mask = MissingnessAnalyzer::compute_mask(dataset);
        Self::run_with_mask(dataset, &mask, config)
    }

    /// Run `config.strategy` with a precomputed mask.
    pub fn run_with_mask(
        dataset: &Dataset,
        mask: &MissingnessMask,
        config: &RemediationConfig,
    ) -> Result<Remediation> {
        info!(
            "Running {} on {} rows x {} columns",
            config.strategy,
            dataset.height(),
            dataset.width()
        );
        config.strategy.remediator(config).remediate(dataset, mask)
    }
}

/// Resolve the columns a strategy should touch.
///
/// Explicit names must exist. With no names, every column of an accepted
/// kind is selected.
pub(crate) fn resolve_columns(
    dataset: &Dataset,
    requested: &[String],
    accepted: &[ColumnKind],
) -> Result<Vec<String>> {
    if requested.is_empty() {
        let names = dataset.column_names();
        let mut selected = Vec::with_capacity(names.len());
        for name in names {
            if accepted.contains(&dataset.column_kind(&name)?) {
                selected.push(name);
            }
        }
        return Ok(selected);
    }

    for name in requested {
        dataset.require_column(name)?;
    }
    Ok(requested.to_vec())
}

/// Fail with `UnsupportedColumnType` unless `column` is one of `accepted`.
pub(crate) fn require_kind(
    dataset: &Dataset,
    column: &str,
    accepted: &[ColumnKind],
    strategy: Strategy,
) -> Result<ColumnKind> {
    let kind = dataset.column_kind(column)?;
    if accepted.contains(&kind) {
        Ok(kind)
    } else {
        Err(RemediationError::unsupported(column, kind, strategy.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    #[test]
    fn test_every_strategy_has_a_remediator() {
        let config = RemediationConfig::default();
        for strategy in Strategy::ALL {
            assert_eq!(strategy.remediator(&config).strategy(), strategy);
        }
    }

    #[test]
    fn test_resolve_columns_defaults_to_accepted_kinds() {
        let ds = Dataset::new(
            df![
                "a" => [1.0, 2.0],
                "b" => ["x", "y"],
                "c" => [1i64, 2],
            ]
            .unwrap(),
        );
        let numeric = resolve_columns(&ds, &[], &[ColumnKind::Numeric]).unwrap();
        assert_eq!(numeric, vec!["a".to_string(), "c".to_string()]);

        let missing = resolve_columns(&ds, &["zzz".to_string()], &[ColumnKind::Numeric]);
        assert!(matches!(missing, Err(RemediationError::ColumnNotFound(_))));
    }

    #[test]
    fn test_runner_dispatches_configured_strategy() {
        let ds = Dataset::new(df!["x" => [Some(1.0), None, Some(3.0)]].unwrap());
        let config = RemediationConfig::builder()
            .strategy(Strategy::ListwiseDeletion)
            .build()
            .unwrap();
        let result = StrategyRunner::run(&ds, &config)
            .unwrap()
            .into_single()
            .unwrap();
        assert_eq!(result.provenance.strategy, Strategy::ListwiseDeletion);
        assert_eq!(result.dataset.height(), 2);
    }
}
