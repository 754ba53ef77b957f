//! Last observation carried forward.

use crate::config::{RemediationConfig, Strategy};
use crate::dataset::Dataset;
use crate::error::{RemediationError, Result};
use crate::profiler::MissingnessMask;
use crate::strategy::{Remediator, resolve_columns};
use crate::types::{
    CellIssue, ColumnRemediation, Provenance, Remediation, RemediationResult, UnresolvedKind,
};
use crate::utils::ColumnKind;
use polars::prelude::*;
use rayon::prelude::*;
use tracing::{debug, info, warn};

const ANY_KIND: [ColumnKind; 4] = [
    ColumnKind::Numeric,
    ColumnKind::Categorical,
    ColumnKind::Temporal,
    ColumnKind::Other,
];

/// Fills each missing cell with the nearest preceding observed value in the
/// same column. Row order is the sequence order.
///
/// Cells before a column's first observation stay missing and are reported
/// as [`UnresolvedKind::UnresolvedLeadingGap`]. Column dtypes are preserved.
pub struct LocfImputer {
    columns: Vec<String>,
    strict: bool,
}

impl LocfImputer {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            strict: false,
        }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn from_config(config: &RemediationConfig) -> Self {
        Self::new(config.columns.clone()).strict(config.strict_unresolved)
    }
}

struct CarriedColumn {
    series: Series,
    replaced: usize,
    leading_gap: usize,
}

fn carry_forward(series: &Series, flags: &[bool]) -> Result<CarriedColumn> {
    let leading_gap = flags.iter().take_while(|&&missing| missing).count();
    let missing = flags.iter().filter(|&&m| m).count();

    let series = if missing > leading_gap {
        series.fill_null(FillNullStrategy::Forward(None))?
    } else {
        series.clone()
    };

    Ok(CarriedColumn {
        series,
        replaced: missing - leading_gap,
        leading_gap,
    })
}

impl Remediator for LocfImputer {
    fn strategy(&self) -> Strategy {
        Strategy::Locf
    }

    fn remediate(&self, dataset: &Dataset, mask: &MissingnessMask) -> Result<Remediation> {
        mask.ensure_matches(dataset)?;
        let columns = resolve_columns(dataset, &self.columns, &ANY_KIND)?;

        let carried = columns
            .par_iter()
            .map(|name| {
                let series = dataset.require_column(name)?;
                let flags = mask.column(name)?;
                carry_forward(series, flags).map(|c| (name.clone(), c))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut provenance = Provenance::new(Strategy::Locf);
        provenance.parameter("order", "row index");
        let mut unresolved = Vec::new();
        let mut replacements = Vec::new();

        for (name, column) in carried {
            if column.leading_gap > 0 {
                debug!(
                    "'{}' has {} leading missing cell(s) with nothing to carry",
                    name, column.leading_gap
                );
                unresolved.extend((0..column.leading_gap).map(|row| CellIssue {
                    row,
                    column: name.clone(),
                    kind: UnresolvedKind::UnresolvedLeadingGap,
                }));
            }
            if column.replaced > 0 {
                provenance.steps.push(format!(
                    "Carried forward {} cell(s) in '{}'",
                    column.replaced, name
                ));
                provenance.column(ColumnRemediation {
                    column: name,
                    substituted_value: None,
                    cells_replaced: column.replaced,
                });
                replacements.push(column.series);
            }
        }

        if !unresolved.is_empty() {
            warn!("{} leading gap cell(s) left missing", unresolved.len());
            if self.strict {
                return Err(RemediationError::UnresolvedCells {
                    strategy: Strategy::Locf.to_string(),
                    count: unresolved.len(),
                });
            }
        }

        info!(
            "LOCF filled {} cell(s) across {} column(s)",
            provenance.cells_imputed,
            provenance.columns.len()
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
    use pretty_assertions::assert_eq;

    fn run(ds: &Dataset, imputer: LocfImputer) -> Result<RemediationResult> {
        let mask = MissingnessAnalyzer::compute_mask(ds);
        imputer.remediate(ds, &mask).map(|r| r.into_single().unwrap())
    }

    // ========================================================================
    // Carry-forward behavior
    // ========================================================================

    #[test]
    fn test_fills_from_nearest_preceding_value() {
        let ds = Dataset::new(
            df!["t" => [Some(1.0), None, None, Some(4.0), None]].unwrap(),
        );
        let result = run(&ds, LocfImputer::new(Vec::new())).unwrap();

        let t = result.dataset.numeric_values("t").unwrap();
        assert_eq!(t, vec![Some(1.0), Some(1.0), Some(1.0), Some(4.0), Some(4.0)]);
        assert_eq!(result.provenance.cells_imputed, 3);
        assert!(result.is_complete());
    }

    #[test]
    fn test_leading_gap_reported_not_guessed() {
        let ds = Dataset::new(df!["t" => [None, None, Some(3i64), None]].unwrap());
        let result = run(&ds, LocfImputer::new(Vec::new())).unwrap();

        let t = result.dataset.numeric_values("t").unwrap();
        assert_eq!(t, vec![None, None, Some(3.0), Some(3.0)]);

        let rows: Vec<usize> = result.unresolved.iter().map(|i| i.row).collect();
        assert_eq!(rows, vec![0, 1]);
        assert!(
            result
                .unresolved
                .iter()
                .all(|i| i.kind == UnresolvedKind::UnresolvedLeadingGap)
        );
    }

    #[test]
    fn test_preserves_dtype_and_categorical_values() {
        let ds = Dataset::new(
            df![
                "n" => [Some(1i64), None],
                "s" => [Some("low"), None],
            ]
            .unwrap(),
        );
        let result = run(&ds, LocfImputer::new(Vec::new())).unwrap();

        let frame = result.dataset.frame();
        assert_eq!(frame.column("n").unwrap().dtype(), &DataType::Int64);
        let s = frame.column("s").unwrap();
        assert_eq!(s.get(1).unwrap(), AnyValue::String("low"));
    }

    #[test]
    fn test_never_alters_observed_cells() {
        let ds = Dataset::new(
            df!["t" => [Some(5.0), Some(f64::NAN), None, Some(2.0)]].unwrap(),
        );
        let result = run(&ds, LocfImputer::new(Vec::new())).unwrap();
        let t = result.dataset.numeric_values("t").unwrap();

        assert_eq!(t[0], Some(5.0));
        // NaN is an observation and is carried like any other value
        assert!(t[1].unwrap().is_nan());
        assert!(t[2].unwrap().is_nan());
        assert_eq!(t[3], Some(2.0));
    }

    #[test]
    fn test_strict_escalates_leading_gap() {
        let ds = Dataset::new(df!["t" => [None, Some(1.0)]].unwrap());
        let err = run(&ds, LocfImputer::new(Vec::new()).strict(true)).unwrap_err();
        assert!(matches!(err, RemediationError::UnresolvedCells { count: 1, .. }));
    }
}
