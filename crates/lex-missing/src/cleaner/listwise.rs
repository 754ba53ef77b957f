//! Listwise deletion: keep complete cases only.

use crate::config::{RemediationConfig, Strategy};
use crate::dataset::Dataset;
use crate::error::Result;
use crate::profiler::{MissingnessAnalyzer, MissingnessMask};
use crate::strategy::Remediator;
use crate::types::{Provenance, Remediation, RemediationResult};
use polars::prelude::*;
use tracing::info;

/// Removes every row with a missing cell in the considered columns.
///
/// Row order is preserved. Removing every row is valid and yields an empty
/// dataset with the original schema.
pub struct ListwiseDeletion {
    /// Columns considered for completeness; empty means all.
    columns: Vec<String>,
}

impl ListwiseDeletion {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    pub fn from_config(config: &RemediationConfig) -> Self {
        Self::new(config.columns.clone())
    }
}

impl Remediator for ListwiseDeletion {
    fn strategy(&self) -> Strategy {
        Strategy::ListwiseDeletion
    }

    fn remediate(&self, dataset: &Dataset, mask: &MissingnessMask) -> Result<Remediation> {
        mask.ensure_matches(dataset)?;

        let complete = if self.columns.is_empty() {
            MissingnessAnalyzer::row_complete(mask)
        } else {
            MissingnessAnalyzer::row_complete_over(mask, &self.columns)?
        };

        let keep = BooleanChunked::from_slice("complete".into(), &complete);
        let frame = dataset.frame().filter(&keep)?;
        let rows_removed = dataset.height() - frame.height();

        let mut provenance = Provenance::new(Strategy::ListwiseDeletion);
        provenance.rows_removed = rows_removed;
        provenance.parameter("considered_columns", &self.columns);
        provenance.steps.push(format!(
            "Removed {} incomplete row(s), kept {}",
            rows_removed,
            frame.height()
        ));

        info!(
            "Listwise deletion removed {} of {} rows",
            rows_removed,
            dataset.height()
        );

        Ok(Remediation::Single(RemediationResult::new(
            Dataset::new(frame),
            provenance,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn run(ds: &Dataset, columns: Vec<String>) -> RemediationResult {
        let mask = MissingnessAnalyzer::compute_mask(ds);
        ListwiseDeletion::new(columns)
            .remediate(ds, &mask)
            .unwrap()
            .into_single()
            .unwrap()
    }

    #[test]
    fn test_removes_incomplete_rows_preserving_order() {
        let ds = Dataset::new(
            df![
                "a" => [Some(1.0), None, Some(3.0), Some(4.0)],
                "b" => [Some("w"), Some("x"), None, Some("z")],
            ]
            .unwrap(),
        );
        let result = run(&ds, Vec::new());

        assert_eq!(result.dataset.height(), 2);
        assert_eq!(result.provenance.rows_removed, 2);
        let a = result.dataset.numeric_values("a").unwrap();
        assert_eq!(a, vec![Some(1.0), Some(4.0)]);

        let after = MissingnessAnalyzer::compute_mask(&result.dataset);
        assert_eq!(MissingnessAnalyzer::count_total(&after), 0);
    }

    #[test]
    fn test_idempotent() {
        let ds = Dataset::new(
            df![
                "a" => [Some(1.0), None, Some(3.0)],
                "b" => [Some(1i64), Some(2), None],
            ]
            .unwrap(),
        );
        let once = run(&ds, Vec::new());
        let twice = run(&once.dataset, Vec::new());

        assert!(once.dataset.equals(&twice.dataset));
        assert_eq!(twice.provenance.rows_removed, 0);
    }

    #[test]
    fn test_all_rows_removed_is_valid() {
        let ds = Dataset::new(
            df![
                "a" => [None, Some(2.0)],
                "b" => [Some(1.0), None],
            ]
            .unwrap(),
        );
        let result = run(&ds, Vec::new());
        assert_eq!(result.dataset.height(), 0);
        assert_eq!(result.dataset.column_names(), vec!["a", "b"]);
        assert_eq!(result.provenance.rows_removed, 2);
    }

    #[test]
    fn test_subset_of_columns() {
        let ds = Dataset::new(
            df![
                "a" => [None, Some(2.0), Some(3.0)],
                "b" => [Some(1.0), None, Some(3.0)],
            ]
            .unwrap(),
        );
        let result = run(&ds, vec!["a".to_string()]);
        assert_eq!(result.dataset.height(), 2);
        assert_eq!(result.provenance.rows_removed, 1);
    }

    #[test]
    fn test_input_not_mutated() {
        let ds = Dataset::new(df!["a" => [None, Some(2.0)]].unwrap());
        let before = ds.clone();
        let _ = run(&ds, Vec::new());
        assert!(ds.equals(&before));
    }
}
