use crate::config::Strategy;
use crate::dataset::Dataset;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Missingness Summary Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMissingness {
    pub name: String,
    pub missing_count: usize,
    pub missing_percentage: f64,
    /// Every cell of the column is missing; statistics over it are undefined.
    pub fully_missing: bool,
}

/// Counts derived from a [`MissingnessMask`](crate::profiler::MissingnessMask),
/// shaped for a reporting layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingnessSummary {
    pub shape: (usize, usize),
    pub total_missing: usize,
    pub complete_rows: usize,
    pub columns: Vec<ColumnMissingness>,
    pub fully_missing_columns: Vec<String>,
}

// ============================================================================
// Per-Cell Issues
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnresolvedKind {
    /// A predictor needed to impute the cell is itself missing.
    UnresolvedRow,
    /// No earlier observation exists to carry forward.
    UnresolvedLeadingGap,
}

/// A cell the chosen strategy could not resolve. It is left missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellIssue {
    pub row: usize,
    pub column: String,
    pub kind: UnresolvedKind,
}

// ============================================================================
// Remediation Results
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnRemediation {
    pub column: String,
    /// Single statistic written into every missing cell, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub substituted_value: Option<f64>,
    pub cells_replaced: usize,
}

/// What a strategy did and with which parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    pub strategy: Strategy,
    pub parameters: HashMap<String, serde_json::Value>,
    pub rows_removed: usize,
    pub cells_imputed: usize,
    pub columns: Vec<ColumnRemediation>,
    pub steps: Vec<String>,
}

impl Provenance {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            parameters: HashMap::new(),
            rows_removed: 0,
            cells_imputed: 0,
            columns: Vec::new(),
            steps: Vec::new(),
        }
    }

    /// Record a named parameter.
    pub fn parameter(&mut self, key: impl Into<String>, value: impl Serialize) {
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        self.parameters.insert(key.into(), value);
    }

    /// Record a column-level change and add its cells to the running total.
    pub fn column(&mut self, column: ColumnRemediation) {
        self.cells_imputed += column.cells_replaced;
        self.columns.push(column);
    }

    /// Look up the record for one column.
    pub fn column_report(&self, name: &str) -> Option<&ColumnRemediation> {
        self.columns.iter().find(|col| col.column == name)
    }
}

/// A remediated dataset plus how it was produced.
#[derive(Debug, Clone)]
pub struct RemediationResult {
    pub dataset: Dataset,
    pub provenance: Provenance,
    /// Cells left missing, collected instead of failing the whole operation.
    pub unresolved: Vec<CellIssue>,
    /// `Some(false)` when an iterative estimator ran out of budget.
    pub converged: Option<bool>,
}

impl RemediationResult {
    pub fn new(dataset: Dataset, provenance: Provenance) -> Self {
        Self {
            dataset,
            provenance,
            unresolved: Vec::new(),
            converged: None,
        }
    }

    /// Whether every targeted cell was resolved.
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

// ============================================================================
// Multiple Imputation Types
// ============================================================================

/// Rubin's-rules pooled estimate of a column mean across an ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PooledEstimate {
    pub column: String,
    /// Average of the per-dataset estimates (Q̄).
    pub estimate: f64,
    /// Average within-imputation variance (Ū).
    pub within_variance: f64,
    /// Variance of the per-dataset estimates (B).
    pub between_variance: f64,
    /// Ū + (1 + 1/M)·B.
    pub total_variance: f64,
    pub standard_error: f64,
    /// Absent when there is no between-imputation variance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degrees_of_freedom: Option<f64>,
    pub fraction_missing_information: f64,
}

/// M independently completed datasets from one multiple-imputation run.
#[derive(Debug, Clone)]
pub struct ImputationEnsemble {
    pub datasets: Vec<Dataset>,
    pub provenance: Provenance,
    /// Columns the draws filled; pooling reports these.
    pub columns: Vec<String>,
    pub unresolved: Vec<CellIssue>,
}

impl ImputationEnsemble {
    /// Number of completed datasets (M).
    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

/// Output of any strategy: one dataset, or an ensemble of them.
#[derive(Debug, Clone)]
pub enum Remediation {
    Single(RemediationResult),
    Ensemble(ImputationEnsemble),
}

impl Remediation {
    pub fn provenance(&self) -> &Provenance {
        match self {
            Remediation::Single(result) => &result.provenance,
            Remediation::Ensemble(ensemble) => &ensemble.provenance,
        }
    }

    pub fn unresolved(&self) -> &[CellIssue] {
        match self {
            Remediation::Single(result) => &result.unresolved,
            Remediation::Ensemble(ensemble) => &ensemble.unresolved,
        }
    }

    /// The single result, if this is not an ensemble.
    pub fn into_single(self) -> Option<RemediationResult> {
        match self {
            Remediation::Single(result) => Some(result),
            Remediation::Ensemble(_) => None,
        }
    }

    /// The ensemble, if this came from multiple imputation.
    pub fn into_ensemble(self) -> Option<ImputationEnsemble> {
        match self {
            Remediation::Single(_) => None,
            Remediation::Ensemble(ensemble) => Some(ensemble),
        }
    }
}

static_assertions::assert_impl_all!(RemediationResult: Send, Sync);
static_assertions::assert_impl_all!(ImputationEnsemble: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provenance_accumulates_cells() {
        let mut provenance = Provenance::new(Strategy::MeanSubstitution);
        provenance.column(ColumnRemediation {
            column: "a".to_string(),
            substituted_value: Some(3.5),
            cells_replaced: 2,
        });
        provenance.column(ColumnRemediation {
            column: "b".to_string(),
            substituted_value: None,
            cells_replaced: 5,
        });
        provenance.parameter("tolerance", 1e-6);

        assert_eq!(provenance.cells_imputed, 7);
        assert_eq!(
            provenance.column_report("a").unwrap().substituted_value,
            Some(3.5)
        );
        assert_eq!(provenance.parameters["tolerance"], serde_json::json!(1e-6));
    }

    #[test]
    fn test_cell_issue_serialization() {
        let issue = CellIssue {
            row: 0,
            column: "Ozone".to_string(),
            kind: UnresolvedKind::UnresolvedLeadingGap,
        };
        let json = serde_json::to_string(&issue).unwrap();
        assert!(json.contains("UnresolvedLeadingGap"));
        assert!(json.contains("Ozone"));
    }
}
