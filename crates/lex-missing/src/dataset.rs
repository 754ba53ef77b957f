//! Column-oriented dataset handed to the engine by an external loader.
//!
//! A [`Dataset`] wraps a polars [`DataFrame`]. Polars null is the missing
//! marker; a floating `NaN` is an ordinary value produced by undefined
//! arithmetic and is never treated as missing. Datasets are never mutated in
//! place: strategies build new frames and wrap them in new datasets, so the
//! original stays available for comparison runs.

use crate::error::{RemediationError, Result};
use crate::utils::{ColumnKind, column_kind, first_non_finite, numeric_values};
use polars::prelude::*;

/// Immutable table of named, typed columns of equal length.
#[derive(Debug, Clone)]
pub struct Dataset {
    frame: DataFrame,
}

impl Dataset {
    /// Wrap a frame produced by a loader.
    pub fn new(frame: DataFrame) -> Self {
        Self { frame }
    }

    /// Build a dataset from columns; polars enforces equal lengths and unique names.
    pub fn from_columns(columns: Vec<Column>) -> Result<Self> {
        Ok(Self::new(DataFrame::new(columns)?))
    }

    /// Number of rows (N).
    pub fn height(&self) -> usize {
        self.frame.height()
    }

    /// Number of columns (M).
    pub fn width(&self) -> usize {
        self.frame.width()
    }

    /// Column names, in order.
    pub fn column_names(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect()
    }

    /// Borrow the underlying frame.
    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    /// Take ownership of the underlying frame.
    pub fn into_frame(self) -> DataFrame {
        self.frame
    }

    /// Look up a column, failing with `ColumnNotFound`.
    pub fn require_column(&self, name: &str) -> Result<&Series> {
        self.frame
            .column(name)
            .map(|col| col.as_materialized_series())
            .map_err(|_| RemediationError::ColumnNotFound(name.to_string()))
    }

    /// Kind of the named column.
    pub fn column_kind(&self, name: &str) -> Result<ColumnKind> {
        Ok(column_kind(self.require_column(name)?.dtype()))
    }

    /// Names of every numeric column, in order.
    pub fn numeric_column_names(&self) -> Vec<String> {
        self.frame
            .get_columns()
            .iter()
            .filter(|col| column_kind(col.dtype()) == ColumnKind::Numeric)
            .map(|col| col.name().to_string())
            .collect()
    }

    /// Cells of a numeric column as `Option<f64>`; `None` marks a missing cell.
    pub fn numeric_values(&self, name: &str) -> Result<Vec<Option<f64>>> {
        let series = self.require_column(name)?;
        if column_kind(series.dtype()) != ColumnKind::Numeric {
            return Err(RemediationError::unsupported(
                name,
                column_kind(series.dtype()),
                "numeric extraction",
            ));
        }
        Ok(numeric_values(series)?)
    }

    /// Like [`numeric_values`](Self::numeric_values), but rejects `NaN` and
    /// infinite observations with `InvalidData`.
    pub fn finite_numeric_values(&self, name: &str) -> Result<Vec<Option<f64>>> {
        let values = self.numeric_values(name)?;
        if let Some((row, value)) = first_non_finite(&values) {
            return Err(RemediationError::InvalidData {
                column: name.to_string(),
                reason: format!("non-finite value {} at row {}", value, row),
            });
        }
        Ok(values)
    }

    /// Copy of this dataset with some columns swapped for new series.
    ///
    /// Replacement series must keep the column name and height; column order
    /// is preserved.
    pub fn with_replaced(&self, replacements: Vec<Series>) -> Result<Self> {
        let mut columns: Vec<Column> = self.frame.get_columns().to_vec();
        for series in replacements {
            let position = columns
                .iter()
                .position(|col| col.name() == series.name())
                .ok_or_else(|| RemediationError::ColumnNotFound(series.name().to_string()))?;
            columns[position] = Column::from(series);
        }
        Self::from_columns(columns)
    }

    /// Null-aware structural equality (names, dtypes and every cell).
    pub fn equals(&self, other: &Dataset) -> bool {
        self.frame.equals_missing(&other.frame)
    }
}

impl From<DataFrame> for Dataset {
    fn from(frame: DataFrame) -> Self {
        Self::new(frame)
    }
}

// Strategies run dataset reads on rayon workers.
static_assertions::assert_impl_all!(Dataset: Send, Sync);
