//! Dataset-shaped boolean grid of missing cells.

use crate::dataset::Dataset;
use crate::error::{RemediationError, Result};
use serde::Serialize;

/// `cells[c][r] == true` iff cell `(r, c)` is missing.
///
/// The mask remembers the column names, dtypes and height of the dataset it
/// was computed from, so it can refuse to be applied to a different one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingnessMask {
    columns: Vec<String>,
    dtypes: Vec<String>,
    height: usize,
    cells: Vec<Vec<bool>>,
}

impl MissingnessMask {
    pub(crate) fn new(
        columns: Vec<String>,
        dtypes: Vec<String>,
        height: usize,
        cells: Vec<Vec<bool>>,
    ) -> Self {
        debug_assert_eq!(columns.len(), cells.len());
        debug_assert!(cells.iter().all(|col| col.len() == height));
        Self {
            columns,
            dtypes,
            height,
            cells,
        }
    }

    /// Number of rows (N).
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of columns (M).
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Column names, in dataset order.
    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// Position of a column in the mask.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col == name)
    }

    /// Missing flags of one column, by position.
    pub fn column_at(&self, index: usize) -> &[bool] {
        &self.cells[index]
    }

    /// Missing flags of one column, by name.
    pub fn column(&self, name: &str) -> Result<&[bool]> {
        self.column_index(name)
            .map(|idx| self.column_at(idx))
            .ok_or_else(|| RemediationError::ColumnNotFound(name.to_string()))
    }

    /// Whether cell `(row, col)` is missing.
    pub fn is_missing(&self, row: usize, col: usize) -> bool {
        self.cells[col][row]
    }

    /// Missing flags of one row, across every column.
    pub fn row(&self, row: usize) -> Vec<bool> {
        self.cells.iter().map(|col| col[row]).collect()
    }

    /// Fail unless this mask was computed from a dataset shaped like `dataset`.
    pub fn ensure_matches(&self, dataset: &Dataset) -> Result<()> {
        if self.height != dataset.height() {
            return Err(RemediationError::MaskShapeMismatch(format!(
                "mask has {} rows, dataset has {}",
                self.height,
                dataset.height()
            )));
        }

        let names = dataset.column_names();
        if names != self.columns {
            return Err(RemediationError::MaskShapeMismatch(format!(
                "mask columns {:?} differ from dataset columns {:?}",
                self.columns, names
            )));
        }

        let dtypes: Vec<String> = dataset
            .frame()
            .get_columns()
            .iter()
            .map(|col| format!("{:?}", col.dtype()))
            .collect();
        if dtypes != self.dtypes {
            return Err(RemediationError::MaskShapeMismatch(
                "column types differ from the dataset the mask was computed from".to_string(),
            ));
        }

        Ok(())
    }
}

static_assertions::assert_impl_all!(MissingnessMask: Send, Sync);
