//! Missingness profiling.
//!
//! This module computes the cell-level missingness mask of a dataset and
//! every count derived from it:
//! - per-column and total missing counts
//! - row completeness (over all columns or a subset)
//! - fully-missing column detection

mod mask;

pub use mask::MissingnessMask;

use crate::dataset::Dataset;
use crate::error::Result;
use crate::types::{ColumnMissingness, MissingnessSummary};
use rayon::prelude::*;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Computes missingness masks and the counts derived from them.
pub struct MissingnessAnalyzer;

impl MissingnessAnalyzer {
    /// Compute the N×M mask of missing cells. O(N×M); columns are scanned in
    /// parallel.
    pub fn compute_mask(dataset: &Dataset) -> MissingnessMask {
        let columns = dataset.frame().get_columns();
        let cells: Vec<Vec<bool>> = columns
            .par_iter()
            .map(|col| {
                col.as_materialized_series()
                    .is_null()
                    .into_iter()
                    .map(|flag| flag.unwrap_or(false))
                    .collect()
            })
            .collect();

        let names = dataset.column_names();
        let dtypes = columns
            .iter()
            .map(|col| format!("{:?}", col.dtype()))
            .collect();

        let mask = MissingnessMask::new(names, dtypes, dataset.height(), cells);
        debug!(
            "Computed missingness mask: {} rows x {} columns, {} missing",
            mask.height(),
            mask.width(),
            Self::count_total(&mask)
        );
        mask
    }

    /// Missing count per column name.
    pub fn count_per_column(mask: &MissingnessMask) -> HashMap<String, usize> {
        mask.column_names()
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), count(mask.column_at(idx))))
            .collect()
    }

    /// Total number of missing cells.
    pub fn count_total(mask: &MissingnessMask) -> usize {
        (0..mask.width()).map(|idx| count(mask.column_at(idx))).sum()
    }

    /// Per-row completeness over every column.
    pub fn row_complete(mask: &MissingnessMask) -> Vec<bool> {
        let all: Vec<usize> = (0..mask.width()).collect();
        row_complete_at(mask, &all)
    }

    /// Per-row completeness over the named columns only.
    pub fn row_complete_over(mask: &MissingnessMask, columns: &[String]) -> Result<Vec<bool>> {
        let indices = columns
            .iter()
            .map(|name| {
                mask.column_index(name)
                    .ok_or_else(|| crate::error::RemediationError::ColumnNotFound(name.clone()))
            })
            .collect::<Result<Vec<usize>>>()?;
        Ok(row_complete_at(mask, &indices))
    }

    /// Columns in which every cell is missing (for a non-empty dataset).
    ///
    /// Such columns have no observed data to compute a statistic from and are
    /// flagged rather than handed silently to mean or regression strategies.
    pub fn fully_missing_columns(mask: &MissingnessMask) -> Vec<String> {
        if mask.height() == 0 {
            return Vec::new();
        }
        mask.column_names()
            .iter()
            .enumerate()
            .filter(|(idx, _)| count(mask.column_at(*idx)) == mask.height())
            .map(|(_, name)| {
                warn!("Column '{}' is entirely missing", name);
                name.clone()
            })
            .collect()
    }

    /// Summary counts for reporting.
    pub fn summarize(mask: &MissingnessMask) -> MissingnessSummary {
        let height = mask.height();
        let columns: Vec<ColumnMissingness> = mask
            .column_names()
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let missing_count = count(mask.column_at(idx));
                ColumnMissingness {
                    name: name.clone(),
                    missing_count,
                    missing_percentage: if height > 0 {
                        (missing_count as f64 / height as f64) * 100.0
                    } else {
                        0.0
                    },
                    fully_missing: height > 0 && missing_count == height,
                }
            })
            .collect();

        MissingnessSummary {
            shape: (height, mask.width()),
            total_missing: columns.iter().map(|col| col.missing_count).sum(),
            complete_rows: count(&Self::row_complete(mask)),
            fully_missing_columns: Self::fully_missing_columns(mask),
            columns,
        }
    }
}

fn count(flags: &[bool]) -> usize {
    flags.iter().filter(|&&flag| flag).count()
}

fn row_complete_at(mask: &MissingnessMask, columns: &[usize]) -> Vec<bool> {
    (0..mask.height())
        .map(|row| columns.iter().all(|&col| !mask.is_missing(row, col)))
        .collect()
}
