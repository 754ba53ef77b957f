//! Shared utilities for the remediation engine.
//!
//! This module contains dtype classification, numeric extraction and the small
//! descriptive statistics every strategy reuses.

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// =============================================================================
// Data Type Utilities
// =============================================================================

/// Scalar kind of a column, as far as remediation strategies care.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnKind {
    /// Integer or floating point numbers
    Numeric,
    /// String, categorical or boolean values
    Categorical,
    /// Date, datetime, time or duration values (naturally ordered)
    Temporal,
    /// Anything else (nested, binary, object)
    Other,
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnKind::Numeric => "numeric",
            ColumnKind::Categorical => "categorical",
            ColumnKind::Temporal => "temporal",
            ColumnKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Check if a DataType is numeric (integer or float).
#[inline]
pub fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

/// Check if a DataType is a temporal type.
#[inline]
pub fn is_temporal_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Datetime(_, _) | DataType::Date | DataType::Time | DataType::Duration(_)
    )
}

/// Get the [`ColumnKind`] of a DataType.
pub fn column_kind(dtype: &DataType) -> ColumnKind {
    if is_numeric_dtype(dtype) {
        ColumnKind::Numeric
    } else if is_temporal_dtype(dtype) {
        ColumnKind::Temporal
    } else if matches!(
        dtype,
        DataType::String | DataType::Boolean | DataType::Categorical(_, _)
    ) {
        ColumnKind::Categorical
    } else {
        ColumnKind::Other
    }
}

// =============================================================================
// Numeric Extraction
// =============================================================================

/// Extract a numeric Series as `Option<f64>` cells; `None` is a missing cell.
///
/// A stored `NaN` stays `Some(NaN)`: it is a value, not a missing marker.
pub fn numeric_values(series: &Series) -> PolarsResult<Vec<Option<f64>>> {
    let casted = series.cast(&DataType::Float64)?;
    Ok(casted.f64()?.into_iter().collect())
}

/// Build a Float64 Series from optional cells.
pub fn float_series(name: &str, values: Vec<Option<f64>>) -> Series {
    Series::new(name.into(), values)
}

/// Fill null values in a numeric Series with a specific value.
///
/// The result is always Float64; non-null values are kept bit for bit.
pub fn fill_numeric_nulls(series: &Series, fill_value: f64) -> PolarsResult<Series> {
    let filled: Vec<Option<f64>> = numeric_values(series)?
        .into_iter()
        .map(|value| Some(value.unwrap_or(fill_value)))
        .collect();

    Ok(Series::new(series.name().clone(), filled))
}

// =============================================================================
// Descriptive Statistics
// =============================================================================

/// Observed (non-missing) values, in row order.
pub fn observed(values: &[Option<f64>]) -> Vec<f64> {
    values.iter().flatten().copied().collect()
}

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Median (average of the two middle values for even lengths).
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Unbiased sample variance, `None` with fewer than two values.
pub fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some(ss / (values.len() - 1) as f64)
}

/// Sample standard deviation.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    sample_variance(values).map(f64::sqrt)
}

/// First non-finite observed value, if any. Model-based strategies reject
/// these since a single `NaN` poisons every fitted parameter.
pub fn first_non_finite(values: &[Option<f64>]) -> Option<(usize, f64)> {
    values
        .iter()
        .enumerate()
        .find_map(|(row, v)| v.filter(|x| !x.is_finite()).map(|x| (row, x)))
}

// =============================================================================
// Mode
// =============================================================================

/// Row index of a representative of the most frequent non-null value.
///
/// Ties go to the value that appears first. Works for every dtype because
/// values are compared through their display form.
pub fn mode_row_index(series: &Series) -> PolarsResult<Option<usize>> {
    let mask = series.is_null();
    // value -> (count, first row)
    let mut value_counts: HashMap<String, (usize, usize)> = HashMap::new();

    for (row, is_null) in mask.into_iter().enumerate() {
        if is_null.unwrap_or(false) {
            continue;
        }
        let key = format!("{}", series.get(row)?);
        value_counts
            .entry(key)
            .and_modify(|(count, _)| *count += 1)
            .or_insert((1, row));
    }

    Ok(value_counts
        .into_values()
        .max_by(|(count_a, row_a), (count_b, row_b)| {
            count_a.cmp(count_b).then_with(|| row_b.cmp(row_a))
        })
        .map(|(_, row)| row))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_kind() {
        assert_eq!(column_kind(&DataType::Int64), ColumnKind::Numeric);
        assert_eq!(column_kind(&DataType::Float32), ColumnKind::Numeric);
        assert_eq!(column_kind(&DataType::Date), ColumnKind::Temporal);
        assert_eq!(column_kind(&DataType::String), ColumnKind::Categorical);
        assert_eq!(column_kind(&DataType::Boolean), ColumnKind::Categorical);
    }

    #[test]
    fn test_numeric_values_keeps_nan_distinct_from_null() {
        let series = Series::new("x".into(), &[Some(1.0), None, Some(f64::NAN)]);
        let values = numeric_values(&series).unwrap();
        assert_eq!(values[0], Some(1.0));
        assert_eq!(values[1], None);
        assert!(values[2].unwrap().is_nan());
    }

    #[test]
    fn test_fill_numeric_nulls() {
        let series = Series::new("test".into(), &[Some(1i64), None, Some(3)]);
        let filled = fill_numeric_nulls(&series, 2.5).unwrap();

        assert_eq!(filled.dtype(), &DataType::Float64);
        assert_eq!(filled.null_count(), 0);
        assert_eq!(filled.get(1).unwrap().try_extract::<f64>().unwrap(), 2.5);
        assert_eq!(filled.get(2).unwrap().try_extract::<f64>().unwrap(), 3.0);
    }

    #[test]
    fn test_mean_and_median() {
        assert_eq!(mean(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]), Some(3.5));
        assert_eq!(median(&[5.0, 1.0, 3.0]), Some(3.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(mean(&[]), None);
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_sample_variance() {
        assert_eq!(sample_variance(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), Some(32.0 / 7.0));
        assert_eq!(sample_variance(&[1.0]), None);
    }

    #[test]
    fn test_mode_row_index_prefers_first_on_tie() {
        let series = Series::new("c".into(), &[None, Some("b"), Some("a"), Some("a"), Some("b")]);
        // "b" and "a" both appear twice; "b" appears first
        assert_eq!(mode_row_index(&series).unwrap(), Some(1));

        let series = Series::new("c".into(), &[Some("x"), Some("y"), Some("y")]);
        assert_eq!(mode_row_index(&series).unwrap(), Some(1));
    }

    #[test]
    fn test_mode_row_index_all_null() {
        let series = Series::new("c".into(), &[Option::<&str>::None, None]);
        assert_eq!(mode_row_index(&series).unwrap(), None);
    }
}
