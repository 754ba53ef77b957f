//! Custom error types for the remediation engine.
//!
//! Structural failures (wrong column kind, nothing observed, too few complete
//! cases) abort a single strategy invocation. Per-cell conditions are not
//! errors: they travel with the partially remediated dataset as
//! [`CellIssue`](crate::types::CellIssue)s unless the caller asked for strict
//! handling.
//!
//! Errors are serializable so a reporting layer can forward them as
//! `{code, message}` pairs.

use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

/// The main error type for the remediation engine.
#[derive(Error, Debug)]
pub enum RemediationError {
    /// Strategy applied to a column kind it cannot handle.
    #[error("Strategy '{strategy}' does not support column '{column}' of kind {kind}")]
    UnsupportedColumnType {
        column: String,
        kind: String,
        strategy: String,
    },

    /// No observed value to compute a statistic from.
    #[error("All values in column '{0}' are missing")]
    AllValuesMissing(String),

    /// Regression lacks enough complete rows to fit a model.
    #[error(
        "Insufficient complete cases for column '{column}': need at least {required}, found {available}"
    )]
    InsufficientCompleteCases {
        column: String,
        required: usize,
        available: usize,
    },

    /// Cells left unresolved while strict handling was requested.
    #[error("{count} cell(s) could not be resolved by '{strategy}'")]
    UnresolvedCells { strategy: String, count: usize },

    /// Iterative estimation exhausted its budget while strict convergence was requested.
    #[error("No convergence after {iterations} iterations (last change {last_change:e})")]
    NonConvergence { iterations: usize, last_change: f64 },

    /// Column was not found in the dataset.
    #[error("Column '{0}' not found in dataset")]
    ColumnNotFound(String),

    /// Mask was computed from a structurally different dataset.
    #[error("Missingness mask does not match dataset: {0}")]
    MaskShapeMismatch(String),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Observed data violates a precondition of the chosen model.
    #[error("Invalid data in column '{column}': {reason}")]
    InvalidData { column: String, reason: String },

    /// Internal error (e.g., a numerically singular system).
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<RemediationError>,
    },
}

impl RemediationError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        RemediationError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Stable error code for callers that branch on the failure kind.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnsupportedColumnType { .. } => "UNSUPPORTED_COLUMN_TYPE",
            Self::AllValuesMissing(_) => "ALL_VALUES_MISSING",
            Self::InsufficientCompleteCases { .. } => "INSUFFICIENT_COMPLETE_CASES",
            Self::UnresolvedCells { .. } => "UNRESOLVED_CELLS",
            Self::NonConvergence { .. } => "NON_CONVERGENCE",
            Self::ColumnNotFound(_) => "COLUMN_NOT_FOUND",
            Self::MaskShapeMismatch(_) => "MASK_SHAPE_MISMATCH",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::InvalidData { .. } => "INVALID_DATA",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Polars(_) => "POLARS_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }

    /// Check if this error is structural, i.e. retrying the same strategy on
    /// the same input cannot succeed.
    pub fn is_structural(&self) -> bool {
        match self {
            Self::UnsupportedColumnType { .. }
            | Self::AllValuesMissing(_)
            | Self::InsufficientCompleteCases { .. }
            | Self::ColumnNotFound(_)
            | Self::MaskShapeMismatch(_) => true,
            Self::WithContext { source, .. } => source.is_structural(),
            _ => false,
        }
    }

    pub(crate) fn unsupported(column: &str, kind: impl ToString, strategy: &str) -> Self {
        Self::UnsupportedColumnType {
            column: column.to_string(),
            kind: kind.to_string(),
            strategy: strategy.to_string(),
        }
    }
}

/// Errors are serialized as a struct with `code` and `message` fields.
impl Serialize for RemediationError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("RemediationError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for remediation operations.
pub type Result<T> = std::result::Result<T, RemediationError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, polars::error::PolarsError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| RemediationError::Polars(e).with_context(context))
    }
}
