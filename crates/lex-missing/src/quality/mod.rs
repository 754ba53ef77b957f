//! Checks on remediation quality.

mod sensitivity;

pub use sensitivity::{
    ColumnSensitivity, SensitivityAnalyzer, SensitivityReport, StrategyEstimate, StrategyOutcome,
};
