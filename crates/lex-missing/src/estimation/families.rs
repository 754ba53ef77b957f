//! Univariate maximum-likelihood fits over observed values.

use crate::error::{RemediationError, Result};
use crate::math::{digamma, ln_gamma, trigamma};
use crate::utils::mean;
use std::f64::consts::PI;

/// Fitted univariate distribution.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct UnivariateFit {
    pub parameters: Vec<(&'static str, f64)>,
    pub log_likelihood: f64,
    /// Expected value of the fitted distribution.
    pub expected_value: f64,
    pub iterations: usize,
    pub converged: bool,
    /// Size of the last iterative step; zero for closed forms.
    pub last_change: f64,
}

impl UnivariateFit {
    fn closed_form(parameters: Vec<(&'static str, f64)>, log_likelihood: f64, expected: f64) -> Self {
        Self {
            parameters,
            log_likelihood,
            expected_value: expected,
            iterations: 0,
            converged: true,
            last_change: 0.0,
        }
    }
}

fn invalid(column: &str, reason: impl Into<String>) -> RemediationError {
    RemediationError::InvalidData {
        column: column.to_string(),
        reason: reason.into(),
    }
}

fn sample_mean(column: &str, x: &[f64]) -> Result<f64> {
    mean(x).ok_or_else(|| RemediationError::AllValuesMissing(column.to_string()))
}

pub(crate) fn fit_normal(column: &str, x: &[f64]) -> Result<UnivariateFit> {
    let mu = sample_mean(column, x)?;
    let n = x.len() as f64;
    let variance = x.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / n;
    if variance <= 0.0 {
        return Err(invalid(column, "observed values have zero variance"));
    }

    let log_likelihood = -0.5 * n * ((2.0 * PI * variance).ln() + 1.0);
    Ok(UnivariateFit::closed_form(
        vec![("mean", mu), ("variance", variance)],
        log_likelihood,
        mu,
    ))
}

pub(crate) fn fit_exponential(column: &str, x: &[f64]) -> Result<UnivariateFit> {
    if x.iter().any(|v| *v < 0.0) {
        return Err(invalid(column, "exponential family needs non-negative values"));
    }
    let mu = sample_mean(column, x)?;
    if mu <= 0.0 {
        return Err(invalid(column, "exponential family needs a positive mean"));
    }

    let rate = 1.0 / mu;
    let n = x.len() as f64;
    let log_likelihood = n * rate.ln() - n;
    Ok(UnivariateFit::closed_form(
        vec![("rate", rate)],
        log_likelihood,
        mu,
    ))
}

pub(crate) fn fit_poisson(column: &str, x: &[f64]) -> Result<UnivariateFit> {
    if x.iter().any(|v| *v < 0.0 || v.fract() != 0.0) {
        return Err(invalid(column, "Poisson family needs non-negative integer counts"));
    }
    let lambda = sample_mean(column, x)?;

    let log_likelihood = x
        .iter()
        .map(|&k| {
            let term = if k > 0.0 { k * lambda.ln() } else { 0.0 };
            term - lambda - ln_gamma(k + 1.0)
        })
        .sum();
    Ok(UnivariateFit::closed_form(
        vec![("rate", lambda)],
        log_likelihood,
        lambda,
    ))
}

/// Gamma(shape k, rate β). The rate has a closed form given the shape; the
/// shape solves ln k − ψ(k) = ln x̄ − mean(ln x) by Newton-Raphson.
pub(crate) fn fit_gamma(
    column: &str,
    x: &[f64],
    tolerance: f64,
    max_iterations: usize,
) -> Result<UnivariateFit> {
    if x.iter().any(|v| *v <= 0.0) {
        return Err(invalid(column, "gamma family needs strictly positive values"));
    }
    let mu = sample_mean(column, x)?;
    let n = x.len() as f64;
    let sum_ln = x.iter().map(|v| v.ln()).sum::<f64>();
    let s = mu.ln() - sum_ln / n;
    if s <= 0.0 {
        return Err(invalid(column, "observed values have zero variance"));
    }

    // Minka's starting point
    let mut shape = (3.0 - s + ((s - 3.0).powi(2) + 24.0 * s).sqrt()) / (12.0 * s);
    let mut iterations = 0;
    let mut converged = false;
    let mut last_change = f64::INFINITY;

    while iterations < max_iterations {
        let f = shape.ln() - digamma(shape) - s;
        let df = 1.0 / shape - trigamma(shape);
        if df.abs() < 1e-15 {
            break;
        }

        let mut next = shape - f / df;
        if next <= 0.0 {
            next = shape / 2.0;
        }
        iterations += 1;

        last_change = (next - shape).abs();
        shape = next;
        if last_change < tolerance {
            converged = true;
            break;
        }
    }

    let rate = shape / mu;
    let log_likelihood =
        n * (shape * rate.ln() - ln_gamma(shape)) + (shape - 1.0) * sum_ln - rate * mu * n;

    Ok(UnivariateFit {
        parameters: vec![("shape", shape), ("rate", rate)],
        log_likelihood,
        expected_value: shape / rate,
        iterations,
        converged,
        last_change,
    })
}
