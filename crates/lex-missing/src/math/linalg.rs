//! Dense linear algebra on top of nalgebra.
//!
//! Least-squares fits go through the normal equations, solved by QR with an
//! SVD fallback for rank-deficient systems. Covariance blocks are inverted by
//! Cholesky, with a small diagonal ridge when a block is not positive
//! definite.

use nalgebra::{DMatrix, DVector};

/// Ridge added to the diagonal of a covariance block that fails Cholesky.
pub const COVARIANCE_RIDGE: f64 = 1e-9;

/// Ordinary least-squares fit with an intercept.
#[derive(Debug, Clone)]
pub struct OlsFit {
    /// Intercept first, then one coefficient per predictor.
    pub coefficients: Vec<f64>,
    /// (X'X)⁻¹ of the design matrix with intercept column.
    pub xtx_inverse: DMatrix<f64>,
    pub residual_sum_of_squares: f64,
    /// RSS / (n − p − 1); zero when there are no residual degrees of freedom.
    pub residual_variance: f64,
    pub observations: usize,
}

impl OlsFit {
    /// Residual degrees of freedom n − p − 1.
    pub fn residual_df(&self) -> usize {
        self.observations.saturating_sub(self.coefficients.len())
    }

    /// Predict the response for one row of predictor values.
    pub fn predict(&self, predictors: &[f64]) -> f64 {
        predict_with(&self.coefficients, predictors)
    }
}

/// Evaluate `b0 + Σ bi·xi`.
pub fn predict_with(coefficients: &[f64], predictors: &[f64]) -> f64 {
    coefficients[0]
        + coefficients[1..]
            .iter()
            .zip(predictors)
            .map(|(b, x)| b * x)
            .sum::<f64>()
}

/// Fit `y ~ 1 + x` by least squares. `rows[i]` holds the predictors of
/// observation `i`. Returns `None` when the system cannot be solved.
pub fn ols(rows: &[Vec<f64>], y: &[f64]) -> Option<OlsFit> {
    let n = rows.len();
    if n == 0 || n != y.len() {
        return None;
    }
    let p = rows[0].len() + 1;

    let design = DMatrix::from_fn(n, p, |i, j| if j == 0 { 1.0 } else { rows[i][j - 1] });
    let response = DVector::from_column_slice(y);

    let xtx = design.transpose() * &design;
    let xty = design.transpose() * &response;

    let beta = solve(&xtx, &xty)?;
    let xtx_inverse = invert(&xtx)?;

    let fitted = &design * &beta;
    let residual_sum_of_squares: f64 = (&response - fitted).iter().map(|r| r * r).sum();
    let df = n.saturating_sub(p);
    let residual_variance = if df > 0 {
        residual_sum_of_squares / df as f64
    } else {
        0.0
    };

    Some(OlsFit {
        coefficients: beta.as_slice().to_vec(),
        xtx_inverse,
        residual_sum_of_squares,
        residual_variance,
        observations: n,
    })
}

/// Solve a square system, QR first then SVD.
pub fn solve(a: &DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    if let Some(solution) = a.clone().qr().solve(b) {
        return Some(solution);
    }

    a.clone()
        .svd(true, true)
        .solve(b, f64::EPSILON * 100.0)
        .ok()
}

/// Invert a square matrix, QR first then pseudo-inverse.
pub fn invert(a: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let identity = DMatrix::identity(a.nrows(), a.ncols());
    if let Some(inverse) = a.clone().qr().solve(&identity) {
        return Some(inverse);
    }

    a.clone().pseudo_inverse(f64::EPSILON * 100.0).ok()
}

/// Lower Cholesky factor of a symmetric matrix, ridged if necessary.
pub fn cholesky_lower(a: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    if let Some(chol) = a.clone().cholesky() {
        return Some(chol.l());
    }

    let ridged = a + DMatrix::identity(a.nrows(), a.ncols()) * COVARIANCE_RIDGE;
    ridged.cholesky().map(|chol| chol.l())
}

/// Inverse and log-determinant of a symmetric positive (semi)definite matrix.
pub fn spd_inverse_and_log_det(a: &DMatrix<f64>) -> Option<(DMatrix<f64>, f64)> {
    let chol = a.clone().cholesky().or_else(|| {
        let ridged = a + DMatrix::identity(a.nrows(), a.ncols()) * COVARIANCE_RIDGE;
        ridged.cholesky()
    })?;

    let log_det = 2.0 * chol.l().diagonal().iter().map(|d| d.ln()).sum::<f64>();
    Some((chol.inverse(), log_det))
}

/// Sub-matrix of `a` at the given rows and columns.
pub fn select(a: &DMatrix<f64>, rows: &[usize], cols: &[usize]) -> DMatrix<f64> {
    DMatrix::from_fn(rows.len(), cols.len(), |i, j| a[(rows[i], cols[j])])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_ols_exact_line() {
        // y = 2 + 3x
        let rows: Vec<Vec<f64>> = (0..5).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..5).map(|i| 2.0 + 3.0 * i as f64).collect();
        let fit = ols(&rows, &y).unwrap();

        assert!(approx(fit.coefficients[0], 2.0));
        assert!(approx(fit.coefficients[1], 3.0));
        assert!(fit.residual_sum_of_squares < 1e-12);
        assert_eq!(fit.residual_df(), 3);
        assert!(approx(fit.predict(&[10.0]), 32.0));
    }

    #[test]
    fn test_ols_two_predictors() {
        // y = 1 + 2a - b
        let rows = vec![
            vec![0.0, 0.0],
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 1.0],
            vec![2.0, 3.0],
        ];
        let y: Vec<f64> = rows.iter().map(|r| 1.0 + 2.0 * r[0] - r[1]).collect();
        let fit = ols(&rows, &y).unwrap();

        assert!(approx(fit.coefficients[0], 1.0));
        assert!(approx(fit.coefficients[1], 2.0));
        assert!(approx(fit.coefficients[2], -1.0));
    }

    #[test]
    fn test_ols_zero_residual_df() {
        let rows = vec![vec![0.0], vec![1.0]];
        let fit = ols(&rows, &[1.0, 3.0]).unwrap();
        assert_eq!(fit.residual_df(), 0);
        assert_eq!(fit.residual_variance, 0.0);
    }

    #[test]
    fn test_spd_inverse_and_log_det() {
        let a = DMatrix::from_row_slice(2, 2, &[4.0, 0.0, 0.0, 9.0]);
        let (inv, log_det) = spd_inverse_and_log_det(&a).unwrap();
        assert!(approx(inv[(0, 0)], 0.25));
        assert!(approx(inv[(1, 1)], 1.0 / 9.0));
        assert!(approx(log_det, 36.0f64.ln()));
    }

    #[test]
    fn test_select() {
        let a = DMatrix::from_row_slice(3, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        let sub = select(&a, &[0, 2], &[1]);
        assert_eq!(sub.nrows(), 2);
        assert_eq!(sub[(0, 0)], 2.0);
        assert_eq!(sub[(1, 0)], 8.0);
    }
}
