//! Numerical building blocks shared by the model-based imputers.

pub mod linalg;
pub mod special;

pub use linalg::{
    COVARIANCE_RIDGE, OlsFit, cholesky_lower, invert, ols, predict_with, select, solve,
    spd_inverse_and_log_det,
};
pub use special::{digamma, ln_gamma, trigamma};
