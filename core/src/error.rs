//! Error taxonomy and input validation.
//!
//! Every public entry point that accepts user supplied numbers funnels them through the
//! helpers in this module so that bad input is rejected before any state is touched:
//!
//! - [`PreintegrationError::InvalidParameter`]: a non-positive step size, a covariance that is
//!   not symmetric positive semi-definite, or a non-finite scalar/vector. The error names the
//!   parameter that failed.
//! - [`PreintegrationError::NumericDivergence`]: non-finite values appeared in an accumulator
//!   after an update. The summary for that interval is unusable; the error carries the last
//!   elapsed time at which the summary was still valid so the caller can retry the interval
//!   with a smaller step.
use nalgebra::{Matrix3, Vector3};
use thiserror::Error;

use crate::linalg;

/// Relative tolerance used when checking a covariance for symmetry.
pub const SYMMETRY_TOLERANCE: f64 = 1e-9;
/// Smallest eigenvalue (relative to the largest) accepted as "positive semi-definite".
pub const PSD_TOLERANCE: f64 = 1e-12;

/// Errors produced by the scenario, runner, and preintegration code.
#[derive(Debug, Error)]
pub enum PreintegrationError {
    /// A parameter failed validation. No work was started.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    /// Non-finite values appeared in the accumulator state.
    #[error("numeric divergence during preintegration (last valid elapsed time {last_valid_time} s)")]
    NumericDivergence { last_valid_time: f64 },
    /// Two summaries integrated against different bias estimates cannot be merged.
    #[error("cannot merge summaries integrated with different bias estimates")]
    BiasMismatch,
    /// File access failed (configuration or CSV output).
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// CSV encoding or decoding failed.
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PreintegrationError>;

impl PreintegrationError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        PreintegrationError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// Reject NaN and infinite scalars.
pub fn ensure_finite_scalar(name: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(PreintegrationError::invalid(
            name,
            format!("expected a finite value, got {value}"),
        ))
    }
}

/// Reject vectors with any NaN or infinite component.
pub fn ensure_finite_vector(name: &'static str, value: &Vector3<f64>) -> Result<Vector3<f64>> {
    if value.iter().all(|v| v.is_finite()) {
        Ok(*value)
    } else {
        Err(PreintegrationError::invalid(
            name,
            format!(
                "expected finite components, got [{}, {}, {}]",
                value[0], value[1], value[2]
            ),
        ))
    }
}

/// Require a finite, strictly positive scalar (step sizes, durations).
pub fn ensure_positive(name: &'static str, value: f64) -> Result<f64> {
    ensure_finite_scalar(name, value)?;
    if value > 0.0 {
        Ok(value)
    } else {
        Err(PreintegrationError::invalid(
            name,
            format!("expected a positive value, got {value}"),
        ))
    }
}

/// Require a finite scalar that is zero or larger (times, standard deviations).
pub fn ensure_non_negative(name: &'static str, value: f64) -> Result<f64> {
    ensure_finite_scalar(name, value)?;
    if value >= 0.0 {
        Ok(value)
    } else {
        Err(PreintegrationError::invalid(
            name,
            format!("expected a non-negative value, got {value}"),
        ))
    }
}

/// Require a finite, symmetric, positive semi-definite 3x3 covariance.
pub fn ensure_covariance(name: &'static str, value: &Matrix3<f64>) -> Result<Matrix3<f64>> {
    if !value.iter().all(|v| v.is_finite()) {
        return Err(PreintegrationError::invalid(
            name,
            "covariance contains non-finite entries",
        ));
    }
    let scale = value.amax().max(f64::MIN_POSITIVE);
    if (value - value.transpose()).amax() > SYMMETRY_TOLERANCE * scale {
        return Err(PreintegrationError::invalid(name, "covariance is not symmetric"));
    }
    if !linalg::is_positive_semidefinite(value, PSD_TOLERANCE) {
        return Err(PreintegrationError::invalid(
            name,
            "covariance is not positive semi-definite",
        ));
    }
    Ok(*value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finite_scalar() {
        assert!(ensure_finite_scalar("x", 1.0).is_ok());
        assert!(ensure_finite_scalar("x", f64::NAN).is_err());
        assert!(ensure_finite_scalar("x", f64::INFINITY).is_err());
    }

    #[test]
    fn finite_vector_names_parameter() {
        let err = ensure_finite_vector("omega", &Vector3::new(0.0, f64::NAN, 0.0)).unwrap_err();
        match err {
            PreintegrationError::InvalidParameter { name, .. } => assert_eq!(name, "omega"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn positive_and_non_negative() {
        assert!(ensure_positive("dt", 0.01).is_ok());
        assert!(ensure_positive("dt", 0.0).is_err());
        assert!(ensure_positive("dt", -1.0).is_err());
        assert!(ensure_non_negative("t", 0.0).is_ok());
        assert!(ensure_non_negative("t", -1e-3).is_err());
        assert!(ensure_non_negative("t", f64::NAN).is_err());
    }

    #[test]
    fn covariance_checks() {
        assert!(ensure_covariance("cov", &(Matrix3::identity() * 1e-4)).is_ok());
        assert!(ensure_covariance("cov", &Matrix3::zeros()).is_ok());
        assert!(ensure_covariance("cov", &(-Matrix3::identity())).is_err());
        let mut asymmetric = Matrix3::identity();
        asymmetric[(0, 1)] = 0.5;
        assert!(ensure_covariance("cov", &asymmetric).is_err());
        let mut non_finite = Matrix3::identity();
        non_finite[(2, 2)] = f64::NAN;
        assert!(ensure_covariance("cov", &non_finite).is_err());
    }

    #[test]
    fn display_mentions_parameter() {
        let err = ensure_positive("dt", 0.0).unwrap_err();
        assert!(err.to_string().contains("`dt`"));
        let err = PreintegrationError::NumericDivergence {
            last_valid_time: 0.25,
        };
        assert!(err.to_string().contains("0.25"));
    }
}
