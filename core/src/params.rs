//! Noise and bias model for the IMU.
//!
//! [`PreintegrationParams`] bundles the three continuous-time noise covariances used by the
//! preintegration together with the gravity vector in the navigation frame. [`ConstantBias`] is
//! the accelerometer/gyroscope bias pair assumed constant over a run.
//!
//! Covariances are continuous-time densities: a sampled measurement at rate `1/dt` carries a
//! discrete covariance of `Σ / dt`. The integration covariance models the error of the
//! position integration itself and is injected as `Σ_int * dt` per step.
use nalgebra::{Matrix3, Vector3, Vector6};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::ops::Sub;

use crate::error::{Result, ensure_covariance, ensure_finite_vector, ensure_non_negative};

/// Gyroscope noise sigma of the reference setup: 0.5 degree angle random walk.
pub const DEFAULT_GYRO_SIGMA: f64 = 0.5 * std::f64::consts::PI / 180.0 / 60.0;
/// Accelerometer noise sigma of the reference setup: 10 cm/s velocity random walk.
pub const DEFAULT_ACCEL_SIGMA: f64 = 0.1 / 60.0;
/// Integration noise sigma of the reference setup.
pub const DEFAULT_INTEGRATION_SIGMA: f64 = 1e-7;

/// Direction of the navigation frame's vertical axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GravityConvention {
    /// z axis points up, gravity is `(0, 0, -g)`
    #[default]
    ZUp,
    /// z axis points down, gravity is `(0, 0, g)`
    ZDown,
}

impl GravityConvention {
    /// Gravity vector in the navigation frame for the given magnitude.
    pub fn gravity_vector(&self, magnitude: f64) -> Vector3<f64> {
        match self {
            GravityConvention::ZUp => Vector3::new(0.0, 0.0, -magnitude),
            GravityConvention::ZDown => Vector3::new(0.0, 0.0, magnitude),
        }
    }
}

/// Immutable noise parameter bundle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PreintegrationParams {
    gyroscope_covariance: Matrix3<f64>,
    accelerometer_covariance: Matrix3<f64>,
    integration_covariance: Matrix3<f64>,
    gravity_magnitude: f64,
    convention: GravityConvention,
}

impl PreintegrationParams {
    /// Build a parameter set from explicit covariances.
    ///
    /// # Errors
    /// `InvalidParameter` when a covariance is not finite, symmetric and positive semi-definite,
    /// or when the gravity magnitude is negative or not finite.
    pub fn new(
        gyroscope_covariance: Matrix3<f64>,
        accelerometer_covariance: Matrix3<f64>,
        integration_covariance: Matrix3<f64>,
        gravity_magnitude: f64,
        convention: GravityConvention,
    ) -> Result<Self> {
        Ok(PreintegrationParams {
            gyroscope_covariance: ensure_covariance("gyroscope_covariance", &gyroscope_covariance)?,
            accelerometer_covariance: ensure_covariance(
                "accelerometer_covariance",
                &accelerometer_covariance,
            )?,
            integration_covariance: ensure_covariance(
                "integration_covariance",
                &integration_covariance,
            )?,
            gravity_magnitude: ensure_non_negative("gravity", gravity_magnitude)?,
            convention,
        })
    }

    /// Noise-free parameters with a z-up navigation frame.
    pub fn make_z_up(gravity_magnitude: f64) -> Result<Self> {
        Self::noise_free(gravity_magnitude, GravityConvention::ZUp)
    }

    /// Noise-free parameters with a z-down navigation frame.
    pub fn make_z_down(gravity_magnitude: f64) -> Result<Self> {
        Self::noise_free(gravity_magnitude, GravityConvention::ZDown)
    }

    /// Isotropic covariances `σ² I` built from standard deviations.
    pub fn from_sigmas(
        gravity_magnitude: f64,
        convention: GravityConvention,
        gyro_sigma: f64,
        accel_sigma: f64,
        integration_sigma: f64,
    ) -> Result<Self> {
        let gyro_sigma = ensure_non_negative("gyro_sigma", gyro_sigma)?;
        let accel_sigma = ensure_non_negative("accel_sigma", accel_sigma)?;
        let integration_sigma = ensure_non_negative("integration_sigma", integration_sigma)?;
        Self::new(
            Matrix3::identity() * gyro_sigma.powi(2),
            Matrix3::identity() * accel_sigma.powi(2),
            Matrix3::identity() * integration_sigma.powi(2),
            gravity_magnitude,
            convention,
        )
    }

    /// Z-up parameters with the reference noise levels (0.5°/√h ARW, 10 cm VRW).
    pub fn realistic(gravity_magnitude: f64) -> Result<Self> {
        Self::from_sigmas(
            gravity_magnitude,
            GravityConvention::ZUp,
            DEFAULT_GYRO_SIGMA,
            DEFAULT_ACCEL_SIGMA,
            DEFAULT_INTEGRATION_SIGMA,
        )
    }

    fn noise_free(gravity_magnitude: f64, convention: GravityConvention) -> Result<Self> {
        Self::new(
            Matrix3::zeros(),
            Matrix3::zeros(),
            Matrix3::zeros(),
            gravity_magnitude,
            convention,
        )
    }

    /// Copy with a different gyroscope covariance.
    pub fn with_gyroscope_covariance(self, covariance: Matrix3<f64>) -> Result<Self> {
        Ok(PreintegrationParams {
            gyroscope_covariance: ensure_covariance("gyroscope_covariance", &covariance)?,
            ..self
        })
    }

    /// Copy with a different accelerometer covariance.
    pub fn with_accelerometer_covariance(self, covariance: Matrix3<f64>) -> Result<Self> {
        Ok(PreintegrationParams {
            accelerometer_covariance: ensure_covariance("accelerometer_covariance", &covariance)?,
            ..self
        })
    }

    /// Copy with a different integration covariance.
    pub fn with_integration_covariance(self, covariance: Matrix3<f64>) -> Result<Self> {
        Ok(PreintegrationParams {
            integration_covariance: ensure_covariance("integration_covariance", &covariance)?,
            ..self
        })
    }

    pub fn gyroscope_covariance(&self) -> &Matrix3<f64> {
        &self.gyroscope_covariance
    }

    pub fn accelerometer_covariance(&self) -> &Matrix3<f64> {
        &self.accelerometer_covariance
    }

    pub fn integration_covariance(&self) -> &Matrix3<f64> {
        &self.integration_covariance
    }

    pub fn gravity_magnitude(&self) -> f64 {
        self.gravity_magnitude
    }

    pub fn convention(&self) -> GravityConvention {
        self.convention
    }

    /// Gravity vector expressed in the navigation frame.
    pub fn n_gravity(&self) -> Vector3<f64> {
        self.convention.gravity_vector(self.gravity_magnitude)
    }
}

/// Constant accelerometer and gyroscope bias.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ConstantBias {
    accelerometer: Vector3<f64>,
    gyroscope: Vector3<f64>,
}

impl Display for ConstantBias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConstantBias {{ acc: [{:.4}, {:.4}, {:.4}], gyro: [{:.4}, {:.4}, {:.4}] }}",
            self.accelerometer[0],
            self.accelerometer[1],
            self.accelerometer[2],
            self.gyroscope[0],
            self.gyroscope[1],
            self.gyroscope[2]
        )
    }
}

impl ConstantBias {
    /// # Errors
    /// `InvalidParameter` if either vector has a non-finite component.
    pub fn new(accelerometer: Vector3<f64>, gyroscope: Vector3<f64>) -> Result<Self> {
        Ok(ConstantBias {
            accelerometer: ensure_finite_vector("accelerometer_bias", &accelerometer)?,
            gyroscope: ensure_finite_vector("gyroscope_bias", &gyroscope)?,
        })
    }

    pub fn zero() -> Self {
        ConstantBias::default()
    }

    pub fn accelerometer(&self) -> &Vector3<f64> {
        &self.accelerometer
    }

    pub fn gyroscope(&self) -> &Vector3<f64> {
        &self.gyroscope
    }

    /// Stacked `[accelerometer; gyroscope]`.
    pub fn vector(&self) -> Vector6<f64> {
        let mut v = Vector6::zeros();
        v.fixed_rows_mut::<3>(0).copy_from(&self.accelerometer);
        v.fixed_rows_mut::<3>(3).copy_from(&self.gyroscope);
        v
    }

    /// Remove the bias from a raw `(omega, acc)` sample.
    pub fn correct(
        &self,
        measured_omega: &Vector3<f64>,
        measured_acc: &Vector3<f64>,
    ) -> (Vector3<f64>, Vector3<f64>) {
        (
            measured_omega - self.gyroscope,
            measured_acc - self.accelerometer,
        )
    }
}

impl Sub for ConstantBias {
    type Output = ConstantBias;

    fn sub(self, rhs: ConstantBias) -> ConstantBias {
        ConstantBias {
            accelerometer: self.accelerometer - rhs.accelerometer,
            gyroscope: self.gyroscope - rhs.gyroscope,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PreintegrationError;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn gravity_conventions() {
        let up = PreintegrationParams::make_z_up(10.0).unwrap();
        assert_eq!(up.n_gravity(), Vector3::new(0.0, 0.0, -10.0));
        let down = PreintegrationParams::make_z_down(9.81).unwrap();
        assert_eq!(down.n_gravity(), Vector3::new(0.0, 0.0, 9.81));
        assert_eq!(down.convention(), GravityConvention::ZDown);
    }

    #[test]
    fn realistic_sigmas() {
        let p = PreintegrationParams::realistic(10.0).unwrap();
        let gyro_sigma = 0.5_f64.to_radians() / 60.0;
        assert_approx_eq!(p.gyroscope_covariance()[(0, 0)], gyro_sigma.powi(2), 1e-20);
        assert_approx_eq!(
            p.accelerometer_covariance()[(1, 1)],
            (0.1_f64 / 60.0).powi(2),
            1e-20
        );
        assert_eq!(p.integration_covariance()[(0, 1)], 0.0);
        assert_approx_eq!(p.integration_covariance()[(2, 2)], 1e-14, 1e-24);
    }

    #[test]
    fn rejects_bad_covariance() {
        let err = PreintegrationParams::new(
            -Matrix3::identity(),
            Matrix3::zeros(),
            Matrix3::zeros(),
            10.0,
            GravityConvention::ZUp,
        )
        .unwrap_err();
        match err {
            PreintegrationError::InvalidParameter { name, .. } => {
                assert_eq!(name, "gyroscope_covariance")
            }
            other => panic!("unexpected error {other:?}"),
        }
        let p = PreintegrationParams::make_z_up(10.0).unwrap();
        assert!(p.with_accelerometer_covariance(-Matrix3::identity()).is_err());
        assert!(p.with_integration_covariance(Matrix3::identity() * 1e-8).is_ok());
    }

    #[test]
    fn rejects_bad_gravity_and_sigma() {
        assert!(PreintegrationParams::make_z_up(f64::NAN).is_err());
        assert!(PreintegrationParams::make_z_up(-1.0).is_err());
        assert!(
            PreintegrationParams::from_sigmas(10.0, GravityConvention::ZUp, -1.0, 0.0, 0.0)
                .is_err()
        );
    }

    #[test]
    fn bias_accessors_and_difference() {
        let a =
            ConstantBias::new(Vector3::new(0.0, 0.1, 0.0), Vector3::new(0.01, 0.0, 0.0)).unwrap();
        let b = ConstantBias::zero();
        let d = a - b;
        assert_eq!(d, a);
        let v = a.vector();
        assert_eq!(v[1], 0.1);
        assert_eq!(v[3], 0.01);
        let (omega, acc) = a.correct(&Vector3::new(0.01, 0.0, 0.0), &Vector3::new(0.0, 0.1, 0.0));
        assert_eq!(omega, Vector3::zeros());
        assert_eq!(acc, Vector3::zeros());
    }

    #[test]
    fn bias_rejects_non_finite() {
        assert!(ConstantBias::new(Vector3::new(f64::NAN, 0.0, 0.0), Vector3::zeros()).is_err());
        assert!(
            ConstantBias::new(Vector3::zeros(), Vector3::new(0.0, f64::INFINITY, 0.0)).is_err()
        );
    }

    #[test]
    fn bias_display() {
        let a = ConstantBias::new(Vector3::new(0.0, 0.1, 0.0), Vector3::zeros()).unwrap();
        assert!(format!("{a}").contains("0.1000"));
    }
}
