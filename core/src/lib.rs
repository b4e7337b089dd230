//! IMU preintegration toolbox with synthetic scenarios for validation
//!
//! This crate summarizes high-rate gyroscope and accelerometer samples between two instants into a
//! single relative-motion object (a "preintegrated measurement") that a downstream estimator can
//! consume, and provides the machinery needed to check that summary against ground truth: closed
//! form trajectories, a synthetic IMU that samples them with bias and noise, and Monte Carlo
//! estimates of the resulting error covariance. It is not a state estimator: there is no factor graph
//! or least-squares solve here, and no hardware I/O.
//!
//! This crate is primarily built off of the following dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): rotations, fixed-size vectors and matrices.
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr): seeded noise for the synthetic IMU.
//! - [`serde`](https://crates.io/crates/serde), [`csv`](https://crates.io/crates/csv): configuration and result I/O.
//! - [`log`](https://crates.io/crates/log): diagnostics through the logging facade.
//!
//! ## Crate overview
//!
//! - [geometry]: SO(3)/SE(3) primitives (exponential and logarithm maps, Jacobians, [`geometry::Pose3`]).
//! - [params]: the noise model ([`params::PreintegrationParams`]) and [`params::ConstantBias`].
//! - [scenario]: ground-truth trajectories behind the [`scenario::Scenario`] trait.
//! - [runner]: the synthetic IMU ([`runner::ScenarioRunner`]).
//! - [preintegration]: the accumulator ([`preintegration::PreintegratedImuMeasurements`]).
//! - [config], [sim], [logging]: configuration files, the validation sweep, and logger setup.
//! - [error], [linalg]: error type, input validation and covariance helpers.
//!
//! ## Conventions
//!
//! The navigation state is
//!
//! $$
//! x = (R, p, v)
//! $$
//!
//! where $R$ rotates body-frame vectors into the navigation frame, and $p$ and $v$ are position and
//! velocity in the navigation frame. The IMU measures the body-frame angular rate $\omega_b$ and the
//! specific force $f_b = R^T (a_n - g_n)$, i.e. the acceleration with gravity removed. The gravity
//! vector $g_n$ depends on the chosen [`params::GravityConvention`]: $(0, 0, -g)$ for z-up and
//! $(0, 0, g)$ for z-down. An accelerometer at rest in a z-up frame therefore reads $(0, 0, +g)$.
//!
//! Errors on a [`NavState`] are expressed in the tangent space as the 9-vector
//! $[\delta\theta, \delta v, \delta p]$ with $R_2 = R_1 \exp(\delta\theta)$ (see
//! [`NavState::local_coordinates`]).
pub mod config;
pub mod error;
pub mod geometry;
pub mod linalg;
pub mod logging;
pub mod params;
pub mod preintegration;
pub mod runner;
pub mod scenario;
pub mod sim;

use nalgebra::{Rotation3, SMatrix, SVector, Vector3};
use std::fmt::{self, Display};

pub use error::{PreintegrationError, Result};
pub use geometry::Pose3;
pub use params::{ConstantBias, GravityConvention, PreintegrationParams};
pub use preintegration::{IntegrationPhase, PreintegratedImuMeasurements};
pub use runner::ScenarioRunner;
pub use scenario::{AcceleratingScenario, ConstantTwistScenario, Scenario};

/// 9x9 matrix over the navigation error state `[δθ, δv, δp]`.
pub type Matrix9 = SMatrix<f64, 9, 9>;
/// Tangent vector of a [`NavState`], ordered `[δθ, δv, δp]`.
pub type Vector9 = SVector<f64, 9>;

/// A single IMU sample: specific force and angular rate in the body frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ImuMeasurement {
    /// Specific force in m/s^2, body frame x, y, z axis
    pub accel: Vector3<f64>,
    /// Angular rate in rad/s, body frame x, y, z axis
    pub gyro: Vector3<f64>,
}

impl Display for ImuMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ImuMeasurement {{ accel: [{:.4}, {:.4}, {:.4}], gyro: [{:.4}, {:.4}, {:.4}] }}",
            self.accel[0], self.accel[1], self.accel[2], self.gyro[0], self.gyro[1], self.gyro[2]
        )
    }
}

impl ImuMeasurement {
    pub fn new(accel: Vector3<f64>, gyro: Vector3<f64>) -> Self {
        ImuMeasurement { accel, gyro }
    }
}

impl TryFrom<&[f64]> for ImuMeasurement {
    type Error = PreintegrationError;
    /// Builds a measurement from `[ax, ay, az, gx, gy, gz]`.
    fn try_from(slice: &[f64]) -> Result<Self> {
        if slice.len() != 6 {
            return Err(PreintegrationError::invalid(
                "measurement",
                format!("expected 6 values (3 accel, 3 gyro), got {}", slice.len()),
            ));
        }
        Ok(ImuMeasurement {
            accel: Vector3::new(slice[0], slice[1], slice[2]),
            gyro: Vector3::new(slice[3], slice[4], slice[5]),
        })
    }
}

impl From<ImuMeasurement> for Vec<f64> {
    fn from(data: ImuMeasurement) -> Self {
        vec![
            data.accel[0],
            data.accel[1],
            data.accel[2],
            data.gyro[0],
            data.gyro[1],
            data.gyro[2],
        ]
    }
}

/// Navigation state: attitude, position and velocity in the navigation frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NavState {
    /// Body-to-navigation rotation
    pub attitude: Rotation3<f64>,
    /// Position in meters
    pub position: Vector3<f64>,
    /// Velocity in m/s
    pub velocity: Vector3<f64>,
}

impl Default for NavState {
    fn default() -> Self {
        NavState {
            attitude: Rotation3::identity(),
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
        }
    }
}

impl Display for NavState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (roll, pitch, yaw) = self.attitude.euler_angles();
        write!(
            f,
            "NavState {{ p: [{:.4}, {:.4}, {:.4}] m, v: [{:.4}, {:.4}, {:.4}] m/s, attitude: [{:.2} deg, {:.2} deg, {:.2} deg] }}",
            self.position[0],
            self.position[1],
            self.position[2],
            self.velocity[0],
            self.velocity[1],
            self.velocity[2],
            roll.to_degrees(),
            pitch.to_degrees(),
            yaw.to_degrees()
        )
    }
}

impl NavState {
    pub fn new(pose: Pose3, velocity: Vector3<f64>) -> Self {
        NavState {
            attitude: pose.rotation,
            position: pose.translation,
            velocity,
        }
    }

    pub fn from_parts(
        attitude: Rotation3<f64>,
        position: Vector3<f64>,
        velocity: Vector3<f64>,
    ) -> Self {
        NavState {
            attitude,
            position,
            velocity,
        }
    }

    pub fn pose(&self) -> Pose3 {
        Pose3::new(self.attitude, self.position)
    }

    /// Velocity expressed in the body frame.
    pub fn body_velocity(&self) -> Vector3<f64> {
        self.attitude.inverse() * self.velocity
    }

    /// Tangent vector `[Log(R1ᵀ R2), v2 − v1, p2 − p1]` taking `self` to `other`.
    pub fn local_coordinates(&self, other: &NavState) -> Vector9 {
        let mut xi = Vector9::zeros();
        let rotation = geometry::log_so3(&(self.attitude.inverse() * other.attitude));
        xi.fixed_rows_mut::<3>(0).copy_from(&rotation);
        xi.fixed_rows_mut::<3>(3)
            .copy_from(&(other.velocity - self.velocity));
        xi.fixed_rows_mut::<3>(6)
            .copy_from(&(other.position - self.position));
        xi
    }

    /// Inverse of [`NavState::local_coordinates`].
    pub fn retract(&self, xi: &Vector9) -> NavState {
        let rotation: Vector3<f64> = xi.fixed_rows::<3>(0).into_owned();
        let velocity: Vector3<f64> = xi.fixed_rows::<3>(3).into_owned();
        let position: Vector3<f64> = xi.fixed_rows::<3>(6).into_owned();
        NavState {
            attitude: self.attitude * geometry::exp_so3(&rotation),
            position: self.position + position,
            velocity: self.velocity + velocity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn nav_state_default() {
        let state = NavState::default();
        assert_eq!(state.attitude, Rotation3::identity());
        assert_eq!(state.position, Vector3::zeros());
        assert_eq!(state.velocity, Vector3::zeros());
        assert_eq!(state.pose(), Pose3::identity());
    }

    #[test]
    fn local_coordinates_of_self_is_zero() {
        let state = NavState::from_parts(
            Rotation3::from_euler_angles(0.1, -0.2, 0.3),
            Vector3::new(1.0, 2.0, 3.0),
            Vector3::new(-1.0, 0.5, 0.0),
        );
        assert!(state.local_coordinates(&state).amax() < 1e-15);
    }

    #[test]
    fn retract_inverts_local_coordinates() {
        let a = NavState::from_parts(
            Rotation3::from_euler_angles(0.1, -0.2, 0.3),
            Vector3::new(1.0, 2.0, 3.0),
            Vector3::new(-1.0, 0.5, 0.0),
        );
        let xi = Vector9::from_column_slice(&[0.01, -0.02, 0.03, 0.1, 0.2, 0.3, -1.0, 0.0, 2.0]);
        let b = a.retract(&xi);
        let recovered = a.local_coordinates(&b);
        assert!((recovered - xi).amax() < 1e-12);
    }

    #[test]
    fn body_velocity() {
        let state = NavState::from_parts(
            Rotation3::from_euler_angles(0.0, 0.0, std::f64::consts::FRAC_PI_2),
            Vector3::zeros(),
            Vector3::new(0.0, 1.0, 0.0),
        );
        let v_b = state.body_velocity();
        assert_approx_eq!(v_b.x, 1.0, 1e-12);
        assert_approx_eq!(v_b.y, 0.0, 1e-12);
    }

    #[test]
    fn measurement_from_slice() {
        let data = [0.0, 0.0, 9.81, 0.1, 0.2, 0.3];
        let m = ImuMeasurement::try_from(&data[..]).unwrap();
        assert_eq!(m.accel, Vector3::new(0.0, 0.0, 9.81));
        assert_eq!(m.gyro, Vector3::new(0.1, 0.2, 0.3));
        let back: Vec<f64> = m.into();
        assert_eq!(back, data.to_vec());
        assert!(ImuMeasurement::try_from(&data[..4]).is_err());
    }

    #[test]
    fn displays() {
        let m = ImuMeasurement::new(Vector3::new(1.0, 0.0, 0.0), Vector3::zeros());
        assert!(format!("{m}").contains("1.0000"));
        assert!(format!("{}", NavState::default()).starts_with("NavState"));
    }
}
