//! Ground-truth trajectories.
//!
//! A [`Scenario`] is a pure function of time: every query is closed form and can be evaluated at
//! any `t >= 0` any number of times with bit-identical results. Two trajectories are provided:
//!
//! - [`ConstantTwistScenario`]: a screw motion generated by a constant body-frame twist
//!   $(\omega, v)$. The pose is $T(t) = \exp(t \cdot \xi)$ and the only acceleration is the
//!   centripetal term $a_n = R(t) (\omega \times v)$.
//! - [`AcceleratingScenario`]: constant navigation-frame acceleration with a constant body rate.
//!
//! Validation of the generating parameters happens in the constructors so the queries stay
//! infallible.
use nalgebra::{Rotation3, Vector3};

use crate::NavState;
use crate::error::{PreintegrationError, Result, ensure_finite_vector};
use crate::geometry::{Pose3, exp_so3};

/// Continuous-time ground truth for a moving body.
pub trait Scenario {
    /// Pose of the body in the navigation frame.
    fn pose(&self, t: f64) -> Pose3;
    /// Angular velocity in the body frame.
    fn omega_b(&self, t: f64) -> Vector3<f64>;
    /// Velocity in the navigation frame.
    fn velocity_n(&self, t: f64) -> Vector3<f64>;
    /// Acceleration in the navigation frame.
    fn acceleration_n(&self, t: f64) -> Vector3<f64>;

    fn rotation(&self, t: f64) -> Rotation3<f64> {
        self.pose(t).rotation
    }

    /// Navigation-frame acceleration rotated into the body frame.
    fn acceleration_b(&self, t: f64) -> Vector3<f64> {
        self.rotation(t).inverse() * self.acceleration_n(t)
    }

    fn velocity_b(&self, t: f64) -> Vector3<f64> {
        self.rotation(t).inverse() * self.velocity_n(t)
    }

    /// Pose and navigation-frame velocity at `t`.
    fn nav_state(&self, t: f64) -> NavState {
        NavState::new(self.pose(t), self.velocity_n(t))
    }
}

/// Screw motion with constant body-frame angular and linear velocity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConstantTwistScenario {
    angular_velocity: Vector3<f64>,
    linear_velocity: Vector3<f64>,
}

impl ConstantTwistScenario {
    /// # Arguments
    /// * `angular_velocity` - body rate in rad/s.
    /// * `linear_velocity` - body-frame velocity in m/s.
    ///
    /// # Errors
    /// `InvalidParameter` if either vector is not finite.
    pub fn new(angular_velocity: Vector3<f64>, linear_velocity: Vector3<f64>) -> Result<Self> {
        Ok(ConstantTwistScenario {
            angular_velocity: ensure_finite_vector("angular_velocity", &angular_velocity)?,
            linear_velocity: ensure_finite_vector("linear_velocity", &linear_velocity)?,
        })
    }

    pub fn angular_velocity(&self) -> &Vector3<f64> {
        &self.angular_velocity
    }

    pub fn linear_velocity(&self) -> &Vector3<f64> {
        &self.linear_velocity
    }
}

impl Scenario for ConstantTwistScenario {
    fn pose(&self, t: f64) -> Pose3 {
        Pose3::expmap(&(self.angular_velocity * t), &(self.linear_velocity * t))
    }

    fn omega_b(&self, _t: f64) -> Vector3<f64> {
        self.angular_velocity
    }

    fn rotation(&self, t: f64) -> Rotation3<f64> {
        exp_so3(&(self.angular_velocity * t))
    }

    fn velocity_n(&self, t: f64) -> Vector3<f64> {
        self.rotation(t) * self.linear_velocity
    }

    fn acceleration_n(&self, t: f64) -> Vector3<f64> {
        self.rotation(t) * self.angular_velocity.cross(&self.linear_velocity)
    }
}

/// Constant navigation-frame acceleration and constant body rate.
///
/// ```text
/// R(t) = R0 * Exp(omega_b * t)
/// p(t) = p0 + v0 * t + 0.5 * a_n * t^2
/// v(t) = v0 + a_n * t
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AcceleratingScenario {
    initial_rotation: Rotation3<f64>,
    initial_position: Vector3<f64>,
    initial_velocity: Vector3<f64>,
    acceleration: Vector3<f64>,
    angular_velocity: Vector3<f64>,
}

impl AcceleratingScenario {
    pub fn new(
        initial_rotation: Rotation3<f64>,
        initial_position: Vector3<f64>,
        initial_velocity: Vector3<f64>,
        acceleration: Vector3<f64>,
        angular_velocity: Vector3<f64>,
    ) -> Result<Self> {
        if !initial_rotation.matrix().iter().all(|v| v.is_finite()) {
            return Err(PreintegrationError::invalid(
                "initial_rotation",
                "rotation contains non-finite entries",
            ));
        }
        Ok(AcceleratingScenario {
            initial_rotation,
            initial_position: ensure_finite_vector("initial_position", &initial_position)?,
            initial_velocity: ensure_finite_vector("initial_velocity", &initial_velocity)?,
            acceleration: ensure_finite_vector("acceleration", &acceleration)?,
            angular_velocity: ensure_finite_vector("angular_velocity", &angular_velocity)?,
        })
    }
}

impl Scenario for AcceleratingScenario {
    fn pose(&self, t: f64) -> Pose3 {
        Pose3::new(
            self.rotation(t),
            self.initial_position + self.initial_velocity * t + 0.5 * self.acceleration * t * t,
        )
    }

    fn omega_b(&self, _t: f64) -> Vector3<f64> {
        self.angular_velocity
    }

    fn rotation(&self, t: f64) -> Rotation3<f64> {
        self.initial_rotation * exp_so3(&(self.angular_velocity * t))
    }

    fn velocity_n(&self, t: f64) -> Vector3<f64> {
        self.initial_velocity + self.acceleration * t
    }

    fn acceleration_n(&self, _t: f64) -> Vector3<f64> {
        self.acceleration
    }
}
