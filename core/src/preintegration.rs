//! Preintegrated IMU measurements.
//!
//! [`PreintegratedImuMeasurements`] folds a stream of `(omega, acc, dt)` samples between two
//! instants `i` and `j` into a relative motion summary expressed in the body frame at `i`:
//!
//! $$
//! \Delta R_{ij}, \quad \Delta v_{ij}, \quad \Delta p_{ij}, \quad \Delta t_{ij}
//! $$
//!
//! together with the first-order sensitivity of each delta to the bias estimate used during
//! integration and the 9x9 covariance of the error state $[\delta\theta, \delta v, \delta p]$.
//! Rotation errors are right perturbations $\Delta R \exp(\delta\theta)$; velocity and position
//! errors are additive in the interval-start frame.
//!
//! ## Integration step
//!
//! With the unbiased sample $\omega = \tilde\omega - \hat b_g$, $a = \tilde a - \hat b_a$ and a
//! step of length $h$ the update order is fixed:
//!
//! 1. rotation: $R_{mid} = \Delta R \exp(\omega h / 2)$ and $\Delta R^+ = \Delta R \exp(\omega h)$
//! 2. velocity: $\delta v = R_{mid} a h$ and $\Delta v^+ = \Delta v + \delta v$
//! 3. position: $\Delta p^+ = \Delta p + \Delta v h + \tfrac{1}{2} \delta v h$, using the velocity
//!    from before step 2
//!
//! Reordering these changes the numerical result. Sampled at the step midpoint the scheme is
//! second order in `h`.
//!
//! ## Prediction
//!
//! Given a state $(R_i, v_i, p_i)$ and a bias $b$, the deltas are first corrected to first order
//! for $\delta b = b - \hat b$ and then composed with gravity reintroduced:
//!
//! $$
//! R_j = R_i \Delta R \exp(J^R_{g} \delta b_g), \quad
//! v_j = v_i + g \Delta t + R_i \Delta v^c, \quad
//! p_j = p_i + v_i \Delta t + \tfrac{1}{2} g \Delta t^2 + R_i \Delta p^c
//! $$
use log::{debug, trace, warn};
use nalgebra::{Matrix3, Rotation3, SMatrix, Vector3};

use crate::error::{PreintegrationError, Result, ensure_finite_vector, ensure_positive};
use crate::geometry::{exp_so3, right_jacobian, skew};
use crate::params::{ConstantBias, PreintegrationParams};
use crate::{ImuMeasurement, Matrix9, NavState};

/// Differences in bias estimates below this are treated as equal when merging.
const BIAS_MATCH_TOLERANCE: f64 = 1e-12;

/// Lifecycle of a summary.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum IntegrationPhase {
    /// Constructed, no samples yet
    Empty,
    /// At least one sample integrated
    Accumulating,
    /// Closed for the interval and ready for prediction
    Finalized,
    /// Non-finite values appeared; the summary must be discarded
    Diverged { last_valid_time: f64 },
}

/// Everything that changes with each integrated sample.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Accumulator {
    delta_t: f64,
    delta_rotation: Rotation3<f64>,
    delta_velocity: Vector3<f64>,
    delta_position: Vector3<f64>,
    d_rotation_d_gyro_bias: Matrix3<f64>,
    d_velocity_d_gyro_bias: Matrix3<f64>,
    d_velocity_d_accel_bias: Matrix3<f64>,
    d_position_d_gyro_bias: Matrix3<f64>,
    d_position_d_accel_bias: Matrix3<f64>,
    covariance: Matrix9,
}

impl Accumulator {
    fn new() -> Self {
        Accumulator {
            delta_t: 0.0,
            delta_rotation: Rotation3::identity(),
            delta_velocity: Vector3::zeros(),
            delta_position: Vector3::zeros(),
            d_rotation_d_gyro_bias: Matrix3::zeros(),
            d_velocity_d_gyro_bias: Matrix3::zeros(),
            d_velocity_d_accel_bias: Matrix3::zeros(),
            d_position_d_gyro_bias: Matrix3::zeros(),
            d_position_d_accel_bias: Matrix3::zeros(),
            covariance: Matrix9::zeros(),
        }
    }

    fn is_finite(&self) -> bool {
        self.delta_t.is_finite()
            && self.delta_rotation.matrix().iter().all(|v| v.is_finite())
            && self.delta_velocity.iter().all(|v| v.is_finite())
            && self.delta_position.iter().all(|v| v.is_finite())
            && [
                &self.d_rotation_d_gyro_bias,
                &self.d_velocity_d_gyro_bias,
                &self.d_velocity_d_accel_bias,
                &self.d_position_d_gyro_bias,
                &self.d_position_d_accel_bias,
            ]
            .iter()
            .all(|m| m.iter().all(|v| v.is_finite()))
            && self.covariance.iter().all(|v| v.is_finite())
    }
}

/// Relative motion summary of an IMU sample stream.
///
/// Created empty at the start of an interval with [`PreintegratedImuMeasurements::new`], extended
/// one sample at a time, and closed with [`PreintegratedImuMeasurements::finalize`]. A summary is
/// never reset; start a new interval with a new instance.
#[derive(Clone, Debug)]
pub struct PreintegratedImuMeasurements {
    params: PreintegrationParams,
    bias_hat: ConstantBias,
    state: Accumulator,
    phase: IntegrationPhase,
}

impl PreintegratedImuMeasurements {
    /// Start an empty summary that removes `bias_hat` from every sample.
    pub fn new(params: PreintegrationParams, bias_hat: ConstantBias) -> Self {
        debug!("Creating preintegrated measurements with bias estimate {bias_hat}");
        PreintegratedImuMeasurements {
            params,
            bias_hat,
            state: Accumulator::new(),
            phase: IntegrationPhase::Empty,
        }
    }

    /// Integrate a single sample held over `dt` seconds.
    ///
    /// # Arguments
    /// * `measured_omega` - gyroscope reading in rad/s, body frame.
    /// * `measured_acc` - accelerometer (specific force) reading in m/s^2, body frame.
    /// * `dt` - sample duration in seconds.
    ///
    /// # Errors
    /// * `InvalidParameter` for a non-finite sample or a non-positive `dt`; the summary is untouched.
    /// * `NumericDivergence` if the update produced non-finite values. The summary keeps its last
    ///   finite values, is marked [`IntegrationPhase::Diverged`], and refuses further use.
    pub fn integrate_measurement(
        &mut self,
        measured_omega: &Vector3<f64>,
        measured_acc: &Vector3<f64>,
        dt: f64,
    ) -> Result<()> {
        let measured_omega = ensure_finite_vector("measured_omega", measured_omega)?;
        let measured_acc = ensure_finite_vector("measured_acc", measured_acc)?;
        let dt = ensure_positive("dt", dt)?;
        match self.phase {
            IntegrationPhase::Diverged { last_valid_time } => {
                return Err(PreintegrationError::NumericDivergence { last_valid_time });
            }
            IntegrationPhase::Finalized => {
                debug!("Extending finalized summary beyond {:.6} s", self.state.delta_t);
            }
            IntegrationPhase::Empty | IntegrationPhase::Accumulating => {}
        }

        let (omega, acc) = self.bias_hat.correct(&measured_omega, &measured_acc);
        let previous = self.state;
        self.step(&omega, &acc, dt);
        if !self.state.is_finite() {
            self.state = previous;
            let last_valid_time = previous.delta_t;
            self.phase = IntegrationPhase::Diverged { last_valid_time };
            warn!("Preintegration diverged; last valid elapsed time {last_valid_time} s");
            return Err(PreintegrationError::NumericDivergence { last_valid_time });
        }
        self.phase = IntegrationPhase::Accumulating;
        trace!("Integrated sample, elapsed time {:.6} s", self.state.delta_t);
        Ok(())
    }

    /// Integrate an [`ImuMeasurement`] held over `dt` seconds.
    pub fn integrate(&mut self, measurement: &ImuMeasurement, dt: f64) -> Result<()> {
        self.integrate_measurement(&measurement.gyro, &measurement.accel, dt)
    }

    /// One step of the accumulator. The order rotation, velocity, position is load bearing.
    fn step(&mut self, omega: &Vector3<f64>, acc: &Vector3<f64>, h: f64) {
        let s = &mut self.state;
        let theta = omega * h;
        let half_theta = theta * 0.5;
        let r_half = exp_so3(&half_theta);
        let r_inc = exp_so3(&theta);
        let jr = right_jacobian(&theta);
        let jr_half = right_jacobian(&half_theta);
        let r_half_t = r_half.matrix().transpose();
        let r_inc_t = r_inc.matrix().transpose();

        let r_prev = *s.delta_rotation.matrix();
        let r_mid = s.delta_rotation * r_half;
        let r_mid_m = *r_mid.matrix();
        let acc_skew = skew(acc);
        let velocity_increment = r_mid_m * acc * h;

        // Covariance, with the Jacobians of the step w.r.t. the error state and the noise.
        let a_v_theta = -r_mid_m * acc_skew * r_half_t * h;
        let mut a = Matrix9::identity();
        a.fixed_view_mut::<3, 3>(0, 0).copy_from(&r_inc_t);
        a.fixed_view_mut::<3, 3>(3, 0).copy_from(&a_v_theta);
        a.fixed_view_mut::<3, 3>(6, 0).copy_from(&(a_v_theta * (0.5 * h)));
        a.fixed_view_mut::<3, 3>(6, 3).copy_from(&(Matrix3::identity() * h));

        let b_g_velocity = r_mid_m * acc_skew * jr_half * (0.5 * h) * h;
        let mut b_g = SMatrix::<f64, 9, 3>::zeros();
        b_g.fixed_view_mut::<3, 3>(0, 0).copy_from(&(-jr * h));
        b_g.fixed_view_mut::<3, 3>(3, 0).copy_from(&b_g_velocity);
        b_g.fixed_view_mut::<3, 3>(6, 0).copy_from(&(b_g_velocity * (0.5 * h)));

        let mut b_a = SMatrix::<f64, 9, 3>::zeros();
        b_a.fixed_view_mut::<3, 3>(3, 0).copy_from(&(r_mid_m * h));
        b_a.fixed_view_mut::<3, 3>(6, 0).copy_from(&(r_mid_m * (0.5 * h * h)));

        let gyro_discrete = self.params.gyroscope_covariance() / h;
        let accel_discrete = self.params.accelerometer_covariance() / h;
        let mut covariance = a * s.covariance * a.transpose()
            + b_g * gyro_discrete * b_g.transpose()
            + b_a * accel_discrete * b_a.transpose();
        let integration = r_prev * self.params.integration_covariance() * r_prev.transpose() * h;
        let mut position_block = covariance.fixed_view_mut::<3, 3>(6, 6);
        position_block += integration;
        s.covariance = crate::linalg::symmetrize(&covariance);

        // Bias Jacobians, propagated through the midpoint attitude.
        let j_mid = r_half_t * s.d_rotation_d_gyro_bias - jr_half * (0.5 * h);
        let dv_inc_d_gyro = -h * r_mid_m * acc_skew * j_mid;
        let dv_inc_d_accel = -h * r_mid_m;
        s.d_position_d_gyro_bias += h * s.d_velocity_d_gyro_bias + 0.5 * h * dv_inc_d_gyro;
        s.d_position_d_accel_bias += h * s.d_velocity_d_accel_bias + 0.5 * h * dv_inc_d_accel;
        s.d_velocity_d_gyro_bias += dv_inc_d_gyro;
        s.d_velocity_d_accel_bias += dv_inc_d_accel;
        s.d_rotation_d_gyro_bias = r_inc_t * s.d_rotation_d_gyro_bias - jr * h;

        // Deltas: rotation, then velocity, then position from the pre-update velocity.
        let previous_velocity = s.delta_velocity;
        s.delta_rotation = s.delta_rotation * r_inc;
        s.delta_velocity += velocity_increment;
        s.delta_position += previous_velocity * h + 0.5 * velocity_increment * h;
        s.delta_t += h;
    }

    /// Close the interval. Further samples are still accepted and reopen it.
    pub fn finalize(&mut self) {
        if matches!(
            self.phase,
            IntegrationPhase::Empty | IntegrationPhase::Accumulating
        ) {
            self.phase = IntegrationPhase::Finalized;
        }
    }

    /// Deltas corrected to first order for a bias different from the integration estimate.
    ///
    /// # Returns
    /// `(delta_rotation, delta_velocity, delta_position)` in the interval-start frame.
    pub fn bias_corrected_delta(
        &self,
        bias: &ConstantBias,
    ) -> (Rotation3<f64>, Vector3<f64>, Vector3<f64>) {
        let delta_bias = *bias - self.bias_hat;
        let dbg = delta_bias.gyroscope();
        let dba = delta_bias.accelerometer();
        let s = &self.state;
        let rotation = s.delta_rotation * exp_so3(&(s.d_rotation_d_gyro_bias * dbg));
        let velocity =
            s.delta_velocity + s.d_velocity_d_gyro_bias * dbg + s.d_velocity_d_accel_bias * dba;
        let position =
            s.delta_position + s.d_position_d_gyro_bias * dbg + s.d_position_d_accel_bias * dba;
        (rotation, velocity, position)
    }

    /// Predict the navigation state at the end of the interval.
    ///
    /// # Arguments
    /// * `state_i` - navigation state at the start of the interval.
    /// * `bias` - bias to assume; the deltas are corrected for its difference from the estimate
    ///   used while integrating.
    ///
    /// # Errors
    /// `InvalidParameter` for a non-finite start state, `NumericDivergence` if the summary diverged.
    pub fn predict(&self, state_i: &NavState, bias: &ConstantBias) -> Result<NavState> {
        if let IntegrationPhase::Diverged { last_valid_time } = self.phase {
            return Err(PreintegrationError::NumericDivergence { last_valid_time });
        }
        ensure_finite_vector("position", &state_i.position)?;
        ensure_finite_vector("velocity", &state_i.velocity)?;
        if !state_i.attitude.matrix().iter().all(|v| v.is_finite()) {
            return Err(PreintegrationError::invalid(
                "attitude",
                "rotation contains non-finite entries",
            ));
        }
        let (delta_rotation, delta_velocity, delta_position) = self.bias_corrected_delta(bias);
        let dt = self.state.delta_t;
        let gravity = self.params.n_gravity();
        Ok(NavState {
            attitude: state_i.attitude * delta_rotation,
            position: state_i.position
                + state_i.velocity * dt
                + 0.5 * gravity * dt * dt
                + state_i.attitude * delta_position,
            velocity: state_i.velocity + gravity * dt + state_i.attitude * delta_velocity,
        })
    }

    /// Compose this summary with the one for the immediately following interval.
    ///
    /// # Errors
    /// * `BiasMismatch` if the two summaries were integrated with different bias estimates.
    /// * `NumericDivergence` if either summary diverged.
    pub fn merge(&self, next: &PreintegratedImuMeasurements) -> Result<Self> {
        for phase in [self.phase, next.phase] {
            if let IntegrationPhase::Diverged { last_valid_time } = phase {
                return Err(PreintegrationError::NumericDivergence { last_valid_time });
            }
        }
        if (self.bias_hat - next.bias_hat).vector().amax() > BIAS_MATCH_TOLERANCE {
            return Err(PreintegrationError::BiasMismatch);
        }
        let first = &self.state;
        let second = &next.state;
        let r1 = *first.delta_rotation.matrix();
        let r2_t = second.delta_rotation.matrix().transpose();
        let dt2 = second.delta_t;
        let dv2_skew = skew(&second.delta_velocity);
        let dp2_skew = skew(&second.delta_position);

        let mut a = Matrix9::identity();
        a.fixed_view_mut::<3, 3>(0, 0).copy_from(&r2_t);
        a.fixed_view_mut::<3, 3>(3, 0).copy_from(&(-r1 * dv2_skew));
        a.fixed_view_mut::<3, 3>(6, 0).copy_from(&(-r1 * dp2_skew));
        a.fixed_view_mut::<3, 3>(6, 3).copy_from(&(Matrix3::identity() * dt2));
        let mut b = Matrix9::identity();
        b.fixed_view_mut::<3, 3>(3, 3).copy_from(&r1);
        b.fixed_view_mut::<3, 3>(6, 6).copy_from(&r1);

        let state = Accumulator {
            delta_t: first.delta_t + dt2,
            delta_rotation: first.delta_rotation * second.delta_rotation,
            delta_velocity: first.delta_velocity + r1 * second.delta_velocity,
            delta_position: first.delta_position
                + first.delta_velocity * dt2
                + r1 * second.delta_position,
            d_rotation_d_gyro_bias: r2_t * first.d_rotation_d_gyro_bias
                + second.d_rotation_d_gyro_bias,
            d_velocity_d_gyro_bias: first.d_velocity_d_gyro_bias
                + r1 * second.d_velocity_d_gyro_bias
                - r1 * dv2_skew * first.d_rotation_d_gyro_bias,
            d_velocity_d_accel_bias: first.d_velocity_d_accel_bias
                + r1 * second.d_velocity_d_accel_bias,
            d_position_d_gyro_bias: first.d_position_d_gyro_bias
                + first.d_velocity_d_gyro_bias * dt2
                + r1 * second.d_position_d_gyro_bias
                - r1 * dp2_skew * first.d_rotation_d_gyro_bias,
            d_position_d_accel_bias: first.d_position_d_accel_bias
                + first.d_velocity_d_accel_bias * dt2
                + r1 * second.d_position_d_accel_bias,
            covariance: crate::linalg::symmetrize(
                &(a * first.covariance * a.transpose() + b * second.covariance * b.transpose()),
            ),
        };
        let phase = match (self.phase, next.phase) {
            (IntegrationPhase::Empty, IntegrationPhase::Empty) => IntegrationPhase::Empty,
            (IntegrationPhase::Finalized, IntegrationPhase::Finalized) => {
                IntegrationPhase::Finalized
            }
            _ => IntegrationPhase::Accumulating,
        };
        debug!(
            "Merged summaries of {:.6} s and {:.6} s",
            first.delta_t, second.delta_t
        );
        Ok(PreintegratedImuMeasurements {
            params: self.params,
            bias_hat: self.bias_hat,
            state,
            phase,
        })
    }

    pub fn phase(&self) -> IntegrationPhase {
        self.phase
    }

    pub fn params(&self) -> &PreintegrationParams {
        &self.params
    }

    /// Bias estimate removed from every sample during integration.
    pub fn bias_hat(&self) -> &ConstantBias {
        &self.bias_hat
    }

    /// Elapsed integration time in seconds.
    pub fn delta_t(&self) -> f64 {
        self.state.delta_t
    }

    pub fn delta_rotation(&self) -> &Rotation3<f64> {
        &self.state.delta_rotation
    }

    pub fn delta_velocity(&self) -> &Vector3<f64> {
        &self.state.delta_velocity
    }

    pub fn delta_position(&self) -> &Vector3<f64> {
        &self.state.delta_position
    }

    pub fn d_rotation_d_gyro_bias(&self) -> &Matrix3<f64> {
        &self.state.d_rotation_d_gyro_bias
    }

    pub fn d_velocity_d_gyro_bias(&self) -> &Matrix3<f64> {
        &self.state.d_velocity_d_gyro_bias
    }

    pub fn d_velocity_d_accel_bias(&self) -> &Matrix3<f64> {
        &self.state.d_velocity_d_accel_bias
    }

    pub fn d_position_d_gyro_bias(&self) -> &Matrix3<f64> {
        &self.state.d_position_d_gyro_bias
    }

    pub fn d_position_d_accel_bias(&self) -> &Matrix3<f64> {
        &self.state.d_position_d_accel_bias
    }

    /// Covariance of `[δθ, δv, δp]`.
    pub fn covariance(&self) -> &Matrix9 {
        &self.state.covariance
    }
}
