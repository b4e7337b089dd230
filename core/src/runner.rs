//! Synthetic IMU driven by a ground-truth [`Scenario`].
//!
//! [`ScenarioRunner`] turns the scenario's kinematics into the readings a strapdown IMU would
//! produce:
//!
//! - angular velocity: $\tilde\omega = \omega_b + b_g + \eta_g$
//! - specific force: $\tilde f = a_b - R^T g_n + b_a + \eta_a$
//!
//! where the discrete noise $\eta$ is drawn as $\sqrt{\Sigma} n / \sqrt{dt}$ with $n \sim N(0, I)$,
//! so a continuous-time density $\Sigma$ is preserved at any sampling rate. It also drives a
//! [`PreintegratedImuMeasurements`] over a time window and predicts the resulting state from the
//! scenario's initial state, which is what validation compares against the ground truth.
//!
//! Sampling cadence: steps start at `t0 + k * dt` and each step is sampled at its midpoint. When the
//! window is not a multiple of `dt` the last step covers the exact remainder.
//!
//! Seeded noise is keyed by the sample's step on the `dt` grid counted from `t = 0`, so a window
//! `[t0, t1]` sees the same draws as a run over `[0, t1]` does at those times, and disjoint
//! windows see independent draws.
use log::{debug, info};
use nalgebra::{Matrix3, Matrix6, Vector3, Vector6};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};

use crate::error::{PreintegrationError, Result, ensure_non_negative, ensure_positive};
use crate::linalg::{matrix_square_root, sample_covariance};
use crate::params::{ConstantBias, PreintegrationParams};
use crate::preintegration::PreintegratedImuMeasurements;
use crate::scenario::Scenario;
use crate::{ImuMeasurement, Matrix9, NavState, Vector9};

/// Remainders shorter than this fraction of `dt` are not integrated.
const REMAINDER_TOLERANCE: f64 = 1e-9;

/// Samples a scenario as a biased, optionally noisy IMU.
#[derive(Clone, Debug)]
pub struct ScenarioRunner<S: Scenario> {
    scenario: S,
    params: PreintegrationParams,
    dt: f64,
    actual_bias: ConstantBias,
    seed: u64,
    gyro_noise_factor: Matrix3<f64>,
    accel_noise_factor: Matrix3<f64>,
}

impl<S: Scenario> ScenarioRunner<S> {
    /// Create a runner sampling `scenario` every `dt` seconds.
    ///
    /// # Arguments
    /// * `scenario` - ground truth.
    /// * `params` - noise model and gravity.
    /// * `dt` - sampling period in seconds.
    /// * `actual_bias` - bias added to every reading.
    /// * `seed` - seed of the noise used by [`ScenarioRunner::integrate`] with `ideal = false`.
    ///
    /// # Errors
    /// `InvalidParameter` if `dt` is not strictly positive.
    pub fn new(
        scenario: S,
        params: PreintegrationParams,
        dt: f64,
        actual_bias: ConstantBias,
        seed: u64,
    ) -> Result<Self> {
        let dt = ensure_positive("dt", dt)?;
        let scale = 1.0 / dt.sqrt();
        Ok(ScenarioRunner {
            gyro_noise_factor: matrix_square_root(params.gyroscope_covariance()) * scale,
            accel_noise_factor: matrix_square_root(params.accelerometer_covariance()) * scale,
            scenario,
            params,
            dt,
            actual_bias,
            seed,
        })
    }

    pub fn scenario(&self) -> &S {
        &self.scenario
    }

    pub fn params(&self) -> &PreintegrationParams {
        &self.params
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn actual_bias(&self) -> &ConstantBias {
        &self.actual_bias
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Gravity in the navigation frame.
    pub fn gravity_n(&self) -> Vector3<f64> {
        self.params.n_gravity()
    }

    /// True body rate at `t`.
    pub fn actual_angular_velocity(&self, t: f64) -> Result<Vector3<f64>> {
        let t = ensure_non_negative("t", t)?;
        Ok(self.scenario.omega_b(t))
    }

    /// True specific force at `t`: body acceleration minus gravity in the body frame.
    pub fn actual_specific_force(&self, t: f64) -> Result<Vector3<f64>> {
        let t = ensure_non_negative("t", t)?;
        Ok(self.specific_force_at(t))
    }

    /// Noise-free gyroscope reading at `t` (truth plus bias).
    pub fn measured_angular_velocity(&self, t: f64) -> Result<Vector3<f64>> {
        Ok(self.actual_angular_velocity(t)? + self.actual_bias.gyroscope())
    }

    /// Noise-free accelerometer reading at `t` (truth plus bias).
    pub fn measured_specific_force(&self, t: f64) -> Result<Vector3<f64>> {
        Ok(self.actual_specific_force(t)? + self.actual_bias.accelerometer())
    }

    /// Gyroscope reading at `t` with a noise draw from `rng`.
    pub fn sample_angular_velocity<R: Rng + ?Sized>(
        &self,
        t: f64,
        rng: &mut R,
    ) -> Result<Vector3<f64>> {
        Ok(self.measured_angular_velocity(t)? + self.gyro_noise_factor * standard_normal(rng))
    }

    /// Accelerometer reading at `t` with a noise draw from `rng`.
    pub fn sample_specific_force<R: Rng + ?Sized>(
        &self,
        t: f64,
        rng: &mut R,
    ) -> Result<Vector3<f64>> {
        Ok(self.measured_specific_force(t)? + self.accel_noise_factor * standard_normal(rng))
    }

    /// Noise-free reading at `t` as an [`ImuMeasurement`].
    pub fn measurement(&self, t: f64) -> Result<ImuMeasurement> {
        Ok(ImuMeasurement::new(
            self.measured_specific_force(t)?,
            self.measured_angular_velocity(t)?,
        ))
    }

    /// Integrate `[0, t]` with `estimated_bias` removed from every reading.
    ///
    /// With `ideal` the readings are noise free; otherwise each reading's noise is drawn from a
    /// generator seeded with the runner's seed and the reading's step index, so repeated calls
    /// return the same summary.
    pub fn integrate(
        &self,
        t: f64,
        estimated_bias: &ConstantBias,
        ideal: bool,
    ) -> Result<PreintegratedImuMeasurements> {
        self.integrate_between(0.0, t, estimated_bias, ideal)
    }

    /// Integrate the window `[t0, t1]`.
    ///
    /// Noisy windows that tile `[0, t]` on the `dt` grid merge to the same summary as
    /// `integrate(t, ..., false)`.
    pub fn integrate_between(
        &self,
        t0: f64,
        t1: f64,
        estimated_bias: &ConstantBias,
        ideal: bool,
    ) -> Result<PreintegratedImuMeasurements> {
        if ideal {
            self.integrate_window(t0, t1, estimated_bias, |t| self.measurement(t))
        } else {
            self.integrate_window(t0, t1, estimated_bias, |t| {
                let mut rng = self.step_rng(t);
                Ok(ImuMeasurement::new(
                    self.sample_specific_force(t, &mut rng)?,
                    self.sample_angular_velocity(t, &mut rng)?,
                ))
            })
        }
    }

    /// Integrate `[0, t]` with noise drawn from a caller supplied generator.
    pub fn integrate_with_rng<R: Rng + ?Sized>(
        &self,
        t: f64,
        estimated_bias: &ConstantBias,
        rng: &mut R,
    ) -> Result<PreintegratedImuMeasurements> {
        self.integrate_window(0.0, t, estimated_bias, |t| {
            Ok(ImuMeasurement::new(
                self.sample_specific_force(t, &mut *rng)?,
                self.sample_angular_velocity(t, &mut *rng)?,
            ))
        })
    }

    fn integrate_window<F>(
        &self,
        t0: f64,
        t1: f64,
        estimated_bias: &ConstantBias,
        mut sample: F,
    ) -> Result<PreintegratedImuMeasurements>
    where
        F: FnMut(f64) -> Result<ImuMeasurement>,
    {
        let t0 = ensure_non_negative("t0", t0)?;
        let t1 = ensure_non_negative("t1", t1)?;
        if t1 < t0 {
            return Err(PreintegrationError::invalid(
                "t1",
                format!("window end {t1} precedes start {t0}"),
            ));
        }
        let mut pim = PreintegratedImuMeasurements::new(self.params, *estimated_bias);
        let mut steps: u64 = 0;
        loop {
            let start = t0 + steps as f64 * self.dt;
            let remaining = t1 - start;
            if remaining <= REMAINDER_TOLERANCE * self.dt {
                break;
            }
            let h = remaining.min(self.dt);
            let measurement = sample(start + 0.5 * h)?;
            pim.integrate(&measurement, h)?;
            steps += 1;
        }
        pim.finalize();
        debug!("Integrated [{t0:.4}, {t1:.4}] s in {steps} steps");
        Ok(pim)
    }

    /// Predict the state at the end of `pim` from the scenario's initial state.
    pub fn predict(
        &self,
        pim: &PreintegratedImuMeasurements,
        estimated_bias: &ConstantBias,
    ) -> Result<NavState> {
        pim.predict(&self.scenario.nav_state(0.0), estimated_bias)
    }

    /// Monte Carlo estimate of the covariance of the predicted state at `t`.
    ///
    /// Each of `samples` noisy integrations is predicted and expressed in local coordinates around the
    /// noise-free prediction; the result is their sample covariance over `[δθ, δv, δp]`.
    pub fn estimate_covariance<R: Rng + ?Sized>(
        &self,
        t: f64,
        samples: usize,
        estimated_bias: &ConstantBias,
        rng: &mut R,
    ) -> Result<Matrix9> {
        ensure_sample_count(samples)?;
        info!("Estimating prediction covariance at t = {t} s from {samples} samples");
        let pim = self.integrate(t, estimated_bias, true)?;
        let reference = self.predict(&pim, estimated_bias)?;
        let mut deviations: Vec<Vector9> = Vec::with_capacity(samples);
        for _ in 0..samples {
            let sampled = self.integrate_with_rng(t, estimated_bias, &mut *rng)?;
            let prediction = self.predict(&sampled, estimated_bias)?;
            deviations.push(reference.local_coordinates(&prediction));
        }
        let covariance = sample_covariance(&deviations);
        info!("Prediction covariance trace {:.6e}", covariance.trace());
        Ok(covariance)
    }

    /// Monte Carlo estimate of the discrete measurement noise covariance.
    ///
    /// Ordered accelerometer then gyroscope; should approach `blockdiag(Σ_a, Σ_g) / dt`.
    pub fn estimate_noise_covariance<R: Rng + ?Sized>(
        &self,
        samples: usize,
        rng: &mut R,
    ) -> Result<Matrix6<f64>> {
        ensure_sample_count(samples)?;
        info!("Estimating measurement noise covariance from {samples} samples");
        let omega = self.measured_angular_velocity(0.0)?;
        let force = self.measured_specific_force(0.0)?;
        let mut noise: Vec<Vector6<f64>> = Vec::with_capacity(samples);
        for _ in 0..samples {
            let mut v = Vector6::zeros();
            v.fixed_rows_mut::<3>(0)
                .copy_from(&(self.sample_specific_force(0.0, &mut *rng)? - force));
            v.fixed_rows_mut::<3>(3)
                .copy_from(&(self.sample_angular_velocity(0.0, &mut *rng)? - omega));
            noise.push(v);
        }
        Ok(sample_covariance(&noise))
    }

    /// Generator for the reading at `t`, keyed by the runner's seed and the step containing `t`.
    fn step_rng(&self, t: f64) -> StdRng {
        let step = (t / self.dt).floor() as u64;
        let mut seed = <StdRng as SeedableRng>::Seed::default();
        seed[..8].copy_from_slice(&self.seed.to_le_bytes());
        seed[8..16].copy_from_slice(&step.to_le_bytes());
        StdRng::from_seed(seed)
    }

    fn specific_force_at(&self, t: f64) -> Vector3<f64> {
        let gravity_b = self.scenario.rotation(t).inverse() * self.params.n_gravity();
        self.scenario.acceleration_b(t) - gravity_b
    }
}

fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> Vector3<f64> {
    Vector3::new(
        StandardNormal.sample(rng),
        StandardNormal.sample(rng),
        StandardNormal.sample(rng),
    )
}

fn ensure_sample_count(samples: usize) -> Result<()> {
    if samples < 2 {
        return Err(PreintegrationError::invalid(
            "samples",
            format!("need at least 2 samples, got {samples}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{AcceleratingScenario, ConstantTwistScenario};
    use assert_approx_eq::assert_approx_eq;
    use nalgebra::Rotation3;

    fn loop_runner(
        params: PreintegrationParams,
        bias: ConstantBias,
    ) -> ScenarioRunner<ConstantTwistScenario> {
        let scenario = ConstantTwistScenario::new(
            Vector3::new(0.0, -30.0_f64.to_radians(), 0.0),
            Vector3::new(2.0, 0.0, 0.0),
        )
        .unwrap();
        ScenarioRunner::new(scenario, params, 0.01, bias, 42).unwrap()
    }

    #[test]
    fn rejects_bad_dt_and_time() {
        let scenario = ConstantTwistScenario::new(Vector3::zeros(), Vector3::zeros()).unwrap();
        let params = PreintegrationParams::make_z_up(10.0).unwrap();
        assert!(ScenarioRunner::new(scenario, params, 0.0, ConstantBias::zero(), 0).is_err());
        let runner = ScenarioRunner::new(scenario, params, 0.1, ConstantBias::zero(), 0).unwrap();
        match runner.actual_specific_force(-1.0).unwrap_err() {
            PreintegrationError::InvalidParameter { name, .. } => assert_eq!(name, "t"),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(runner.measured_angular_velocity(f64::NAN).is_err());
        assert!(runner.integrate_between(1.0, 0.5, &ConstantBias::zero(), true).is_err());
    }

    #[test]
    fn specific_force_at_rest_opposes_gravity() {
        let scenario = ConstantTwistScenario::new(Vector3::zeros(), Vector3::zeros()).unwrap();
        let params = PreintegrationParams::make_z_up(9.81).unwrap();
        let runner = ScenarioRunner::new(scenario, params, 0.1, ConstantBias::zero(), 0).unwrap();
        let f = runner.actual_specific_force(3.0).unwrap();
        assert_eq!(f, Vector3::new(0.0, 0.0, 9.81));
        let params = PreintegrationParams::make_z_down(9.81).unwrap();
        let runner = ScenarioRunner::new(scenario, params, 0.1, ConstantBias::zero(), 0).unwrap();
        assert_eq!(runner.actual_specific_force(3.0).unwrap(), Vector3::new(0.0, 0.0, -9.81));
    }

    #[test]
    fn measured_values_add_bias() {
        let bias = ConstantBias::new(Vector3::new(0.0, 0.1, 0.0), Vector3::new(0.01, 0.0, 0.0))
            .unwrap();
        let runner = loop_runner(PreintegrationParams::make_z_up(10.0).unwrap(), bias);
        let t = 0.7;
        let omega = runner.measured_angular_velocity(t).unwrap();
        assert_eq!(
            omega - runner.actual_angular_velocity(t).unwrap(),
            Vector3::new(0.01, 0.0, 0.0)
        );
        let force = runner.measured_specific_force(t).unwrap();
        let diff = force - runner.actual_specific_force(t).unwrap();
        assert_approx_eq!(diff.y, 0.1, 1e-15);
        let m = runner.measurement(t).unwrap();
        assert_eq!(m.accel, force);
        assert_eq!(m.gyro, omega);
    }

    #[test]
    fn noise_free_params_sample_exactly() {
        let runner = loop_runner(
            PreintegrationParams::make_z_up(10.0).unwrap(),
            ConstantBias::zero(),
        );
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(
            runner.sample_specific_force(0.3, &mut rng).unwrap(),
            runner.measured_specific_force(0.3).unwrap()
        );
    }

    #[test]
    fn cadence_covers_partial_step() {
        let runner = loop_runner(
            PreintegrationParams::make_z_up(10.0).unwrap(),
            ConstantBias::zero(),
        );
        let pim = runner.integrate(0.105, &ConstantBias::zero(), true).unwrap();
        assert_approx_eq!(pim.delta_t(), 0.105, 1e-12);
        let empty = runner.integrate(0.0, &ConstantBias::zero(), true).unwrap();
        assert_eq!(empty.delta_t(), 0.0);
        let predicted = runner.predict(&empty, &ConstantBias::zero()).unwrap();
        assert_eq!(predicted, runner.scenario().nav_state(0.0));
    }

    #[test]
    fn noisy_integration_is_reproducible() {
        let runner = loop_runner(
            PreintegrationParams::realistic(10.0).unwrap(),
            ConstantBias::zero(),
        );
        let a = runner.integrate(0.5, &ConstantBias::zero(), false).unwrap();
        let b = runner.integrate(0.5, &ConstantBias::zero(), false).unwrap();
        let ideal = runner.integrate(0.5, &ConstantBias::zero(), true).unwrap();
        assert_eq!(a.delta_position(), b.delta_position());
        assert_ne!(a.delta_position(), ideal.delta_position());
    }

    #[test]
    fn noisy_windows_draw_independent_noise() {
        let scenario = ConstantTwistScenario::new(Vector3::zeros(), Vector3::zeros()).unwrap();
        let params = PreintegrationParams::realistic(10.0).unwrap();
        let runner = ScenarioRunner::new(scenario, params, 0.01, ConstantBias::zero(), 42).unwrap();
        let bias = ConstantBias::zero();
        let first = runner.integrate_between(0.0, 1.5, &bias, false).unwrap();
        let second = runner.integrate_between(1.5, 3.0, &bias, false).unwrap();
        let first_angle = crate::geometry::log_so3(first.delta_rotation());
        let second_angle = crate::geometry::log_so3(second.delta_rotation());
        assert!(
            (first_angle - second_angle).norm() > 1e-3 * first_angle.norm(),
            "windows share noise: {first_angle} vs {second_angle}"
        );
        assert_ne!(first.delta_velocity(), second.delta_velocity());

        // the first window is a prefix of the full run
        let prefix = runner.integrate(1.5, &bias, false).unwrap();
        assert_eq!(prefix.delta_velocity(), first.delta_velocity());
        let draw = |t: f64| runner.step_rng(t).random::<u64>();
        assert_eq!(draw(0.125), draw(0.121));
        assert_ne!(draw(0.125), draw(0.135));
    }

    #[test]
    fn accelerating_scenario_round_trip() {
        // constant acceleration without rotation is integrated exactly
        let scenario = AcceleratingScenario::new(
            Rotation3::from_euler_angles(0.0, 0.0, 0.3),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(0.2, 0.0, 0.1),
            Vector3::zeros(),
        )
        .unwrap();
        let params = PreintegrationParams::make_z_up(9.81).unwrap();
        let runner = ScenarioRunner::new(scenario, params, 0.01, ConstantBias::zero(), 0).unwrap();
        let pim = runner.integrate(2.0, &ConstantBias::zero(), true).unwrap();
        let predicted = runner.predict(&pim, &ConstantBias::zero()).unwrap();
        let truth = runner.scenario().nav_state(2.0);
        assert!((predicted.position - truth.position).amax() < 1e-9);
        assert!((predicted.velocity - truth.velocity).amax() < 1e-9);
    }

    #[test]
    fn sample_count_is_validated() {
        let runner = loop_runner(
            PreintegrationParams::realistic(10.0).unwrap(),
            ConstantBias::zero(),
        );
        let mut rng = StdRng::seed_from_u64(1);
        assert!(runner.estimate_noise_covariance(1, &mut rng).is_err());
        assert!(runner.estimate_covariance(0.1, 0, &ConstantBias::zero(), &mut rng).is_err());
    }
}
