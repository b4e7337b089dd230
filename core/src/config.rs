//! Simulation configuration.
//!
//! [`SimulationConfig`] collects every number a validation run needs (gravity, noise sigmas, the
//! generating twist, the true bias, sampling step, duration and seed) as a plain serde struct that
//! can be stored as JSON, YAML or TOML. Missing fields take the defaults of the reference loop
//! scenario: a 30 deg/s pitch rate at 2 m/s forward speed, which closes a full loop in 12 s.
//!
//! ```
//! use preintegration::config::SimulationConfig;
//!
//! let config = SimulationConfig {
//!     duration: 3.0,
//!     ..Default::default()
//! };
//! let runner = config.runner().unwrap();
//! assert_eq!(runner.dt(), 0.01);
//! ```
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use crate::error::{Result, ensure_positive};
use crate::params::{
    ConstantBias, DEFAULT_ACCEL_SIGMA, DEFAULT_GYRO_SIGMA, DEFAULT_INTEGRATION_SIGMA,
    GravityConvention, PreintegrationParams,
};
use crate::runner::ScenarioRunner;
use crate::scenario::ConstantTwistScenario;

fn default_gravity() -> f64 {
    10.0
}
fn default_gyro_sigma() -> f64 {
    DEFAULT_GYRO_SIGMA
}
fn default_accel_sigma() -> f64 {
    DEFAULT_ACCEL_SIGMA
}
fn default_integration_sigma() -> f64 {
    DEFAULT_INTEGRATION_SIGMA
}
fn default_angular_velocity() -> [f64; 3] {
    [0.0, -30.0_f64.to_radians(), 0.0]
}
fn default_linear_velocity() -> [f64; 3] {
    [2.0, 0.0, 0.0]
}
fn default_accel_bias() -> [f64; 3] {
    [0.0, 0.1, 0.0]
}
fn default_dt() -> f64 {
    0.01
}
fn default_duration() -> f64 {
    12.0
}
/// Default seed value for reproducible simulations
fn default_seed() -> u64 {
    42
}
fn default_report_every() -> usize {
    25
}

/// Parameters of a validation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Gravity magnitude in m/s^2
    #[serde(default = "default_gravity")]
    pub gravity: f64,
    #[serde(default)]
    pub gravity_convention: GravityConvention,
    /// Gyroscope noise density in rad/s/√Hz
    #[serde(default = "default_gyro_sigma")]
    pub gyro_sigma: f64,
    /// Accelerometer noise density in m/s^2/√Hz
    #[serde(default = "default_accel_sigma")]
    pub accel_sigma: f64,
    #[serde(default = "default_integration_sigma")]
    pub integration_sigma: f64,
    /// Body rate of the generating twist in rad/s
    #[serde(default = "default_angular_velocity")]
    pub angular_velocity: [f64; 3],
    /// Body velocity of the generating twist in m/s
    #[serde(default = "default_linear_velocity")]
    pub linear_velocity: [f64; 3],
    /// True accelerometer bias in m/s^2
    #[serde(default = "default_accel_bias")]
    pub accel_bias: [f64; 3],
    /// True gyroscope bias in rad/s
    #[serde(default)]
    pub gyro_bias: [f64; 3],
    /// Sampling period in seconds
    #[serde(default = "default_dt")]
    pub dt: f64,
    /// Length of the validation sweep in seconds
    #[serde(default = "default_duration")]
    pub duration: f64,
    /// Random number generator seed for the noisy readings.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Record one validation row every this many samples
    #[serde(default = "default_report_every")]
    pub report_every: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            gravity: default_gravity(),
            gravity_convention: GravityConvention::default(),
            gyro_sigma: default_gyro_sigma(),
            accel_sigma: default_accel_sigma(),
            integration_sigma: default_integration_sigma(),
            angular_velocity: default_angular_velocity(),
            linear_velocity: default_linear_velocity(),
            accel_bias: default_accel_bias(),
            gyro_bias: [0.0; 3],
            dt: default_dt(),
            duration: default_duration(),
            seed: default_seed(),
            report_every: default_report_every(),
        }
    }
}

impl SimulationConfig {
    /// Noise model with isotropic covariances from the configured sigmas.
    pub fn params(&self) -> Result<PreintegrationParams> {
        PreintegrationParams::from_sigmas(
            self.gravity,
            self.gravity_convention,
            self.gyro_sigma,
            self.accel_sigma,
            self.integration_sigma,
        )
    }

    /// The true sensor bias.
    pub fn bias(&self) -> Result<ConstantBias> {
        ConstantBias::new(
            Vector3::from(self.accel_bias),
            Vector3::from(self.gyro_bias),
        )
    }

    pub fn scenario(&self) -> Result<ConstantTwistScenario> {
        ConstantTwistScenario::new(
            Vector3::from(self.angular_velocity),
            Vector3::from(self.linear_velocity),
        )
    }

    /// Runner for the configured scenario, noise model and bias.
    ///
    /// # Errors
    /// `InvalidParameter` naming the first field that fails validation.
    pub fn runner(&self) -> Result<ScenarioRunner<ConstantTwistScenario>> {
        ensure_positive("duration", self.duration)?;
        if self.report_every == 0 {
            return Err(crate::error::PreintegrationError::invalid(
                "report_every",
                "must be at least 1",
            ));
        }
        ScenarioRunner::new(
            self.scenario()?,
            self.params()?,
            self.dt,
            self.bias()?,
            self.seed,
        )
    }

    /// Write the configuration to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }

    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }

    /// Write the configuration as YAML.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }

    /// Read the configuration from YAML.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(io::Error::other)
    }

    /// Write the configuration as TOML.
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }

    /// Read the configuration from TOML.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut s = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut s)?;
        toml::from_str(&s).map_err(io::Error::other)
    }

    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }

    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}
