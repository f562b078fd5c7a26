//! 6-State Linear Acceleration Kalman Filter (accelerometer only)
//!
//! State Vector (6D):
//! [0-2]: Gravity (gx, gy, gz) in body frame (m/s²)
//! [3-5]: Linear acceleration (ax, ay, az) in body frame (m/s²)
//!
//! Gravity is a random walk (constant over short windows). Linear
//! acceleration is an AR(1) process decaying with phi = exp(-dt / tau).
//! The accelerometer observes the sum z = g + a.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, EstimatorError};
use crate::types::{
    AccelNoise, AccelVec, KalmanGainAccel, ObservationMat, StateMat6, StateVec6, AXES,
};

/// Reference rate the gravity process noise is tuned at [Hz]
const REFERENCE_RATE_HZ: f64 = 100.0;

/// Covariance diagonal after gravity initialization
const INIT_GRAVITY_VAR: f64 = 0.1;
const INIT_LINEAR_VAR: f64 = 1.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// Accelerometer sampling rate [Hz]
    pub sample_rate_hz: f64,
    /// Target decay time constant of linear acceleration [s]
    pub tau: f64,
    /// Measurement noise variance [(m/s²)²]
    pub measurement_noise: f64,
    /// Gravity random-walk noise at the 100 Hz reference rate
    pub gravity_noise_base: f64,
    /// Steady-state linear acceleration variance
    pub accel_noise_base: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 30.0,
            tau: 0.1,
            measurement_noise: 0.05,
            gravity_noise_base: 1e-3,
            accel_noise_base: 0.02,
        }
    }
}

impl EstimatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("sample rate", self.sample_rate_hz),
            ("tau", self.tau),
            ("measurement noise", self.measurement_noise),
            ("gravity noise", self.gravity_noise_base),
            ("acceleration noise", self.accel_noise_base),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidParameters(format!(
                    "{} must be positive and finite, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    pub fn dt(&self) -> f64 {
        1.0 / self.sample_rate_hz
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinearAccelState {
    /// Gravity estimate in body frame [m/s²]
    pub gravity: (f64, f64, f64),

    /// Linear acceleration estimate in body frame [m/s²]
    pub linear_accel: (f64, f64, f64),

    /// Covariance trace for uncertainty
    pub covariance_trace: f64,

    pub initialized: bool,
    pub updates: u64,
}

pub struct LinearAccelKf {
    /// AR(1) decay factor for linear acceleration
    phi: f64,

    /// State transition [6x6]
    transition: StateMat6,

    /// Observation model [3x6]
    observation: ObservationMat,

    /// Discrete process noise [6x6]
    process_noise: StateMat6,

    /// Measurement noise [3x3]
    measurement_noise: AccelNoise,

    state: StateVec6,
    covariance: StateMat6,

    initialized: bool,
    updates: u64,
}

impl LinearAccelKf {
    pub fn new(config: EstimatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let dt = config.dt();
        let phi = (-dt / config.tau).exp();

        let mut transition = StateMat6::identity();
        for i in AXES..2 * AXES {
            transition[(i, i)] = phi;
        }

        let mut observation = ObservationMat::zeros();
        for i in 0..AXES {
            observation[(i, i)] = 1.0;
            observation[(i, i + AXES)] = 1.0;
        }

        // Gravity random walk scaled by dt, AR(1) steady-state variance for linear
        let qg = config.gravity_noise_base * (REFERENCE_RATE_HZ / config.sample_rate_hz);
        let qg_d = qg * dt;
        let qa_d = config.accel_noise_base * (1.0 - phi * phi);
        let process_noise =
            StateMat6::from_diagonal(&StateVec6::from_column_slice(&[qg_d, qg_d, qg_d, qa_d, qa_d, qa_d]));

        let measurement_noise = AccelNoise::identity() * config.measurement_noise;

        Ok(Self {
            phi,
            transition,
            observation,
            process_noise,
            measurement_noise,
            state: StateVec6::zeros(),
            covariance: StateMat6::identity(),
            initialized: false,
            updates: 0,
        })
    }

    /// Seed gravity with the mean of a (roughly stationary) window.
    pub fn initialize_gravity(&mut self, samples: &[AccelVec]) -> Result<(), EstimatorError> {
        if samples.is_empty() {
            return Err(EstimatorError::EmptyInitWindow);
        }

        let sum = samples.iter().fold(AccelVec::zeros(), |acc, s| acc + s);
        let mean = sum / samples.len() as f64;

        self.state = StateVec6::zeros();
        for i in 0..AXES {
            self.state[i] = mean[i];
        }
        self.covariance = StateMat6::from_diagonal(&StateVec6::from_column_slice(&[
            INIT_GRAVITY_VAR,
            INIT_GRAVITY_VAR,
            INIT_GRAVITY_VAR,
            INIT_LINEAR_VAR,
            INIT_LINEAR_VAR,
            INIT_LINEAR_VAR,
        ]));
        self.initialized = true;

        log::debug!(
            "Gravity initialized from {} samples: ({:.3}, {:.3}, {:.3})",
            samples.len(),
            mean[0],
            mean[1],
            mean[2]
        );
        Ok(())
    }

    /// One predict + correct cycle. Returns (gravity, linear acceleration).
    pub fn update(&mut self, z: &AccelVec) -> Result<(AccelVec, AccelVec), EstimatorError> {
        if !self.initialized {
            return Err(EstimatorError::NotInitialized);
        }

        // Predict
        let x_pred = self.transition * self.state;
        let p_pred =
            self.transition * self.covariance * self.transition.transpose() + self.process_noise;

        // Innovation
        let h_t = self.observation.transpose();
        let innovation = z - self.observation * x_pred;
        let s = self.observation * p_pred * h_t + self.measurement_noise;
        let s_inv = s
            .try_inverse()
            .ok_or(EstimatorError::SingularInnovation)?;
        let k: KalmanGainAccel = p_pred * h_t * s_inv;

        self.state = x_pred + k * innovation;

        // Joseph form keeps P symmetric positive semi-definite
        let i_kh = StateMat6::identity() - k * self.observation;
        self.covariance =
            i_kh * p_pred * i_kh.transpose() + k * self.measurement_noise * k.transpose();

        self.updates += 1;
        Ok((self.gravity(), self.linear_accel()))
    }

    /// Back to the uninitialized zero/identity baseline.
    pub fn reset(&mut self) {
        self.state = StateVec6::zeros();
        self.covariance = StateMat6::identity();
        self.initialized = false;
        self.updates = 0;
    }

    pub fn gravity(&self) -> AccelVec {
        AccelVec::new(self.state[0], self.state[1], self.state[2])
    }

    pub fn linear_accel(&self) -> AccelVec {
        AccelVec::new(self.state[3], self.state[4], self.state[5])
    }

    pub fn covariance(&self) -> &StateMat6 {
        &self.covariance
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn phi(&self) -> f64 {
        self.phi
    }

    pub fn get_state(&self) -> LinearAccelState {
        let g = self.gravity();
        let a = self.linear_accel();
        LinearAccelState {
            gravity: (g[0], g[1], g[2]),
            linear_accel: (a[0], a[1], a[2]),
            covariance_trace: self.covariance.trace(),
            initialized: self.initialized,
            updates: self.updates,
        }
    }
}
