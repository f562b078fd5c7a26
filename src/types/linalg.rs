//! Fixed-size linear algebra types for the gravity / linear-acceleration filter.
//!
//! Dimensions are checked at compile time; the filter never allocates.

use nalgebra::{SMatrix, SVector};

// ===== State Dimensions =====
pub const STATE_DIM: usize = 6; // gravity (3) + linear acceleration (3)
pub const AXES: usize = 3;

// ===== Measurement Dimensions =====
pub const MEASURE_DIM_ACCEL: usize = 3; // (ax, ay, az)

pub type StateVec6 = SVector<f64, STATE_DIM>;
pub type StateMat6 = SMatrix<f64, STATE_DIM, STATE_DIM>;

pub type AccelVec = SVector<f64, MEASURE_DIM_ACCEL>;
pub type AccelNoise = SMatrix<f64, MEASURE_DIM_ACCEL, MEASURE_DIM_ACCEL>;

// Observation model z = g + a
pub type ObservationMat = SMatrix<f64, MEASURE_DIM_ACCEL, STATE_DIM>; // 3×6
pub type KalmanGainAccel = SMatrix<f64, STATE_DIM, MEASURE_DIM_ACCEL>; // 6×3
