pub mod linear_accel;

pub use linear_accel::{EstimatorConfig, LinearAccelKf, LinearAccelState};
