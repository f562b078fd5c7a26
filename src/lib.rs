//! Activity monitor for a wearable IMU streaming text telemetry over an
//! unreliable link.
//!
//! Bytes from the [`stream`] manager are reassembled into lines, decoded by
//! [`sensors`] (minimal `x,y,z` or labelled [`parser`] blocks), buffered in a
//! [`window`], and classified on a fixed cadence by the [`classifier`], which
//! can remove gravity with the Kalman filter in [`filters`]. Results go to the
//! [`sinks`].

pub mod classifier;
pub mod config;
pub mod error;
pub mod filters;
pub mod parser;
pub mod pipeline;
pub mod sensors;
pub mod shutdown;
pub mod sinks;
pub mod status;
pub mod stream;
pub mod types;
pub mod window;

pub use classifier::{ActivityClassifier, ClassifierConfig, SensorMode};
pub use error::{ClassifyError, ConfigError, EstimatorError, LineError, SinkError, TransportError};
pub use pipeline::{ActivityPipeline, EstimatorReset, PipelineConfig};
pub use types::{ActivityLevel, Classification, Sample};
