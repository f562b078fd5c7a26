use thiserror::Error;

/// Invalid startup configuration. Always fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid thresholds: rest ({rest}) must be below active ({active})")]
    ThresholdOrder { rest: f64, active: f64 },

    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("Period must be positive: {0}")]
    NonPositivePeriod(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("No target: set a device name or an address")]
    NoTarget,

    #[error("Unsupported transport: {0}")]
    UnsupportedTransport(String),
}

/// A minimal-format line that could not be turned into a sample.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LineError {
    #[error("Expected 3 comma-separated fields, got {0}")]
    FieldCount(usize),

    #[error("Invalid number: {0:?}")]
    InvalidNumber(String),

    #[error("Non-finite value in line")]
    NonFinite,

    #[error("Invalid JSON sample: {0}")]
    InvalidJson(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EstimatorError {
    #[error("Estimator used before gravity initialization")]
    NotInitialized,

    #[error("Gravity initialization window is empty")]
    EmptyInitWindow,

    #[error("Innovation covariance is singular")]
    SingularInnovation,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifyError {
    #[error("Invalid input shape: {0}")]
    InvalidShape(String),

    #[error("Cannot classify an empty window")]
    EmptyWindow,

    #[error("Estimator failed: {0}")]
    Estimator(#[from] EstimatorError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Link-level failures. All of these are retried by the stream manager.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Adapter unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("Scan failed: {0}")]
    Scan(String),

    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Timed out while {0}")]
    Timeout(&'static str),

    #[error("Link silent for {0:.1}s")]
    Silent(f64),

    /// Link dropped by an error rather than an orderly close
    #[error("Link lost: {0}")]
    LinkLost(String),
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Sink {sink} rejected push with status {status}")]
    Status { sink: &'static str, status: u16 },

    #[error("Sink not configured: {0}")]
    NotConfigured(String),
}
