use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::classifier::{ClassifierConfig, SensorMode};
use crate::error::ConfigError;
use crate::filters::EstimatorConfig;
use crate::pipeline::{EstimatorReset, PipelineConfig};
use crate::sensors::LineFormat;
use crate::sinks::{AdafruitIoSink, InfluxSink, SinkSet};
use crate::stream::tcp::TcpPeer;
use crate::stream::{BackoffConfig, StreamConfig};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    /// Serial/radio bridge on TCP
    Tcp,
    /// Bluetooth LE, Nordic UART service
    Ble,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Remove gravity with the on-host Kalman filter
    AccelOnly,
    /// Producer already sends gravity-free vectors
    RawFusion,
    /// Subtract each window's mean vector, no filter state
    WindowMean,
}

#[derive(Parser, Debug)]
#[command(name = "dazzo_monitor")]
#[command(about = "Wearable IMU activity monitor", long_about = None)]
pub struct Args {
    /// Advertised device name to discover
    #[arg(long, env = "BLE_NAME")]
    pub name: Option<String>,

    /// Fixed device address, skips discovery
    #[arg(long, env = "BLE_ADDRESS")]
    pub address: Option<String>,

    /// Link to the producer
    #[arg(long, value_enum, default_value = "tcp")]
    pub transport: TransportKind,

    /// TCP bridge peer as NAME=HOST:PORT (repeatable)
    #[arg(long = "peer", env = "TCP_PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Discovery window in seconds
    #[arg(long, env = "SCAN_TIMEOUT", default_value = "5")]
    pub scan_secs: f64,

    /// Connect and subscribe timeout in seconds
    #[arg(long, default_value = "10")]
    pub connect_timeout_secs: f64,

    /// First reconnect delay in seconds
    #[arg(long, env = "BACKOFF_INITIAL", default_value = "1")]
    pub backoff_initial: f64,

    /// Reconnect delay ceiling in seconds
    #[arg(long, env = "BACKOFF_MAX", default_value = "60")]
    pub backoff_max: f64,

    /// Maximum random extra per reconnect delay in seconds
    #[arg(long, env = "BACKOFF_JITTER", default_value = "0.5")]
    pub backoff_jitter: f64,

    /// Drop a streaming link that stays silent this many seconds
    #[arg(long)]
    pub silence_secs: Option<f64>,

    /// Wire format of the producer
    #[arg(long, value_enum, env = "LINE_FORMAT", default_value = "minimal")]
    pub format: LineFormat,

    /// How gravity is removed
    #[arg(long, value_enum, default_value = "accel-only")]
    pub mode: ModeArg,

    /// Classification period in seconds
    #[arg(long, default_value = "5")]
    pub period_secs: f64,

    /// Sample buffer capacity
    #[arg(long, default_value = "1000")]
    pub capacity: usize,

    /// Mean magnitude below which the wearer is resting [m/s²]
    #[arg(long, default_value = "1.0")]
    pub rest_threshold: f64,

    /// Mean magnitude at or above which the wearer is highly active [m/s²]
    #[arg(long, default_value = "3.0")]
    pub active_threshold: f64,

    /// Accelerometer sampling rate [Hz]
    #[arg(long, default_value = "30")]
    pub sample_rate: f64,

    /// Linear acceleration decay time constant [s]
    #[arg(long, default_value = "0.1")]
    pub tau: f64,

    /// Measurement noise variance
    #[arg(long, default_value = "0.05")]
    pub measurement_noise: f64,

    /// Gravity random-walk noise at 100 Hz
    #[arg(long, default_value = "0.001")]
    pub gravity_noise: f64,

    /// Steady-state linear acceleration variance
    #[arg(long, default_value = "0.02")]
    pub accel_noise: f64,

    /// Estimator behaviour across reconnects
    #[arg(long, value_enum, default_value = "per-session")]
    pub estimator_reset: EstimatorReset,

    /// Push group (Adafruit IO group, default InfluxDB bucket)
    #[arg(long, env = "PUSH_GROUP", default_value = "dazzo")]
    pub group: String,

    #[arg(long, env = "ADAFRUIT_IO_USERNAME")]
    pub adafruit_username: Option<String>,

    #[arg(long, env = "ADAFRUIT_IO_KEY", hide_env_values = true)]
    pub adafruit_key: Option<String>,

    #[arg(long, env = "INFLUXDB_URL", default_value = "http://localhost:8086")]
    pub influx_url: String,

    #[arg(long, env = "INFLUXDB_ORG", default_value = "home")]
    pub influx_org: String,

    /// Bucket override, defaults to the push group
    #[arg(long, env = "INFLUXDB_BUCKET")]
    pub influx_bucket: Option<String>,

    #[arg(long, env = "INFLUXDB_TOKEN", hide_env_values = true)]
    pub influx_token: Option<String>,

    /// Sensor tag on InfluxDB points
    #[arg(long, env = "SENSOR_NAME", default_value = "feather-receiver")]
    pub sensor_name: String,

    /// Write a JSON status snapshot here after every classification
    #[arg(long)]
    pub status_file: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AdafruitSettings {
    pub username: String,
    pub key: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InfluxSettings {
    pub url: String,
    pub org: String,
    pub bucket: Option<String>,
    pub token: String,
    pub sensor: String,
}

/// Validated runtime configuration.
#[derive(Clone, Debug)]
pub struct MonitorConfig {
    pub transport: TransportKind,
    pub peers: Vec<TcpPeer>,
    pub stream: StreamConfig,
    pub classifier: ClassifierConfig,
    pub pipeline: PipelineConfig,
    pub adafruit: Option<AdafruitSettings>,
    pub influx: Option<InfluxSettings>,
}

fn positive_secs(what: &str, secs: f64) -> Result<Duration, ConfigError> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigError::NonPositivePeriod(format!("{} = {}", what, secs)));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| ConfigError::InvalidParameters(format!("{} = {}: {}", what, secs, e)))
}

fn non_negative_secs(what: &str, secs: f64) -> Result<Duration, ConfigError> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(ConfigError::InvalidParameters(format!(
            "{} must be finite and non-negative, got {}",
            what, secs
        )));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| ConfigError::InvalidParameters(format!("{} = {}: {}", what, secs, e)))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl Args {
    pub fn into_config(self) -> Result<MonitorConfig, ConfigError> {
        let name = non_empty(self.name);
        let address = non_empty(self.address);
        if name.is_none() && address.is_none() {
            return Err(ConfigError::NoTarget);
        }

        let peers = self
            .peers
            .iter()
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| TcpPeer::parse(raw))
            .collect::<Result<Vec<_>, _>>()?;

        match self.transport {
            TransportKind::Tcp if address.is_none() && peers.is_empty() => {
                return Err(ConfigError::InvalidParameters(
                    "tcp discovery needs at least one --peer".to_string(),
                ));
            }
            TransportKind::Ble if !cfg!(feature = "ble") => {
                return Err(ConfigError::UnsupportedTransport(
                    "ble (built without the `ble` feature)".to_string(),
                ));
            }
            _ => {}
        }

        let backoff = BackoffConfig {
            floor: positive_secs("backoff initial", self.backoff_initial)?,
            ceiling: positive_secs("backoff max", self.backoff_max)?,
            jitter: non_negative_secs("backoff jitter", self.backoff_jitter)?,
        };
        backoff.validate()?;

        let stream = StreamConfig {
            name,
            address,
            scan_window: positive_secs("scan window", self.scan_secs)?,
            connect_timeout: positive_secs("connect timeout", self.connect_timeout_secs)?,
            backoff,
            silence_timeout: self
                .silence_secs
                .map(|secs| positive_secs("silence timeout", secs))
                .transpose()?,
        };

        let mode = match self.mode {
            ModeArg::RawFusion => SensorMode::RawFusion,
            ModeArg::WindowMean => SensorMode::WindowMean,
            ModeArg::AccelOnly => SensorMode::AccelOnly(EstimatorConfig {
                sample_rate_hz: self.sample_rate,
                tau: self.tau,
                measurement_noise: self.measurement_noise,
                gravity_noise_base: self.gravity_noise,
                accel_noise_base: self.accel_noise,
            }),
        };
        let classifier = ClassifierConfig {
            mode,
            rest_threshold: self.rest_threshold,
            active_threshold: self.active_threshold,
        };
        classifier.validate()?;

        let pipeline = PipelineConfig {
            period: positive_secs("period", self.period_secs)?,
            capacity: self.capacity,
            format: self.format,
            group: self.group,
            reset: self.estimator_reset,
            status_path: self.status_file,
        };
        pipeline.validate()?;

        let adafruit = match (non_empty(self.adafruit_username), non_empty(self.adafruit_key)) {
            (Some(username), Some(key)) => Some(AdafruitSettings { username, key }),
            (None, None) => None,
            _ => {
                log::warn!("Adafruit IO needs both a username and a key, push disabled");
                None
            }
        };
        let influx = non_empty(self.influx_token).map(|token| InfluxSettings {
            url: self.influx_url,
            org: self.influx_org,
            bucket: non_empty(self.influx_bucket),
            token,
            sensor: self.sensor_name,
        });

        Ok(MonitorConfig {
            transport: self.transport,
            peers,
            stream,
            classifier,
            pipeline,
            adafruit,
            influx,
        })
    }
}

impl MonitorConfig {
    pub fn build_sinks(&self) -> SinkSet {
        let mut sinks = SinkSet::new();
        if let Some(settings) = &self.adafruit {
            match AdafruitIoSink::new(&settings.username, &settings.key) {
                Ok(sink) => sinks.add(Box::new(sink)),
                Err(e) => log::warn!("Adafruit IO sink disabled: {}", e),
            }
        }
        if let Some(settings) = &self.influx {
            match InfluxSink::new(
                &settings.url,
                &settings.org,
                &settings.token,
                settings.bucket.clone(),
                &settings.sensor,
            ) {
                Ok(sink) => sinks.add(Box::new(sink)),
                Err(e) => log::warn!("InfluxDB sink disabled: {}", e),
            }
        }
        sinks
    }

    pub fn log_summary(&self) {
        let backoff = &self.stream.backoff;
        log::info!(
            "Target: name={} address={} via {:?}",
            self.stream.name.as_deref().unwrap_or("-"),
            self.stream.address.as_deref().unwrap_or("-"),
            self.transport
        );
        log::info!(
            "Backoff: {:.1}s .. {:.1}s, jitter {:.2}s",
            backoff.floor.as_secs_f64(),
            backoff.ceiling.as_secs_f64(),
            backoff.jitter.as_secs_f64()
        );
        log::info!(
            "Mode: {}, thresholds {:.2} / {:.2} m/s², format {:?}, estimator reset {:?}",
            self.classifier.mode.name(),
            self.classifier.rest_threshold,
            self.classifier.active_threshold,
            self.pipeline.format,
            self.pipeline.reset
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Result<MonitorConfig, ConfigError> {
        let mut argv = vec!["dazzo_monitor", "--peer", "Feather=127.0.0.1:7000"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap().into_config()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["--name", "Feather"]).unwrap();
        assert_eq!(config.transport, TransportKind::Tcp);
        assert_eq!(config.peers.len(), 1);
        assert_eq!(config.stream.scan_window, Duration::from_secs(5));
        assert_eq!(config.stream.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.stream.backoff, BackoffConfig::default());
        assert_eq!(config.stream.silence_timeout, None);
        assert_eq!(config.classifier, ClassifierConfig::default());
        assert_eq!(config.pipeline.period, Duration::from_secs(5));
        assert_eq!(config.pipeline.capacity, 1000);
        assert_eq!(config.pipeline.format, LineFormat::Minimal);
        assert_eq!(config.pipeline.reset, EstimatorReset::PerSession);
    }

    #[test]
    fn test_target_required() {
        assert_eq!(parse(&[]).unwrap_err(), ConfigError::NoTarget);
        assert_eq!(parse(&["--name", "  "]).unwrap_err(), ConfigError::NoTarget);
        assert!(parse(&["--address", "127.0.0.1:7000"]).is_ok());
    }

    #[test]
    fn test_threshold_order_enforced() {
        let err = parse(&["--name", "F", "--rest-threshold", "3", "--active-threshold", "1"])
            .unwrap_err();
        assert!(matches!(err, ConfigError::ThresholdOrder { .. }));

        let err = parse(&["--name", "F", "--rest-threshold=-1"]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThreshold(_)));
    }

    #[test]
    fn test_periods_must_be_positive() {
        assert!(matches!(
            parse(&["--name", "F", "--period-secs", "0"]).unwrap_err(),
            ConfigError::NonPositivePeriod(_)
        ));
        assert!(parse(&["--name", "F", "--scan-secs=-2"]).is_err());
        assert!(parse(&["--name", "F", "--backoff-initial", "0"]).is_err());
        assert!(parse(&["--name", "F", "--backoff-initial", "90", "--backoff-max", "60"]).is_err());
        assert!(parse(&["--name", "F", "--backoff-jitter=-0.1"]).is_err());
        assert!(parse(&["--name", "F", "--capacity", "0"]).is_err());
    }

    #[test]
    fn test_oversized_durations_are_errors() {
        for flag in [
            "--period-secs",
            "--scan-secs",
            "--connect-timeout-secs",
            "--backoff-max",
            "--backoff-jitter",
            "--silence-secs",
        ] {
            let result = parse(&["--name", "F", flag, "1e30"]);
            assert!(
                matches!(result, Err(ConfigError::InvalidParameters(_))),
                "{} accepted 1e30",
                flag
            );
        }
    }

    #[test]
    fn test_window_mean_mode() {
        let config = parse(&["--name", "F", "--mode", "window-mean", "--tau=-0.1"]).unwrap();
        assert_eq!(config.classifier.mode, SensorMode::WindowMean);
    }

    #[test]
    fn test_estimator_parameters_validated() {
        assert!(parse(&["--name", "F", "--sample-rate", "0"]).is_err());
        assert!(parse(&["--name", "F", "--tau=-0.1"]).is_err());
        // raw fusion ignores the estimator
        assert!(parse(&["--name", "F", "--mode", "raw-fusion", "--tau=-0.1"]).is_ok());
    }

    #[test]
    fn test_tcp_discovery_needs_peers() {
        let err = Args::try_parse_from(["dazzo_monitor", "--name", "Feather"])
            .unwrap()
            .into_config()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidParameters(_)));
        assert!(parse(&["--name", "F", "--peer", "broken"]).is_err());
    }

    #[cfg(not(feature = "ble"))]
    #[test]
    fn test_ble_requires_feature() {
        let err = parse(&["--name", "F", "--transport", "ble"]).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedTransport(_)));
    }

    #[test]
    fn test_sinks_enabled_by_credentials() {
        let config = parse(&["--name", "F"]).unwrap();
        assert!(config.adafruit.is_none());
        assert!(config.influx.is_none());
        assert!(config.build_sinks().is_empty());

        let config = parse(&[
            "--name",
            "F",
            "--adafruit-username",
            "maker",
            "--adafruit-key",
            "k",
            "--influx-token",
            "t",
        ])
        .unwrap();
        assert_eq!(config.influx.as_ref().unwrap().org, "home");
        assert_eq!(config.influx.as_ref().unwrap().sensor, "feather-receiver");
        assert_eq!(config.build_sinks().len(), 2);
    }
}
