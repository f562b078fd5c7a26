use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::classifier::ActivityClassifier;
use crate::error::ConfigError;
use crate::sensors::{Decoded, LineDecoder, LineFormat};
use crate::shutdown::Shutdown;
use crate::sinks::{classification_fields, SinkSet};
use crate::status::MonitorStatus;
use crate::stream::{ConnectionState, StreamEvent};
use crate::types::{Classification, Sample};
use crate::window::SampleBuffer;

/// What happens to the gravity estimator when the link comes back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum EstimatorReset {
    /// Re-initialize gravity from the first window of every session
    PerSession,
    /// Keep the estimate across reconnects
    Persist,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Classification cadence
    pub period: Duration,
    pub capacity: usize,
    pub format: LineFormat,
    /// Push group (Adafruit IO group, default InfluxDB bucket)
    pub group: String,
    pub reset: EstimatorReset,
    pub status_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(5),
            capacity: 1000,
            format: LineFormat::Minimal,
            group: "dazzo".to_string(),
            reset: EstimatorReset::PerSession,
            status_path: None,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.period.is_zero() {
            return Err(ConfigError::NonPositivePeriod("classification period".to_string()));
        }
        if self.capacity == 0 {
            return Err(ConfigError::InvalidParameters(
                "sample buffer capacity must be non-zero".to_string(),
            ));
        }
        if self.group.trim().is_empty() {
            return Err(ConfigError::InvalidParameters("push group is empty".to_string()));
        }
        Ok(())
    }
}

/// Owns the sample buffer and everything downstream of it: line decoding,
/// periodic classification, pushes and the status snapshot.
pub struct ActivityPipeline {
    config: PipelineConfig,
    buffer: SampleBuffer,
    decoder: LineDecoder,
    classifier: ActivityClassifier,
    sinks: SinkSet,
    status: MonitorStatus,
}

impl ActivityPipeline {
    pub fn new(
        config: PipelineConfig,
        classifier: ActivityClassifier,
        sinks: SinkSet,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let buffer = SampleBuffer::new(config.capacity)?;
        let decoder = LineDecoder::new(config.format, classifier.mode().vector_source());
        Ok(Self {
            config,
            buffer,
            decoder,
            classifier,
            sinks,
            status: MonitorStatus::new(),
        })
    }

    pub fn status(&self) -> &MonitorStatus {
        &self.status
    }

    pub fn classifier(&self) -> &ActivityClassifier {
        &self.classifier
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn handle_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Line(line) => self.handle_line(&line),
            StreamEvent::State(state) => self.handle_state(state),
        }
    }

    fn handle_state(&mut self, state: ConnectionState) {
        self.status.connection = state;
        if state != ConnectionState::Streaming {
            return;
        }
        self.status.sessions += 1;
        if self.config.reset == EstimatorReset::PerSession {
            // Gravity is re-initialized from this session's samples only
            self.classifier.reset_estimator();
            if !self.buffer.is_empty() {
                log::debug!("Dropping {} samples from the previous session", self.buffer.len());
                self.buffer.clear();
            }
        }
    }

    pub fn handle_line(&mut self, line: &str) {
        self.status.lines += 1;
        match self.decoder.decode(line) {
            Ok(Decoded::Sample(sample)) => self.accept(sample),
            Ok(Decoded::Record { record, sample }) => {
                self.status.records += 1;
                match serde_json::to_string(&record) {
                    Ok(json) => log::info!("{}", json),
                    Err(e) => log::warn!("Record not serializable: {}", e),
                }
                match sample {
                    Some(sample) => self.accept(sample),
                    None => log::debug!(
                        "Record has no {} vector",
                        self.classifier.mode().name()
                    ),
                }
            }
            Ok(Decoded::Pending) => {}
            Ok(Decoded::Status) => log::debug!("Status: {}", line),
            Ok(Decoded::Passthrough) => log::info!("{}", line),
            Err(e) => {
                self.status.parse_rejects += 1;
                log::warn!("Rejected line {:?}: {}", line, e);
            }
        }
    }

    fn accept(&mut self, sample: Sample) {
        self.status.samples += 1;
        if self.buffer.push(sample) {
            self.status.samples_evicted += 1;
        }
    }

    /// Classify and clear the current window. None when there was nothing to classify.
    pub fn classify_window(&mut self) -> Option<Classification> {
        if self.buffer.is_empty() {
            log::info!("No samples in the last window, skipping classification");
            self.status.skipped_windows += 1;
            return None;
        }

        let window = self.buffer.drain();
        match self.classifier.classify(&window) {
            Ok(result) => {
                log::info!(
                    "Activity: {} (mean {:.3} m/s², {} samples)",
                    result.activity,
                    result.mean_acc,
                    window.len()
                );
                self.status.record_classification(&result);
                Some(result)
            }
            Err(e) => {
                log::warn!("Classification of {} samples failed: {}", window.len(), e);
                None
            }
        }
    }

    /// One classification tick: classify, push, save status.
    pub async fn on_tick(&mut self) -> Option<Classification> {
        if self.config.format == LineFormat::Raw {
            return None;
        }

        let result = self.classify_window()?;
        if !self.sinks.is_empty() {
            let fields = classification_fields(&result);
            self.sinks.push_all(&self.config.group, &fields).await;
        }
        self.save_status();
        Some(result)
    }

    fn save_status(&mut self) {
        let Some(path) = &self.config.status_path else {
            return;
        };
        self.status.timestamp = chrono::Utc::now();
        if let Err(e) = self.status.save(path) {
            log::warn!("Failed to write status to {}: {}", path.display(), e);
        }
    }

    /// Consume stream events and classify on a fixed cadence until shutdown
    /// or until the event source closes.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<StreamEvent>,
        shutdown: Shutdown,
    ) -> MonitorStatus {
        let period = self.config.period;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::info!(
            "Classifying every {:.1}s ({:?} format, {} mode, buffer of {})",
            period.as_secs_f64(),
            self.config.format,
            self.classifier.mode().name(),
            self.buffer.capacity()
        );

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                _ = ticker.tick() => {
                    self.on_tick().await;
                }
                _ = shutdown.cancelled() => break,
            }
        }

        self.status.timestamp = chrono::Utc::now();
        log::info!(
            "Pipeline stopped after {}s: {} lines, {} samples, {} rejected, {} classifications",
            self.status.uptime_seconds(),
            self.status.lines,
            self.status.samples,
            self.status.parse_rejects,
            self.status.classifications
        );
        self.status
    }
}
