use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stream::ConnectionState;
use crate::types::{ActivityLevel, Classification};

/// Snapshot written after every classification when a status file is configured.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MonitorStatus {
    pub timestamp: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub connection: ConnectionState,
    pub sessions: u64,
    // Ingestion
    pub lines: u64,
    pub samples: u64,
    pub records: u64,
    pub parse_rejects: u64,
    pub samples_evicted: u64,
    // Classification
    pub classifications: u64,
    pub skipped_windows: u64,
    pub last_activity: Option<ActivityLevel>,
    pub last_mean_acc: Option<f64>,
    pub last_classified_at: Option<DateTime<Utc>>,
}

impl MonitorStatus {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            timestamp: now,
            started_at: now,
            connection: ConnectionState::Disconnected,
            sessions: 0,
            lines: 0,
            samples: 0,
            records: 0,
            parse_rejects: 0,
            samples_evicted: 0,
            classifications: 0,
            skipped_windows: 0,
            last_activity: None,
            last_mean_acc: None,
            last_classified_at: None,
        }
    }

    pub fn record_classification(&mut self, result: &Classification) {
        let now = Utc::now();
        self.classifications += 1;
        self.last_activity = Some(result.activity);
        self.last_mean_acc = Some(result.mean_acc);
        self.last_classified_at = Some(now);
        self.timestamp = now;
    }

    pub fn uptime_seconds(&self) -> i64 {
        (self.timestamp - self.started_at).num_seconds()
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        // Write then rename so readers never see a half-written file
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl Default for MonitorStatus {
    fn default() -> Self {
        Self::new()
    }
}
