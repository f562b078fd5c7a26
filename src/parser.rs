//! Tolerant parser for the labelled multi-field telemetry block.
//!
//! Radio fragmentation may split a label or a number across deliveries, and a
//! single block may hold several concatenated records. Line breaks are removed
//! before the text is re-segmented on the known labels, so a split token is
//! rejoined and the last occurrence of each label wins.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

pub const LABELS: [&str; 11] = [
    "Temperature:",
    "Pressure:",
    "Altitude:",
    "Accel:",
    "Mag:",
    "Gyro:",
    "Euler:",
    "Quat:",
    "Lin Accel:",
    "Gravity:",
    "Battery:",
];

/// Last field the producer writes for each record
pub const BLOCK_TERMINATOR: &str = "Battery:";

lazy_static! {
    static ref LINE_BREAKS: Regex = Regex::new(r"[\r\n]+").expect("valid regex");
    static ref WHITESPACE: Regex = Regex::new(r"\s+").expect("valid regex");
    static ref LABEL_GROUP: Regex = {
        let alternatives: Vec<String> = LABELS.iter().map(|l| regex::escape(l)).collect();
        Regex::new(&format!("({})", alternatives.join("|"))).expect("valid regex")
    };
    static ref PARENTHESIZED: Regex = Regex::new(r"\(([^)]*)\)").expect("valid regex");
    static ref TEMPERATURE: Regex =
        Regex::new(r"([-+]?\d+(?:\.\d+)?)\s*(?:°\s*)?C").expect("valid regex");
    static ref PRESSURE: Regex = Regex::new(r"([-+]?\d+(?:\.\d+)?)\s*hPa").expect("valid regex");
    static ref ALTITUDE: Regex = Regex::new(r"([-+]?\d+(?:\.\d+)?)\s*m").expect("valid regex");
    static ref BATTERY: Regex = Regex::new(r"([-+]?\d+(?:\.\d+)?)\s*V").expect("valid regex");
}

/// One decoded telemetry record. Fields missing from the source are `None`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_c: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressure_hpa: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude_m: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accel: Option<[f64; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mag: Option<[f64; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gyro: Option<[f64; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub euler: Option<[f64; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quat: Option<[f64; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lin_accel: Option<[f64; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gravity: Option<[f64; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_v: Option<f64>,
}

impl TelemetryRecord {
    pub fn is_empty(&self) -> bool {
        *self == TelemetryRecord::default()
    }

    /// Number of populated fields
    pub fn field_count(&self) -> usize {
        [
            self.temperature_c.is_some(),
            self.pressure_hpa.is_some(),
            self.altitude_m.is_some(),
            self.accel.is_some(),
            self.mag.is_some(),
            self.gyro.is_some(),
            self.euler.is_some(),
            self.quat.is_some(),
            self.lin_accel.is_some(),
            self.gravity.is_some(),
            self.battery_v.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }
}

/// Renders the record in the producer's block format, one labelled line per field.
impl Display for TelemetryRecord {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        if let Some(v) = self.temperature_c {
            writeln!(f, "Temperature: {} °C", v)?;
        }
        if let Some(v) = self.pressure_hpa {
            writeln!(f, "Pressure: {} hPa", v)?;
        }
        if let Some(v) = self.altitude_m {
            writeln!(f, "Altitude: {} m", v)?;
        }
        let vectors: [(&str, Option<&[f64]>); 7] = [
            ("Accel:", self.accel.as_ref().map(|v| &v[..])),
            ("Mag:", self.mag.as_ref().map(|v| &v[..])),
            ("Gyro:", self.gyro.as_ref().map(|v| &v[..])),
            ("Euler:", self.euler.as_ref().map(|v| &v[..])),
            ("Quat:", self.quat.as_ref().map(|v| &v[..])),
            ("Lin Accel:", self.lin_accel.as_ref().map(|v| &v[..])),
            ("Gravity:", self.gravity.as_ref().map(|v| &v[..])),
        ];
        for (label, values) in vectors {
            if let Some(values) = values {
                let joined: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                writeln!(f, "{} ({})", label, joined.join(", "))?;
            }
        }
        if let Some(v) = self.battery_v {
            writeln!(f, "Battery: {} V", v)?;
        }
        Ok(())
    }
}

/// Parse a noisy text block into a record. Never fails; unparseable fields are omitted.
pub fn parse_telemetry(raw: &str) -> TelemetryRecord {
    let normalized = normalize(raw);

    // Left to right, so a later occurrence of a label overwrites an earlier one
    let mut fields: [Option<&str>; LABELS.len()] = [None; LABELS.len()];
    for line in normalized.split('\n') {
        let line = line.trim();
        if let Some(idx) = LABELS.iter().position(|label| line.starts_with(label)) {
            fields[idx] = Some(line[LABELS[idx].len()..].trim());
        }
    }
    let field = |idx: usize| fields[idx].unwrap_or("");

    TelemetryRecord {
        temperature_c: parse_scalar(&TEMPERATURE, field(0)),
        pressure_hpa: parse_scalar(&PRESSURE, field(1)),
        altitude_m: parse_scalar(&ALTITUDE, field(2)),
        accel: parse_vector::<3>(field(3)),
        mag: parse_vector::<3>(field(4)),
        gyro: parse_vector::<3>(field(5)),
        euler: parse_vector::<3>(field(6)),
        quat: parse_vector::<4>(field(7)),
        lin_accel: parse_vector::<3>(field(8)),
        gravity: parse_vector::<3>(field(9)),
        battery_v: parse_scalar(&BATTERY, field(10)),
    }
}

fn normalize(raw: &str) -> String {
    // Deleting the breaks rejoins tokens split mid-delivery ("G\nyro" -> "Gyro")
    let joined = LINE_BREAKS.replace_all(raw, "");
    let collapsed = WHITESPACE.replace_all(&joined, " ");
    let segmented = LABEL_GROUP.replace_all(collapsed.trim(), "\n$1");
    segmented.trim_start_matches('\n').trim().to_string()
}

fn parse_scalar(pattern: &Regex, text: &str) -> Option<f64> {
    let captures = pattern.captures(text)?;
    let value: f64 = captures.get(1)?.as_str().parse().ok()?;
    value.is_finite().then_some(value)
}

fn parse_vector<const N: usize>(text: &str) -> Option<[f64; N]> {
    let captures = PARENTHESIZED.captures(text)?;
    let inner = captures.get(1)?.as_str();

    let mut values = Vec::with_capacity(N);
    for part in inner.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let value: f64 = part.parse().ok()?;
        if !value.is_finite() {
            return None;
        }
        values.push(value);
    }
    values.try_into().ok()
}
