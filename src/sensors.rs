use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::LineError;
use crate::parser::{parse_telemetry, TelemetryRecord, BLOCK_TERMINATOR};
use crate::types::Sample;

/// Upper bound on a pending rich block before its oldest text is dropped [bytes]
const RICH_BLOCK_LIMIT: usize = 4096;

/// Wire format the producer emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum LineFormat {
    /// `x,y,z` per line
    Minimal,
    /// Labelled multi-field block
    Rich,
    /// `{"x":..,"y":..,"z":..}` per line, other lines are bridge status
    Json,
    /// Log lines only, no classification
    Raw,
}

/// Which vector of a rich record feeds the classifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VectorSource {
    Accel,
    LinAccel,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    Sample(Sample),
    /// A complete rich record, with the sample taken from it when present
    Record {
        record: TelemetryRecord,
        sample: Option<Sample>,
    },
    /// Rich block not complete yet
    Pending,
    /// Status chatter between data lines
    Status,
    Passthrough,
}

/// Parse one minimal-format line: exactly three comma-separated finite floats.
pub fn parse_accel_line(line: &str) -> Result<Sample, LineError> {
    let fields: Vec<&str> = line.trim().split(',').collect();
    if fields.len() != 3 {
        return Err(LineError::FieldCount(fields.len()));
    }

    let mut values = [0.0f64; 3];
    for (slot, field) in values.iter_mut().zip(&fields) {
        let field = field.trim();
        *slot = field
            .parse()
            .map_err(|_| LineError::InvalidNumber(field.to_string()))?;
        if !slot.is_finite() {
            return Err(LineError::NonFinite);
        }
    }

    Ok(Sample::from(values))
}

#[derive(Deserialize)]
struct JsonSample {
    x: f64,
    y: f64,
    z: f64,
}

/// Parse one JSON-format line. Lines that are not JSON objects are bridge
/// status messages and come back as `None`.
pub fn parse_json_line(line: &str) -> Result<Option<Sample>, LineError> {
    let line = line.trim();
    if !line.starts_with('{') {
        return Ok(None);
    }
    let sample: JsonSample =
        serde_json::from_str(line).map_err(|e| LineError::InvalidJson(e.to_string()))?;
    let values = [sample.x, sample.y, sample.z];
    if values.iter().any(|v| !v.is_finite()) {
        return Err(LineError::NonFinite);
    }
    Ok(Some(Sample::from(values)))
}

/// Collects rich-format lines until a full record can be parsed.
#[derive(Debug, Default)]
pub struct RichAssembler {
    block: String,
}

impl RichAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&mut self, line: &str) -> Option<TelemetryRecord> {
        self.block.push_str(line);
        self.block.push('\n');
        self.enforce_limit();

        // The terminator is the last field, parse only once it has arrived.
        // It may itself be split across lines.
        if !self.block.replace('\n', "").contains(BLOCK_TERMINATOR) {
            return None;
        }

        let record = parse_telemetry(&self.block);
        if record.is_empty() {
            return None;
        }
        self.block.clear();
        Some(record)
    }

    pub fn pending_len(&self) -> usize {
        self.block.len()
    }

    fn enforce_limit(&mut self) {
        if self.block.len() <= RICH_BLOCK_LIMIT {
            return;
        }
        let excess = self.block.len() - RICH_BLOCK_LIMIT;
        let cut = (excess..=self.block.len())
            .find(|&i| self.block.is_char_boundary(i))
            .unwrap_or(self.block.len());
        self.block.drain(..cut);
    }
}

/// Turns reassembled lines into samples according to the configured format.
#[derive(Debug)]
pub struct LineDecoder {
    format: LineFormat,
    source: VectorSource,
    rich: RichAssembler,
}

impl LineDecoder {
    pub fn new(format: LineFormat, source: VectorSource) -> Self {
        Self {
            format,
            source,
            rich: RichAssembler::new(),
        }
    }

    pub fn decode(&mut self, line: &str) -> Result<Decoded, LineError> {
        match self.format {
            LineFormat::Minimal => parse_accel_line(line).map(Decoded::Sample),
            LineFormat::Rich => Ok(match self.rich.push_line(line) {
                Some(record) => {
                    let vector = match self.source {
                        VectorSource::Accel => record.accel,
                        VectorSource::LinAccel => record.lin_accel,
                    };
                    Decoded::Record {
                        sample: vector.map(Sample::from),
                        record,
                    }
                }
                None => Decoded::Pending,
            }),
            LineFormat::Json => Ok(match parse_json_line(line)? {
                Some(sample) => Decoded::Sample(sample),
                None => Decoded::Status,
            }),
            LineFormat::Raw => Ok(Decoded::Passthrough),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accel_line() {
        let sample = parse_accel_line("0.10,0.05,9.81").unwrap();
        assert_eq!(sample, Sample::new(0.10, 0.05, 9.81));

        let sample = parse_accel_line(" -1.5 , 2 ,3e-1 ").unwrap();
        assert_eq!(sample, Sample::new(-1.5, 2.0, 0.3));
    }

    #[test]
    fn test_parse_accel_line_rejects_bad_shapes() {
        assert_eq!(parse_accel_line("1.0,2.0"), Err(LineError::FieldCount(2)));
        assert_eq!(parse_accel_line("1,2,3,4"), Err(LineError::FieldCount(4)));
        assert_eq!(parse_accel_line(""), Err(LineError::FieldCount(1)));
        assert_eq!(
            parse_accel_line("1.0,x,3.0"),
            Err(LineError::InvalidNumber("x".to_string()))
        );
        assert_eq!(parse_accel_line("1.0,NaN,3.0"), Err(LineError::NonFinite));
        assert_eq!(parse_accel_line("inf,0,0"), Err(LineError::NonFinite));
    }

    #[test]
    fn test_rich_assembler_waits_for_terminator() {
        let mut rich = RichAssembler::new();
        assert!(rich.push_line("Temperature: 22.0 °C").is_none());
        assert!(rich.push_line("Accel: (0.1, 0.2, 9.8)").is_none());

        let record = rich.push_line("Battery: 3.9 V").unwrap();
        assert_eq!(record.temperature_c, Some(22.0));
        assert_eq!(record.accel, Some([0.1, 0.2, 9.8]));
        assert_eq!(rich.pending_len(), 0);
    }

    #[test]
    fn test_rich_assembler_rejoins_split_lines() {
        let mut rich = RichAssembler::new();
        assert!(rich.push_line("Lin Ac").is_none());
        assert!(rich.push_line("cel: (0.5, 0.").is_none());
        assert!(rich.push_line("25, -1)").is_none());

        let record = rich.push_line("Battery: 4.0 V").unwrap();
        assert_eq!(record.lin_accel, Some([0.5, 0.25, -1.0]));
    }

    #[test]
    fn test_rich_assembler_is_bounded() {
        let mut rich = RichAssembler::new();
        let noise = "é".repeat(300);
        for _ in 0..100 {
            assert!(rich.push_line(&noise).is_none());
        }
        assert!(rich.pending_len() <= RICH_BLOCK_LIMIT);
    }

    #[test]
    fn test_decoder_picks_vector_by_source() {
        let lines = ["Accel: (1, 2, 3)", "Lin Accel: (0.1, 0.2, 0.3)", "Battery: 3.8 V"];

        let mut decoder = LineDecoder::new(LineFormat::Rich, VectorSource::LinAccel);
        let mut last = Decoded::Pending;
        for line in lines {
            last = decoder.decode(line).unwrap();
        }
        match last {
            Decoded::Record { sample, .. } => assert_eq!(sample, Some(Sample::new(0.1, 0.2, 0.3))),
            other => panic!("unexpected {:?}", other),
        }

        let mut decoder = LineDecoder::new(LineFormat::Rich, VectorSource::Accel);
        for line in lines {
            last = decoder.decode(line).unwrap();
        }
        match last {
            Decoded::Record { sample, .. } => assert_eq!(sample, Some(Sample::new(1.0, 2.0, 3.0))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_json_line() {
        let sample = parse_json_line(r#"{"x": 0.1, "y": -0.2, "z": 9.8}"#).unwrap();
        assert_eq!(sample, Some(Sample::new(0.1, -0.2, 9.8)));

        // extra keys are tolerated
        let sample = parse_json_line(r#" {"t": 12, "x": 1, "y": 2, "z": 3} "#).unwrap();
        assert_eq!(sample, Some(Sample::new(1.0, 2.0, 3.0)));
    }

    #[test]
    fn test_json_status_lines_are_skipped() {
        assert_eq!(parse_json_line("BNO055 ready"), Ok(None));
        assert_eq!(parse_json_line("Calibration: 3 3 3 3"), Ok(None));

        let mut decoder = LineDecoder::new(LineFormat::Json, VectorSource::Accel);
        assert_eq!(decoder.decode("Radio up, channel 7").unwrap(), Decoded::Status);
        assert_eq!(
            decoder.decode(r#"{"x":0,"y":0,"z":9.81}"#).unwrap(),
            Decoded::Sample(Sample::new(0.0, 0.0, 9.81))
        );
    }

    #[test]
    fn test_json_lines_without_xyz_are_rejected() {
        assert!(matches!(
            parse_json_line(r#"{"x": 1, "y": 2}"#),
            Err(LineError::InvalidJson(_))
        ));
        assert!(matches!(
            parse_json_line(r#"{"x": 1, "y": 2, "z": "3"}"#),
            Err(LineError::InvalidJson(_))
        ));
        assert!(matches!(parse_json_line("{broken"), Err(LineError::InvalidJson(_))));
    }

    #[test]
    fn test_decoder_raw_passthrough() {
        let mut decoder = LineDecoder::new(LineFormat::Raw, VectorSource::Accel);
        assert_eq!(decoder.decode("anything at all").unwrap(), Decoded::Passthrough);
    }
}
