use async_trait::async_trait;

use super::{check_status, http_client, FieldValue, Fields, Sink};
use crate::error::SinkError;

/// Escape commas, spaces and equals signs in measurement names and tag values.
fn escape_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, ',' | ' ' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn escape_string(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"")
}

/// One line per field: `{key},sensor={sensor} value=...`
///
/// Line protocol has no spelling for NaN or infinity, so such fields are left out.
pub fn line_protocol(sensor: &str, fields: &Fields) -> String {
    let sensor = escape_key(sensor);
    fields
        .iter()
        .filter_map(|(key, value)| {
            let value = match value {
                FieldValue::Number(n) if !n.is_finite() => {
                    log::warn!("Skipping non-finite InfluxDB field {} = {}", key, n);
                    return None;
                }
                FieldValue::Number(n) => n.to_string(),
                FieldValue::Text(s) => format!("\"{}\"", escape_string(s)),
            };
            Some(format!("{},sensor={} value={}", escape_key(key), sensor, value))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// InfluxDB v2 write API.
pub struct InfluxSink {
    client: reqwest::Client,
    url: String,
    org: String,
    token: String,
    /// Bucket override, otherwise the push group names the bucket
    bucket: Option<String>,
    sensor: String,
}

impl InfluxSink {
    pub fn new(
        url: &str,
        org: &str,
        token: &str,
        bucket: Option<String>,
        sensor: &str,
    ) -> Result<Self, SinkError> {
        if token.is_empty() {
            return Err(SinkError::NotConfigured("InfluxDB needs a token".to_string()));
        }
        Ok(Self {
            client: http_client(),
            url: url.trim_end_matches('/').to_string(),
            org: org.to_string(),
            token: token.to_string(),
            bucket,
            sensor: sensor.to_string(),
        })
    }

    fn bucket<'a>(&'a self, group: &'a str) -> &'a str {
        self.bucket.as_deref().unwrap_or(group)
    }
}

#[async_trait]
impl Sink for InfluxSink {
    fn name(&self) -> &'static str {
        "influxdb"
    }

    async fn push(&self, group: &str, fields: &Fields) -> Result<(), SinkError> {
        let body = line_protocol(&self.sensor, fields);
        if body.is_empty() {
            return Ok(());
        }
        let response = self
            .client
            .post(format!("{}/api/v2/write", self.url))
            .query(&[
                ("bucket", self.bucket(group)),
                ("org", self.org.as_str()),
                ("precision", "s"),
            ])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;
        check_status(self.name(), &response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::testing::capture_one_request;

    fn sample_fields() -> Fields {
        let mut fields = Fields::new();
        fields.insert("activity".to_string(), FieldValue::from("highly active"));
        fields.insert("mean_acc".to_string(), FieldValue::Number(3.5));
        fields
    }

    #[test]
    fn test_line_protocol() {
        let body = line_protocol("feather-receiver", &sample_fields());
        assert_eq!(
            body,
            "activity,sensor=feather-receiver value=\"highly active\"\n\
             mean_acc,sensor=feather-receiver value=3.5"
        );
    }

    #[test]
    fn test_line_protocol_escapes() {
        let mut fields = Fields::new();
        fields.insert("note text".to_string(), FieldValue::from("say \"hi\""));
        let body = line_protocol("wrist,left", &fields);
        assert_eq!(body, "note\\ text,sensor=wrist\\,left value=\"say \\\"hi\\\"\"");
    }

    #[test]
    fn test_line_protocol_skips_non_finite_numbers() {
        let mut fields = sample_fields();
        fields.insert("mean_acc".to_string(), FieldValue::Number(f64::INFINITY));
        fields.insert("jerk".to_string(), FieldValue::Number(f64::NAN));
        let body = line_protocol("s", &fields);
        assert_eq!(body, "activity,sensor=s value=\"highly active\"");
    }

    #[tokio::test]
    async fn test_push_with_only_non_finite_fields_sends_nothing() {
        let sink = InfluxSink::new("http://127.0.0.1:9", "home", "t", None, "s").unwrap();
        let mut fields = Fields::new();
        fields.insert("mean_acc".to_string(), FieldValue::Number(f64::NAN));
        // no server listens on the discard port, so any request would fail
        sink.push("dazzo", &fields).await.unwrap();
    }

    #[test]
    fn test_bucket_defaults_to_group() {
        let sink = InfluxSink::new("http://localhost:8086", "home", "t", None, "s").unwrap();
        assert_eq!(sink.bucket("dazzo"), "dazzo");

        let sink =
            InfluxSink::new("http://localhost:8086", "home", "t", Some("lab".to_string()), "s").unwrap();
        assert_eq!(sink.bucket("dazzo"), "lab");

        assert!(InfluxSink::new("http://localhost:8086", "home", "", None, "s").is_err());
    }

    #[tokio::test]
    async fn test_push_writes_lines() {
        let (url, server) = capture_one_request(204).await;
        let sink = InfluxSink::new(&url, "home", "secret", None, "feather-receiver").unwrap();

        sink.push("dazzo", &sample_fields()).await.unwrap();

        let request = server.await.unwrap();
        let first_line = request.lines().next().unwrap();
        assert_eq!(
            first_line,
            "POST /api/v2/write?bucket=dazzo&org=home&precision=s HTTP/1.1"
        );
        assert!(request.to_lowercase().contains("authorization: token secret"));
        assert!(request.ends_with("mean_acc,sensor=feather-receiver value=3.5"));
    }
}
