//! Push destinations for classification results.

pub mod adafruit;
pub mod influx;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::error::SinkError;
use crate::types::Classification;

pub use adafruit::AdafruitIoSink;
pub use influx::InfluxSink;

/// Per-request bound for every sink
pub const PUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Whole numbers keep one decimal so feeds stay numeric-looking
            FieldValue::Number(n) if n.is_finite() && n.fract() == 0.0 => write!(f, "{:.1}", n),
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Number(n)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

pub type Fields = BTreeMap<String, FieldValue>;

/// Payload for one classified window.
pub fn classification_fields(result: &Classification) -> Fields {
    let mut fields = Fields::new();
    fields.insert("activity".to_string(), result.activity.as_str().into());
    fields.insert("mean_acc".to_string(), result.mean_acc.into());
    fields
}

#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn push(&self, group: &str, fields: &Fields) -> Result<(), SinkError>;
}

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(PUSH_TIMEOUT)
        .user_agent(concat!("dazzo-monitor/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

pub(crate) fn check_status(sink: &'static str, response: &reqwest::Response) -> Result<(), SinkError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(SinkError::Status {
            sink,
            status: status.as_u16(),
        })
    }
}

/// Fan-out to every configured sink. Failures are logged, never returned.
#[derive(Default)]
pub struct SinkSet {
    sinks: Vec<Box<dyn Sink>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, sink: Box<dyn Sink>) {
        log::info!("Push sink enabled: {}", sink.name());
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Push concurrently, returns how many sinks accepted the payload.
    pub async fn push_all(&self, group: &str, fields: &Fields) -> usize {
        let results = join_all(self.sinks.iter().map(|sink| sink.push(group, fields))).await;

        let mut delivered = 0;
        for (sink, result) in self.sinks.iter().zip(results) {
            match result {
                Ok(()) => {
                    log::debug!("Pushed {} field(s) to {}", fields.len(), sink.name());
                    delivered += 1;
                }
                Err(e) => log::warn!("Push to {} failed: {}", sink.name(), e),
            }
        }
        delivered
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Accept one HTTP request, answer with `status`, return the raw request text.
    pub async fn capture_one_request(status: u16) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                if request_complete(&raw) {
                    break;
                }
            }
            let response = format!("HTTP/1.1 {} Test\r\ncontent-length: 0\r\nconnection: close\r\n\r\n", status);
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&raw).into_owned()
        });
        (url, handle)
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = text[..header_end]
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        raw.len() >= header_end + 4 + length
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActivityLevel;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        seen: Arc<Mutex<Vec<(String, Fields)>>>,
    }

    #[async_trait]
    impl Sink for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        async fn push(&self, group: &str, fields: &Fields) -> Result<(), SinkError> {
            self.seen.lock().unwrap().push((group.to_string(), fields.clone()));
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl Sink for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn push(&self, _group: &str, _fields: &Fields) -> Result<(), SinkError> {
            Err(SinkError::Status {
                sink: "broken",
                status: 503,
            })
        }
    }

    #[test]
    fn test_classification_fields() {
        let fields = classification_fields(&Classification {
            activity: ActivityLevel::HighlyActive,
            mean_acc: 4.25,
        });
        assert_eq!(fields["activity"], FieldValue::Text("highly active".to_string()));
        assert_eq!(fields["mean_acc"], FieldValue::Number(4.25));
        assert_eq!(
            serde_json::to_string(&fields).unwrap(),
            r#"{"activity":"highly active","mean_acc":4.25}"#
        );
    }

    #[test]
    fn test_field_value_display() {
        assert_eq!(FieldValue::Number(2.0).to_string(), "2.0");
        assert_eq!(FieldValue::Number(0.125).to_string(), "0.125");
        assert_eq!(FieldValue::from("resting").to_string(), "resting");
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_block_others() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut sinks = SinkSet::new();
        sinks.add(Box::new(Broken));
        sinks.add(Box::new(Recorder { seen: seen.clone() }));

        let mut fields = Fields::new();
        fields.insert("mean_acc".to_string(), 0.5.into());

        assert_eq!(sinks.push_all("dazzo", &fields).await, 1);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "dazzo");
    }

    #[tokio::test]
    async fn test_empty_set_is_noop() {
        let sinks = SinkSet::new();
        assert!(sinks.is_empty());
        assert_eq!(sinks.push_all("dazzo", &Fields::new()).await, 0);
    }
}
