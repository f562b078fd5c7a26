use async_trait::async_trait;
use serde::Serialize;

use super::{check_status, http_client, Fields, Sink};
use crate::error::SinkError;

pub const DEFAULT_BASE_URL: &str = "https://io.adafruit.com/api/v2";

#[derive(Debug, Serialize, PartialEq)]
struct FeedValue {
    key: String,
    value: String,
}

#[derive(Debug, Serialize, PartialEq)]
struct GroupPayload {
    feeds: Vec<FeedValue>,
}

/// Grouped-feed JSON body. Every value is sent as a string.
fn group_payload(fields: &Fields) -> GroupPayload {
    GroupPayload {
        feeds: fields
            .iter()
            .map(|(key, value)| FeedValue {
                key: key.clone(),
                value: value.to_string(),
            })
            .collect(),
    }
}

/// Adafruit IO group data endpoint.
pub struct AdafruitIoSink {
    client: reqwest::Client,
    base_url: String,
    username: String,
    key: String,
}

impl AdafruitIoSink {
    pub fn new(username: &str, key: &str) -> Result<Self, SinkError> {
        Self::with_base_url(DEFAULT_BASE_URL, username, key)
    }

    pub fn with_base_url(base_url: &str, username: &str, key: &str) -> Result<Self, SinkError> {
        if username.is_empty() || key.is_empty() {
            return Err(SinkError::NotConfigured(
                "Adafruit IO needs a username and a key".to_string(),
            ));
        }
        Ok(Self {
            client: http_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            key: key.to_string(),
        })
    }

    fn url(&self, group: &str) -> String {
        format!("{}/{}/groups/{}/data", self.base_url, self.username, group)
    }
}

#[async_trait]
impl Sink for AdafruitIoSink {
    fn name(&self) -> &'static str {
        "adafruit-io"
    }

    async fn push(&self, group: &str, fields: &Fields) -> Result<(), SinkError> {
        let response = self
            .client
            .post(self.url(group))
            .header("X-AIO-Key", &self.key)
            .json(&group_payload(fields))
            .send()
            .await?;
        check_status(self.name(), &response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::testing::capture_one_request;
    use crate::sinks::FieldValue;

    fn sample_fields() -> Fields {
        let mut fields = Fields::new();
        fields.insert("activity".to_string(), FieldValue::from("active"));
        fields.insert("mean_acc".to_string(), FieldValue::Number(1.5));
        fields
    }

    #[test]
    fn test_payload_shape() {
        let json = serde_json::to_value(group_payload(&sample_fields())).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "feeds": [
                    {"key": "activity", "value": "active"},
                    {"key": "mean_acc", "value": "1.5"}
                ]
            })
        );
    }

    #[test]
    fn test_requires_credentials() {
        assert!(matches!(
            AdafruitIoSink::new("", "secret"),
            Err(SinkError::NotConfigured(_))
        ));
        let sink = AdafruitIoSink::new("maker", "secret").unwrap();
        assert_eq!(
            sink.url("dazzo"),
            "https://io.adafruit.com/api/v2/maker/groups/dazzo/data"
        );
    }

    #[tokio::test]
    async fn test_push_posts_group_data() {
        let (url, server) = capture_one_request(200).await;
        let sink = AdafruitIoSink::with_base_url(&url, "maker", "secret").unwrap();

        sink.push("dazzo", &sample_fields()).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /maker/groups/dazzo/data HTTP/1.1"));
        assert!(request.to_lowercase().contains("x-aio-key: secret"));
        assert!(request.contains(r#"{"key":"mean_acc","value":"1.5"}"#));
    }

    #[tokio::test]
    async fn test_rejected_push_reports_status() {
        let (url, server) = capture_one_request(401).await;
        let sink = AdafruitIoSink::with_base_url(&url, "maker", "wrong").unwrap();

        let err = sink.push("dazzo", &sample_fields()).await.unwrap_err();
        assert!(matches!(err, SinkError::Status { status: 401, .. }));
        server.await.unwrap();
    }
}
