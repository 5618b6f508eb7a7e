use std::time::Duration;

use chrono::Utc;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ChatError, ChatResult};

use super::events::EventEnvelope;

const V2_JSON: &str = "application/vnd.kafka.v2+json";
const V2_JSON_RECORDS: &str = "application/vnd.kafka.json.v2+json";

#[derive(Serialize)]
struct CreateConsumer<'a> {
    format: &'a str,
    #[serde(rename = "auto.offset.reset")]
    auto_offset_reset: &'a str,
    #[serde(rename = "auto.commit.enable")]
    auto_commit_enable: &'a str,
}

#[derive(Deserialize)]
struct ConsumerInstance {
    instance_id: String,
    base_uri: String,
}

#[derive(Serialize)]
struct Subscribe<'a> {
    topics: [&'a str; 1],
}

#[derive(Deserialize)]
struct PolledRecord {
    topic: String,
    #[serde(default)]
    key: Option<serde_json::Value>,
    value: serde_json::Value,
    partition: i32,
    offset: i64,
}

/// A consumer-group member reading one topic through the broker's REST proxy.
///
/// Offsets are only committed by [`BrokerSubscription::commit`], so records
/// fetched but not committed are delivered again to the group.
pub struct BrokerSubscription {
    client: reqwest::Client,
    instance_url: String,
    instance_id: String,
    topic: String,
}

impl BrokerSubscription {
    /// Joins `group` as a new consumer instance and subscribes it to `topic`.
    pub async fn open(
        base_url: &str,
        group: &str,
        topic: &str,
        timeout: Duration,
    ) -> ChatResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let url = format!("{}/consumers/{}", base_url.trim_end_matches('/'), group);
        let response = client
            .post(&url)
            .header(CONTENT_TYPE, V2_JSON)
            .json(&CreateConsumer {
                format: "json",
                auto_offset_reset: "earliest",
                auto_commit_enable: "false",
            })
            .send()
            .await?;
        let instance: ConsumerInstance = expect_success(response, "create consumer")
            .await?
            .json()
            .await?;

        let subscription = Self {
            client,
            instance_url: instance.base_uri.trim_end_matches('/').to_string(),
            instance_id: instance.instance_id,
            topic: topic.to_string(),
        };

        let response = subscription
            .client
            .post(format!("{}/subscription", subscription.instance_url))
            .header(CONTENT_TYPE, V2_JSON)
            .json(&Subscribe { topics: [topic] })
            .send()
            .await?;
        if let Err(e) = expect_success(response, "subscribe").await {
            subscription.close().await.ok();
            return Err(e);
        }

        info!(
            group = group,
            instance = %subscription.instance_id,
            topic = topic,
            "Subscribed to broker topic"
        );
        Ok(subscription)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Fetches the records the proxy has buffered for this instance. An empty
    /// batch means nothing new arrived.
    pub async fn poll(&self) -> ChatResult<Vec<EventEnvelope>> {
        let response = self
            .client
            .get(format!("{}/records", self.instance_url))
            .header(ACCEPT, V2_JSON_RECORDS)
            .send()
            .await?;
        let records: Vec<PolledRecord> = expect_success(response, "poll").await?.json().await?;

        let received_at = Utc::now();
        let envelopes: Vec<EventEnvelope> = records
            .into_iter()
            .map(|record| {
                debug!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    "Record received"
                );
                EventEnvelope {
                    topic: record.topic,
                    key: record_key(record.key),
                    payload: record.value,
                    published_at: received_at,
                }
            })
            .collect();

        Ok(envelopes)
    }

    /// Commits every record fetched so far.
    pub async fn commit(&self) -> ChatResult<()> {
        let response = self
            .client
            .post(format!("{}/offsets", self.instance_url))
            .header(CONTENT_TYPE, V2_JSON)
            .send()
            .await?;
        expect_success(response, "commit offsets").await?;
        Ok(())
    }

    /// Leaves the group so its partitions are handed to the remaining members.
    pub async fn close(self) -> ChatResult<()> {
        let response = self
            .client
            .delete(&self.instance_url)
            .header(CONTENT_TYPE, V2_JSON)
            .send()
            .await?;
        expect_success(response, "close consumer").await?;

        info!(instance = %self.instance_id, "Left consumer group");
        Ok(())
    }
}

fn record_key(key: Option<serde_json::Value>) -> String {
    match key {
        Some(serde_json::Value::String(key)) => key,
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

async fn expect_success(response: reqwest::Response, action: &str) -> ChatResult<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    warn!(action = action, status = %status, "Broker rejected consumer request");
    Err(ChatError::BrokerUnavailable(format!(
        "{} returned {}: {}",
        action, status, text
    )))
}
