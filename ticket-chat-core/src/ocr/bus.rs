use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::OcrConfig;
use crate::error::{ChatError, ChatResult};

use super::events::EventEnvelope;

/// Hands envelopes to a message broker.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    fn name(&self) -> &str;

    /// Returns once the broker has accepted the event.
    async fn publish(&self, envelope: &EventEnvelope) -> ChatResult<()>;
}

/// In-process broker: one broadcast channel per topic.
///
/// There is no retention: a publish to a topic nobody subscribes to fails
/// with `BrokerUnavailable` instead of dropping the event.
pub struct InMemoryEventBus {
    capacity: usize,
    topics: Mutex<HashMap<String, broadcast::Sender<EventEnvelope>>>,
}

impl InMemoryEventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<EventEnvelope> {
        self.sender(topic).subscribe()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.lock()
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Drops the topic's sender so its receivers see the channel close.
    pub fn close_topic(&self, topic: &str) {
        self.lock().remove(topic);
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<EventEnvelope> {
        self.lock()
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, broadcast::Sender<EventEnvelope>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn publish(&self, envelope: &EventEnvelope) -> ChatResult<()> {
        let receivers = self
            .sender(&envelope.topic)
            .send(envelope.clone())
            .map_err(|_| {
                ChatError::BrokerUnavailable(format!("no subscribers on topic {}", envelope.topic))
            })?;

        debug!(topic = %envelope.topic, key = %envelope.key, receivers, "Event published");
        Ok(())
    }
}

#[derive(Serialize)]
struct ProduceRecord<'a> {
    key: &'a str,
    value: &'a serde_json::Value,
}

#[derive(Serialize)]
struct ProduceRequest<'a> {
    records: Vec<ProduceRecord<'a>>,
}

/// Publishes through a broker's REST proxy: `POST {base}/topics/{topic}`.
pub struct HttpEventPublisher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEventPublisher {
    pub fn new(base_url: &str, timeout: Duration) -> ChatResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn topic_url(&self, topic: &str) -> String {
        format!("{}/topics/{}", self.base_url, topic)
    }
}

#[async_trait]
impl EventPublisher for HttpEventPublisher {
    fn name(&self) -> &str {
        "http"
    }

    async fn publish(&self, envelope: &EventEnvelope) -> ChatResult<()> {
        let body = ProduceRequest {
            records: vec![ProduceRecord {
                key: &envelope.key,
                value: &envelope.payload,
            }],
        };

        let response = self
            .client
            .post(self.topic_url(&envelope.topic))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(topic = %envelope.topic, status = %status, "Broker rejected event");
            return Err(ChatError::BrokerUnavailable(format!(
                "topic {} returned {}: {}",
                envelope.topic, status, text
            )));
        }

        debug!(topic = %envelope.topic, key = %envelope.key, "Event published to broker");
        Ok(())
    }
}

/// The publisher the OCR settings ask for.
///
/// `None` when OCR is disabled or no broker URL is set. An in-process bus
/// would accept requests that no extraction service ever reads.
pub fn publisher_from_config(config: &OcrConfig) -> ChatResult<Option<Arc<dyn EventPublisher>>> {
    if !config.enabled {
        return Ok(None);
    }

    if !config.uses_external_broker() {
        warn!("OCR is enabled but no broker URL is set, file messages will not be enriched");
        return Ok(None);
    }

    let publisher = HttpEventPublisher::new(
        &config.broker_url,
        Duration::from_secs(config.publish_timeout_secs),
    )?;
    Ok(Some(Arc::new(publisher)))
}
