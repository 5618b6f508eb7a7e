use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};

use super::bus::EventPublisher;
use super::events::{EventEnvelope, OcrRequestEvent};

/// Publishes extraction requests for file messages.
#[derive(Clone)]
pub struct OcrRequestProducer {
    publisher: Arc<dyn EventPublisher>,
    topic: String,
}

impl OcrRequestProducer {
    pub fn new(publisher: Arc<dyn EventPublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn send_ocr_request(
        &self,
        session_id: Uuid,
        message_id: Uuid,
        sender_id: Uuid,
        bucket: &str,
        file_name: &str,
    ) -> ChatResult<OcrRequestEvent> {
        if bucket.trim().is_empty() || file_name.trim().is_empty() {
            return Err(ChatError::Validation(
                "OCR requests need a bucket and a file name".to_string(),
            ));
        }

        let event = OcrRequestEvent {
            session_id,
            message_id,
            sender_id,
            bucket: bucket.to_string(),
            file_name: file_name.to_string(),
        };
        let envelope = EventEnvelope::for_request(&self.topic, &event)?;

        self.publisher.publish(&envelope).await?;

        info!(
            session_id = %session_id,
            message_id = %message_id,
            topic = %self.topic,
            publisher = self.publisher.name(),
            "OCR request published"
        );
        Ok(event)
    }
}
