use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChatResult;

/// Asks the extraction service to read text out of an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrRequestEvent {
    pub session_id: Uuid,
    pub message_id: Uuid,
    pub sender_id: Uuid,
    pub bucket: String,
    pub file_name: String,
}

/// Text the extraction service found in a file message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrResultEvent {
    pub session_id: Uuid,
    pub message_id: Uuid,
    pub extracted_text: String,
}

/// A payload as it travels over a topic.
///
/// `key` is the session id, so a partitioned broker keeps every event of one
/// session on one partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub topic: String,
    pub key: String,
    pub payload: serde_json::Value,
    pub published_at: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new<T: Serialize>(topic: &str, key: impl Into<String>, payload: &T) -> ChatResult<Self> {
        Ok(Self {
            topic: topic.to_string(),
            key: key.into(),
            payload: serde_json::to_value(payload)?,
            published_at: Utc::now(),
        })
    }

    pub fn for_request(topic: &str, event: &OcrRequestEvent) -> ChatResult<Self> {
        Self::new(topic, event.session_id.to_string(), event)
    }

    pub fn for_result(topic: &str, event: &OcrResultEvent) -> ChatResult<Self> {
        Self::new(topic, event.session_id.to_string(), event)
    }

    pub fn decode<T: DeserializeOwned>(&self) -> ChatResult<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatError;

    #[test]
    fn test_request_wire_format() {
        let event = OcrRequestEvent {
            session_id: Uuid::new_v4(),
            message_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            bucket: "b".to_string(),
            file_name: "f.png".to_string(),
        };

        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["sessionId"], event.session_id.to_string());
        assert_eq!(json["messageId"], event.message_id.to_string());
        assert_eq!(json["senderId"], event.sender_id.to_string());
        assert_eq!(json["bucket"], "b");
        assert_eq!(json["fileName"], "f.png");
    }

    #[test]
    fn test_result_parses_from_wire() {
        let session_id = Uuid::new_v4();
        let message_id = Uuid::new_v4();
        let raw = format!(
            r#"{{"sessionId":"{}","messageId":"{}","extractedText":"extracted text"}}"#,
            session_id, message_id
        );

        let event: OcrResultEvent = serde_json::from_str(&raw).unwrap();

        assert_eq!(event.session_id, session_id);
        assert_eq!(event.message_id, message_id);
        assert_eq!(event.extracted_text, "extracted text");
    }

    #[test]
    fn test_envelope_is_keyed_by_session() {
        let event = OcrResultEvent {
            session_id: Uuid::new_v4(),
            message_id: Uuid::new_v4(),
            extracted_text: "hello".to_string(),
        };

        let envelope = EventEnvelope::for_result("ocr-results", &event).unwrap();

        assert_eq!(envelope.topic, "ocr-results");
        assert_eq!(envelope.key, event.session_id.to_string());
        assert_eq!(envelope.decode::<OcrResultEvent>().unwrap(), event);
    }

    #[test]
    fn test_decode_wrong_payload_is_serialization_error() {
        let envelope = EventEnvelope::new("ocr-results", "k", &serde_json::json!({"foo": 1}))
            .unwrap();

        let err = envelope.decode::<OcrResultEvent>().unwrap_err();
        assert!(matches!(err, ChatError::SerializationError(_)));
    }
}
