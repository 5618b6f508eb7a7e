use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use uuid::{Builder, Uuid};

use crate::error::ChatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContentType {
    Text,
    File,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "TEXT",
            ContentType::File => "FILE",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TEXT" => Ok(ContentType::Text),
            "FILE" => Ok(ContentType::File),
            _ => Err(ChatError::Validation(format!("unknown content type: {}", s))),
        }
    }
}

/// Who is rewriting a message's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentOrigin {
    /// The sending user correcting a TEXT message.
    Sender,
    /// The OCR pipeline inserting extracted text.
    Ocr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub session_id: Uuid,
    pub message_id: Uuid,
    pub sender_id: Uuid,
    pub content_type: ContentType,
    pub content: Option<String>,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn text(session_id: Uuid, message_id: Uuid, sender_id: Uuid, content: String) -> Self {
        Self {
            session_id,
            message_id,
            sender_id,
            content_type: ContentType::Text,
            content: Some(content),
            url: None,
            created_at: Utc::now(),
        }
    }

    pub fn file(session_id: Uuid, message_id: Uuid, sender_id: Uuid, url: String) -> Self {
        Self {
            session_id,
            message_id,
            sender_id,
            content_type: ContentType::File,
            content: None,
            url: Some(url),
            created_at: Utc::now(),
        }
    }

    pub fn is_text(&self) -> bool {
        self.content_type == ContentType::Text
    }

    pub fn is_file(&self) -> bool {
        self.content_type == ContentType::File
    }
}

const SEQUENCE_BITS: u32 = 12;
const MAX_SEQUENCE: u16 = (1 << SEQUENCE_BITS) - 1;

#[derive(Debug, Default)]
struct ClockState {
    last_millis: u64,
    sequence: u16,
}

/// Issues strictly increasing, time-ordered message identifiers.
///
/// Ids are UUIDv7: a 48-bit unix millisecond timestamp, then a 12-bit sequence
/// that orders ids minted within the same millisecond, then random bits. When
/// the sequence is exhausted the clock is advanced by one millisecond, so ids
/// never go backwards even if the wall clock does.
///
/// The ordering holds per generator. Two processes writing to the same session
/// each run their own sequence, so messages they mint within one millisecond
/// are ordered by the random bits, and clock skew between hosts can reorder
/// them further. Send through a single long-lived `MessageLog` where strict
/// cross-writer order matters.
#[derive(Debug, Default)]
pub struct MessageIdGenerator {
    state: Mutex<ClockState>,
}

impl MessageIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> Uuid {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let (millis, sequence) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if now > state.last_millis {
                state.last_millis = now;
                state.sequence = 0;
            } else if state.sequence >= MAX_SEQUENCE {
                state.last_millis += 1;
                state.sequence = 0;
            } else {
                state.sequence += 1;
            }
            (state.last_millis, state.sequence)
        };

        encode_message_id(millis, sequence)
    }
}

fn encode_message_id(millis: u64, sequence: u16) -> Uuid {
    let random = Uuid::new_v4();
    let mut counter_random = [0u8; 10];
    counter_random[0] = ((sequence >> 8) & 0x0F) as u8;
    counter_random[1] = (sequence & 0xFF) as u8;
    counter_random[2..].copy_from_slice(&random.as_bytes()[8..]);

    Builder::from_unix_timestamp_millis(millis, &counter_random).into_uuid()
}
