use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};
use crate::models::{
    ChatMessage, ContentOrigin, ContentType, MessageIdGenerator, ParticipantMap, SessionKey,
};
use crate::ocr::{OcrRequestEvent, OcrRequestProducer};
use crate::repo::{MessageRepository, SessionRepository};

pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 8000;

/// What happened to the OCR request of a file message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum OcrDispatch {
    Published,
    Disabled,
    /// The message is stored but was not enriched; re-trigger later.
    Failed(String),
}

/// A stored file message together with the fate of its OCR request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMessageReceipt {
    pub message: ChatMessage,
    pub ocr: OcrDispatch,
}

/// Outcome of a content update.
#[derive(Debug, Clone)]
pub struct ContentUpdate {
    pub message: ChatMessage,
    /// False when the stored content already matched and nothing was written.
    pub changed: bool,
}

/// Archive document produced by [`MessageLog::export_chat_logs_as_json_string`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatLogExport {
    pub project_id: Uuid,
    pub issue_id: Uuid,
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub participants: ParticipantMap,
    pub exported_at: DateTime<Utc>,
    pub message_count: usize,
    pub messages: Vec<ChatMessage>,
}

/// Append-only message history of chat sessions.
pub struct MessageLog {
    sessions: Arc<dyn SessionRepository>,
    messages: Arc<dyn MessageRepository>,
    ids: MessageIdGenerator,
    max_content_length: usize,
    ocr: Option<OcrRequestProducer>,
}

impl MessageLog {
    pub fn new(sessions: Arc<dyn SessionRepository>, messages: Arc<dyn MessageRepository>) -> Self {
        Self {
            sessions,
            messages,
            ids: MessageIdGenerator::new(),
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            ocr: None,
        }
    }

    pub fn with_max_content_length(mut self, max_content_length: usize) -> Self {
        self.max_content_length = max_content_length;
        self
    }

    pub fn with_ocr(mut self, producer: OcrRequestProducer) -> Self {
        self.ocr = Some(producer);
        self
    }

    pub fn max_content_length(&self) -> usize {
        self.max_content_length
    }

    /// Appends a message. `body` is the text of a TEXT message or the url of a
    /// FILE message.
    #[instrument(skip(self, body))]
    pub async fn send_message(
        &self,
        session_id: Uuid,
        sender_id: Uuid,
        content_type: ContentType,
        body: &str,
    ) -> ChatResult<ChatMessage> {
        let message_id = self.ids.next_id();
        let message = match content_type {
            ContentType::Text => {
                self.check_text(body)?;
                ChatMessage::text(session_id, message_id, sender_id, body.to_string())
            }
            ContentType::File => {
                check_url(body)?;
                ChatMessage::file(session_id, message_id, sender_id, body.to_string())
            }
        };

        self.messages.insert(&message).await?;

        debug!(message_id = %message.message_id, "Message appended");
        Ok(message)
    }

    /// Appends a FILE message and asks for its text to be extracted.
    ///
    /// A failed OCR publish does not fail the send; it is reported in the
    /// receipt and the request can be re-triggered.
    #[instrument(skip(self, url))]
    pub async fn send_file_message(
        &self,
        session_id: Uuid,
        sender_id: Uuid,
        bucket: &str,
        file_name: &str,
        url: &str,
    ) -> ChatResult<FileMessageReceipt> {
        let message = self
            .send_message(session_id, sender_id, ContentType::File, url)
            .await?;

        let ocr = match &self.ocr {
            None => OcrDispatch::Disabled,
            Some(producer) => match producer
                .send_ocr_request(
                    session_id,
                    message.message_id,
                    sender_id,
                    bucket,
                    file_name,
                )
                .await
            {
                Ok(_) => OcrDispatch::Published,
                Err(e) => {
                    warn!(
                        message_id = %message.message_id,
                        error = %e,
                        "File message stored without OCR enrichment"
                    );
                    OcrDispatch::Failed(e.to_string())
                }
            },
        };

        info!(message_id = %message.message_id, "File message appended");
        Ok(FileMessageReceipt { message, ocr })
    }

    /// Publishes a fresh OCR request for an existing FILE message.
    pub async fn retrigger_ocr(
        &self,
        session_id: Uuid,
        message_id: Uuid,
        bucket: &str,
        file_name: &str,
    ) -> ChatResult<OcrRequestEvent> {
        let producer = self
            .ocr
            .as_ref()
            .ok_or_else(|| ChatError::Config("OCR is disabled".to_string()))?;

        let message = self.require_message(session_id, message_id).await?;
        if !message.is_file() {
            return Err(type_mismatch(&message, ContentType::File));
        }

        producer
            .send_ocr_request(session_id, message_id, message.sender_id, bucket, file_name)
            .await
    }

    /// Rewrites the text of a message.
    ///
    /// Senders may only correct TEXT messages. OCR results only land on FILE
    /// messages; content type and url are left as they are. Writing the
    /// content already stored is a no-op.
    #[instrument(skip(self, new_content))]
    pub async fn update_text_chat_message(
        &self,
        session_id: Uuid,
        message_id: Uuid,
        new_content: &str,
        origin: ContentOrigin,
    ) -> ChatResult<ContentUpdate> {
        let mut message = self.require_message(session_id, message_id).await?;

        let content = match origin {
            ContentOrigin::Sender => {
                if !message.is_text() {
                    return Err(type_mismatch(&message, ContentType::Text));
                }
                self.check_text(new_content)?;
                new_content.to_string()
            }
            ContentOrigin::Ocr => {
                if !message.is_file() {
                    return Err(type_mismatch(&message, ContentType::File));
                }
                self.fit_extracted_text(new_content)?
            }
        };

        if message.content.as_deref() == Some(content.as_str()) {
            debug!(message_id = %message_id, "Content unchanged, nothing written");
            return Ok(ContentUpdate {
                message,
                changed: false,
            });
        }

        if !self
            .messages
            .update_content(session_id, message_id, &content)
            .await?
        {
            return Err(message_not_found(session_id, message_id));
        }

        message.content = Some(content);
        info!(message_id = %message_id, ?origin, "Message content updated");
        Ok(ContentUpdate {
            message,
            changed: true,
        })
    }

    /// Points a FILE message at its final upload location.
    #[instrument(skip(self, new_url))]
    pub async fn update_file_url(
        &self,
        session_id: Uuid,
        message_id: Uuid,
        new_url: &str,
    ) -> ChatResult<ChatMessage> {
        check_url(new_url)?;
        let mut message = self.require_message(session_id, message_id).await?;

        if !message.is_file() {
            return Err(type_mismatch(&message, ContentType::File));
        }

        if message.url.as_deref() == Some(new_url) {
            return Ok(message);
        }

        if !self
            .messages
            .update_url(session_id, message_id, new_url)
            .await?
        {
            return Err(message_not_found(session_id, message_id));
        }

        message.url = Some(new_url.to_string());
        info!(message_id = %message_id, "File url updated");
        Ok(message)
    }

    /// Deletes a message. Returns whether it existed; a missing message is not
    /// an error.
    pub async fn delete_chat_message(&self, session_id: Uuid, message_id: Uuid) -> ChatResult<bool> {
        let existed = self.messages.delete(session_id, message_id).await?;
        if existed {
            info!(session_id = %session_id, message_id = %message_id, "Message deleted");
        }
        Ok(existed)
    }

    pub async fn find_message_by_id(
        &self,
        session_id: Uuid,
        message_id: Uuid,
    ) -> ChatResult<Option<ChatMessage>> {
        Ok(self.messages.find(session_id, message_id).await?)
    }

    /// Messages of a session, oldest first.
    pub async fn find_messages(&self, session_id: Uuid) -> ChatResult<Vec<ChatMessage>> {
        let mut messages = self.messages.find_by_session(session_id).await?;
        messages.sort_by_key(|m| m.message_id);
        Ok(messages)
    }

    pub async fn export_chat_logs(&self, key: &SessionKey) -> ChatResult<ChatLogExport> {
        let session = self
            .sessions
            .find(key)
            .await?
            .ok_or_else(|| ChatError::SessionNotFound(key.to_string()))?;
        let messages = self.find_messages(key.session_id).await?;

        Ok(ChatLogExport {
            project_id: session.project_id,
            issue_id: session.issue_id,
            session_id: session.session_id,
            created_at: session.created_at,
            modified_at: session.modified_at,
            participants: session.participants,
            exported_at: Utc::now(),
            message_count: messages.len(),
            messages,
        })
    }

    pub async fn export_chat_logs_as_json_string(&self, key: &SessionKey) -> ChatResult<String> {
        let export = self.export_chat_logs(key).await?;
        Ok(serde_json::to_string_pretty(&export)?)
    }

    async fn require_message(&self, session_id: Uuid, message_id: Uuid) -> ChatResult<ChatMessage> {
        self.messages
            .find(session_id, message_id)
            .await?
            .ok_or_else(|| message_not_found(session_id, message_id))
    }

    fn check_text(&self, content: &str) -> ChatResult<()> {
        if content.trim().is_empty() {
            return Err(ChatError::InvalidContent(
                "message content must not be blank".to_string(),
            ));
        }

        let length = content.chars().count();
        if length > self.max_content_length {
            return Err(ChatError::InvalidContent(format!(
                "message content is {} characters, limit is {}",
                length, self.max_content_length
            )));
        }

        Ok(())
    }

    fn fit_extracted_text(&self, text: &str) -> ChatResult<String> {
        if text.trim().is_empty() {
            return Err(ChatError::InvalidContent(
                "extracted text must not be blank".to_string(),
            ));
        }

        if text.chars().count() <= self.max_content_length {
            return Ok(text.to_string());
        }

        warn!(
            limit = self.max_content_length,
            "Extracted text exceeds the content limit and was truncated"
        );
        Ok(text.chars().take(self.max_content_length).collect())
    }
}

fn check_url(url: &str) -> ChatResult<()> {
    if url.trim().is_empty() {
        return Err(ChatError::InvalidContent(
            "file messages need a url".to_string(),
        ));
    }
    Ok(())
}

fn message_not_found(session_id: Uuid, message_id: Uuid) -> ChatError {
    ChatError::MessageNotFound(format!("session={} message={}", session_id, message_id))
}

fn type_mismatch(message: &ChatMessage, expected: ContentType) -> ChatError {
    ChatError::ContentTypeMismatch {
        message_id: message.message_id,
        expected: expected.to_string(),
        actual: message.content_type.to_string(),
    }
}
