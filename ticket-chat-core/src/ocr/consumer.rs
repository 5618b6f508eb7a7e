use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ChatError, ChatResult};
use crate::models::ContentOrigin;
use crate::services::MessageLog;

use super::events::{EventEnvelope, OcrResultEvent};
use super::subscription::BrokerSubscription;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// The extracted text was written to the message.
    Applied,
    /// The message already held this text, e.g. a redelivered result.
    Unchanged,
    /// The message was deleted before its result arrived.
    MessageMissing,
}

/// Counters for one run of the consumer loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerStats {
    pub applied: u64,
    pub unchanged: u64,
    pub missing: u64,
    pub failed: u64,
    pub skipped: u64,
    pub lagged: u64,
}

impl ConsumerStats {
    fn record(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Applied => self.applied += 1,
            ApplyOutcome::Unchanged => self.unchanged += 1,
            ApplyOutcome::MessageMissing => self.missing += 1,
        }
    }

    pub fn handled(&self) -> u64 {
        self.applied + self.unchanged + self.missing
    }

    pub fn merge(&mut self, other: &ConsumerStats) {
        self.applied += other.applied;
        self.unchanged += other.unchanged;
        self.missing += other.missing;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.lagged += other.lagged;
    }
}

/// Applies OCR results from the result topic back onto messages.
///
/// Results may arrive more than once and in any order across sessions;
/// applying the same result again leaves the message untouched.
pub struct OcrResultConsumer {
    messages: Arc<MessageLog>,
    topic: String,
}

impl OcrResultConsumer {
    pub fn new(messages: Arc<MessageLog>, topic: impl Into<String>) -> Self {
        Self {
            messages,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn handle(&self, event: &OcrResultEvent) -> ChatResult<ApplyOutcome> {
        let result = self
            .messages
            .update_text_chat_message(
                event.session_id,
                event.message_id,
                &event.extracted_text,
                ContentOrigin::Ocr,
            )
            .await;

        match result {
            Ok(update) if update.changed => {
                info!(message_id = %event.message_id, "OCR result applied");
                Ok(ApplyOutcome::Applied)
            }
            Ok(_) => {
                debug!(message_id = %event.message_id, "Duplicate OCR result ignored");
                Ok(ApplyOutcome::Unchanged)
            }
            Err(ChatError::MessageNotFound(_)) => {
                warn!(
                    session_id = %event.session_id,
                    message_id = %event.message_id,
                    "OCR result for a missing message dropped"
                );
                Ok(ApplyOutcome::MessageMissing)
            }
            Err(e) => Err(e),
        }
    }

    /// Decodes and applies an envelope. Envelopes of other topics yield `None`.
    pub async fn handle_envelope(&self, envelope: &EventEnvelope) -> ChatResult<Option<ApplyOutcome>> {
        if envelope.topic != self.topic {
            return Ok(None);
        }

        let event: OcrResultEvent = envelope.decode()?;
        self.handle(&event).await.map(Some)
    }

    /// Consumes until the channel closes.
    pub async fn run(&self, mut rx: broadcast::Receiver<EventEnvelope>) -> ConsumerStats {
        let mut stats = ConsumerStats::default();
        info!(topic = %self.topic, "OCR result consumer started");

        loop {
            match rx.recv().await {
                Ok(envelope) => match self.handle_envelope(&envelope).await {
                    Ok(Some(outcome)) => stats.record(outcome),
                    Ok(None) => stats.skipped += 1,
                    Err(e) => {
                        stats.failed += 1;
                        debug!(key = %envelope.key, "OCR result not applied");
                        e.log();
                    }
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    stats.lagged += n;
                    warn!(skipped = n, "OCR result consumer lagged, dropped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!(topic = %self.topic, "OCR result channel closed");
                    break;
                }
            }
        }

        stats
    }

    /// Polls one batch from the broker and applies it.
    ///
    /// Offsets are committed once every record is settled. A transient store
    /// error aborts the batch uncommitted so the broker delivers it again;
    /// results that can never apply are counted as failed and committed.
    pub async fn apply_batch(&self, subscription: &BrokerSubscription) -> ChatResult<ConsumerStats> {
        let mut stats = ConsumerStats::default();
        let envelopes = subscription.poll().await?;
        if envelopes.is_empty() {
            return Ok(stats);
        }

        for envelope in &envelopes {
            match self.handle_envelope(envelope).await {
                Ok(Some(outcome)) => stats.record(outcome),
                Ok(None) => stats.skipped += 1,
                Err(e) if e.is_transient() => {
                    warn!(
                        key = %envelope.key,
                        batch = envelopes.len(),
                        "Batch left uncommitted for redelivery"
                    );
                    return Err(e);
                }
                Err(e) => {
                    stats.failed += 1;
                    debug!(key = %envelope.key, "OCR result not applied");
                    e.log();
                }
            }
        }

        subscription.commit().await?;
        debug!(records = envelopes.len(), "Batch committed");
        Ok(stats)
    }

    pub fn spawn(self: Arc<Self>, rx: broadcast::Receiver<EventEnvelope>) -> JoinHandle<ConsumerStats> {
        tokio::spawn(async move { self.run(rx).await })
    }
}
