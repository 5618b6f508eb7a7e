pub mod messages;
pub mod ocr;
pub mod sessions;

pub use messages::{handle_messages_command, MessagesCommand};
pub use ocr::{handle_ocr_command, OcrCommand};
pub use sessions::{handle_sessions_command, SessionsCommand};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Args;
use ticket_chat_core::{
    publisher_from_config, ChatConfig, Database, DatabaseConfig, MessageLog, MessageRepository,
    OcrRequestProducer, ParticipantIndexRepository, PgMessageRepository,
    PgParticipantIndexRepository, PgSessionRepository, SessionKey, SessionRepository,
    SessionStore,
};
use uuid::Uuid;

/// Services wired over the Postgres repositories. File messages get OCR only
/// when a broker is configured.
pub struct AppContext {
    db: Database,
    pub sessions: SessionStore,
    pub messages: Arc<MessageLog>,
}

impl AppContext {
    pub async fn connect(config: &ChatConfig) -> anyhow::Result<Self> {
        let db = Database::connect(&DatabaseConfig::from(&config.database)).await?;
        let pool = db.pool().clone();

        let session_repo: Arc<dyn SessionRepository> =
            Arc::new(PgSessionRepository::new(pool.clone()));
        let index_repo: Arc<dyn ParticipantIndexRepository> =
            Arc::new(PgParticipantIndexRepository::new(pool.clone()));
        let message_repo: Arc<dyn MessageRepository> = Arc::new(PgMessageRepository::new(pool));

        let mut log = MessageLog::new(session_repo.clone(), message_repo)
            .with_max_content_length(config.max_content_length());
        if let Some(publisher) = publisher_from_config(&config.ocr)? {
            log = log.with_ocr(OcrRequestProducer::new(
                publisher,
                config.ocr.request_topic.clone(),
            ));
        }

        Ok(Self {
            db,
            sessions: SessionStore::new(session_repo, index_repo),
            messages: Arc::new(log),
        })
    }

    pub async fn close(self) {
        self.db.close().await;
    }
}

#[derive(Args, Debug, Clone)]
pub struct SessionKeyArgs {
    #[arg(long, help = "Project ID (UUID)")]
    pub project: Uuid,

    #[arg(long, help = "Issue ID (UUID)")]
    pub issue: Uuid,

    #[arg(long, help = "Session ID (UUID)")]
    pub session: Uuid,
}

impl SessionKeyArgs {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.project, self.issue, self.session)
    }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn format_time(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a longer message", 6), "a lon…");
        assert_eq!(truncate("ééééé", 3), "éé…");
    }
}
