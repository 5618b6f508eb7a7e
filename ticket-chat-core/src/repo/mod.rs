pub mod memory;
pub mod message_repo;
pub mod participant_repo;
pub mod session_repo;

pub use memory::{
    FaultInjector, InMemoryMessageRepository, InMemoryParticipantIndex,
    InMemorySessionRepository, InMemoryStore, StoreOp,
};
pub use message_repo::PgMessageRepository;
pub use participant_repo::PgParticipantIndexRepository;
pub use session_repo::PgSessionRepository;

use crate::db::DatabaseError;
use crate::models::{
    ChatMessage, ChatSession, IssueParticipant, IssueParticipantKey, ParticipantRole, SessionKey,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Access to the `chat_sessions` table.
///
/// Every call touches exactly one row; there is no way to write a session and
/// its index rows atomically.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn insert(&self, session: &ChatSession) -> Result<(), DatabaseError>;

    async fn find(&self, key: &SessionKey) -> Result<Option<ChatSession>, DatabaseError>;

    async fn find_by_issue(
        &self,
        project_id: Uuid,
        issue_id: Uuid,
    ) -> Result<Vec<ChatSession>, DatabaseError>;

    /// Sets one entry of the participant map. Returns false if the row is absent.
    async fn put_participant(
        &self,
        key: &SessionKey,
        user_id: Uuid,
        role: ParticipantRole,
        modified_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Drops one entry of the participant map. Returns false if the row is absent.
    async fn remove_participant(
        &self,
        key: &SessionKey,
        user_id: Uuid,
        modified_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    async fn delete(&self, key: &SessionKey) -> Result<bool, DatabaseError>;
}

/// Access to the `issue_participants` reverse index.
#[async_trait]
pub trait ParticipantIndexRepository: Send + Sync {
    /// Insert or overwrite the row for the participant's key.
    async fn upsert(&self, row: &IssueParticipant) -> Result<(), DatabaseError>;

    /// Returns whether a row existed. Deleting a missing row succeeds.
    async fn delete(&self, key: &IssueParticipantKey) -> Result<bool, DatabaseError>;

    async fn find(
        &self,
        key: &IssueParticipantKey,
    ) -> Result<Option<IssueParticipant>, DatabaseError>;

    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<IssueParticipant>, DatabaseError>;
}

/// Access to the `chat_messages` log.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn insert(&self, message: &ChatMessage) -> Result<(), DatabaseError>;

    async fn find(
        &self,
        session_id: Uuid,
        message_id: Uuid,
    ) -> Result<Option<ChatMessage>, DatabaseError>;

    /// All messages of a session, ascending by message id.
    async fn find_by_session(&self, session_id: Uuid) -> Result<Vec<ChatMessage>, DatabaseError>;

    async fn update_content(
        &self,
        session_id: Uuid,
        message_id: Uuid,
        content: &str,
    ) -> Result<bool, DatabaseError>;

    async fn update_url(
        &self,
        session_id: Uuid,
        message_id: Uuid,
        url: &str,
    ) -> Result<bool, DatabaseError>;

    async fn delete(&self, session_id: Uuid, message_id: Uuid) -> Result<bool, DatabaseError>;
}
