use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};
use crate::models::{
    ChatSession, IssueParticipant, IssueParticipantKey, ParticipantMap, ParticipantRole,
    SessionKey,
};
use crate::repo::{ParticipantIndexRepository, SessionRepository};

use super::compensation::CompensationCoordinator;

/// Result of a participant index repair pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    pub scanned: usize,
    /// Rows deleted because their session is gone or no longer lists the user.
    pub removed: Vec<IssueParticipantKey>,
    /// Rows whose role was rewritten to match the session.
    pub updated: Vec<IssueParticipantKey>,
    /// Rows that needed repair but whose write failed.
    pub failed: Vec<IssueParticipantKey>,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

enum IndexVerdict {
    Keep,
    Remove,
    Rewrite(IssueParticipant),
}

/// Owns chat sessions and keeps the participant index in step with them.
pub struct SessionStore {
    sessions: Arc<dyn SessionRepository>,
    index: Arc<dyn ParticipantIndexRepository>,
    coordinator: CompensationCoordinator,
}

impl SessionStore {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        index: Arc<dyn ParticipantIndexRepository>,
    ) -> Self {
        let coordinator = CompensationCoordinator::new(index.clone());
        Self {
            sessions,
            index,
            coordinator,
        }
    }

    /// Creates a session and one index row per participant.
    ///
    /// Index rows are written first and the session row last. Any failure
    /// deletes the index rows written so far before the error is returned.
    #[instrument(skip(self, participants), fields(participants = participants.len()))]
    pub async fn create_chat_session(
        &self,
        project_id: Uuid,
        issue_id: Uuid,
        participants: ParticipantMap,
    ) -> ChatResult<ChatSession> {
        participants.validate_for_creation()?;

        let session = ChatSession::new(project_id, issue_id, participants);
        let mut journal = self.coordinator.begin("create_chat_session");

        for row in session.index_rows() {
            if let Err(e) = journal.upsert(&row).await {
                return Err(journal.rollback(e).await);
            }
        }

        if let Err(e) = self.sessions.insert(&session).await {
            return Err(journal.rollback(e).await);
        }

        journal.commit();

        info!(
            session_id = %session.session_id,
            participants = session.participants.len(),
            "Chat session created"
        );
        Ok(session)
    }

    #[instrument(skip(self), fields(session = %key))]
    pub async fn add_participant(
        &self,
        key: &SessionKey,
        user_id: Uuid,
        role: ParticipantRole,
    ) -> ChatResult<ChatSession> {
        let mut session = self.require_session(key).await?;

        if session.participants.contains(&user_id) {
            return Err(ChatError::ParticipantAlreadyExists {
                user_id,
                session_id: key.session_id,
            });
        }

        if role.is_initiator() {
            if let Some(initiator) = session.participants.initiator() {
                return Err(ChatError::InitiatorAlreadyAssigned {
                    session_id: key.session_id,
                    initiator,
                });
            }
        }

        let now = Utc::now();
        self.index.upsert(&session.index_row(user_id, role)).await?;

        match self
            .sessions
            .put_participant(key, user_id, role, now)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(user_id = %user_id, "Session disappeared after its index row was written");
                let index_key = IssueParticipantKey {
                    user_id,
                    issue_id: key.issue_id,
                    session_id: key.session_id,
                };
                if let Err(e) = self.index.delete(&index_key).await {
                    warn!(user_id = %user_id, error = %e, "Index row of a vanished session survived");
                    return Err(ChatError::IndexCleanupFailed {
                        session_id: key.session_id,
                        orphans: vec![index_key],
                    });
                }
                return Err(ChatError::SessionNotFound(key.to_string()));
            }
            Err(e) => {
                warn!(
                    user_id = %user_id,
                    error = %e,
                    "Session map write failed, index row left for the repair sweep"
                );
                return Err(e.into());
            }
        }

        session.participants.insert(user_id, role);
        session.modified_at = now;

        info!(user_id = %user_id, role = %role, "Participant added");
        Ok(session)
    }

    #[instrument(skip(self), fields(session = %key))]
    pub async fn remove_participant(
        &self,
        key: &SessionKey,
        user_id: Uuid,
    ) -> ChatResult<ChatSession> {
        let mut session = self.require_session(key).await?;

        if !session.participants.contains(&user_id) {
            return Err(ChatError::ParticipantNotFound {
                user_id,
                session_id: key.session_id,
            });
        }

        if session.participants.len() == 1 {
            return Err(ChatError::LastParticipant {
                user_id,
                session_id: key.session_id,
            });
        }

        let now = Utc::now();
        if !self.sessions.remove_participant(key, user_id, now).await? {
            return Err(ChatError::SessionNotFound(key.to_string()));
        }

        session.participants.remove(&user_id);
        session.modified_at = now;

        let index_key = IssueParticipantKey {
            user_id,
            issue_id: key.issue_id,
            session_id: key.session_id,
        };
        if let Err(e) = self.index.delete(&index_key).await {
            warn!(user_id = %user_id, error = %e, "Participant removed but index row survived");
            return Err(ChatError::IndexCleanupFailed {
                session_id: key.session_id,
                orphans: vec![index_key],
            });
        }

        info!(user_id = %user_id, "Participant removed");
        Ok(session)
    }

    /// Same as [`SessionStore::remove_participant`].
    pub async fn delete_member(&self, key: &SessionKey, user_id: Uuid) -> ChatResult<ChatSession> {
        self.remove_participant(key, user_id).await
    }

    #[instrument(skip(self), fields(session = %key))]
    pub async fn change_participant_role(
        &self,
        key: &SessionKey,
        user_id: Uuid,
        role: ParticipantRole,
    ) -> ChatResult<ChatSession> {
        let mut session = self.require_session(key).await?;

        let current = session
            .role_of(&user_id)
            .ok_or(ChatError::ParticipantNotFound {
                user_id,
                session_id: key.session_id,
            })?;

        if current == role {
            return Ok(session);
        }

        if role.is_initiator() {
            if let Some(initiator) = session.participants.initiator() {
                return Err(ChatError::InitiatorAlreadyAssigned {
                    session_id: key.session_id,
                    initiator,
                });
            }
        }

        let now = Utc::now();
        if !self
            .sessions
            .put_participant(key, user_id, role, now)
            .await?
        {
            return Err(ChatError::SessionNotFound(key.to_string()));
        }

        session.participants.insert(user_id, role);
        session.modified_at = now;

        if let Err(e) = self.index.upsert(&session.index_row(user_id, role)).await {
            warn!(
                user_id = %user_id,
                error = %e,
                "Role changed in session but index row still holds {}",
                current
            );
            return Err(e.into());
        }

        info!(user_id = %user_id, from = %current, to = %role, "Participant role changed");
        Ok(session)
    }

    /// Participants of the session; empty when the session does not exist.
    pub async fn find_participants_by_id(&self, key: &SessionKey) -> ChatResult<ParticipantMap> {
        Ok(self
            .sessions
            .find(key)
            .await?
            .map(|session| session.participants)
            .unwrap_or_default())
    }

    pub async fn find_participant_role(
        &self,
        key: &SessionKey,
        user_id: Uuid,
    ) -> ChatResult<Option<ParticipantRole>> {
        Ok(self
            .sessions
            .find(key)
            .await?
            .and_then(|session| session.role_of(&user_id)))
    }

    pub async fn find_chat_session(&self, key: &SessionKey) -> ChatResult<Option<ChatSession>> {
        Ok(self.sessions.find(key).await?)
    }

    pub async fn find_sessions_by_issue(
        &self,
        project_id: Uuid,
        issue_id: Uuid,
    ) -> ChatResult<Vec<ChatSession>> {
        Ok(self.sessions.find_by_issue(project_id, issue_id).await?)
    }

    /// Every session the user takes part in, according to the index.
    pub async fn find_issues_for_user(&self, user_id: Uuid) -> ChatResult<Vec<IssueParticipant>> {
        Ok(self.index.find_by_user(user_id).await?)
    }

    /// Deletes the session row, then its index rows.
    ///
    /// Returns `false` when there was no such session.
    #[instrument(skip(self), fields(session = %key))]
    pub async fn delete_chat_session(&self, key: &SessionKey) -> ChatResult<bool> {
        let Some(session) = self.sessions.find(key).await? else {
            return Ok(false);
        };

        if !self.sessions.delete(key).await? {
            return Ok(false);
        }

        let mut orphans = Vec::new();
        for row in session.index_rows() {
            let index_key = row.key();
            if let Err(e) = self.index.delete(&index_key).await {
                warn!(row = %index_key, error = %e, "Index row survived session deletion");
                orphans.push(index_key);
            }
        }

        if !orphans.is_empty() {
            return Err(ChatError::IndexCleanupFailed {
                session_id: key.session_id,
                orphans,
            });
        }

        info!(participants = session.participants.len(), "Chat session deleted");
        Ok(true)
    }

    /// Brings every index row of `user_id` back in line with its session.
    #[instrument(skip(self))]
    pub async fn repair_participant_index(&self, user_id: Uuid) -> ChatResult<RepairReport> {
        let rows = self.index.find_by_user(user_id).await?;
        let mut report = RepairReport {
            scanned: rows.len(),
            ..Default::default()
        };

        for row in rows {
            self.repair_row(row, &mut report).await?;
        }

        info!(
            scanned = report.scanned,
            removed = report.removed.len(),
            updated = report.updated.len(),
            failed = report.failed.len(),
            "Participant index repaired"
        );
        Ok(report)
    }

    /// Repairs the named rows, typically the orphans of a failed rollback.
    #[instrument(skip(self, keys), fields(keys = keys.len()))]
    pub async fn repair_orphans(&self, keys: &[IssueParticipantKey]) -> ChatResult<RepairReport> {
        let mut report = RepairReport::default();

        for key in keys {
            let Some(row) = self.index.find(key).await? else {
                continue;
            };
            report.scanned += 1;
            self.repair_row(row, &mut report).await?;
        }

        info!(
            scanned = report.scanned,
            removed = report.removed.len(),
            failed = report.failed.len(),
            "Orphaned participant rows repaired"
        );
        Ok(report)
    }

    async fn repair_row(&self, row: IssueParticipant, report: &mut RepairReport) -> ChatResult<()> {
        let key = row.key();
        match self.judge_index_row(&row).await? {
            IndexVerdict::Keep => {}
            IndexVerdict::Remove => match self.index.delete(&key).await {
                Ok(_) => report.removed.push(key),
                Err(e) => {
                    warn!(row = %key, error = %e, "Could not delete stale index row");
                    report.failed.push(key);
                }
            },
            IndexVerdict::Rewrite(fixed) => match self.index.upsert(&fixed).await {
                Ok(()) => report.updated.push(key),
                Err(e) => {
                    warn!(row = %key, error = %e, "Could not rewrite index row role");
                    report.failed.push(key);
                }
            },
        }
        Ok(())
    }

    async fn judge_index_row(&self, row: &IssueParticipant) -> ChatResult<IndexVerdict> {
        let session_key = SessionKey::new(row.project_id, row.issue_id, row.session_id);
        let verdict = match self.sessions.find(&session_key).await? {
            None => IndexVerdict::Remove,
            Some(session) => match session.role_of(&row.user_id) {
                None => IndexVerdict::Remove,
                Some(role) if role == row.role => IndexVerdict::Keep,
                Some(role) => IndexVerdict::Rewrite(session.index_row(row.user_id, role)),
            },
        };
        Ok(verdict)
    }

    async fn require_session(&self, key: &SessionKey) -> ChatResult<ChatSession> {
        self.sessions
            .find(key)
            .await?
            .ok_or_else(|| ChatError::SessionNotFound(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabaseError;
    use crate::repo::{InMemorySessionRepository, InMemoryStore, StoreOp};
    use async_trait::async_trait;
    use chrono::DateTime;

    fn store_over(memory: &InMemoryStore) -> SessionStore {
        SessionStore::new(memory.sessions.clone(), memory.index.clone())
    }

    fn two_participants() -> (Uuid, Uuid, ParticipantMap) {
        let initiator = Uuid::new_v4();
        let handler = Uuid::new_v4();
        let map = [
            (initiator, ParticipantRole::Initiator),
            (handler, ParticipantRole::Handler),
        ]
        .into_iter()
        .collect();
        (initiator, handler, map)
    }

    #[tokio::test]
    async fn test_create_rejects_empty_participants() {
        let memory = InMemoryStore::new();
        let store = store_over(&memory);

        let err = store
            .create_chat_session(Uuid::new_v4(), Uuid::new_v4(), ParticipantMap::new())
            .await
            .unwrap_err();

        assert!(err.is_validation_error());
        assert_eq!(memory.faults.calls(StoreOp::IndexUpsert), 0);
    }

    #[tokio::test]
    async fn test_create_rejects_two_initiators_without_writes() {
        let memory = InMemoryStore::new();
        let store = store_over(&memory);
        let participants: ParticipantMap = [
            (Uuid::new_v4(), ParticipantRole::Initiator),
            (Uuid::new_v4(), ParticipantRole::Initiator),
        ]
        .into_iter()
        .collect();

        let err = store
            .create_chat_session(Uuid::new_v4(), Uuid::new_v4(), participants)
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::InvalidParticipants(_)));
        assert!(memory.index.is_empty().await);
        assert!(memory.sessions.is_empty().await);
    }

    #[tokio::test]
    async fn test_session_insert_failure_rolls_back_index() {
        let memory = InMemoryStore::new();
        let store = store_over(&memory);
        memory.faults.fail_nth(StoreOp::SessionInsert, 1);
        let (_, _, participants) = two_participants();

        let err = store
            .create_chat_session(Uuid::new_v4(), Uuid::new_v4(), participants)
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::StoreWriteFailed { .. }));
        assert!(memory.index.is_empty().await);
        assert!(memory.sessions.is_empty().await);
        assert_eq!(memory.faults.calls(StoreOp::IndexDelete), 2);
    }

    #[tokio::test]
    async fn test_add_second_initiator_is_conflict() {
        let memory = InMemoryStore::new();
        let store = store_over(&memory);
        let (initiator, _, participants) = two_participants();
        let session = store
            .create_chat_session(Uuid::new_v4(), Uuid::new_v4(), participants)
            .await
            .unwrap();

        let err = store
            .add_participant(&session.key(), Uuid::new_v4(), ParticipantRole::Initiator)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ChatError::InitiatorAlreadyAssigned { initiator: found, .. } if found == initiator
        ));
        assert_eq!(memory.index.len().await, 2);
    }

    #[tokio::test]
    async fn test_add_to_missing_session_is_not_found() {
        let memory = InMemoryStore::new();
        let store = store_over(&memory);
        let key = SessionKey::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let err = store
            .add_participant(&key, Uuid::new_v4(), ParticipantRole::Viewer)
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::SessionNotFound(_)));
        assert!(memory.index.is_empty().await);
    }

    /// Deletes the session just before the participant map is written, as a
    /// concurrent `delete_chat_session` would.
    struct DeletedMidway(Arc<InMemorySessionRepository>);

    #[async_trait]
    impl SessionRepository for DeletedMidway {
        async fn insert(&self, session: &ChatSession) -> Result<(), DatabaseError> {
            self.0.insert(session).await
        }

        async fn find(&self, key: &SessionKey) -> Result<Option<ChatSession>, DatabaseError> {
            self.0.find(key).await
        }

        async fn find_by_issue(
            &self,
            project_id: Uuid,
            issue_id: Uuid,
        ) -> Result<Vec<ChatSession>, DatabaseError> {
            self.0.find_by_issue(project_id, issue_id).await
        }

        async fn put_participant(
            &self,
            key: &SessionKey,
            user_id: Uuid,
            role: ParticipantRole,
            modified_at: DateTime<Utc>,
        ) -> Result<bool, DatabaseError> {
            self.0.delete(key).await?;
            self.0.put_participant(key, user_id, role, modified_at).await
        }

        async fn remove_participant(
            &self,
            key: &SessionKey,
            user_id: Uuid,
            modified_at: DateTime<Utc>,
        ) -> Result<bool, DatabaseError> {
            self.0.remove_participant(key, user_id, modified_at).await
        }

        async fn delete(&self, key: &SessionKey) -> Result<bool, DatabaseError> {
            self.0.delete(key).await
        }
    }

    async fn session_deleted_during_add(memory: &InMemoryStore) -> (ChatSession, SessionStore) {
        let session = store_over(memory)
            .create_chat_session(Uuid::new_v4(), Uuid::new_v4(), two_participants().2)
            .await
            .unwrap();
        let racing = SessionStore::new(
            Arc::new(DeletedMidway(memory.sessions.clone())),
            memory.index.clone(),
        );
        (session, racing)
    }

    #[tokio::test]
    async fn test_add_to_session_deleted_midway_removes_its_index_row() {
        let memory = InMemoryStore::new();
        let (session, racing) = session_deleted_during_add(&memory).await;
        let newcomer = Uuid::new_v4();

        let err = racing
            .add_participant(&session.key(), newcomer, ParticipantRole::Viewer)
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::SessionNotFound(_)));
        assert!(racing.find_issues_for_user(newcomer).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_to_session_deleted_midway_reports_surviving_row() {
        let memory = InMemoryStore::new();
        let (session, racing) = session_deleted_during_add(&memory).await;
        let newcomer = Uuid::new_v4();
        memory.faults.fail_nth(StoreOp::IndexDelete, 1);

        let err = racing
            .add_participant(&session.key(), newcomer, ParticipantRole::Viewer)
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::IndexCleanupFailed { .. }));
        assert_eq!(err.orphans().len(), 1);
        assert_eq!(err.orphans()[0].user_id, newcomer);

        let report = racing.repair_orphans(err.orphans()).await.unwrap();
        assert_eq!(report.removed.len(), 1);
        assert!(racing.find_issues_for_user(newcomer).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_requires_full_composite_key() {
        let memory = InMemoryStore::new();
        let store = store_over(&memory);
        let (initiator, _, participants) = two_participants();
        let session = store
            .create_chat_session(Uuid::new_v4(), Uuid::new_v4(), participants)
            .await
            .unwrap();

        let wrong_issue = SessionKey::new(session.project_id, Uuid::new_v4(), session.session_id);

        assert!(store
            .find_participants_by_id(&wrong_issue)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .find_participant_role(&wrong_issue, initiator)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_remove_last_participant_is_conflict() {
        let memory = InMemoryStore::new();
        let store = store_over(&memory);
        let user = Uuid::new_v4();
        let session = store
            .create_chat_session(
                Uuid::new_v4(),
                Uuid::new_v4(),
                [(user, ParticipantRole::Owner)].into_iter().collect(),
            )
            .await
            .unwrap();

        let err = store
            .remove_participant(&session.key(), user)
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::LastParticipant { .. }));
        assert_eq!(memory.index.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_reports_surviving_index_row() {
        let memory = InMemoryStore::new();
        let store = store_over(&memory);
        let (_, handler, participants) = two_participants();
        let session = store
            .create_chat_session(Uuid::new_v4(), Uuid::new_v4(), participants)
            .await
            .unwrap();
        memory.faults.fail_nth(StoreOp::IndexDelete, 1);

        let err = store
            .remove_participant(&session.key(), handler)
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::IndexCleanupFailed { .. }));
        assert_eq!(err.orphans().len(), 1);
        assert_eq!(
            store
                .find_participant_role(&session.key(), handler)
                .await
                .unwrap(),
            None
        );

        let report = store.repair_orphans(err.orphans()).await.unwrap();
        assert_eq!(report.removed.len(), 1);
        assert_eq!(memory.index.len().await, 1);
    }

    #[tokio::test]
    async fn test_change_role_updates_both_tables() {
        let memory = InMemoryStore::new();
        let store = store_over(&memory);
        let (_, handler, participants) = two_participants();
        let session = store
            .create_chat_session(Uuid::new_v4(), Uuid::new_v4(), participants)
            .await
            .unwrap();

        let updated = store
            .change_participant_role(&session.key(), handler, ParticipantRole::Observer)
            .await
            .unwrap();

        assert_eq!(updated.role_of(&handler), Some(ParticipantRole::Observer));
        assert!(updated.modified_at >= session.modified_at);
        let rows = store.find_issues_for_user(handler).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].role, ParticipantRole::Observer);
    }

    #[tokio::test]
    async fn test_change_role_to_same_role_writes_nothing() {
        let memory = InMemoryStore::new();
        let store = store_over(&memory);
        let (_, handler, participants) = two_participants();
        let session = store
            .create_chat_session(Uuid::new_v4(), Uuid::new_v4(), participants)
            .await
            .unwrap();

        store
            .change_participant_role(&session.key(), handler, ParticipantRole::Handler)
            .await
            .unwrap();

        assert_eq!(memory.faults.calls(StoreOp::SessionPutParticipant), 0);
    }

    #[tokio::test]
    async fn test_delete_session_removes_index_rows() {
        let memory = InMemoryStore::new();
        let store = store_over(&memory);
        let (_, _, participants) = two_participants();
        let session = store
            .create_chat_session(Uuid::new_v4(), Uuid::new_v4(), participants)
            .await
            .unwrap();

        assert!(store.delete_chat_session(&session.key()).await.unwrap());
        assert!(memory.sessions.is_empty().await);
        assert!(memory.index.is_empty().await);

        assert!(!store.delete_chat_session(&session.key()).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_session_reports_orphans() {
        let memory = InMemoryStore::new();
        let store = store_over(&memory);
        let (_, _, participants) = two_participants();
        let session = store
            .create_chat_session(Uuid::new_v4(), Uuid::new_v4(), participants)
            .await
            .unwrap();
        memory.faults.fail_always(StoreOp::IndexDelete);

        let err = store.delete_chat_session(&session.key()).await.unwrap_err();

        assert!(matches!(err, ChatError::IndexCleanupFailed { .. }));
        assert_eq!(err.orphans().len(), 2);
        assert!(memory.sessions.is_empty().await);
    }

    #[tokio::test]
    async fn test_repair_sweep_fixes_stale_rows() {
        let memory = InMemoryStore::new();
        let store = store_over(&memory);
        let (_, handler, participants) = two_participants();
        let session = store
            .create_chat_session(Uuid::new_v4(), Uuid::new_v4(), participants)
            .await
            .unwrap();

        // stale role in the index
        memory
            .index
            .upsert(&session.index_row(handler, ParticipantRole::Viewer))
            .await
            .unwrap();
        // row pointing at a session that never existed
        let ghost = IssueParticipant {
            user_id: handler,
            issue_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            project_id: session.project_id,
            role: ParticipantRole::Handler,
        };
        memory.index.upsert(&ghost).await.unwrap();

        let report = store.repair_participant_index(handler).await.unwrap();

        assert_eq!(report.scanned, 2);
        assert_eq!(report.removed, vec![ghost.key()]);
        assert_eq!(report.updated.len(), 1);
        assert!(report.is_clean());

        let rows = store.find_issues_for_user(handler).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].role, ParticipantRole::Handler);
    }
}
