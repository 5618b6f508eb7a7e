//! In-memory repositories with injectable faults.
//!
//! These back the service and pipeline tests. A shared
//! [`FaultInjector`] makes any store call fail on demand, which is how the
//! rollback paths of session creation are exercised without a real outage.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::{
    ChatMessage, ChatSession, IssueParticipant, IssueParticipantKey, ParticipantRole, SessionKey,
};

use super::{MessageRepository, ParticipantIndexRepository, SessionRepository};

/// Store calls that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    SessionInsert,
    SessionFind,
    SessionFindByIssue,
    SessionPutParticipant,
    SessionRemoveParticipant,
    SessionDelete,
    IndexUpsert,
    IndexDelete,
    IndexFind,
    IndexFindByUser,
    MessageInsert,
    MessageFind,
    MessageFindBySession,
    MessageUpdateContent,
    MessageUpdateUrl,
    MessageDelete,
}

#[derive(Debug, Clone, Copy)]
enum FaultRule {
    /// Only the nth call fails (1-based).
    Nth(u32),
    /// The nth call and every later one fail.
    From(u32),
}

#[derive(Debug, Default)]
struct FaultState {
    calls: HashMap<StoreOp, u32>,
    rules: HashMap<StoreOp, FaultRule>,
}

/// Counts store calls per operation and fails the ones a test asks for.
#[derive(Debug, Default)]
pub struct FaultInjector {
    state: Mutex<FaultState>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail only the `n`th call (1-based, counted from now on) of `op`.
    pub fn fail_nth(&self, op: StoreOp, n: u32) {
        let mut state = self.lock();
        let already = state.calls.get(&op).copied().unwrap_or(0);
        state.rules.insert(op, FaultRule::Nth(already + n));
    }

    /// Fail the `n`th call (counted from now on) of `op` and every call after it.
    pub fn fail_from(&self, op: StoreOp, n: u32) {
        let mut state = self.lock();
        let already = state.calls.get(&op).copied().unwrap_or(0);
        state.rules.insert(op, FaultRule::From(already + n));
    }

    pub fn fail_always(&self, op: StoreOp) {
        self.fail_from(op, 1);
    }

    /// Remove every rule; call counters are kept.
    pub fn clear(&self) {
        self.lock().rules.clear();
    }

    /// Number of calls made to `op` so far, failed ones included.
    pub fn calls(&self, op: StoreOp) -> u32 {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    fn check(&self, op: StoreOp) -> Result<(), DatabaseError> {
        let mut state = self.lock();
        let call = {
            let counter = state.calls.entry(op).or_insert(0);
            *counter += 1;
            *counter
        };

        let failing = match state.rules.get(&op) {
            Some(FaultRule::Nth(n)) => call == *n,
            Some(FaultRule::From(n)) => call >= *n,
            None => false,
        };

        if failing {
            Err(DatabaseError::Unavailable(format!(
                "injected fault on {:?} call #{}",
                op, call
            )))
        } else {
            Ok(())
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FaultState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct InMemorySessionRepository {
    rows: RwLock<BTreeMap<SessionKey, ChatSession>>,
    faults: Arc<FaultInjector>,
}

impl InMemorySessionRepository {
    pub fn new(faults: Arc<FaultInjector>) -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            faults,
        }
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn insert(&self, session: &ChatSession) -> Result<(), DatabaseError> {
        self.faults.check(StoreOp::SessionInsert)?;
        self.rows
            .write()
            .await
            .insert(session.key(), session.clone());
        Ok(())
    }

    async fn find(&self, key: &SessionKey) -> Result<Option<ChatSession>, DatabaseError> {
        self.faults.check(StoreOp::SessionFind)?;
        Ok(self.rows.read().await.get(key).cloned())
    }

    async fn find_by_issue(
        &self,
        project_id: Uuid,
        issue_id: Uuid,
    ) -> Result<Vec<ChatSession>, DatabaseError> {
        self.faults.check(StoreOp::SessionFindByIssue)?;
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|s| s.project_id == project_id && s.issue_id == issue_id)
            .cloned()
            .collect())
    }

    async fn put_participant(
        &self,
        key: &SessionKey,
        user_id: Uuid,
        role: ParticipantRole,
        modified_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        self.faults.check(StoreOp::SessionPutParticipant)?;
        let mut rows = self.rows.write().await;
        match rows.get_mut(key) {
            Some(session) => {
                session.participants.insert(user_id, role);
                session.modified_at = modified_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_participant(
        &self,
        key: &SessionKey,
        user_id: Uuid,
        modified_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        self.faults.check(StoreOp::SessionRemoveParticipant)?;
        let mut rows = self.rows.write().await;
        match rows.get_mut(key) {
            Some(session) => {
                session.participants.remove(&user_id);
                session.modified_at = modified_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &SessionKey) -> Result<bool, DatabaseError> {
        self.faults.check(StoreOp::SessionDelete)?;
        Ok(self.rows.write().await.remove(key).is_some())
    }
}

pub struct InMemoryParticipantIndex {
    rows: RwLock<BTreeMap<IssueParticipantKey, IssueParticipant>>,
    faults: Arc<FaultInjector>,
}

impl InMemoryParticipantIndex {
    pub fn new(faults: Arc<FaultInjector>) -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            faults,
        }
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    pub async fn contains(&self, key: &IssueParticipantKey) -> bool {
        self.rows.read().await.contains_key(key)
    }
}

#[async_trait]
impl ParticipantIndexRepository for InMemoryParticipantIndex {
    async fn upsert(&self, row: &IssueParticipant) -> Result<(), DatabaseError> {
        self.faults.check(StoreOp::IndexUpsert)?;
        self.rows.write().await.insert(row.key(), row.clone());
        Ok(())
    }

    async fn delete(&self, key: &IssueParticipantKey) -> Result<bool, DatabaseError> {
        self.faults.check(StoreOp::IndexDelete)?;
        Ok(self.rows.write().await.remove(key).is_some())
    }

    async fn find(
        &self,
        key: &IssueParticipantKey,
    ) -> Result<Option<IssueParticipant>, DatabaseError> {
        self.faults.check(StoreOp::IndexFind)?;
        Ok(self.rows.read().await.get(key).cloned())
    }

    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<IssueParticipant>, DatabaseError> {
        self.faults.check(StoreOp::IndexFindByUser)?;
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect())
    }
}

pub struct InMemoryMessageRepository {
    rows: RwLock<BTreeMap<(Uuid, Uuid), ChatMessage>>,
    faults: Arc<FaultInjector>,
}

impl InMemoryMessageRepository {
    pub fn new(faults: Arc<FaultInjector>) -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            faults,
        }
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn insert(&self, message: &ChatMessage) -> Result<(), DatabaseError> {
        self.faults.check(StoreOp::MessageInsert)?;
        self.rows
            .write()
            .await
            .insert((message.session_id, message.message_id), message.clone());
        Ok(())
    }

    async fn find(
        &self,
        session_id: Uuid,
        message_id: Uuid,
    ) -> Result<Option<ChatMessage>, DatabaseError> {
        self.faults.check(StoreOp::MessageFind)?;
        Ok(self
            .rows
            .read()
            .await
            .get(&(session_id, message_id))
            .cloned())
    }

    async fn find_by_session(&self, session_id: Uuid) -> Result<Vec<ChatMessage>, DatabaseError> {
        self.faults.check(StoreOp::MessageFindBySession)?;
        // BTreeMap order is (session_id, message_id), so the range is ascending.
        Ok(self
            .rows
            .read()
            .await
            .range((session_id, Uuid::nil())..=(session_id, Uuid::max()))
            .map(|(_, message)| message.clone())
            .collect())
    }

    async fn update_content(
        &self,
        session_id: Uuid,
        message_id: Uuid,
        content: &str,
    ) -> Result<bool, DatabaseError> {
        self.faults.check(StoreOp::MessageUpdateContent)?;
        let mut rows = self.rows.write().await;
        match rows.get_mut(&(session_id, message_id)) {
            Some(message) => {
                message.content = Some(content.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_url(
        &self,
        session_id: Uuid,
        message_id: Uuid,
        url: &str,
    ) -> Result<bool, DatabaseError> {
        self.faults.check(StoreOp::MessageUpdateUrl)?;
        let mut rows = self.rows.write().await;
        match rows.get_mut(&(session_id, message_id)) {
            Some(message) => {
                message.url = Some(url.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, session_id: Uuid, message_id: Uuid) -> Result<bool, DatabaseError> {
        self.faults.check(StoreOp::MessageDelete)?;
        Ok(self
            .rows
            .write()
            .await
            .remove(&(session_id, message_id))
            .is_some())
    }
}

/// All three in-memory tables sharing one fault injector.
#[derive(Clone)]
pub struct InMemoryStore {
    pub sessions: Arc<InMemorySessionRepository>,
    pub index: Arc<InMemoryParticipantIndex>,
    pub messages: Arc<InMemoryMessageRepository>,
    pub faults: Arc<FaultInjector>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        let faults = Arc::new(FaultInjector::new());
        Self {
            sessions: Arc::new(InMemorySessionRepository::new(faults.clone())),
            index: Arc::new(InMemoryParticipantIndex::new(faults.clone())),
            messages: Arc::new(InMemoryMessageRepository::new(faults.clone())),
            faults,
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}
