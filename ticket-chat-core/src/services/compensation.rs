//! Best-effort rollback for writes that span the session table and the
//! participant index.
//!
//! The store offers no multi-row transaction. A multi-row operation records
//! every index row it managed to write in an [`IndexJournal`]; if a later step
//! fails, [`IndexJournal::rollback`] deletes those rows again in the order they
//! were written. Deletes that fail are not retried: the rows are logged as
//! orphans and returned inside [`ChatError::CompensationFailed`] so an operator
//! or the repair sweep can remove them.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::db::DatabaseError;
use crate::error::ChatError;
use crate::models::{IssueParticipant, IssueParticipantKey};
use crate::repo::ParticipantIndexRepository;

pub struct CompensationCoordinator {
    index: Arc<dyn ParticipantIndexRepository>,
}

impl CompensationCoordinator {
    pub fn new(index: Arc<dyn ParticipantIndexRepository>) -> Self {
        Self { index }
    }

    /// Starts a journal for one multi-row operation.
    pub fn begin(&self, operation: &str) -> IndexJournal<'_> {
        IndexJournal {
            index: self.index.as_ref(),
            operation: operation.to_string(),
            written: Vec::new(),
        }
    }
}

/// Index rows written so far by one operation.
pub struct IndexJournal<'a> {
    index: &'a dyn ParticipantIndexRepository,
    operation: String,
    written: Vec<IssueParticipantKey>,
}

impl<'a> IndexJournal<'a> {
    /// Upserts `row`, remembering its key only if the write succeeded.
    pub async fn upsert(&mut self, row: &IssueParticipant) -> Result<(), DatabaseError> {
        self.index.upsert(row).await?;
        self.written.push(row.key());
        Ok(())
    }

    pub fn written(&self) -> &[IssueParticipantKey] {
        &self.written
    }

    /// Keeps every written row; nothing is undone.
    pub fn commit(self) -> Vec<IssueParticipantKey> {
        debug!(
            operation = %self.operation,
            rows = self.written.len(),
            "Participant index writes committed"
        );
        self.written
    }

    /// Deletes every journaled row and turns `cause` into the error to return.
    ///
    /// Yields [`ChatError::StoreWriteFailed`] when all deletes succeeded and
    /// [`ChatError::CompensationFailed`] listing the surviving rows otherwise.
    pub async fn rollback(self, cause: impl fmt::Display) -> ChatError {
        let cause = cause.to_string();
        warn!(
            operation = %self.operation,
            cause = %cause,
            rows = self.written.len(),
            "Write failed, rolling back participant index rows"
        );

        let mut orphans = Vec::new();
        for key in &self.written {
            match self.index.delete(key).await {
                Ok(_) => debug!(row = %key, "Compensating delete applied"),
                Err(e) => {
                    error!(
                        operation = %self.operation,
                        user_id = %key.user_id,
                        issue_id = %key.issue_id,
                        session_id = %key.session_id,
                        error = %e,
                        "Compensating delete failed, participant index row orphaned"
                    );
                    orphans.push(key.clone());
                }
            }
        }

        if orphans.is_empty() {
            ChatError::StoreWriteFailed {
                operation: self.operation,
                cause,
            }
        } else {
            error!(
                operation = %self.operation,
                orphans = orphans.len(),
                "Rollback incomplete, manual cleanup required"
            );
            ChatError::CompensationFailed {
                operation: self.operation,
                cause,
                orphans,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParticipantRole;
    use crate::repo::{InMemoryStore, StoreOp};
    use uuid::Uuid;

    fn row(session_id: Uuid) -> IssueParticipant {
        IssueParticipant {
            user_id: Uuid::new_v4(),
            issue_id: Uuid::new_v4(),
            session_id,
            project_id: Uuid::new_v4(),
            role: ParticipantRole::Observer,
        }
    }

    #[tokio::test]
    async fn test_rollback_removes_written_rows() {
        let store = InMemoryStore::new();
        let coordinator = CompensationCoordinator::new(store.index.clone());
        let session = Uuid::new_v4();

        let mut journal = coordinator.begin("test");
        journal.upsert(&row(session)).await.unwrap();
        journal.upsert(&row(session)).await.unwrap();
        assert_eq!(store.index.len().await, 2);

        let err = journal.rollback("boom").await;

        assert!(matches!(err, ChatError::StoreWriteFailed { ref cause, .. } if cause == "boom"));
        assert!(store.index.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_upsert_is_not_journaled() {
        let store = InMemoryStore::new();
        let coordinator = CompensationCoordinator::new(store.index.clone());
        store.faults.fail_nth(StoreOp::IndexUpsert, 2);

        let mut journal = coordinator.begin("test");
        journal.upsert(&row(Uuid::new_v4())).await.unwrap();
        assert!(journal.upsert(&row(Uuid::new_v4())).await.is_err());

        assert_eq!(journal.written().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_delete_is_reported_as_orphan() {
        let store = InMemoryStore::new();
        let coordinator = CompensationCoordinator::new(store.index.clone());
        let first = row(Uuid::new_v4());
        let second = row(Uuid::new_v4());

        let mut journal = coordinator.begin("test");
        journal.upsert(&first).await.unwrap();
        journal.upsert(&second).await.unwrap();

        store.faults.fail_nth(StoreOp::IndexDelete, 1);
        let err = journal.rollback("boom").await;

        match err {
            ChatError::CompensationFailed { orphans, .. } => {
                assert_eq!(orphans, vec![first.key()]);
            }
            other => panic!("expected CompensationFailed, got {other:?}"),
        }
        assert!(store.index.contains(&first.key()).await);
        assert!(!store.index.contains(&second.key()).await);
    }

    #[tokio::test]
    async fn test_commit_keeps_rows() {
        let store = InMemoryStore::new();
        let coordinator = CompensationCoordinator::new(store.index.clone());

        let mut journal = coordinator.begin("test");
        journal.upsert(&row(Uuid::new_v4())).await.unwrap();
        let kept = journal.commit();

        assert_eq!(kept.len(), 1);
        assert_eq!(store.index.len().await, 1);
    }
}
