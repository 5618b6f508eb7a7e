use crate::db::DatabaseError;
use crate::models::{ChatSession, ParticipantMap, ParticipantRole, SessionKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::SessionRepository;

#[derive(Debug, FromRow)]
struct ChatSessionRow {
    project_id: Uuid,
    issue_id: Uuid,
    session_id: Uuid,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
    participants: Json<ParticipantMap>,
}

impl From<ChatSessionRow> for ChatSession {
    fn from(row: ChatSessionRow) -> Self {
        Self {
            project_id: row.project_id,
            issue_id: row.issue_id,
            session_id: row.session_id,
            participants: row.participants.0,
            created_at: row.created_at,
            modified_at: row.modified_at,
        }
    }
}

pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn insert(&self, session: &ChatSession) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO chat_sessions (project_id, issue_id, session_id, created_at, modified_at, participants)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (project_id, issue_id, session_id) DO UPDATE
            SET created_at = EXCLUDED.created_at,
                modified_at = EXCLUDED.modified_at,
                participants = EXCLUDED.participants
            "#,
        )
        .bind(session.project_id)
        .bind(session.issue_id)
        .bind(session.session_id)
        .bind(session.created_at)
        .bind(session.modified_at)
        .bind(Json(&session.participants))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, key: &SessionKey) -> Result<Option<ChatSession>, DatabaseError> {
        let record = sqlx::query_as::<_, ChatSessionRow>(
            r#"
            SELECT project_id, issue_id, session_id, created_at, modified_at, participants
            FROM chat_sessions
            WHERE project_id = $1 AND issue_id = $2 AND session_id = $3
            "#,
        )
        .bind(key.project_id)
        .bind(key.issue_id)
        .bind(key.session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(ChatSession::from))
    }

    async fn find_by_issue(
        &self,
        project_id: Uuid,
        issue_id: Uuid,
    ) -> Result<Vec<ChatSession>, DatabaseError> {
        let records = sqlx::query_as::<_, ChatSessionRow>(
            r#"
            SELECT project_id, issue_id, session_id, created_at, modified_at, participants
            FROM chat_sessions
            WHERE project_id = $1 AND issue_id = $2
            ORDER BY session_id
            "#,
        )
        .bind(project_id)
        .bind(issue_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records.into_iter().map(ChatSession::from).collect())
    }

    async fn put_participant(
        &self,
        key: &SessionKey,
        user_id: Uuid,
        role: ParticipantRole,
        modified_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE chat_sessions
            SET participants = participants || jsonb_build_object($4::text, $5::text),
                modified_at = $6
            WHERE project_id = $1 AND issue_id = $2 AND session_id = $3
            "#,
        )
        .bind(key.project_id)
        .bind(key.issue_id)
        .bind(key.session_id)
        .bind(user_id.to_string())
        .bind(role.as_str())
        .bind(modified_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_participant(
        &self,
        key: &SessionKey,
        user_id: Uuid,
        modified_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE chat_sessions
            SET participants = participants - $4::text,
                modified_at = $5
            WHERE project_id = $1 AND issue_id = $2 AND session_id = $3
            "#,
        )
        .bind(key.project_id)
        .bind(key.issue_id)
        .bind(key.session_id)
        .bind(user_id.to_string())
        .bind(modified_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, key: &SessionKey) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "DELETE FROM chat_sessions WHERE project_id = $1 AND issue_id = $2 AND session_id = $3",
        )
        .bind(key.project_id)
        .bind(key.issue_id)
        .bind(key.session_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_maps_to_session() {
        let user = Uuid::new_v4();
        let now = Utc::now();
        let row = ChatSessionRow {
            project_id: Uuid::new_v4(),
            issue_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            created_at: now,
            modified_at: now,
            participants: Json([(user, ParticipantRole::Initiator)].into_iter().collect()),
        };
        let key = SessionKey::new(row.project_id, row.issue_id, row.session_id);

        let session = ChatSession::from(row);

        assert_eq!(session.key(), key);
        assert_eq!(session.role_of(&user), Some(ParticipantRole::Initiator));
    }
}
