use crate::db::DatabaseError;
use crate::models::{IssueParticipant, IssueParticipantKey, ParticipantRole};
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::ParticipantIndexRepository;

#[derive(Debug, FromRow)]
struct IssueParticipantRow {
    user_id: Uuid,
    issue_id: Uuid,
    session_id: Uuid,
    project_id: Uuid,
    role: String,
}

impl TryFrom<IssueParticipantRow> for IssueParticipant {
    type Error = DatabaseError;

    fn try_from(row: IssueParticipantRow) -> Result<Self, Self::Error> {
        let role: ParticipantRole = row.role.parse().map_err(|_| {
            DatabaseError::Mapping(format!(
                "issue_participants row for user {} has unknown role '{}'",
                row.user_id, row.role
            ))
        })?;

        Ok(Self {
            user_id: row.user_id,
            issue_id: row.issue_id,
            session_id: row.session_id,
            project_id: row.project_id,
            role,
        })
    }
}

pub struct PgParticipantIndexRepository {
    pool: PgPool,
}

impl PgParticipantIndexRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ParticipantIndexRepository for PgParticipantIndexRepository {
    async fn upsert(&self, row: &IssueParticipant) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO issue_participants (user_id, issue_id, session_id, project_id, role)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, issue_id, session_id) DO UPDATE
            SET project_id = EXCLUDED.project_id,
                role = EXCLUDED.role
            "#,
        )
        .bind(row.user_id)
        .bind(row.issue_id)
        .bind(row.session_id)
        .bind(row.project_id)
        .bind(row.role.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &IssueParticipantKey) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "DELETE FROM issue_participants WHERE user_id = $1 AND issue_id = $2 AND session_id = $3",
        )
        .bind(key.user_id)
        .bind(key.issue_id)
        .bind(key.session_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find(
        &self,
        key: &IssueParticipantKey,
    ) -> Result<Option<IssueParticipant>, DatabaseError> {
        let record = sqlx::query_as::<_, IssueParticipantRow>(
            r#"
            SELECT user_id, issue_id, session_id, project_id, role
            FROM issue_participants
            WHERE user_id = $1 AND issue_id = $2 AND session_id = $3
            "#,
        )
        .bind(key.user_id)
        .bind(key.issue_id)
        .bind(key.session_id)
        .fetch_optional(&self.pool)
        .await?;

        record.map(IssueParticipant::try_from).transpose()
    }

    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<IssueParticipant>, DatabaseError> {
        let records = sqlx::query_as::<_, IssueParticipantRow>(
            r#"
            SELECT user_id, issue_id, session_id, project_id, role
            FROM issue_participants
            WHERE user_id = $1
            ORDER BY issue_id, session_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        records.into_iter().map(IssueParticipant::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(role: &str) -> IssueParticipantRow {
        IssueParticipantRow {
            user_id: Uuid::new_v4(),
            issue_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            role: role.to_string(),
        }
    }

    #[test]
    fn test_row_maps_role() {
        let participant = IssueParticipant::try_from(row("HANDLER")).unwrap();
        assert_eq!(participant.role, ParticipantRole::Handler);
    }

    #[test]
    fn test_row_with_unknown_role_is_a_mapping_error() {
        let err = IssueParticipant::try_from(row("JANITOR")).unwrap_err();
        assert!(matches!(err, DatabaseError::Mapping(_)));
    }
}
