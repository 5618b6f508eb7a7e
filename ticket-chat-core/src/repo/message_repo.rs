use crate::db::DatabaseError;
use crate::models::{ChatMessage, ContentType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::MessageRepository;

#[derive(Debug, FromRow)]
struct ChatMessageRow {
    session_id: Uuid,
    message_id: Uuid,
    sender_id: Uuid,
    content_type: String,
    content: Option<String>,
    url: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ChatMessageRow> for ChatMessage {
    type Error = DatabaseError;

    fn try_from(row: ChatMessageRow) -> Result<Self, Self::Error> {
        let content_type: ContentType = row.content_type.parse().map_err(|_| {
            DatabaseError::Mapping(format!(
                "chat_messages row {} has unknown content type '{}'",
                row.message_id, row.content_type
            ))
        })?;

        Ok(Self {
            session_id: row.session_id,
            message_id: row.message_id,
            sender_id: row.sender_id,
            content_type,
            content: row.content,
            url: row.url,
            created_at: row.created_at,
        })
    }
}

pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn insert(&self, message: &ChatMessage) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO chat_messages (session_id, message_id, sender_id, content_type, content, url, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(message.session_id)
        .bind(message.message_id)
        .bind(message.sender_id)
        .bind(message.content_type.as_str())
        .bind(&message.content)
        .bind(&message.url)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(
        &self,
        session_id: Uuid,
        message_id: Uuid,
    ) -> Result<Option<ChatMessage>, DatabaseError> {
        let record = sqlx::query_as::<_, ChatMessageRow>(
            r#"
            SELECT session_id, message_id, sender_id, content_type, content, url, created_at
            FROM chat_messages
            WHERE session_id = $1 AND message_id = $2
            "#,
        )
        .bind(session_id)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        record.map(ChatMessage::try_from).transpose()
    }

    async fn find_by_session(&self, session_id: Uuid) -> Result<Vec<ChatMessage>, DatabaseError> {
        let records = sqlx::query_as::<_, ChatMessageRow>(
            r#"
            SELECT session_id, message_id, sender_id, content_type, content, url, created_at
            FROM chat_messages
            WHERE session_id = $1
            ORDER BY message_id ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        records.into_iter().map(ChatMessage::try_from).collect()
    }

    async fn update_content(
        &self,
        session_id: Uuid,
        message_id: Uuid,
        content: &str,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE chat_messages SET content = $3 WHERE session_id = $1 AND message_id = $2",
        )
        .bind(session_id)
        .bind(message_id)
        .bind(content)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_url(
        &self,
        session_id: Uuid,
        message_id: Uuid,
        url: &str,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE chat_messages SET url = $3 WHERE session_id = $1 AND message_id = $2",
        )
        .bind(session_id)
        .bind(message_id)
        .bind(url)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, session_id: Uuid, message_id: Uuid) -> Result<bool, DatabaseError> {
        let result =
            sqlx::query("DELETE FROM chat_messages WHERE session_id = $1 AND message_id = $2")
                .bind(session_id)
                .bind(message_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_maps_file_message() {
        let row = ChatMessageRow {
            session_id: Uuid::new_v4(),
            message_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            content_type: "FILE".to_string(),
            content: None,
            url: Some("s3://bucket/scan.png".to_string()),
            created_at: Utc::now(),
        };

        let message = ChatMessage::try_from(row).unwrap();
        assert!(message.is_file());
        assert_eq!(message.url.as_deref(), Some("s3://bucket/scan.png"));
    }

    #[test]
    fn test_row_with_unknown_content_type_is_a_mapping_error() {
        let row = ChatMessageRow {
            session_id: Uuid::new_v4(),
            message_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            content_type: "VIDEO".to_string(),
            content: None,
            url: None,
            created_at: Utc::now(),
        };

        assert!(matches!(
            ChatMessage::try_from(row),
            Err(DatabaseError::Mapping(_))
        ));
    }
}
