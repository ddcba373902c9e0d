//! Conversation Store — durable conversations and messages
//!
//! Owns the `conversations` and `messages` tables. All access goes through
//! the shared [`sqlx::PgPool`]; connections are checked out per operation and
//! released on every exit path by sqlx itself.

use crate::models::{Conversation, ConversationStats, Message, Role};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unknown conversation: {0}")]
    UnknownConversation(Uuid),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

/// Pool-level failures mean the database cannot be reached right now;
/// everything else is a plain database error.
fn map_db_error(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(e.to_string())
        }
        _ => StoreError::Database(e),
    }
}

#[derive(Debug, Clone)]
pub struct ConversationStore {
    pool: PgPool,
}

impl ConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Atomic get-or-create keyed on `session_id`. Two racing calls for the
    /// same session resolve to the same row; the insert and the conflict
    /// branch are one statement, so there is no find-then-insert window.
    /// An existing conversation keeps its stored metadata.
    pub async fn ensure_conversation(
        &self,
        session_id: &str,
        metadata: serde_json::Value,
    ) -> Result<Conversation, StoreError> {
        let conversation = sqlx::query_as::<_, Conversation>(
            r#"
            INSERT INTO conversations (session_id, metadata)
            VALUES ($1, $2)
            ON CONFLICT (session_id) DO UPDATE SET updated_at = now()
            RETURNING id, session_id, created_at, updated_at, metadata
            "#,
        )
        .bind(session_id)
        .bind(metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)?;

        tracing::debug!(
            conversation_id = %conversation.id,
            session_id = %conversation.session_id,
            "conversation resolved"
        );
        Ok(conversation)
    }

    /// Read-only lookup; never creates.
    pub async fn find_conversation(
        &self,
        session_id: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        sqlx::query_as::<_, Conversation>(
            r#"
            SELECT id, session_id, created_at, updated_at, metadata
            FROM conversations
            WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)
    }

    /// Append one message and refresh the conversation's `updated_at`, as a
    /// single transaction. A rollback on any failure means no partial write.
    pub async fn append_message(
        &self,
        conversation_id: Uuid,
        role: Role,
        content: &str,
        attachment: Option<&[u8]>,
    ) -> Result<Message, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;

        let message = sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages (conversation_id, role, content, attachment)
            VALUES ($1, $2, $3, $4)
            RETURNING id, conversation_id, role, content, created_at, attachment
            "#,
        )
        .bind(conversation_id)
        .bind(role.as_str())
        .bind(content)
        .bind(attachment)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_foreign_key_violation() {
                    return StoreError::UnknownConversation(conversation_id);
                }
            }
            map_db_error(e)
        })?;

        sqlx::query("UPDATE conversations SET updated_at = now() WHERE id = $1")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;

        tx.commit().await.map_err(map_db_error)?;

        tracing::debug!(
            message_id = message.id,
            conversation_id = %conversation_id,
            role = %role,
            "message appended"
        );
        Ok(message)
    }

    /// Messages oldest-first. With `limit`, the most recent `limit` messages,
    /// still oldest-first in the returned vector. Ordering is creation time
    /// with the serial primary key as tie-breaker, i.e. insertion order.
    pub async fn load_history(
        &self,
        conversation_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<Message>, StoreError> {
        match limit {
            Some(n) => {
                let mut messages = sqlx::query_as::<_, Message>(
                    r#"
                    SELECT id, conversation_id, role, content, created_at, attachment
                    FROM messages
                    WHERE conversation_id = $1
                    ORDER BY created_at DESC, id DESC
                    LIMIT $2
                    "#,
                )
                .bind(conversation_id)
                .bind(n)
                .fetch_all(&self.pool)
                .await
                .map_err(map_db_error)?;
                messages.reverse();
                Ok(messages)
            }
            None => sqlx::query_as::<_, Message>(
                r#"
                SELECT id, conversation_id, role, content, created_at, attachment
                FROM messages
                WHERE conversation_id = $1
                ORDER BY created_at ASC, id ASC
                "#,
            )
            .bind(conversation_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_error),
        }
    }

    pub async fn conversation_stats(
        &self,
        conversation_id: Uuid,
    ) -> Result<ConversationStats, StoreError> {
        sqlx::query_as::<_, ConversationStats>(
            r#"
            SELECT count(*)                                        AS total_messages,
                   count(*) FILTER (WHERE role = 'user')           AS user_messages,
                   count(*) FILTER (WHERE role = 'assistant')      AS assistant_messages
            FROM messages
            WHERE conversation_id = $1
            "#,
        )
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)
    }

    /// Replace the metadata map. Returns false when the conversation does
    /// not exist.
    pub async fn update_metadata(
        &self,
        conversation_id: Uuid,
        metadata: serde_json::Value,
    ) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE conversations SET metadata = $2, updated_at = now() WHERE id = $1")
                .bind(conversation_id)
                .bind(metadata)
                .execute(&self.pool)
                .await
                .map_err(map_db_error)?;
        Ok(result.rows_affected() > 0)
    }
}
