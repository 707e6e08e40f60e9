use chrono::Utc;
use sqlx::Row;
use tracing::debug;

use skillflow_core::domain::conversation::ConversationContext;

use super::{ContextStore, RepositoryError};
use crate::DbPool;

/// Stores each context as one JSON document per session.
pub struct SqlContextStore {
    pool: DbPool,
}

impl SqlContextStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn list_sessions(&self, limit: u32) -> Result<Vec<String>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT session_id FROM conversation_context ORDER BY updated_at DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("session_id")
                    .map_err(|e| RepositoryError::Decode(e.to_string()))
            })
            .collect()
    }
}

fn row_to_context(row: &sqlx::sqlite::SqliteRow) -> Result<ConversationContext, RepositoryError> {
    let raw: String =
        row.try_get("context_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    serde_json::from_str(&raw).map_err(|e| RepositoryError::Decode(e.to_string()))
}

#[async_trait::async_trait]
impl ContextStore for SqlContextStore {
    async fn find(&self, session_id: &str) -> Result<Option<ConversationContext>, RepositoryError> {
        let row = sqlx::query("SELECT context_json FROM conversation_context WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_context(r)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, context: &ConversationContext) -> Result<(), RepositoryError> {
        let encoded =
            serde_json::to_string(context).map_err(|e| RepositoryError::Encode(e.to_string()))?;

        sqlx::query(
            "INSERT INTO conversation_context (session_id, skill_name, context_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(session_id) DO UPDATE SET
                 skill_name = excluded.skill_name,
                 context_json = excluded.context_json,
                 updated_at = excluded.updated_at",
        )
        .bind(&context.session_id)
        .bind(&context.skill.name)
        .bind(&encoded)
        .bind(context.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(
            event_name = "store.context.saved",
            session_id = %context.session_id,
            skill = %context.skill.name,
            "conversation context saved"
        );
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM conversation_context WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        debug!(
            event_name = "store.context.deleted",
            session_id,
            rows_affected = result.rows_affected(),
            "conversation context deleted"
        );
        Ok(result.rows_affected() > 0)
    }
}
