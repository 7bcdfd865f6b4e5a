/// Conversation log persistence
///
/// The log is observability, not state: the orchestrator calls `log` after
/// every handled turn and swallows any error it returns, because
/// conversational continuity must never depend on optional logging
/// succeeding.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use crate::tasks::unix_now;

/// A turn to append to the log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewConversation {
    pub session_id: String,
    /// Transport-level identifier (phone number, chat id), when one exists
    pub channel_identifier: Option<String>,
    pub user_message: String,
    pub handler_response: String,
    pub intent: Option<String>,
    pub confidence: f64,
}

/// A logged turn read back from the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: i64,
    pub session_id: String,
    pub channel_identifier: Option<String>,
    pub user_message: String,
    pub handler_response: String,
    pub intent: Option<String>,
    pub confidence: f64,
    pub created_at: i64,
}

/// Conversation log repository
pub struct ConversationLog {
    pool: SqlitePool,
}

impl ConversationLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append one turn to the log
    pub async fn log(&self, entry: &NewConversation) -> Result<()> {
        let now = unix_now();

        sqlx::query(
            "INSERT INTO conversations \
             (session_id, channel_identifier, user_message, handler_response, intent, confidence, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.session_id)
        .bind(&entry.channel_identifier)
        .bind(&entry.user_message)
        .bind(&entry.handler_response)
        .bind(&entry.intent)
        .bind(entry.confidence)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to log conversation")?;

        Ok(())
    }

    /// Read the most recent turns of a session, newest first
    pub async fn recent(&self, session_id: &str, limit: i64) -> Result<Vec<ConversationRecord>> {
        let rows = sqlx::query(
            "SELECT id, session_id, channel_identifier, user_message, handler_response, intent, confidence, created_at \
             FROM conversations WHERE session_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch conversations")?;

        Ok(rows
            .into_iter()
            .map(|r| ConversationRecord {
                id: r.get("id"),
                session_id: r.get("session_id"),
                channel_identifier: r.get("channel_identifier"),
                user_message: r.get("user_message"),
                handler_response: r.get("handler_response"),
                intent: r.get("intent"),
                confidence: r.get("confidence"),
                created_at: r.get("created_at"),
            })
            .collect())
    }
}
