// ABOUTME: SQLite implementation of the chat persistence gateway
// ABOUTME: Stores conversations, messages with usage metadata, and append-only summaries
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use super::ChatRepository;
use crate::errors::{AppError, AppResult};
use crate::models::{
    AssistantMetadata, ConversationRecord, MessageRecord, MessageRole, NewConversation,
    ResponseFormat, SummaryRecord,
};

const MESSAGE_COLUMNS: &str = "id, conversation_id, role, content, model, temperature, provider, \
     prompt_tokens, completion_tokens, total_tokens, total_cost, latency_ms, generation_time_ms, \
     created_at";

const SUMMARY_COLUMNS: &str = "id, conversation_id, text, cutoff_message_id, usage_count, created_at";

/// Chat database operations manager
#[derive(Clone)]
pub struct ChatManager {
    pool: SqlitePool,
}

impl ChatManager {
    /// Wrap an existing pool
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url`, creating the file if needed, and run migrations
    ///
    /// In-memory databases get a single connection so every query sees the
    /// same schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid, the connection fails, or
    /// migrations fail
    pub async fn connect(database_url: &str) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AppError::config(format!("Invalid DATABASE_URL: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true);

        let in_memory = database_url.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .connect_with(options)
            .await
            .map_err(|e| AppError::database(format!("Failed to connect to database: {e}")))?;

        let manager = Self::new(pool);
        manager.migrate().await?;
        info!(in_memory, "Chat database ready");
        Ok(manager)
    }

    /// Get a reference to the pool
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist
    ///
    /// # Errors
    ///
    /// Returns an error if a DDL statement fails
    pub async fn migrate(&self) -> AppResult<()> {
        let statements = [
            r"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                title TEXT NOT NULL,
                format TEXT NOT NULL DEFAULT 'text',
                schema TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
                content TEXT NOT NULL,
                model TEXT,
                temperature REAL,
                provider TEXT,
                prompt_tokens INTEGER,
                completion_tokens INTEGER,
                total_tokens INTEGER,
                total_cost REAL,
                latency_ms INTEGER,
                generation_time_ms INTEGER,
                created_at TEXT NOT NULL
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS summaries (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                text TEXT NOT NULL,
                cutoff_message_id TEXT,
                usage_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )
            ",
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id)",
            "CREATE INDEX IF NOT EXISTS idx_summaries_conversation ON summaries(conversation_id)",
            "CREATE INDEX IF NOT EXISTS idx_conversations_owner ON conversations(owner_id)",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::database(format!("Migration failed: {e}")))?;
        }
        Ok(())
    }

    async fn touch_conversation(&self, conversation_id: &str, now: DateTime<Utc>) -> AppResult<()> {
        sqlx::query("UPDATE conversations SET updated_at = $1 WHERE id = $2")
            .bind(now)
            .bind(conversation_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to update conversation: {e}")))?;
        Ok(())
    }

    async fn insert_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        metadata: &AssistantMetadata,
    ) -> AppResult<MessageRecord> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r"
            INSERT INTO messages (id, conversation_id, role, content, model, temperature, provider,
                                  prompt_tokens, completion_tokens, total_tokens, total_cost,
                                  latency_ms, generation_time_ms, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ",
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(role.as_str())
        .bind(content)
        .bind(metadata.model.as_deref())
        .bind(metadata.temperature)
        .bind(metadata.provider.as_deref())
        .bind(metadata.prompt_tokens)
        .bind(metadata.completion_tokens)
        .bind(metadata.total_tokens)
        .bind(metadata.total_cost)
        .bind(metadata.latency_ms)
        .bind(metadata.generation_time_ms)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to add message: {e}")))?;

        self.touch_conversation(conversation_id, now).await?;
        debug!(conversation_id, message_id = %id, role = role.as_str(), "Message stored");

        Ok(MessageRecord {
            id,
            conversation_id: conversation_id.to_owned(),
            role,
            content: content.to_owned(),
            metadata: metadata.clone(),
            created_at: now,
        })
    }
}

fn conversation_from_row(row: &SqliteRow) -> AppResult<ConversationRecord> {
    let format: String = row.get("format");
    Ok(ConversationRecord {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        title: row.get("title"),
        format: ResponseFormat::from_str(&format)?,
        schema: row.get("schema"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn message_from_row(row: &SqliteRow) -> AppResult<MessageRecord> {
    let role: String = row.get("role");
    Ok(MessageRecord {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        role: MessageRole::from_str(&role)?,
        content: row.get("content"),
        metadata: AssistantMetadata {
            model: row.get("model"),
            temperature: row.get("temperature"),
            provider: row.get("provider"),
            prompt_tokens: row.get("prompt_tokens"),
            completion_tokens: row.get("completion_tokens"),
            total_tokens: row.get("total_tokens"),
            total_cost: row.get("total_cost"),
            latency_ms: row.get("latency_ms"),
            generation_time_ms: row.get("generation_time_ms"),
        },
        created_at: row.get("created_at"),
    })
}

fn summary_from_row(row: &SqliteRow) -> SummaryRecord {
    SummaryRecord {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        text: row.get("text"),
        cutoff_message_id: row.get("cutoff_message_id"),
        usage_count: row.get("usage_count"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl ChatRepository for ChatManager {
    async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> AppResult<Option<ConversationRecord>> {
        let row = sqlx::query(
            r"
            SELECT id, owner_id, title, format, schema, created_at, updated_at
            FROM conversations
            WHERE id = $1
            ",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get conversation: {e}")))?;

        row.as_ref().map(conversation_from_row).transpose()
    }

    async fn create_conversation(
        &self,
        conversation: NewConversation<'_>,
    ) -> AppResult<ConversationRecord> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r"
            INSERT INTO conversations (id, owner_id, title, format, schema, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            ",
        )
        .bind(&id)
        .bind(conversation.owner_id)
        .bind(conversation.title)
        .bind(conversation.format.as_str())
        .bind(conversation.schema)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create conversation: {e}")))?;

        info!(conversation_id = %id, format = %conversation.format, "Conversation created");

        Ok(ConversationRecord {
            id,
            owner_id: conversation.owner_id.to_owned(),
            title: conversation.title.to_owned(),
            format: conversation.format,
            schema: conversation.schema.map(ToOwned::to_owned),
            created_at: now,
            updated_at: now,
        })
    }

    async fn add_user_message(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> AppResult<MessageRecord> {
        self.insert_message(
            conversation_id,
            MessageRole::User,
            content,
            &AssistantMetadata::default(),
        )
        .await
    }

    async fn add_assistant_message(
        &self,
        conversation_id: &str,
        content: &str,
        metadata: &AssistantMetadata,
    ) -> AppResult<MessageRecord> {
        self.insert_message(conversation_id, MessageRole::Assistant, content, metadata)
            .await
    }

    async fn get_messages(&self, conversation_id: &str) -> AppResult<Vec<MessageRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = $1 ORDER BY rowid ASC"
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get messages: {e}")))?;

        rows.iter().map(message_from_row).collect()
    }

    async fn get_messages_after(
        &self,
        conversation_id: &str,
        cutoff_message_id: &str,
    ) -> AppResult<Vec<MessageRecord>> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {MESSAGE_COLUMNS} FROM messages
            WHERE conversation_id = $1
              AND rowid > (SELECT rowid FROM messages WHERE id = $2 AND conversation_id = $1)
            ORDER BY rowid ASC
            "
        ))
        .bind(conversation_id)
        .bind(cutoff_message_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get messages after cutoff: {e}")))?;

        rows.iter().map(message_from_row).collect()
    }

    async fn get_last_message_id(&self, conversation_id: &str) -> AppResult<Option<String>> {
        let row = sqlx::query(
            "SELECT id FROM messages WHERE conversation_id = $1 ORDER BY rowid DESC LIMIT 1",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get last message: {e}")))?;

        Ok(row.map(|r| r.get("id")))
    }

    async fn get_latest_summary(&self, conversation_id: &str) -> AppResult<Option<SummaryRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM summaries WHERE conversation_id = $1 \
             ORDER BY rowid DESC LIMIT 1"
        ))
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get summary: {e}")))?;

        Ok(row.as_ref().map(summary_from_row))
    }

    async fn create_summary(
        &self,
        conversation_id: &str,
        text: &str,
        cutoff_message_id: Option<&str>,
    ) -> AppResult<SummaryRecord> {
        let id = Uuid::new_v4().to_string();

        // Newer summaries must sort strictly after older ones by creation time
        let mut now = Utc::now();
        if let Some(previous) = self.get_latest_summary(conversation_id).await? {
            if now <= previous.created_at {
                now = previous.created_at + Duration::microseconds(1);
            }
        }

        sqlx::query(
            r"
            INSERT INTO summaries (id, conversation_id, text, cutoff_message_id, usage_count, created_at)
            VALUES ($1, $2, $3, $4, 0, $5)
            ",
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(text)
        .bind(cutoff_message_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create summary: {e}")))?;

        info!(conversation_id, summary_id = %id, "Summary created");

        Ok(SummaryRecord {
            id,
            conversation_id: conversation_id.to_owned(),
            text: text.to_owned(),
            cutoff_message_id: cutoff_message_id.map(ToOwned::to_owned),
            usage_count: 0,
            created_at: now,
        })
    }

    async fn list_summaries(&self, conversation_id: &str) -> AppResult<Vec<SummaryRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM summaries WHERE conversation_id = $1 ORDER BY rowid ASC"
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list summaries: {e}")))?;

        Ok(rows.iter().map(summary_from_row).collect())
    }

    async fn increment_summary_usage(&self, summary_id: &str) -> AppResult<i64> {
        let row = sqlx::query(
            "UPDATE summaries SET usage_count = usage_count + 1 WHERE id = $1 RETURNING usage_count",
        )
        .bind(summary_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to update summary usage: {e}")))?;

        row.map(|r| r.get("usage_count"))
            .ok_or_else(|| AppError::not_found(format!("Summary {summary_id}")))
    }
}
