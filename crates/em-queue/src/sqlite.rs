use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Row, Sqlite};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use em_common::QueuedMessage;
use crate::{EmbeddedQueue, QueueReceiver, QueueSender, Result};

/// How often an idle long poll re-checks the table
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// SQLite-backed queue with SQS-like visibility semantics for local development.
///
/// Several named queues can share one database; rows are keyed by queue name.
pub struct SqliteQueue {
    pool: Pool<Sqlite>,
    queue_name: String,
    visibility_timeout_seconds: u32,
}

impl SqliteQueue {
    pub fn new(pool: Pool<Sqlite>, queue_name: String, visibility_timeout_seconds: u32) -> Self {
        Self {
            pool,
            queue_name,
            visibility_timeout_seconds,
        }
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queue_messages (
                id TEXT PRIMARY KEY,
                queue_name TEXT NOT NULL,
                receipt_handle TEXT,
                visible_at INTEGER NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                receive_count INTEGER DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_queue_visible
            ON queue_messages (queue_name, visible_at, created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!(queue = %self.queue_name, "SQLite queue schema initialized");
        Ok(())
    }

    /// Claim up to `max_messages` visible rows, hiding them for the visibility timeout
    async fn receive_once(&self, max_messages: u32) -> Result<Vec<QueuedMessage>> {
        let now = Utc::now().timestamp();
        let new_visible_at = now + self.visibility_timeout_seconds as i64;

        let rows = sqlx::query(
            r#"
            SELECT id, payload
            FROM queue_messages
            WHERE queue_name = ? AND visible_at <= ?
            ORDER BY created_at, id
            LIMIT ?
            "#,
        )
        .bind(&self.queue_name)
        .bind(now)
        .bind(max_messages as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());

        for row in rows {
            let id: String = row.get("id");
            let payload: String = row.get("payload");
            let receipt_handle = uuid::Uuid::new_v4().to_string();

            let updated = sqlx::query(
                r#"
                UPDATE queue_messages
                SET receipt_handle = ?, visible_at = ?, receive_count = receive_count + 1
                WHERE id = ? AND queue_name = ? AND visible_at <= ?
                "#,
            )
            .bind(&receipt_handle)
            .bind(new_visible_at)
            .bind(&id)
            .bind(&self.queue_name)
            .bind(now)
            .execute(&self.pool)
            .await?;

            if updated.rows_affected() == 0 {
                // Another receiver claimed this message
                continue;
            }

            messages.push(QueuedMessage {
                body: payload,
                receipt_handle,
                broker_message_id: Some(id),
                queue_identifier: self.queue_name.clone(),
            });
        }

        Ok(messages)
    }
}

#[async_trait]
impl QueueReceiver for SqliteQueue {
    fn identifier(&self) -> &str {
        &self.queue_name
    }

    async fn receive(&self, max_messages: u32, wait_seconds: u32) -> Result<Vec<QueuedMessage>> {
        let deadline = Instant::now() + Duration::from_secs(wait_seconds as u64);

        loop {
            let messages = self.receive_once(max_messages).await?;
            if !messages.is_empty() {
                debug!(
                    queue = %self.queue_name,
                    count = messages.len(),
                    "Received messages from SQLite queue"
                );
                return Ok(messages);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(messages);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn delete_batch(&self, receipt_handles: &[String]) -> Result<()> {
        let mut deleted = 0u64;

        for receipt_handle in receipt_handles {
            let result = sqlx::query(
                "DELETE FROM queue_messages WHERE receipt_handle = ? AND queue_name = ?",
            )
            .bind(receipt_handle)
            .bind(&self.queue_name)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                // Visibility expired and the message was re-received with a new handle
                warn!(
                    receipt_handle = %receipt_handle,
                    queue = %self.queue_name,
                    "Delete skipped - message not found or handle is stale"
                );
            }
            deleted += result.rows_affected();
        }

        debug!(queue = %self.queue_name, deleted, "Messages deleted from SQLite queue");
        Ok(())
    }
}

#[async_trait]
impl QueueSender for SqliteQueue {
    fn identifier(&self) -> &str {
        &self.queue_name
    }

    async fn send(&self, body: &str) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().timestamp_millis();

        sqlx::query(
            r#"
            INSERT INTO queue_messages (id, queue_name, visible_at, payload, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&self.queue_name)
        .bind(now / 1000)
        .bind(body)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(message_id = %id, queue = %self.queue_name, "Message sent to SQLite queue");
        Ok(id)
    }
}

#[async_trait]
impl EmbeddedQueue for SqliteQueue {
    async fn init_schema(&self) -> Result<()> {
        self.create_schema().await
    }
}
