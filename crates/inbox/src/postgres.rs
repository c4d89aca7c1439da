use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::MessageId;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::message::{InboxMessage, InboxStatus};
use crate::store::InboxStore;
use crate::{InboxError, Result};

/// PostgreSQL-backed inbox store implementation.
///
/// Deduplication rides on the unique index over `message_id`: ingestion is
/// an `INSERT … ON CONFLICT DO NOTHING`, so a redelivered message can never
/// create a second row no matter how many workers ingest concurrently.
#[derive(Clone)]
pub struct PostgresInboxStore {
    pool: PgPool,
}

impl PostgresInboxStore {
    /// Creates a new PostgreSQL inbox store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_message(row: PgRow) -> Result<InboxMessage> {
        let status: String = row.try_get("status")?;
        let status = InboxStatus::parse(&status).ok_or_else(|| {
            InboxError::Database(sqlx::Error::Decode(
                format!("unknown inbox status: {status}").into(),
            ))
        })?;

        Ok(InboxMessage {
            id: MessageId::from_uuid(row.try_get::<Uuid, _>("id")?),
            message_id: row.try_get("message_id")?,
            message_type: row.try_get("message_type")?,
            payload: row.try_get("payload")?,
            source: row.try_get("source")?,
            status,
            received_at: row.try_get("received_at")?,
            processed_at: row.try_get("processed_at")?,
            last_attempt_at: row.try_get("last_attempt_at")?,
            retry_count: row.try_get::<i32, _>("retry_count")? as u32,
            error_message: row.try_get("error_message")?,
            stack_trace: row.try_get("stack_trace")?,
        })
    }

    async fn transition_conflict(&self, id: MessageId, to: InboxStatus) -> InboxError {
        let current: std::result::Result<Option<String>, sqlx::Error> =
            sqlx::query_scalar("SELECT status FROM inbox_messages WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await;

        match current {
            Ok(Some(status)) => InboxError::InvalidTransition {
                id,
                from: InboxStatus::parse(&status).unwrap_or(InboxStatus::Pending),
                to,
            },
            Ok(None) => InboxError::NotFound(id),
            Err(e) => InboxError::Database(e),
        }
    }
}

const SELECT_COLUMNS: &str = "id, message_id, message_type, payload, source, status, \
     received_at, processed_at, last_attempt_at, retry_count, error_message, stack_trace";

#[async_trait]
impl InboxStore for PostgresInboxStore {
    async fn try_add(
        &self,
        message_id: &str,
        message_type: &str,
        payload: serde_json::Value,
        source: &str,
    ) -> Result<Option<InboxMessage>> {
        let message = InboxMessage::new(message_id, message_type, payload, source);

        let result = sqlx::query(
            r#"
            INSERT INTO inbox_messages
                (id, message_id, message_type, payload, source, status,
                 received_at, retry_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (message_id) DO NOTHING
            "#,
        )
        .bind(message.id.as_uuid())
        .bind(&message.message_id)
        .bind(&message.message_type)
        .bind(&message.payload)
        .bind(&message.source)
        .bind(message.status.as_str())
        .bind(message.received_at)
        .bind(message.retry_count as i32)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(message))
    }

    async fn get(&self, id: MessageId) -> Result<Option<InboxMessage>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM inbox_messages WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_message).transpose()
    }

    async fn get_by_message_id(&self, message_id: &str) -> Result<Option<InboxMessage>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM inbox_messages WHERE message_id = $1"
        ))
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_message).transpose()
    }

    async fn get_next_pending(&self) -> Result<Option<InboxMessage>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM inbox_messages \
             WHERE status = 'Pending' ORDER BY received_at ASC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_message).transpose()
    }

    async fn get_pending(&self, batch_size: usize) -> Result<Vec<InboxMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM inbox_messages \
             WHERE status = 'Pending' ORDER BY received_at ASC LIMIT $1"
        ))
        .bind(batch_size as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_message).collect()
    }

    async fn get_failed(&self, max_retries: u32) -> Result<Vec<InboxMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM inbox_messages \
             WHERE status = 'Failed' AND retry_count < $1 \
             ORDER BY last_attempt_at ASC"
        ))
        .bind(max_retries as i32)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_message).collect()
    }

    async fn get_expired(&self, max_age: Duration) -> Result<Vec<InboxMessage>> {
        let cutoff = Utc::now() - max_age;
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM inbox_messages \
             WHERE status IN ('Processed', 'Discarded', 'Failed') AND received_at < $1 \
             ORDER BY received_at ASC"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_message).collect()
    }

    async fn claim_processing(&self, id: MessageId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE inbox_messages
            SET status = 'Processing', last_attempt_at = NOW()
            WHERE id = $1 AND status IN ('Pending', 'Failed')
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_processed(&self, id: MessageId) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE inbox_messages
            SET status = 'Processed', processed_at = NOW(),
                error_message = NULL, stack_trace = NULL
            WHERE id = $1 AND status = 'Processing'
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_conflict(id, InboxStatus::Processed).await);
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: MessageId,
        error: &str,
        stack_trace: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE inbox_messages
            SET status = 'Failed', retry_count = retry_count + 1,
                last_attempt_at = NOW(), error_message = $2, stack_trace = $3
            WHERE id = $1 AND status = 'Processing'
            "#,
        )
        .bind(id.as_uuid())
        .bind(error)
        .bind(stack_trace)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_conflict(id, InboxStatus::Failed).await);
        }
        Ok(())
    }

    async fn mark_discarded(&self, id: MessageId, reason: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE inbox_messages
            SET status = 'Discarded', error_message = $2
            WHERE id = $1 AND status = 'Processing'
            "#,
        )
        .bind(id.as_uuid())
        .bind(reason)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_conflict(id, InboxStatus::Discarded).await);
        }
        Ok(())
    }

    async fn cleanup_old(&self, retention: Duration) -> Result<u64> {
        let cutoff = Utc::now() - retention;
        let result = sqlx::query(
            "DELETE FROM inbox_messages \
             WHERE status IN ('Processed', 'Discarded', 'Failed') AND received_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn count_by_status(&self, status: InboxStatus) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM inbox_messages WHERE status = $1")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(count as u64)
    }
}
