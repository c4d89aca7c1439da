use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::MessageId;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::message::{OutboxMessage, OutboxStatus};
use crate::store::OutboxStore;
use crate::{OutboxError, Result};

/// PostgreSQL-backed outbox store implementation.
///
/// The claim is a conditional `UPDATE` checked by affected rows, so two
/// workers polling the same table can never both own one row.
#[derive(Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    /// Creates a new PostgreSQL outbox store.
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

    fn row_to_message(row: PgRow) -> Result<OutboxMessage> {
        let status: String = row.try_get("status")?;
        let status = OutboxStatus::parse(&status).ok_or_else(|| {
            OutboxError::Database(sqlx::Error::Decode(
                format!("unknown outbox status: {status}").into(),
            ))
        })?;

        Ok(OutboxMessage {
            id: MessageId::from_uuid(row.try_get::<Uuid, _>("id")?),
            message_type: row.try_get("message_type")?,
            payload: row.try_get("payload")?,
            destination: row.try_get("destination")?,
            correlation_id: row.try_get("correlation_id")?,
            status,
            created_at: row.try_get("created_at")?,
            published_at: row.try_get("published_at")?,
            last_attempt_at: row.try_get("last_attempt_at")?,
            retry_count: row.try_get::<i32, _>("retry_count")? as u32,
            error_message: row.try_get("error_message")?,
            stack_trace: row.try_get("stack_trace")?,
            scheduled_at: row.try_get("scheduled_at")?,
        })
    }

    async fn insert(&self, message: &OutboxMessage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox_messages
                (id, message_type, payload, destination, correlation_id, status,
                 created_at, retry_count, scheduled_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(message.id.as_uuid())
        .bind(&message.message_type)
        .bind(&message.payload)
        .bind(&message.destination)
        .bind(&message.correlation_id)
        .bind(message.status.as_str())
        .bind(message.created_at)
        .bind(message.retry_count as i32)
        .bind(message.scheduled_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Reports an invalid transition with the row's actual status, or
    /// `NotFound` if the row has disappeared.
    async fn transition_conflict(&self, id: MessageId, to: OutboxStatus) -> OutboxError {
        let current: std::result::Result<Option<String>, sqlx::Error> =
            sqlx::query_scalar("SELECT status FROM outbox_messages WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await;

        match current {
            Ok(Some(status)) => OutboxError::InvalidTransition {
                id,
                from: OutboxStatus::parse(&status).unwrap_or(OutboxStatus::Pending),
                to,
            },
            Ok(None) => OutboxError::NotFound(id),
            Err(e) => OutboxError::Database(e),
        }
    }
}

const SELECT_COLUMNS: &str = "id, message_type, payload, destination, correlation_id, status, \
     created_at, published_at, last_attempt_at, retry_count, error_message, stack_trace, scheduled_at";

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    async fn add(
        &self,
        message_type: &str,
        payload: serde_json::Value,
        destination: &str,
        correlation_id: Option<String>,
    ) -> Result<OutboxMessage> {
        let message = OutboxMessage::new(message_type, payload, destination, correlation_id);
        self.insert(&message).await?;
        Ok(message)
    }

    async fn schedule(
        &self,
        message_type: &str,
        payload: serde_json::Value,
        destination: &str,
        correlation_id: Option<String>,
        scheduled_at: DateTime<Utc>,
    ) -> Result<OutboxMessage> {
        let message = OutboxMessage::scheduled(
            message_type,
            payload,
            destination,
            correlation_id,
            scheduled_at,
        );
        self.insert(&message).await?;
        Ok(message)
    }

    async fn get(&self, id: MessageId) -> Result<Option<OutboxMessage>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM outbox_messages WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_message).transpose()
    }

    async fn get_next_pending(&self) -> Result<Option<OutboxMessage>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM outbox_messages \
             WHERE status = 'Pending' ORDER BY created_at ASC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_message).transpose()
    }

    async fn get_pending(&self, batch_size: usize) -> Result<Vec<OutboxMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM outbox_messages \
             WHERE status = 'Pending' ORDER BY created_at ASC LIMIT $1"
        ))
        .bind(batch_size as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_message).collect()
    }

    async fn get_ready_to_publish(&self, batch_size: usize) -> Result<Vec<OutboxMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM outbox_messages \
             WHERE status = 'Pending' \
                OR (status = 'Scheduled' AND scheduled_at <= NOW()) \
             ORDER BY created_at ASC LIMIT $1"
        ))
        .bind(batch_size as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_message).collect()
    }

    async fn get_failed(&self, max_retries: u32) -> Result<Vec<OutboxMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM outbox_messages \
             WHERE status = 'Failed' AND retry_count < $1 \
             ORDER BY last_attempt_at ASC"
        ))
        .bind(max_retries as i32)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_message).collect()
    }

    async fn get_expired(&self, max_age: Duration) -> Result<Vec<OutboxMessage>> {
        let cutoff = Utc::now() - max_age;
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM outbox_messages \
             WHERE status IN ('Published', 'Discarded') AND created_at < $1 \
             ORDER BY created_at ASC"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_message).collect()
    }

    async fn claim_publishing(&self, id: MessageId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'Publishing', last_attempt_at = NOW()
            WHERE id = $1
              AND (status IN ('Pending', 'Failed')
                   OR (status = 'Scheduled' AND scheduled_at <= NOW()))
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_published(&self, id: MessageId) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'Published', published_at = NOW(),
                error_message = NULL, stack_trace = NULL
            WHERE id = $1 AND status = 'Publishing'
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_conflict(id, OutboxStatus::Published).await);
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
            UPDATE outbox_messages
            SET status = 'Failed', retry_count = retry_count + 1,
                last_attempt_at = NOW(), error_message = $2, stack_trace = $3
            WHERE id = $1 AND status = 'Publishing'
            "#,
        )
        .bind(id.as_uuid())
        .bind(error)
        .bind(stack_trace)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_conflict(id, OutboxStatus::Failed).await);
        }
        Ok(())
    }

    async fn mark_discarded(&self, id: MessageId, reason: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'Discarded', error_message = $2
            WHERE id = $1 AND status = 'Publishing'
            "#,
        )
        .bind(id.as_uuid())
        .bind(reason)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_conflict(id, OutboxStatus::Discarded).await);
        }
        Ok(())
    }

    async fn cleanup_old(&self, retention: Duration) -> Result<u64> {
        let cutoff = Utc::now() - retention;
        let result = sqlx::query(
            "DELETE FROM outbox_messages \
             WHERE status IN ('Published', 'Discarded') AND created_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn count_by_status(&self, status: OutboxStatus) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM outbox_messages WHERE status = $1")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(count as u64)
    }
}
