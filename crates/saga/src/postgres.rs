use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::SagaId;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::Result;
use crate::record::{SagaRecord, StepRecord};
use crate::repository::SagaRepository;
use crate::status::SagaStatus;

/// PostgreSQL-backed saga repository.
///
/// One row per saga; step snapshots are stored as a JSONB array alongside
/// the business data. `save` is an upsert keyed on the saga ID.
#[derive(Clone)]
pub struct PostgresSagaRepository {
    pool: PgPool,
}

impl PostgresSagaRepository {
    /// Creates a new PostgreSQL saga repository.
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

    fn row_to_record(row: PgRow) -> Result<SagaRecord> {
        let status: String = row.try_get("status")?;
        let status = SagaStatus::parse(&status).ok_or_else(|| {
            crate::SagaError::Database(sqlx::Error::Decode(
                format!("unknown saga status: {status}").into(),
            ))
        })?;
        let steps: serde_json::Value = row.try_get("steps")?;
        let steps: Vec<StepRecord> = serde_json::from_value(steps)?;

        Ok(SagaRecord {
            id: SagaId::from_uuid(row.try_get::<Uuid, _>("id")?),
            name: row.try_get("name")?,
            status,
            data: row.try_get("data")?,
            created_at: row.try_get("created_at")?,
            completed_at: row.try_get("completed_at")?,
            last_updated_at: row.try_get("last_updated_at")?,
            steps,
        })
    }
}

const SELECT_COLUMNS: &str =
    "id, name, status, data, steps, created_at, completed_at, last_updated_at";

#[async_trait]
impl SagaRepository for PostgresSagaRepository {
    async fn save(&self, record: &SagaRecord) -> Result<()> {
        let steps = serde_json::to_value(&record.steps)?;

        sqlx::query(
            r#"
            INSERT INTO sagas
                (id, name, status, data, steps, created_at, completed_at, last_updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                data = EXCLUDED.data,
                steps = EXCLUDED.steps,
                completed_at = EXCLUDED.completed_at,
                last_updated_at = EXCLUDED.last_updated_at
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.name)
        .bind(record.status.as_str())
        .bind(&record.data)
        .bind(steps)
        .bind(record.created_at)
        .bind(record.completed_at)
        .bind(record.last_updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: SagaId) -> Result<Option<SagaRecord>> {
        let row = sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM sagas WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn get_by_status(&self, status: SagaStatus) -> Result<Vec<SagaRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM sagas WHERE status = $1 ORDER BY created_at ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn get_expired(&self, timeout: Duration) -> Result<Vec<SagaRecord>> {
        let cutoff = Utc::now() - timeout;
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM sagas \
             WHERE status NOT IN ('Completed', 'Compensated', 'Failed') \
               AND COALESCE(last_updated_at, created_at) < $1 \
             ORDER BY COALESCE(last_updated_at, created_at) ASC"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn delete(&self, id: SagaId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sagas WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}
