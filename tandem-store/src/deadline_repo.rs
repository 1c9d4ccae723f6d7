use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use tandem_domain::deadline::{DeadlineKind, DeadlineRecord};
use tandem_domain::repository::{DeadlineStore, StoreError, StoreResult};

pub struct PgDeadlineStore {
    pool: PgPool,
}

impl PgDeadlineStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn parse_kind(s: &str) -> StoreResult<DeadlineKind> {
    match s {
        "ACCEPTANCE_TIMEOUT" => Ok(DeadlineKind::AcceptanceTimeout),
        "PAYMENT_RELEASE" => Ok(DeadlineKind::PaymentRelease),
        other => Err(StoreError::Backend(format!("unknown deadline kind {other}"))),
    }
}

#[async_trait]
impl DeadlineStore for PgDeadlineStore {
    async fn schedule(&self, record: &DeadlineRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO deadline_records (subject_id, kind, fires_at, processed) \
             VALUES ($1, $2, $3, false) \
             ON CONFLICT (subject_id, kind) DO NOTHING",
        )
        .bind(record.subject_id)
        .bind(record.kind.as_str())
        .bind(record.fires_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn due(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<DeadlineRecord>> {
        let rows = sqlx::query(
            "SELECT subject_id, kind, fires_at, processed FROM deadline_records \
             WHERE processed = false AND fires_at <= $1 \
             ORDER BY fires_at ASC LIMIT $2",
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter()
            .map(|row| {
                let kind: String = row.try_get("kind").map_err(backend)?;
                Ok(DeadlineRecord {
                    subject_id: row.try_get("subject_id").map_err(backend)?,
                    kind: parse_kind(&kind)?,
                    fires_at: row.try_get("fires_at").map_err(backend)?,
                    processed: row.try_get("processed").map_err(backend)?,
                })
            })
            .collect()
    }

    async fn mark_processed(&self, subject_id: Uuid, kind: DeadlineKind) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE deadline_records SET processed = true \
             WHERE subject_id = $1 AND kind = $2 AND processed = false",
        )
        .bind(subject_id)
        .bind(kind.as_str())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn get(
        &self,
        subject_id: Uuid,
        kind: DeadlineKind,
    ) -> StoreResult<Option<DeadlineRecord>> {
        let row = sqlx::query(
            "SELECT fires_at, processed FROM deadline_records \
             WHERE subject_id = $1 AND kind = $2",
        )
        .bind(subject_id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.map(|row| DeadlineRecord {
            subject_id,
            kind,
            fires_at: row.get("fires_at"),
            processed: row.get("processed"),
        }))
    }
}
