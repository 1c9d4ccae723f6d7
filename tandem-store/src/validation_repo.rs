use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use tandem_domain::repository::{StoreError, StoreResult, ValidationStore};
use tandem_domain::validation::{ValidationState, ValidationTask};

pub struct PgValidationStore {
    pool: PgPool,
}

impl PgValidationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn state_str(s: ValidationState) -> &'static str {
    match s {
        ValidationState::Pending => "PENDING",
        ValidationState::Validated => "VALIDATED",
        ValidationState::RequiresManualReview => "REQUIRES_MANUAL_REVIEW",
    }
}

fn parse_state(s: &str) -> StoreResult<ValidationState> {
    match s {
        "PENDING" => Ok(ValidationState::Pending),
        "VALIDATED" => Ok(ValidationState::Validated),
        "REQUIRES_MANUAL_REVIEW" => Ok(ValidationState::RequiresManualReview),
        other => Err(StoreError::Backend(format!(
            "unknown validation state {other}"
        ))),
    }
}

#[async_trait]
impl ValidationStore for PgValidationStore {
    async fn open(&self, task: &ValidationTask) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO validation_tasks (booking_id, attempt, state, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT (booking_id) DO NOTHING",
        )
        .bind(task.booking_id)
        .bind(task.attempt as i32)
        .bind(state_str(task.state))
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, booking_id: Uuid) -> StoreResult<Option<ValidationTask>> {
        let row = sqlx::query(
            "SELECT attempt, state, protocol_id, failure_reason, validated_by, created_at, \
             updated_at FROM validation_tasks WHERE booking_id = $1",
        )
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(|row| {
            let state: String = row.try_get("state").map_err(backend)?;
            Ok(ValidationTask {
                booking_id,
                attempt: row.try_get::<i32, _>("attempt").map_err(backend)? as u32,
                state: parse_state(&state)?,
                protocol_id: row.try_get("protocol_id").map_err(backend)?,
                failure_reason: row.try_get("failure_reason").map_err(backend)?,
                validated_by: row.try_get("validated_by").map_err(backend)?,
                created_at: row.try_get("created_at").map_err(backend)?,
                updated_at: row.try_get("updated_at").map_err(backend)?,
            })
        })
        .transpose()
    }

    async fn bump_attempt(
        &self,
        booking_id: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<u32>> {
        let row = sqlx::query(
            "UPDATE validation_tasks SET attempt = attempt + 1, failure_reason = $2, \
             updated_at = $3 WHERE booking_id = $1 AND state = 'PENDING' RETURNING attempt",
        )
        .bind(booking_id)
        .bind(reason)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(|row| {
            row.try_get::<i32, _>("attempt")
                .map(|a| a as u32)
                .map_err(backend)
        })
        .transpose()
    }

    async fn mark_validated(
        &self,
        booking_id: Uuid,
        protocol_id: &str,
        validated_by: Option<Uuid>,
        from: ValidationState,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE validation_tasks SET state = 'VALIDATED', protocol_id = $2, \
             validated_by = $3, updated_at = $4 WHERE booking_id = $1 AND state = $5",
        )
        .bind(booking_id)
        .bind(protocol_id)
        .bind(validated_by)
        .bind(at)
        .bind(state_str(from))
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_manual_review(
        &self,
        booking_id: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE validation_tasks SET state = 'REQUIRES_MANUAL_REVIEW', \
             failure_reason = $2, updated_at = $3 \
             WHERE booking_id = $1 AND state = 'PENDING'",
        )
        .bind(booking_id)
        .bind(reason)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn add_certified_hours(&self, learner_id: Uuid, hours: i32) -> StoreResult<i32> {
        let row = sqlx::query(
            "INSERT INTO certified_hours (learner_id, total_hours, updated_at) \
             VALUES ($1, $2, NOW()) \
             ON CONFLICT (learner_id) DO UPDATE SET \
             total_hours = certified_hours.total_hours + EXCLUDED.total_hours, \
             updated_at = NOW() \
             RETURNING total_hours",
        )
        .bind(learner_id)
        .bind(hours)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        row.try_get("total_hours").map_err(backend)
    }

    async fn certified_hours(&self, learner_id: Uuid) -> StoreResult<i32> {
        let row = sqlx::query(
            "SELECT total_hours FROM certified_hours WHERE learner_id = $1",
        )
        .bind(learner_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row
            .map(|row| row.try_get("total_hours"))
            .transpose()
            .map_err(backend)?
            .unwrap_or(0))
    }
}
