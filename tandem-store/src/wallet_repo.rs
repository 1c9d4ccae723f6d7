use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use tandem_domain::repository::{StoreError, StoreResult, WalletStore};
use tandem_domain::wallet::{TransactionKind, Wallet, WalletTransaction};

pub struct PgWalletStore {
    pool: PgPool,
}

impl PgWalletStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn append_transaction(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        txn: &WalletTransaction,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO wallet_transactions (id, instructor_id, booking_id, kind, \
             amount_cents, note, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(txn.id)
        .bind(txn.instructor_id)
        .bind(txn.booking_id)
        .bind(txn.kind.as_str())
        .bind(txn.amount_cents)
        .bind(&txn.note)
        .bind(txn.created_at)
        .execute(&mut **tx)
        .await
        .map_err(backend)?;
        Ok(())
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn parse_kind(s: &str) -> StoreResult<TransactionKind> {
    match s {
        "CREDIT" => Ok(TransactionKind::Credit),
        "PENALTY" => Ok(TransactionKind::Penalty),
        "COMPENSATION" => Ok(TransactionKind::Compensation),
        "PAYOUT" => Ok(TransactionKind::Payout),
        other => Err(StoreError::Backend(format!(
            "unknown transaction kind {other}"
        ))),
    }
}

#[async_trait]
impl WalletStore for PgWalletStore {
    async fn credit(&self, txn: &WalletTransaction) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        // Commutative increment: concurrent credits never need a lock.
        sqlx::query(
            "INSERT INTO wallets (instructor_id, available_cents, penalties_cents, updated_at) \
             VALUES ($1, $2, 0, $3) \
             ON CONFLICT (instructor_id) DO UPDATE SET \
             available_cents = wallets.available_cents + EXCLUDED.available_cents, \
             updated_at = EXCLUDED.updated_at",
        )
        .bind(txn.instructor_id)
        .bind(txn.amount_cents)
        .bind(txn.created_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        Self::append_transaction(&mut tx, txn).await?;
        tx.commit().await.map_err(backend)
    }

    async fn apply_penalty(&self, txn: &WalletTransaction) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query(
            "INSERT INTO wallets (instructor_id, available_cents, penalties_cents, updated_at) \
             VALUES ($1, -$2, $2, $3) \
             ON CONFLICT (instructor_id) DO UPDATE SET \
             available_cents = wallets.available_cents - $2, \
             penalties_cents = wallets.penalties_cents + $2, \
             updated_at = $3",
        )
        .bind(txn.instructor_id)
        .bind(txn.amount_cents)
        .bind(txn.created_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        Self::append_transaction(&mut tx, txn).await?;
        tx.commit().await.map_err(backend)
    }

    async fn withdraw(&self, txn: &WalletTransaction) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let result = sqlx::query(
            "UPDATE wallets SET available_cents = available_cents - $2, updated_at = $3 \
             WHERE instructor_id = $1 AND available_cents >= $2",
        )
        .bind(txn.instructor_id)
        .bind(txn.amount_cents)
        .bind(txn.created_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }
        Self::append_transaction(&mut tx, txn).await?;
        tx.commit().await.map_err(backend)?;
        Ok(true)
    }

    async fn get(&self, instructor_id: Uuid) -> StoreResult<Option<Wallet>> {
        let row = sqlx::query(
            "SELECT available_cents, penalties_cents, updated_at FROM wallets \
             WHERE instructor_id = $1",
        )
        .bind(instructor_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.map(|row| Wallet {
            instructor_id,
            available_cents: row.get("available_cents"),
            penalties_cents: row.get("penalties_cents"),
            updated_at: row.get("updated_at"),
        }))
    }

    async fn transactions(&self, instructor_id: Uuid) -> StoreResult<Vec<WalletTransaction>> {
        let rows = sqlx::query(
            "SELECT id, booking_id, kind, amount_cents, note, created_at \
             FROM wallet_transactions WHERE instructor_id = $1 ORDER BY created_at ASC",
        )
        .bind(instructor_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter()
            .map(|row| {
                let kind: String = row.try_get("kind").map_err(backend)?;
                Ok(WalletTransaction {
                    id: row.try_get("id").map_err(backend)?,
                    instructor_id,
                    booking_id: row.try_get("booking_id").map_err(backend)?,
                    kind: parse_kind(&kind)?,
                    amount_cents: row.try_get("amount_cents").map_err(backend)?,
                    note: row.try_get("note").map_err(backend)?,
                    created_at: row.try_get("created_at").map_err(backend)?,
                })
            })
            .collect()
    }
}
