use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use super::{BindingStore, HeistLogStore};
use crate::error::{AppError, AppResult};
use crate::models::{AccountId, Binding, HeistLogEntry, HeistOutcome, Identity, NewHeistLogEntry};

/// key: store-postgres -> sqlx-backed bindings + heist_log
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BindingStore for PgStore {
    async fn insert_binding(
        &self,
        identity: Identity,
        account_id: AccountId,
    ) -> AppResult<Binding> {
        sqlx::query_as::<_, Binding>(
            r#"
            INSERT INTO bindings (identity, account_id)
            VALUES ($1, $2)
            RETURNING id, identity, account_id, created_at, last_check_in_at
            "#,
        )
        .bind(identity)
        .bind(account_id)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::from_insert)
    }

    async fn find_by_identity(&self, identity: Identity) -> AppResult<Option<Binding>> {
        let record = sqlx::query_as::<_, Binding>(
            r#"
            SELECT id, identity, account_id, created_at, last_check_in_at
            FROM bindings
            WHERE identity = $1
            "#,
        )
        .bind(identity)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn find_by_account(&self, account_id: AccountId) -> AppResult<Option<Binding>> {
        let record = sqlx::query_as::<_, Binding>(
            r#"
            SELECT id, identity, account_id, created_at, last_check_in_at
            FROM bindings
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn delete_by_account(&self, account_id: AccountId) -> AppResult<Option<Binding>> {
        let record = sqlx::query_as::<_, Binding>(
            r#"
            DELETE FROM bindings
            WHERE account_id = $1
            RETURNING id, identity, account_id, created_at, last_check_in_at
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn delete_by_identity(&self, identity: Identity) -> AppResult<Option<Binding>> {
        let record = sqlx::query_as::<_, Binding>(
            r#"
            DELETE FROM bindings
            WHERE identity = $1
            RETURNING id, identity, account_id, created_at, last_check_in_at
            "#,
        )
        .bind(identity)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn set_check_in(&self, identity: Identity, at: DateTime<Utc>) -> AppResult<bool> {
        let result = sqlx::query("UPDATE bindings SET last_check_in_at = $1 WHERE identity = $2")
            .bind(at)
            .bind(identity)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn claim_check_in(
        &self,
        identity: Identity,
        day_start: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE bindings
            SET last_check_in_at = $1
            WHERE identity = $2
              AND (last_check_in_at IS NULL OR last_check_in_at < $3)
            "#,
        )
        .bind(at)
        .bind(identity)
        .bind(day_start)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_check_in(
        &self,
        identity: Identity,
        claimed_at: DateTime<Utc>,
        previous: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE bindings SET last_check_in_at = $1 WHERE identity = $2 AND last_check_in_at = $3",
        )
        .bind(previous)
        .bind(identity)
        .bind(claimed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl HeistLogStore for PgStore {
    async fn append_heist(&self, entry: NewHeistLogEntry) -> AppResult<HeistLogEntry> {
        let row = sqlx::query_as::<_, HeistLogRow>(
            r#"
            INSERT INTO heist_log (
                actor_identity,
                target_account_id,
                occurred_at,
                outcome,
                amount
            ) VALUES ($1, $2, $3, $4, $5)
            RETURNING id, actor_identity, target_account_id, occurred_at, outcome, amount
            "#,
        )
        .bind(entry.actor_identity)
        .bind(entry.target_account_id)
        .bind(entry.occurred_at)
        .bind(entry.outcome.as_str())
        .bind(entry.amount)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn count_attempts_since(&self, actor: Identity, since: DateTime<Utc>) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM heist_log WHERE actor_identity = $1 AND occurred_at >= $2",
        )
        .bind(actor)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn count_losses_since(
        &self,
        target: AccountId,
        since: DateTime<Utc>,
    ) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM heist_log
            WHERE target_account_id = $1
              AND occurred_at >= $2
              AND outcome IN ('SUCCESS', 'CRITICAL')
            "#,
        )
        .bind(target)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[derive(FromRow)]
struct HeistLogRow {
    id: i64,
    actor_identity: Identity,
    target_account_id: AccountId,
    occurred_at: DateTime<Utc>,
    outcome: String,
    amount: i64,
}

impl TryFrom<HeistLogRow> for HeistLogEntry {
    type Error = AppError;

    fn try_from(row: HeistLogRow) -> Result<Self, Self::Error> {
        let outcome: HeistOutcome = row.outcome.parse()?;
        Ok(HeistLogEntry {
            id: row.id,
            actor_identity: row.actor_identity,
            target_account_id: row.target_account_id,
            occurred_at: row.occurred_at,
            outcome,
            amount: row.amount,
        })
    }
}
