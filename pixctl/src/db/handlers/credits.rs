use crate::{
    credits::policy::needs_reset,
    db::{
        errors::{DbError, Result},
        handlers::Users,
        models::credits::{
            operations, CreditEntryCreateDBRequest, CreditEntryDBResponse, CreditResetDBRequest, ResetMetadata, ResetOutcome,
        },
        models::users::UserDBResponse,
        store::HistoryFilter,
    },
    types::{EntryId, UserId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, FromRow, PgConnection};
use tracing::trace;
use uuid::Uuid;

// Database entity model for a ledger entry
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CreditEntry {
    pub id: EntryId,
    pub user_id: UserId,
    pub operation: String,
    pub amount: i64,
    pub balance_after: i64,
    pub description: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl From<CreditEntry> for CreditEntryDBResponse {
    fn from(entry: CreditEntry) -> Self {
        Self {
            id: entry.id,
            user_id: entry.user_id,
            operation: entry.operation,
            amount: entry.amount,
            balance_after: entry.balance_after,
            description: entry.description,
            metadata: entry.metadata,
            created_at: entry.created_at,
        }
    }
}

/// Advisory lock key for a user: the first 8 bytes of the UUID
fn user_lock_key(user_id: UserId) -> i64 {
    let bytes = user_id.as_bytes();
    i64::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]])
}

pub struct Credits<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Credits<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Take the per-user transaction-scoped lock. Blocks until it is available and
    /// releases automatically on commit or rollback.
    async fn lock_user(conn: &mut PgConnection, user_id: UserId) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1 FROM (SELECT pg_advisory_xact_lock($1)) AS _")
            .bind(user_lock_key(user_id))
            .fetch_one(&mut *conn)
            .await?;

        trace!("Acquired lock for user_id {}", user_id);
        Ok(())
    }

    async fn insert_entry(conn: &mut PgConnection, entry: &CreditEntryDBResponse) -> Result<CreditEntryDBResponse> {
        let inserted = sqlx::query_as::<_, CreditEntry>(
            r#"
            INSERT INTO credit_history (id, user_id, operation, amount, balance_after, description, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, user_id, operation, amount, balance_after, description, metadata, created_at
            "#,
        )
        .bind(entry.id)
        .bind(entry.user_id)
        .bind(&entry.operation)
        .bind(entry.amount)
        .bind(entry.balance_after)
        .bind(&entry.description)
        .bind(&entry.metadata)
        .bind(entry.created_at)
        .fetch_one(&mut *conn)
        .await?;

        Ok(CreditEntryDBResponse::from(inserted))
    }

    /// Apply a signed balance change and append its ledger entry in one transaction.
    pub async fn apply_entry(&mut self, request: &CreditEntryCreateDBRequest) -> Result<UserDBResponse> {
        let mut tx = self.db.begin().await?;
        Self::lock_user(&mut tx, request.user_id).await?;

        // Now safely read the balance - no other writer for this user until we commit
        let current = Users::new(&mut tx).get_by_id(request.user_id).await?.ok_or(DbError::NotFound)?;

        let new_balance = current.credits.checked_add(request.amount).ok_or(DbError::BalanceOverflow {
            amount: request.amount,
            available: current.credits,
        })?;
        if new_balance < 0 {
            // Dropping the transaction rolls it back
            return Err(DbError::InsufficientBalance {
                required: request.amount.saturating_neg(),
                available: current.credits,
            });
        }

        let updated = Users::new(&mut tx)
            .set_credit_state(
                request.user_id,
                new_balance,
                current.last_credit_reset,
                current.daily_credit_reset_count,
                request.created_at,
            )
            .await?;

        let entry = CreditEntryDBResponse {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            operation: request.operation.clone(),
            amount: request.amount,
            balance_after: new_balance,
            description: request.description.clone(),
            metadata: request.metadata.clone(),
            created_at: request.created_at,
        };
        Self::insert_entry(&mut tx, &entry).await?;

        tx.commit().await?;
        Ok(updated)
    }

    /// Reset the balance to the daily amount if the window has elapsed, re-checked under the lock.
    pub async fn reset_if_due(&mut self, request: &CreditResetDBRequest) -> Result<ResetOutcome> {
        let mut tx = self.db.begin().await?;
        Self::lock_user(&mut tx, request.user_id).await?;

        let current = Users::new(&mut tx).get_by_id(request.user_id).await?.ok_or(DbError::NotFound)?;

        if !needs_reset(current.last_credit_reset, request.now) {
            tx.commit().await?;
            return Ok(ResetOutcome::NotDue(current));
        }

        let reset_count = current.daily_credit_reset_count + 1;
        let updated = Users::new(&mut tx)
            .set_credit_state(request.user_id, request.daily_amount, Some(request.now), reset_count, request.now)
            .await?;

        let entry = CreditEntryDBResponse {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            operation: operations::DAILY_RESET.to_string(),
            amount: request.daily_amount,
            balance_after: request.daily_amount,
            description: request.description(),
            metadata: Some(ResetMetadata::daily(current.credits, reset_count).to_value()),
            created_at: request.now,
        };
        Self::insert_entry(&mut tx, &entry).await?;

        tx.commit().await?;
        Ok(ResetOutcome::Applied(updated))
    }

    /// List ledger entries for a user, newest first
    pub async fn list_user_history(&mut self, user_id: UserId, filter: &HistoryFilter) -> Result<Vec<CreditEntryDBResponse>> {
        let entries = sqlx::query_as::<_, CreditEntry>(
            r#"
            SELECT id, user_id, operation, amount, balance_after, description, metadata, created_at
            FROM credit_history
            WHERE user_id = $1 AND ($2::timestamptz IS NULL OR created_at >= $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(filter.since)
        .bind(filter.limit.max(0))
        .fetch_all(&mut *self.db)
        .await?;

        Ok(entries.into_iter().map(CreditEntryDBResponse::from).collect())
    }
}
