use super::{CreditStore, HistoryFilter};
use crate::db::{
    errors::Result,
    handlers::{Credits, Users},
    models::{
        credits::{CreditEntryCreateDBRequest, CreditEntryDBResponse, CreditResetDBRequest, ResetOutcome},
        users::{UserCreateDBRequest, UserDBResponse, UserUpdateDBRequest},
    },
};
use crate::types::UserId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Postgres-backed store. Each call checks out its own connection; credit
/// mutations run in a transaction holding the user's advisory lock.
#[derive(Clone)]
pub struct PgCreditStore {
    pool: PgPool,
}

impl PgCreditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CreditStore for PgCreditStore {
    async fn create_user(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        let mut conn = self.pool.acquire().await?;
        Users::new(&mut conn).create(request).await
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<UserDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Users::new(&mut conn).get_by_id(user_id).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Users::new(&mut conn).get_user_by_email(email).await
    }

    async fn update_profile(&self, user_id: UserId, request: &UserUpdateDBRequest, now: DateTime<Utc>) -> Result<UserDBResponse> {
        let mut conn = self.pool.acquire().await?;
        Users::new(&mut conn).update_profile(user_id, request, now).await
    }

    async fn set_password_hash(&self, user_id: UserId, password_hash: &str, now: DateTime<Utc>) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Users::new(&mut conn).set_password_hash(user_id, password_hash, now).await
    }

    async fn reset_if_due(&self, request: &CreditResetDBRequest) -> Result<ResetOutcome> {
        let mut conn = self.pool.acquire().await?;
        Credits::new(&mut conn).reset_if_due(request).await
    }

    async fn apply_entry(&self, request: &CreditEntryCreateDBRequest) -> Result<UserDBResponse> {
        let mut conn = self.pool.acquire().await?;
        Credits::new(&mut conn).apply_entry(request).await
    }

    async fn list_history(&self, user_id: UserId, filter: &HistoryFilter) -> Result<Vec<CreditEntryDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Credits::new(&mut conn).list_user_history(user_id, filter).await
    }

    async fn list_reset_candidates(&self, cutoff: DateTime<Utc>) -> Result<Vec<UserId>> {
        let mut conn = self.pool.acquire().await?;
        Users::new(&mut conn).list_reset_candidates(cutoff).await
    }
}
