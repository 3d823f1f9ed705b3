//! Storage abstraction for user credit records and their ledgers.
//!
//! Every mutating method is an atomic conditional update scoped to one user:
//! the balance change and its ledger entry are applied together or not at all,
//! and concurrent mutations of the same user are serialized by the backend.

pub mod memory;
pub mod postgres;

use crate::db::{
    errors::Result,
    models::{
        credits::{CreditEntryCreateDBRequest, CreditEntryDBResponse, CreditResetDBRequest, ResetOutcome},
        users::{UserCreateDBRequest, UserDBResponse, UserUpdateDBRequest},
    },
};
use crate::types::UserId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::InMemoryCreditStore;
pub use postgres::PgCreditStore;

/// Bounds for a ledger read. Results are always newest-first.
#[derive(Debug, Clone, Copy)]
pub struct HistoryFilter {
    /// Only entries created at or after this instant
    pub since: Option<DateTime<Utc>>,
    pub limit: i64,
}

impl HistoryFilter {
    pub fn new(limit: i64) -> Self {
        Self { since: None, limit }
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }
}

#[async_trait]
pub trait CreditStore: Send + Sync {
    async fn create_user(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse>;

    async fn get_user(&self, user_id: UserId) -> Result<Option<UserDBResponse>>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserDBResponse>>;

    /// Update allow-listed profile fields. Never touches credit columns.
    async fn update_profile(&self, user_id: UserId, request: &UserUpdateDBRequest, now: DateTime<Utc>) -> Result<UserDBResponse>;

    async fn set_password_hash(&self, user_id: UserId, password_hash: &str, now: DateTime<Utc>) -> Result<()>;

    /// Apply a daily reset if, and only if, it is still due at `request.now`
    /// once the user's record is held exclusively.
    async fn reset_if_due(&self, request: &CreditResetDBRequest) -> Result<ResetOutcome>;

    /// Apply a signed balance change and append its ledger entry. Debits that
    /// would leave a negative balance fail with `DbError::InsufficientBalance`
    /// and change nothing.
    async fn apply_entry(&self, request: &CreditEntryCreateDBRequest) -> Result<UserDBResponse>;

    async fn list_history(&self, user_id: UserId, filter: &HistoryFilter) -> Result<Vec<CreditEntryDBResponse>>;

    /// Users never reset, or last reset strictly before `cutoff`
    async fn list_reset_candidates(&self, cutoff: DateTime<Utc>) -> Result<Vec<UserId>>;
}
