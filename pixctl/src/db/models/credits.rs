use crate::db::models::users::UserDBResponse;
use crate::types::{EntryId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Conventional ledger operation tags. The tag is open: callers may record any string.
pub mod operations {
    pub const DAILY_RESET: &str = "daily-reset";
    pub const GRANT: &str = "grant";
    pub const USAGE: &str = "usage";
    pub const TEXT_TO_IMAGE: &str = "text-to-image";
    pub const REMOVE_BACKGROUND: &str = "remove-background";
    pub const MANUAL_ADJUSTMENT: &str = "manual-adjustment";

    /// Tags written only by the engine itself, never accepted on a debit
    pub fn is_reserved(operation: &str) -> bool {
        matches!(operation, DAILY_RESET | GRANT)
    }
}

/// Database request for appending a balance-changing ledger entry.
/// `amount` is signed: positive grants, negative debits.
#[derive(Debug, Clone)]
pub struct CreditEntryCreateDBRequest {
    pub user_id: UserId,
    pub operation: String,
    pub amount: i64,
    pub description: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Database request for a conditional daily reset
#[derive(Debug, Clone)]
pub struct CreditResetDBRequest {
    pub user_id: UserId,
    pub daily_amount: i64,
    pub now: DateTime<Utc>,
}

impl CreditResetDBRequest {
    pub fn description(&self) -> String {
        format!("Daily credit reset - {}", self.now.format("%Y-%m-%d"))
    }
}

/// Database response for a ledger entry
#[derive(Debug, Clone, PartialEq)]
pub struct CreditEntryDBResponse {
    pub id: EntryId,
    pub user_id: UserId,
    pub operation: String,
    pub amount: i64,
    pub balance_after: i64,
    pub description: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Audit payload stored on `daily-reset` entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetMetadata {
    pub reset_type: String,
    pub previous_credits: i64,
    pub reset_count: i64,
}

impl ResetMetadata {
    pub fn daily(previous_credits: i64, reset_count: i64) -> Self {
        Self {
            reset_type: "daily".to_string(),
            previous_credits,
            reset_count,
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Result of a conditional reset
#[derive(Debug, Clone)]
pub enum ResetOutcome {
    /// The reset was due and has been applied
    Applied(UserDBResponse),
    /// The window had not elapsed; the record is returned unchanged
    NotDue(UserDBResponse),
}

impl ResetOutcome {
    pub fn user(&self) -> &UserDBResponse {
        match self {
            ResetOutcome::Applied(user) | ResetOutcome::NotDue(user) => user,
        }
    }

    pub fn into_user(self) -> UserDBResponse {
        match self {
            ResetOutcome::Applied(user) | ResetOutcome::NotDue(user) => user,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, ResetOutcome::Applied(_))
    }
}
