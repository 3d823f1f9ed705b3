use crate::{
    api::models::users::UserResponse,
    credits::{
        dashboard::{CreditInfo, Dashboard, RecentActivity, Statistics},
        policy::ResetCountdown,
        CreditStatus,
    },
    db::models::{credits::CreditEntryDBResponse, users::UserDBResponse},
    errors::Error,
    types::{EntryId, UserId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Parse a JSON amount as a positive whole number of credits. Missing, fractional,
/// non-numeric and non-positive amounts are all rejected with a 400.
pub fn parse_amount(amount: Option<&serde_json::Value>) -> Result<i64, Error> {
    match amount.and_then(serde_json::Value::as_i64) {
        Some(value) if value > 0 => Ok(value),
        _ => Err(Error::BadRequest {
            message: "Please provide a valid amount: a positive whole number of credits".to_string(),
        }),
    }
}

// Request models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AddCreditsRequest {
    /// Credits to grant, a positive integer
    #[serde(default)]
    #[schema(value_type = i64, minimum = 1)]
    pub amount: Option<serde_json::Value>,
    /// Recorded on the ledger verbatim; defaults to "Added N credits"
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UseCreditsRequest {
    /// Credits to spend, a positive integer
    #[serde(default)]
    #[schema(value_type = i64, minimum = 1)]
    pub amount: Option<serde_json::Value>,
    /// Ledger operation tag, e.g. "text-to-image"; defaults to "usage"
    pub operation: Option<String>,
}

/// Query parameters for the credit history
#[derive(Debug, Deserialize, IntoParams)]
pub struct CreditHistoryQuery {
    /// Maximum number of entries to return
    #[param(default = 50, minimum = 1, maximum = 1000)]
    pub limit: Option<i64>,
}

// Response models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreditEntryResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: EntryId,
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    pub operation: String,
    /// Positive for credits added, negative for credits spent
    pub amount: i64,
    pub balance_after: i64,
    pub description: String,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl From<CreditEntryDBResponse> for CreditEntryResponse {
    fn from(db: CreditEntryDBResponse) -> Self {
        Self {
            id: db.id,
            user_id: db.user_id,
            operation: db.operation,
            amount: db.amount,
            balance_after: db.balance_after,
            description: db.description,
            metadata: db.metadata,
            timestamp: db.created_at,
        }
    }
}

/// Countdown to the next reset. `unknown` is set when the instant could not be computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TimeUntilReset {
    pub hours: i64,
    pub minutes: i64,
    pub can_reset: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_reset_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unknown: bool,
}

impl From<ResetCountdown> for TimeUntilReset {
    fn from(countdown: ResetCountdown) -> Self {
        match countdown {
            ResetCountdown::Ready => Self {
                hours: 0,
                minutes: 0,
                can_reset: true,
                next_reset_time: None,
                unknown: false,
            },
            ResetCountdown::Pending {
                hours,
                minutes,
                next_reset_time,
            } => Self {
                hours,
                minutes,
                can_reset: false,
                next_reset_time: Some(next_reset_time),
                unknown: false,
            },
            ResetCountdown::Unknown => Self {
                hours: 0,
                minutes: 0,
                can_reset: false,
                next_reset_time: None,
                unknown: true,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreditStatusResponse {
    pub credits: i64,
    pub last_reset: Option<DateTime<Utc>>,
    pub reset_count: i64,
    pub time_until_reset: TimeUntilReset,
    pub daily_limit: i64,
}

impl From<CreditStatus> for CreditStatusResponse {
    fn from(status: CreditStatus) -> Self {
        Self {
            credits: status.user.credits,
            last_reset: status.user.last_credit_reset,
            reset_count: status.user.daily_credit_reset_count,
            time_until_reset: status.time_until_reset.into(),
            daily_limit: status.daily_limit,
        }
    }
}

/// Account summary shown at the top of the dashboard
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DashboardUser {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub display_name: Option<String>,
    pub email: String,
    pub credits: i64,
    pub images_generated: i64,
    pub images_edited: i64,
    pub last_credit_reset: Option<DateTime<Utc>>,
    pub daily_credit_reset_count: i64,
}

impl From<UserDBResponse> for DashboardUser {
    fn from(db: UserDBResponse) -> Self {
        Self {
            id: db.id,
            display_name: db.display_name,
            email: db.email,
            credits: db.credits,
            images_generated: db.images_generated,
            images_edited: db.images_edited,
            last_credit_reset: db.last_credit_reset,
            daily_credit_reset_count: db.daily_credit_reset_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreditInfoResponse {
    pub current_credits: i64,
    pub daily_limit: i64,
    pub todays_usage: i64,
    pub remaining_today: i64,
    pub time_until_reset: TimeUntilReset,
}

impl From<CreditInfo> for CreditInfoResponse {
    fn from(info: CreditInfo) -> Self {
        Self {
            current_credits: info.current_credits,
            daily_limit: info.daily_limit,
            todays_usage: info.todays_usage,
            remaining_today: info.remaining_today,
            time_until_reset: info.time_until_reset.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecentActivityResponse {
    pub all: Vec<CreditEntryResponse>,
    pub image_generations: Vec<CreditEntryResponse>,
    pub background_removals: Vec<CreditEntryResponse>,
    pub credit_resets: Vec<CreditEntryResponse>,
}

fn entries(list: Vec<CreditEntryDBResponse>) -> Vec<CreditEntryResponse> {
    list.into_iter().map(CreditEntryResponse::from).collect()
}

impl From<RecentActivity> for RecentActivityResponse {
    fn from(activity: RecentActivity) -> Self {
        Self {
            all: entries(activity.all),
            image_generations: entries(activity.image_generations),
            background_removals: entries(activity.background_removals),
            credit_resets: entries(activity.credit_resets),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsResponse {
    pub total_images_generated: i64,
    pub total_images_edited: i64,
    pub total_credit_resets: i64,
    pub member_since: DateTime<Utc>,
}

impl From<Statistics> for StatisticsResponse {
    fn from(stats: Statistics) -> Self {
        Self {
            total_images_generated: stats.total_images_generated,
            total_images_edited: stats.total_images_edited,
            total_credit_resets: stats.total_credit_resets,
            member_since: stats.member_since,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub user: DashboardUser,
    pub credit_info: CreditInfoResponse,
    pub recent_activity: RecentActivityResponse,
    pub statistics: StatisticsResponse,
}

impl From<Dashboard> for DashboardResponse {
    fn from(dashboard: Dashboard) -> Self {
        Self {
            user: dashboard.user.into(),
            credit_info: dashboard.credit_info.into(),
            recent_activity: dashboard.recent_activity.into(),
            statistics: dashboard.statistics.into(),
        }
    }
}

/// Balance after a grant or debit, with the full user record
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreditsUpdatedResponse {
    pub user: UserResponse,
}
