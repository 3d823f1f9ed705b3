//! Day-scoped usage view shown on the account dashboard.

use super::{
    policy::{self, ResetCountdown},
    service::CreditService,
};
use crate::{
    db::{
        models::{
            credits::{operations, CreditEntryDBResponse},
            users::UserDBResponse,
        },
        store::HistoryFilter,
    },
    errors::Result,
    types::UserId,
};
use chrono::{DateTime, Utc};
use tracing::instrument;

/// Entries fetched for the activity panels
pub const RECENT_ACTIVITY_WINDOW: i64 = 20;
const ALL_ACTIVITY_LIMIT: usize = 10;
const IMAGE_GENERATIONS_LIMIT: usize = 5;
const BACKGROUND_REMOVALS_LIMIT: usize = 5;
const CREDIT_RESETS_LIMIT: usize = 3;

#[derive(Debug, Clone)]
pub struct Dashboard {
    pub user: UserDBResponse,
    pub credit_info: CreditInfo,
    pub recent_activity: RecentActivity,
    pub statistics: Statistics,
}

#[derive(Debug, Clone)]
pub struct CreditInfo {
    pub current_credits: i64,
    pub daily_limit: i64,
    pub todays_usage: i64,
    pub remaining_today: i64,
    pub time_until_reset: ResetCountdown,
}

#[derive(Debug, Clone, Default)]
pub struct RecentActivity {
    pub all: Vec<CreditEntryDBResponse>,
    pub image_generations: Vec<CreditEntryDBResponse>,
    pub background_removals: Vec<CreditEntryDBResponse>,
    pub credit_resets: Vec<CreditEntryDBResponse>,
}

#[derive(Debug, Clone)]
pub struct Statistics {
    pub total_images_generated: i64,
    pub total_images_edited: i64,
    pub total_credit_resets: i64,
    pub member_since: DateTime<Utc>,
}

impl RecentActivity {
    /// Split newest-first entries into the dashboard panels
    pub fn from_entries(entries: &[CreditEntryDBResponse]) -> Self {
        let by_operation = |operation: &str, limit: usize| -> Vec<CreditEntryDBResponse> {
            entries
                .iter()
                .filter(|entry| entry.operation == operation)
                .take(limit)
                .cloned()
                .collect()
        };

        Self {
            all: entries.iter().take(ALL_ACTIVITY_LIMIT).cloned().collect(),
            image_generations: by_operation(operations::TEXT_TO_IMAGE, IMAGE_GENERATIONS_LIMIT),
            background_removals: by_operation(operations::REMOVE_BACKGROUND, BACKGROUND_REMOVALS_LIMIT),
            credit_resets: by_operation(operations::DAILY_RESET, CREDIT_RESETS_LIMIT),
        }
    }
}

impl CreditService {
    /// Runs the lazy reset, then reads back the ledger to build the dashboard.
    #[instrument(skip(self))]
    pub async fn dashboard(&self, user_id: UserId) -> Result<Dashboard> {
        let user = self.check_and_reset(user_id).await?;
        let now = self.now();
        let store = self.store();

        let recent = store
            .list_history(user_id, &HistoryFilter::new(RECENT_ACTIVITY_WINDOW))
            .await?;

        let midnight = policy::local_midnight(now, policy::day_offset(now, self.settings().utc_offset_minutes));
        let today = store
            .list_history(
                user_id,
                &HistoryFilter::new(self.settings().history_max_limit).since(midnight),
            )
            .await?;

        let daily_limit = self.daily_amount();
        let todays_usage = policy::usage_between(&today, midnight, now);

        Ok(Dashboard {
            credit_info: CreditInfo {
                current_credits: user.credits,
                daily_limit,
                todays_usage,
                remaining_today: policy::remaining_today(daily_limit, todays_usage),
                time_until_reset: policy::time_until_reset(user.last_credit_reset, now),
            },
            recent_activity: RecentActivity::from_entries(&recent),
            statistics: Statistics {
                total_images_generated: user.images_generated,
                total_images_edited: user.images_edited,
                total_credit_resets: user.daily_credit_reset_count,
                member_since: user.created_at,
            },
            user,
        })
    }
}
