use super::{CreditStore, HistoryFilter};
use crate::credits::policy::needs_reset;
use crate::db::{
    errors::{DbError, Result},
    models::{
        credits::{
            operations, CreditEntryCreateDBRequest, CreditEntryDBResponse, CreditResetDBRequest, ResetMetadata, ResetOutcome,
        },
        users::{UserCreateDBRequest, UserDBResponse, UserUpdateDBRequest},
    },
};
use crate::types::UserId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{cmp::Ordering, collections::HashMap};
use tokio::sync::Mutex;
use tracing::trace;
use uuid::Uuid;

struct StoredUser {
    record: UserDBResponse,
    history: Vec<CreditEntryDBResponse>,
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<UserId, StoredUser>,
    emails: HashMap<String, UserId>,
}

/// Newest first; among equal timestamps the later append wins
fn newest_first(a: &(usize, &CreditEntryDBResponse), b: &(usize, &CreditEntryDBResponse)) -> Ordering {
    b.1.created_at.cmp(&a.1.created_at).then(b.0.cmp(&a.0))
}

/// Process-local store. Each mutation runs entirely under one lock, which gives
/// the same per-user atomicity the Postgres store gets from its advisory lock.
/// Contents are lost on shutdown.
#[derive(Default)]
pub struct InMemoryCreditStore {
    state: Mutex<MemoryState>,
}

impl InMemoryCreditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CreditStore for InMemoryCreditStore {
    async fn create_user(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        let mut state = self.state.lock().await;
        if state.emails.contains_key(&request.email) {
            return Err(DbError::UniqueViolation {
                constraint: Some("users_email_key".to_string()),
            });
        }
        if request.initial_credits < 0 {
            return Err(DbError::CheckViolation {
                constraint: Some("users_credits_check".to_string()),
            });
        }

        let record = UserDBResponse {
            id: Uuid::new_v4(),
            email: request.email.clone(),
            display_name: request.display_name.clone(),
            profile_picture: None,
            bio: None,
            password_hash: request.password_hash.clone(),
            role: request.role.clone(),
            is_admin: request.is_admin,
            credits: request.initial_credits,
            last_credit_reset: None,
            daily_credit_reset_count: 0,
            images_generated: 0,
            images_edited: 0,
            created_at: request.created_at,
            updated_at: request.created_at,
        };

        state.emails.insert(record.email.clone(), record.id);
        state.users.insert(
            record.id,
            StoredUser {
                record: record.clone(),
                history: Vec::new(),
            },
        );
        Ok(record)
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<UserDBResponse>> {
        let state = self.state.lock().await;
        Ok(state.users.get(&user_id).map(|stored| stored.record.clone()))
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserDBResponse>> {
        let state = self.state.lock().await;
        Ok(state
            .emails
            .get(email)
            .and_then(|id| state.users.get(id))
            .map(|stored| stored.record.clone()))
    }

    async fn update_profile(&self, user_id: UserId, request: &UserUpdateDBRequest, now: DateTime<Utc>) -> Result<UserDBResponse> {
        let mut state = self.state.lock().await;
        let stored = state.users.get_mut(&user_id).ok_or(DbError::NotFound)?;
        let record = &mut stored.record;

        if let Some(display_name) = &request.display_name {
            record.display_name = Some(display_name.clone());
        }
        if let Some(profile_picture) = &request.profile_picture {
            record.profile_picture = Some(profile_picture.clone());
        }
        if let Some(bio) = &request.bio {
            record.bio = Some(bio.clone());
        }
        if let Some(images_generated) = request.images_generated {
            record.images_generated = images_generated;
        }
        if let Some(images_edited) = request.images_edited {
            record.images_edited = images_edited;
        }
        record.updated_at = now;

        Ok(record.clone())
    }

    async fn set_password_hash(&self, user_id: UserId, password_hash: &str, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        let stored = state.users.get_mut(&user_id).ok_or(DbError::NotFound)?;
        stored.record.password_hash = Some(password_hash.to_string());
        stored.record.updated_at = now;
        Ok(())
    }

    async fn reset_if_due(&self, request: &CreditResetDBRequest) -> Result<ResetOutcome> {
        let mut state = self.state.lock().await;
        let stored = state.users.get_mut(&request.user_id).ok_or(DbError::NotFound)?;

        if !needs_reset(stored.record.last_credit_reset, request.now) {
            trace!("Reset not due for user_id {}", request.user_id);
            return Ok(ResetOutcome::NotDue(stored.record.clone()));
        }

        let previous_credits = stored.record.credits;
        let reset_count = stored.record.daily_credit_reset_count + 1;

        stored.history.push(CreditEntryDBResponse {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            operation: operations::DAILY_RESET.to_string(),
            amount: request.daily_amount,
            balance_after: request.daily_amount,
            description: request.description(),
            metadata: Some(ResetMetadata::daily(previous_credits, reset_count).to_value()),
            created_at: request.now,
        });

        let record = &mut stored.record;
        record.credits = request.daily_amount;
        record.last_credit_reset = Some(request.now);
        record.daily_credit_reset_count = reset_count;
        record.updated_at = request.now;

        Ok(ResetOutcome::Applied(record.clone()))
    }

    async fn apply_entry(&self, request: &CreditEntryCreateDBRequest) -> Result<UserDBResponse> {
        let mut state = self.state.lock().await;
        let stored = state.users.get_mut(&request.user_id).ok_or(DbError::NotFound)?;

        let current = stored.record.credits;
        let new_balance = current.checked_add(request.amount).ok_or(DbError::BalanceOverflow {
            amount: request.amount,
            available: current,
        })?;
        if new_balance < 0 {
            return Err(DbError::InsufficientBalance {
                required: request.amount.saturating_neg(),
                available: current,
            });
        }

        stored.history.push(CreditEntryDBResponse {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            operation: request.operation.clone(),
            amount: request.amount,
            balance_after: new_balance,
            description: request.description.clone(),
            metadata: request.metadata.clone(),
            created_at: request.created_at,
        });
        stored.record.credits = new_balance;
        stored.record.updated_at = request.created_at;

        Ok(stored.record.clone())
    }

    async fn list_history(&self, user_id: UserId, filter: &HistoryFilter) -> Result<Vec<CreditEntryDBResponse>> {
        let state = self.state.lock().await;
        let Some(stored) = state.users.get(&user_id) else {
            return Ok(Vec::new());
        };

        let limit = usize::try_from(filter.limit.max(0)).unwrap_or(usize::MAX);
        if limit == 0 {
            return Ok(Vec::new());
        }

        // Only references are ordered; just the returned page is cloned
        let mut entries: Vec<_> = stored
            .history
            .iter()
            .enumerate()
            .filter(|(_, entry)| filter.since.is_none_or(|since| entry.created_at >= since))
            .collect();
        if entries.len() > limit {
            entries.select_nth_unstable_by(limit - 1, newest_first);
            entries.truncate(limit);
        }
        entries.sort_unstable_by(newest_first);

        Ok(entries.into_iter().map(|(_, entry)| entry.clone()).collect())
    }

    async fn list_reset_candidates(&self, cutoff: DateTime<Utc>) -> Result<Vec<UserId>> {
        let state = self.state.lock().await;
        let mut candidates: Vec<_> = state
            .users
            .values()
            .filter(|stored| stored.record.last_credit_reset.is_none_or(|last| last < cutoff))
            .map(|stored| (stored.record.created_at, stored.record.id))
            .collect();
        candidates.sort();
        Ok(candidates.into_iter().map(|(_, id)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::users::Role;
    use chrono::{TimeDelta, TimeZone};

    fn create_request(email: &str, initial_credits: i64) -> UserCreateDBRequest {
        UserCreateDBRequest {
            email: email.to_string(),
            display_name: None,
            password_hash: None,
            role: Role::StandardUser,
            is_admin: false,
            initial_credits,
            created_at: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        }
    }

    fn debit(user_id: UserId, amount: i64, at: DateTime<Utc>) -> CreditEntryCreateDBRequest {
        CreditEntryCreateDBRequest {
            user_id,
            operation: operations::USAGE.to_string(),
            amount: -amount,
            description: format!("Used {amount} credits"),
            metadata: None,
            created_at: at,
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_a_unique_violation() {
        let store = InMemoryCreditStore::new();
        store.create_user(&create_request("a@example.com", 10)).await.unwrap();
        let err = store.create_user(&create_request("a@example.com", 10)).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn rejected_debit_changes_nothing() {
        let store = InMemoryCreditStore::new();
        let user = store.create_user(&create_request("b@example.com", 1)).await.unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();

        let err = store.apply_entry(&debit(user.id, 3, now)).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::InsufficientBalance {
                required: 3,
                available: 1
            }
        ));

        let reloaded = store.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(reloaded.credits, 1);
        assert!(store.list_history(user.id, &HistoryFilter::new(50)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reset_is_conditional_on_the_window() {
        let store = InMemoryCreditStore::new();
        let user = store.create_user(&create_request("c@example.com", 3)).await.unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();

        let request = CreditResetDBRequest {
            user_id: user.id,
            daily_amount: 10,
            now,
        };
        let first = store.reset_if_due(&request).await.unwrap();
        assert!(first.was_applied());
        assert_eq!(first.user().credits, 10);

        let second = store
            .reset_if_due(&CreditResetDBRequest {
                now: now + TimeDelta::hours(1),
                ..request
            })
            .await
            .unwrap();
        assert!(!second.was_applied());
        assert_eq!(second.user().last_credit_reset, Some(now));
        assert_eq!(second.user().daily_credit_reset_count, 1);

        let history = store.list_history(user.id, &HistoryFilter::new(10)).await.unwrap();
        assert_eq!(history.len(), 1);
        let metadata: ResetMetadata = serde_json::from_value(history[0].metadata.clone().unwrap()).unwrap();
        assert_eq!(metadata, ResetMetadata::daily(3, 1));
    }

    #[tokio::test]
    async fn history_is_newest_first_and_filtered() {
        let store = InMemoryCreditStore::new();
        let user = store.create_user(&create_request("d@example.com", 10)).await.unwrap();
        let base = Utc.with_ymd_and_hms(2025, 6, 15, 8, 0, 0).unwrap();

        for hour in 0..4 {
            store.apply_entry(&debit(user.id, 1, base + TimeDelta::hours(hour))).await.unwrap();
        }

        let all = store.list_history(user.id, &HistoryFilter::new(10)).await.unwrap();
        let balances: Vec<_> = all.iter().map(|e| e.balance_after).collect();
        assert_eq!(balances, vec![6, 7, 8, 9]);

        let recent = store
            .list_history(user.id, &HistoryFilter::new(10).since(base + TimeDelta::hours(2)))
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);

        let limited = store.list_history(user.id, &HistoryFilter::new(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].balance_after, 6);
    }

    #[tokio::test]
    async fn small_page_of_a_long_ledger_is_the_newest_entries() {
        let store = InMemoryCreditStore::new();
        let user = store.create_user(&create_request("long@example.com", 5_000)).await.unwrap();
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();

        // Out-of-order timestamps so the page cannot just be the tail of the ledger
        for i in 0..2_000i64 {
            let minutes = if i % 2 == 0 { i } else { 4_000 - i };
            store.apply_entry(&debit(user.id, 1, base + TimeDelta::minutes(minutes))).await.unwrap();
        }

        let page = store.list_history(user.id, &HistoryFilter::new(3)).await.unwrap();
        let times: Vec<_> = page.iter().map(|e| e.created_at).collect();
        assert_eq!(
            times,
            vec![
                base + TimeDelta::minutes(3_999),
                base + TimeDelta::minutes(3_997),
                base + TimeDelta::minutes(3_995),
            ]
        );

        assert!(store.list_history(user.id, &HistoryFilter::new(0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reset_candidates_include_never_reset_and_stale_users() {
        let store = InMemoryCreditStore::new();
        let fresh = store.create_user(&create_request("fresh@example.com", 10)).await.unwrap();
        let stale = store.create_user(&create_request("stale@example.com", 10)).await.unwrap();
        let never = store.create_user(&create_request("never@example.com", 10)).await.unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();

        for (id, at) in [(fresh.id, now - TimeDelta::hours(2)), (stale.id, now - TimeDelta::hours(30))] {
            store
                .reset_if_due(&CreditResetDBRequest {
                    user_id: id,
                    daily_amount: 10,
                    now: at,
                })
                .await
                .unwrap();
        }

        let candidates = store.list_reset_candidates(now - TimeDelta::hours(24)).await.unwrap();
        assert_eq!(candidates.len(), 2);
        assert!(candidates.contains(&stale.id));
        assert!(candidates.contains(&never.id));
    }
}
