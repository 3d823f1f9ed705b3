use super::{
    clock::Clock,
    policy::{self, ResetCountdown},
};
use crate::{
    config::CreditsConfig,
    db::{
        errors::DbError,
        models::{
            credits::{operations, CreditEntryCreateDBRequest, CreditEntryDBResponse, CreditResetDBRequest, ResetOutcome},
            users::UserDBResponse,
        },
        store::{CreditStore, HistoryFilter},
    },
    errors::{Error, Result},
    types::UserId,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Snapshot returned by the credit status endpoint
#[derive(Debug, Clone)]
pub struct CreditStatus {
    pub user: UserDBResponse,
    pub time_until_reset: ResetCountdown,
    pub daily_limit: i64,
}

/// Balance operations for a single account. Every path that changes a balance
/// goes through the store's atomic primitives; this type only validates input,
/// stamps the time and shapes ledger entries.
#[derive(Clone)]
pub struct CreditService {
    store: Arc<dyn CreditStore>,
    clock: Arc<dyn Clock>,
    settings: CreditsConfig,
}

fn user_not_found(user_id: UserId) -> Error {
    Error::NotFound {
        resource: "User".to_string(),
        id: user_id.to_string(),
    }
}

fn map_user_error(user_id: UserId) -> impl FnOnce(DbError) -> Error {
    move |err| match err {
        DbError::NotFound => user_not_found(user_id),
        other => Error::from(other),
    }
}

fn validate_amount(amount: i64) -> Result<()> {
    if amount <= 0 {
        return Err(Error::BadRequest {
            message: "Amount must be a positive integer".to_string(),
        });
    }
    Ok(())
}

impl CreditService {
    pub fn new(store: Arc<dyn CreditStore>, clock: Arc<dyn Clock>, settings: CreditsConfig) -> Self {
        Self { store, clock, settings }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn daily_amount(&self) -> i64 {
        self.settings.daily_amount
    }

    pub fn settings(&self) -> &CreditsConfig {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn CreditStore> {
        &self.store
    }

    /// The one reset executor. Both the lazy path and the batch job end up here.
    /// The due check is repeated by the store while it holds the user exclusively,
    /// so concurrent callers reset at most once per window.
    #[instrument(skip(self))]
    pub async fn reset_credits(&self, user_id: UserId) -> Result<ResetOutcome> {
        let request = CreditResetDBRequest {
            user_id,
            daily_amount: self.settings.daily_amount,
            now: self.clock.now(),
        };
        let outcome = self.store.reset_if_due(&request).await.map_err(map_user_error(user_id))?;

        match &outcome {
            ResetOutcome::Applied(user) => info!(
                "Reset credits for user {} to {} (reset #{})",
                user_id, user.credits, user.daily_credit_reset_count
            ),
            ResetOutcome::NotDue(_) => debug!("Credit reset not due for user {}", user_id),
        }
        Ok(outcome)
    }

    /// Lazy reset run before any credit-touching request. Storage failures propagate;
    /// a reset is never assumed.
    pub async fn check_and_reset(&self, user_id: UserId) -> Result<UserDBResponse> {
        let user = self.store.get_user(user_id).await?.ok_or_else(|| user_not_found(user_id))?;
        if !policy::needs_reset(user.last_credit_reset, self.clock.now()) {
            return Ok(user);
        }
        Ok(self.reset_credits(user_id).await?.into_user())
    }

    /// Debit `amount` credits. Fails with `InsufficientCredits` and changes nothing
    /// when the balance does not cover it.
    #[instrument(skip(self))]
    pub async fn use_credits(&self, user_id: UserId, amount: i64, operation: Option<&str>) -> Result<UserDBResponse> {
        validate_amount(amount)?;
        let operation = operation.map(str::trim).filter(|op| !op.is_empty()).unwrap_or(operations::USAGE);
        if operations::is_reserved(operation) {
            return Err(Error::BadRequest {
                message: format!("Operation '{operation}' cannot be used to spend credits"),
            });
        }

        let request = CreditEntryCreateDBRequest {
            user_id,
            operation: operation.to_string(),
            amount: -amount,
            description: format!("Used {amount} credits for {operation}"),
            metadata: None,
            created_at: self.clock.now(),
        };
        let user = self.store.apply_entry(&request).await.map_err(map_user_error(user_id))?;

        debug!("User {} spent {} credits on {}, {} left", user_id, amount, operation, user.credits);
        Ok(user)
    }

    /// Grant `amount` credits, recording `description` verbatim.
    #[instrument(skip(self))]
    pub async fn add_credits(&self, user_id: UserId, amount: i64, description: Option<String>) -> Result<UserDBResponse> {
        validate_amount(amount)?;

        let request = CreditEntryCreateDBRequest {
            user_id,
            operation: operations::GRANT.to_string(),
            amount,
            description: description.unwrap_or_else(|| format!("Added {amount} credits")),
            metadata: None,
            created_at: self.clock.now(),
        };
        let user = self.store.apply_entry(&request).await.map_err(map_user_error(user_id))?;

        info!("Granted {} credits to user {}, balance now {}", amount, user_id, user.credits);
        Ok(user)
    }

    /// Ledger entries newest-first. `limit` falls back to the configured default and is
    /// clamped to `[1, history_max_limit]`.
    pub async fn credit_history(&self, user_id: UserId, limit: Option<i64>) -> Result<Vec<CreditEntryDBResponse>> {
        let limit = limit
            .unwrap_or(self.settings.history_default_limit)
            .clamp(1, self.settings.history_max_limit.max(1));
        Ok(self.store.list_history(user_id, &HistoryFilter::new(limit)).await?)
    }

    pub async fn credit_status(&self, user_id: UserId) -> Result<CreditStatus> {
        let user = self.check_and_reset(user_id).await?;
        let time_until_reset = policy::time_until_reset(user.last_credit_reset, self.clock.now());
        Ok(CreditStatus {
            user,
            time_until_reset,
            daily_limit: self.settings.daily_amount,
        })
    }
}
