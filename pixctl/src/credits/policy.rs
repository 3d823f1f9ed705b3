//! Pure reset and usage arithmetic. Nothing in here performs I/O or reads a clock;
//! every function takes `now` from the caller.

use crate::db::models::credits::CreditEntryDBResponse;
use chrono::{DateTime, FixedOffset, Local, NaiveTime, Offset, TimeDelta, Utc};

/// Credits a reset restores when nothing is configured.
pub const DEFAULT_DAILY_CREDIT_AMOUNT: i64 = 10;

/// Rolling window between two resets, in hours. Not a calendar day.
pub const RESET_WINDOW_HOURS: i64 = 24;

pub fn reset_window() -> TimeDelta {
    TimeDelta::hours(RESET_WINDOW_HOURS)
}

/// Whether a reset is due for an account whose last reset happened at `last_reset`.
///
/// Never-reset accounts are always due. A `last_reset` in the future (clock skew
/// between writers) is never due.
pub fn needs_reset(last_reset: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match last_reset {
        None => true,
        Some(last) => now.signed_duration_since(last) >= reset_window(),
    }
}

/// Accounts whose last reset is strictly older than this instant are batch candidates.
pub fn reset_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - reset_window()
}

/// Countdown to the next reset as shown on the dashboard and status endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetCountdown {
    /// A reset may happen right now
    Ready,
    /// Time left before the window elapses
    Pending {
        hours: i64,
        minutes: i64,
        next_reset_time: DateTime<Utc>,
    },
    /// The next instant could not be computed
    Unknown,
}

pub fn time_until_reset(last_reset: Option<DateTime<Utc>>, now: DateTime<Utc>) -> ResetCountdown {
    let Some(last) = last_reset else {
        return ResetCountdown::Ready;
    };
    let Some(next_reset_time) = last.checked_add_signed(reset_window()) else {
        return ResetCountdown::Unknown;
    };

    let remaining = next_reset_time.signed_duration_since(now);
    if remaining <= TimeDelta::zero() {
        return ResetCountdown::Ready;
    }
    // A last reset stamped in the future must not show more than one full window
    let remaining = remaining.min(reset_window());

    ResetCountdown::Pending {
        hours: remaining.num_hours(),
        minutes: remaining.num_minutes() % 60,
        next_reset_time,
    }
}

/// Offset that defines "today" for usage statistics: the configured one, or the
/// server's local offset at `now`.
pub fn day_offset(now: DateTime<Utc>, utc_offset_minutes: Option<i32>) -> FixedOffset {
    let utc = Utc.fix();
    match utc_offset_minutes {
        Some(minutes) => minutes.checked_mul(60).and_then(FixedOffset::east_opt).unwrap_or(utc),
        None => now.with_timezone(&Local).offset().fix(),
    }
}

/// Start of the local day containing `now`, expressed in UTC.
pub fn local_midnight(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    now.with_timezone(&offset)
        .date_naive()
        .and_time(NaiveTime::MIN)
        .and_local_timezone(offset)
        .single()
        .map(|midnight| midnight.with_timezone(&Utc))
        .unwrap_or(now)
}

/// Credits spent in `[since, until)`: the absolute sum of negative entries.
pub fn usage_between(entries: &[CreditEntryDBResponse], since: DateTime<Utc>, until: DateTime<Utc>) -> i64 {
    entries
        .iter()
        .filter(|entry| entry.amount < 0 && entry.created_at >= since && entry.created_at < until)
        .map(|entry| entry.amount.saturating_abs())
        .fold(0i64, i64::saturating_add)
}

pub fn remaining_today(daily_limit: i64, todays_usage: i64) -> i64 {
    daily_limit.saturating_sub(todays_usage).max(0)
}
