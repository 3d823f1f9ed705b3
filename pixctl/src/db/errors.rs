use thiserror::Error;

/// Errors surfaced by the storage layer.
#[derive(Debug, Error)]
pub enum DbError {
    /// The requested row does not exist
    #[error("Entity not found")]
    NotFound,

    /// A unique constraint was violated (e.g. duplicate email)
    #[error("Unique constraint violation{}", constraint.as_deref().map(|c| format!(" on {c}")).unwrap_or_default())]
    UniqueViolation { constraint: Option<String> },

    /// A check constraint was violated (e.g. a balance would go negative)
    #[error("Check constraint violation{}", constraint.as_deref().map(|c| format!(" on {c}")).unwrap_or_default())]
    CheckViolation { constraint: Option<String> },

    /// A debit was rejected because the balance does not cover it
    #[error("Insufficient balance: {required} required, {available} available")]
    InsufficientBalance { required: i64, available: i64 },

    /// A credit would push the balance past what the column can hold
    #[error("Balance overflow: cannot add {amount} to {available}")]
    BalanceOverflow { amount: i64, available: i64 },

    /// Anything else coming out of the driver
    #[error(transparent)]
    Other(sqlx::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => DbError::NotFound,
            sqlx::Error::Database(db_err) => {
                let constraint = db_err.constraint().map(str::to_string);
                // SQLSTATE 23505 = unique_violation, 23514 = check_violation
                match db_err.code().as_deref() {
                    Some("23505") => DbError::UniqueViolation { constraint },
                    Some("23514") => DbError::CheckViolation { constraint },
                    _ => DbError::Other(err),
                }
            }
            _ => DbError::Other(err),
        }
    }
}
