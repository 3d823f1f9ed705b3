use crate::db::errors::DbError;
use crate::types::{Operation, Permission};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Errors returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Authentication required")]
    Unauthenticated { message: Option<String> },

    #[error("Insufficient permissions to {action} {resource}")]
    InsufficientPermissions {
        required: Permission,
        action: Operation,
        resource: String,
    },

    #[error("{resource} with id {id} not found")]
    NotFound { resource: String, id: String },

    #[error("{message}")]
    BadRequest { message: String },

    #[error("Insufficient credits: {required} required, {available} available")]
    InsufficientCredits { required: i64, available: i64 },

    #[error("{message}")]
    Throttled { message: String },

    #[error("{message}")]
    Conflict { message: String },

    #[error("Credit reset job is already running")]
    JobAlreadyRunning,

    #[error(transparent)]
    Database(DbError),

    #[error("Internal error while trying to {operation}")]
    Internal { operation: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<DbError> for Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::InsufficientBalance { required, available } => Error::InsufficientCredits { required, available },
            DbError::BalanceOverflow { amount, available } => Error::BadRequest {
                message: format!("Adding {amount} credits would exceed the maximum balance (currently {available})"),
            },
            DbError::UniqueViolation { .. } => Error::Conflict {
                message: "A user with this email already exists".to_string(),
            },
            other => Error::Database(other),
        }
    }
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::InsufficientPermissions { .. } => StatusCode::FORBIDDEN,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::BadRequest { .. } | Error::InsufficientCredits { .. } => StatusCode::BAD_REQUEST,
            Error::Throttled { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Conflict { .. } | Error::JobAlreadyRunning => StatusCode::CONFLICT,
            Error::Database(DbError::NotFound) => StatusCode::NOT_FOUND,
            Error::Database(DbError::UniqueViolation { .. }) => StatusCode::CONFLICT,
            Error::Database(_) | Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to clients. Storage details stay in the logs.
    fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| self.to_string()),
            Error::Database(DbError::NotFound) => "Resource not found".to_string(),
            Error::Database(_) | Error::Internal { .. } => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        let body = match &self {
            Error::InsufficientCredits { required, available } => json!({
                "message": self.user_message(),
                "required": required,
                "available": available,
            }),
            _ => json!({ "message": self.user_message() }),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Resource;

    #[test]
    fn insufficient_balance_becomes_insufficient_credits() {
        let err = Error::from(DbError::InsufficientBalance { required: 3, available: 1 });
        assert!(matches!(err, Error::InsufficientCredits { required: 3, available: 1 }));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn duplicate_email_is_a_conflict() {
        let err = Error::from(DbError::UniqueViolation {
            constraint: Some("users_email_key".to_string()),
        });
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn status_codes() {
        assert_eq!(Error::Unauthenticated { message: None }.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            Error::InsufficientPermissions {
                required: Permission::Allow(Resource::Jobs, Operation::UpdateAll),
                action: Operation::UpdateAll,
                resource: "Jobs".to_string(),
            }
            .status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            Error::Throttled {
                message: "slow down".to_string()
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(Error::JobAlreadyRunning.status_code(), StatusCode::CONFLICT);
        assert_eq!(Error::from(DbError::NotFound).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::from(DbError::Other(sqlx::Error::PoolTimedOut)).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn balance_overflow_is_a_bad_request() {
        let err = Error::from(DbError::BalanceOverflow {
            amount: i64::MAX,
            available: 10,
        });
        assert!(matches!(err, Error::BadRequest { .. }));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn storage_details_are_not_exposed() {
        let err = Error::from(DbError::Other(sqlx::Error::PoolTimedOut));
        assert_eq!(err.user_message(), "Internal server error");
    }
}
