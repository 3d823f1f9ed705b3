use crate::db::models::users::{UserDBResponse, UserUpdateDBRequest};
use crate::types::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// Role enum for different job functions
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    StandardUser,
    BillingManager,
    PlatformManager,
}

/// Profile update. Only these fields can be changed through the API; credit
/// fields are not accepted here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    pub display_name: Option<String>,
    pub profile_picture: Option<String>,
    pub bio: Option<String>,
    #[schema(minimum = 0)]
    pub images_generated: Option<i64>,
    #[schema(minimum = 0)]
    pub images_edited: Option<i64>,
}

impl From<UserUpdate> for UserUpdateDBRequest {
    fn from(update: UserUpdate) -> Self {
        Self {
            display_name: update.display_name,
            profile_picture: update.profile_picture,
            bio: update.bio,
            images_generated: update.images_generated.filter(|n| *n >= 0),
            images_edited: update.images_edited.filter(|n| *n >= 0),
        }
    }
}

// User response models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub email: String,
    pub display_name: Option<String>,
    pub profile_picture: Option<String>,
    pub bio: Option<String>,
    pub role: Role,
    pub is_admin: bool,
    pub credits: i64,
    pub last_credit_reset: Option<DateTime<Utc>>,
    pub daily_credit_reset_count: i64,
    pub images_generated: i64,
    pub images_edited: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UserDBResponse> for UserResponse {
    fn from(db: UserDBResponse) -> Self {
        Self {
            id: db.id,
            email: db.email,
            display_name: db.display_name,
            profile_picture: db.profile_picture,
            bio: db.bio,
            role: db.role,
            is_admin: db.is_admin,
            credits: db.credits,
            last_credit_reset: db.last_credit_reset,
            daily_credit_reset_count: db.daily_credit_reset_count,
            images_generated: db.images_generated,
            images_edited: db.images_edited,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

/// The authenticated caller, resolved from the session token
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CurrentUser {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub email: String,
    pub is_admin: bool,
    pub role: Role,
    pub display_name: Option<String>,
}

impl From<UserDBResponse> for CurrentUser {
    fn from(db: UserDBResponse) -> Self {
        Self {
            id: db.id,
            email: db.email,
            is_admin: db.is_admin,
            role: db.role,
            display_name: db.display_name,
        }
    }
}
