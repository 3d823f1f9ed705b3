use crate::api::models::users::Role;
use crate::types::UserId;
use chrono::{DateTime, Utc};

/// Database request for creating a new user
#[derive(Debug, Clone)]
pub struct UserCreateDBRequest {
    pub email: String,
    pub display_name: Option<String>,
    pub password_hash: Option<String>,
    pub role: Role,
    pub is_admin: bool,
    /// Balance the account starts with (the signup bonus)
    pub initial_credits: i64,
    pub created_at: DateTime<Utc>,
}

/// Database request for updating profile fields. Credit fields are deliberately absent.
#[derive(Debug, Clone, Default)]
pub struct UserUpdateDBRequest {
    pub display_name: Option<String>,
    pub profile_picture: Option<String>,
    pub bio: Option<String>,
    pub images_generated: Option<i64>,
    pub images_edited: Option<i64>,
}

impl UserUpdateDBRequest {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.profile_picture.is_none()
            && self.bio.is_none()
            && self.images_generated.is_none()
            && self.images_edited.is_none()
    }
}

/// Database response for a user, credit columns included
#[derive(Debug, Clone, PartialEq)]
pub struct UserDBResponse {
    pub id: UserId,
    pub email: String,
    pub display_name: Option<String>,
    pub profile_picture: Option<String>,
    pub bio: Option<String>,
    pub password_hash: Option<String>,
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
