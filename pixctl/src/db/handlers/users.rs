use crate::{
    api::models::users::Role,
    db::{
        errors::{DbError, Result},
        models::users::{UserCreateDBRequest, UserDBResponse, UserUpdateDBRequest},
    },
    types::UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

// Database entity model for a user row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
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

impl From<User> for UserDBResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            display_name: user.display_name,
            profile_picture: user.profile_picture,
            bio: user.bio,
            password_hash: user.password_hash,
            role: user.role,
            is_admin: user.is_admin,
            credits: user.credits,
            last_credit_reset: user.last_credit_reset,
            daily_credit_reset_count: user.daily_credit_reset_count,
            images_generated: user.images_generated,
            images_edited: user.images_edited,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

pub struct Users<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Users<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    pub async fn create(&mut self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, email, display_name, password_hash, role, is_admin, credits, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            RETURNING id, email, display_name, profile_picture, bio, password_hash, role, is_admin, credits,
                last_credit_reset, daily_credit_reset_count, images_generated, images_edited, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&request.email)
        .bind(&request.display_name)
        .bind(&request.password_hash)
        .bind(&request.role)
        .bind(request.is_admin)
        .bind(request.initial_credits)
        .bind(request.created_at)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(UserDBResponse::from(user))
    }

    pub async fn get_by_id(&mut self, user_id: UserId) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, display_name, profile_picture, bio, password_hash, role, is_admin, credits,
                last_credit_reset, daily_credit_reset_count, images_generated, images_edited, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(user.map(UserDBResponse::from))
    }

    pub async fn get_user_by_email(&mut self, email: &str) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, display_name, profile_picture, bio, password_hash, role, is_admin, credits,
                last_credit_reset, daily_credit_reset_count, images_generated, images_edited, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(user.map(UserDBResponse::from))
    }

    /// Update profile fields only; `None` leaves a column untouched
    pub async fn update_profile(
        &mut self,
        user_id: UserId,
        request: &UserUpdateDBRequest,
        updated_at: DateTime<Utc>,
    ) -> Result<UserDBResponse> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET
                display_name = COALESCE($2, display_name),
                profile_picture = COALESCE($3, profile_picture),
                bio = COALESCE($4, bio),
                images_generated = COALESCE($5, images_generated),
                images_edited = COALESCE($6, images_edited),
                updated_at = $7
            WHERE id = $1
            RETURNING id, email, display_name, profile_picture, bio, password_hash, role, is_admin, credits,
                last_credit_reset, daily_credit_reset_count, images_generated, images_edited, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(&request.display_name)
        .bind(&request.profile_picture)
        .bind(&request.bio)
        .bind(request.images_generated)
        .bind(request.images_edited)
        .bind(updated_at)
        .fetch_optional(&mut *self.db)
        .await?;

        user.map(UserDBResponse::from).ok_or(DbError::NotFound)
    }

    pub async fn set_password_hash(&mut self, user_id: UserId, password_hash: &str, updated_at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE users SET password_hash = $2, updated_at = $3 WHERE id = $1")
            .bind(user_id)
            .bind(password_hash)
            .bind(updated_at)
            .execute(&mut *self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Write the credit columns of a user. Only called by `Credits` while it holds the user's lock.
    pub(crate) async fn set_credit_state(
        &mut self,
        user_id: UserId,
        credits: i64,
        last_credit_reset: Option<DateTime<Utc>>,
        daily_credit_reset_count: i64,
        updated_at: DateTime<Utc>,
    ) -> Result<UserDBResponse> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET
                credits = $2,
                last_credit_reset = $3,
                daily_credit_reset_count = $4,
                updated_at = $5
            WHERE id = $1
            RETURNING id, email, display_name, profile_picture, bio, password_hash, role, is_admin, credits,
                last_credit_reset, daily_credit_reset_count, images_generated, images_edited, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(credits)
        .bind(last_credit_reset)
        .bind(daily_credit_reset_count)
        .bind(updated_at)
        .fetch_optional(&mut *self.db)
        .await?;

        user.map(UserDBResponse::from).ok_or(DbError::NotFound)
    }

    /// Ids of users never reset, or last reset strictly before `cutoff`
    pub async fn list_reset_candidates(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<UserId>> {
        let ids = sqlx::query_scalar::<_, UserId>(
            r#"
            SELECT id
            FROM users
            WHERE last_credit_reset IS NULL OR last_credit_reset < $1
            ORDER BY created_at, id
            "#,
        )
        .bind(cutoff)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(ids)
    }
}
