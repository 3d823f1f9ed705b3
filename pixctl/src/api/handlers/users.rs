use crate::{
    api::{
        extract::ApiJson,
        models::users::{UserResponse, UserUpdate},
    },
    auth::permissions::{operation, resource, RequiresPermission},
    db::models::users::UserUpdateDBRequest,
    errors::{Error, Result},
    AppState,
};
use axum::{extract::State, response::Json};
use tracing::debug;

// GET /users/me - Current user's full record
#[utoipa::path(
    get,
    path = "/users/me",
    tag = "users",
    summary = "Get current user",
    description = "The caller's complete account record, credit fields included. A due daily reset is applied first.",
    responses(
        (status = 200, description = "User information", body = UserResponse),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn get_me(
    State(state): State<AppState>,
    current_user: RequiresPermission<resource::Users, operation::ReadOwn>,
) -> Result<Json<UserResponse>> {
    let user = state.credits.check_and_reset(current_user.id).await?;
    Ok(Json(UserResponse::from(user)))
}

// PATCH /users/updateMe - Update own profile fields
#[utoipa::path(
    patch,
    path = "/users/updateMe",
    tag = "users",
    summary = "Update current user",
    description = "Update allow-listed profile fields. Credit fields are ignored. Writes for the same user closer together than the throttle window are rejected.",
    request_body = UserUpdate,
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 400, description = "No updatable fields in the request"),
        (status = 401, description = "Unauthorized"),
        (status = 429, description = "Too many profile updates"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn update_me(
    State(state): State<AppState>,
    current_user: RequiresPermission<resource::Users, operation::UpdateOwn>,
    ApiJson(update): ApiJson<UserUpdate>,
) -> Result<Json<UserResponse>> {
    let request = UserUpdateDBRequest::from(update);
    if request.is_empty() {
        return Err(Error::BadRequest {
            message: "No valid fields to update".to_string(),
        });
    }

    if !state.throttle.try_acquire(current_user.id).await {
        debug!("Throttled profile update for user {}", current_user.id);
        return Err(Error::Throttled {
            message: "Profile updated too recently, try again shortly".to_string(),
        });
    }

    let user = state
        .store
        .update_profile(current_user.id, &request, state.credits.now())
        .await?;
    Ok(Json(UserResponse::from(user)))
}
