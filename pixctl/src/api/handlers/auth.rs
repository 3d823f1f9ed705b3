use crate::{
    api::{
        extract::ApiJson,
        models::{
            auth::{AuthResponse, LoginRequest, SignupRequest},
            users::{Role, UserResponse},
        },
    },
    auth::{client_ip::ClientIp, password, session},
    db::models::users::{UserCreateDBRequest, UserDBResponse},
    errors::{Error, Result},
    AppState,
};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use tracing::{debug, info};

const MIN_PASSWORD_LENGTH: usize = 8;

fn invalid_credentials() -> Error {
    Error::Unauthenticated {
        message: Some("Incorrect email or password".to_string()),
    }
}

/// Session token in the body plus the same token as a cookie
fn session_response(status: StatusCode, user: UserDBResponse, state: &AppState) -> Result<Response> {
    let token = session::create_session_token(user.id, &state.config)?;
    let cookie = session::session_cookie(&token, &state.config);
    let body = AuthResponse {
        token,
        user: UserResponse::from(user),
    };
    Ok((status, [(header::SET_COOKIE, cookie)], Json(body)).into_response())
}

// POST /auth/signup - Create an account with the signup bonus
#[utoipa::path(
    post,
    path = "/auth/signup",
    tag = "auth",
    summary = "Sign up",
    description = "Create a standard account funded with the signup bonus and start a session.",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created", body = AuthResponse),
        (status = 400, description = "Invalid email or password"),
        (status = 409, description = "Email already registered"),
        (status = 500, description = "Internal server error"),
    )
)]
pub async fn signup(State(state): State<AppState>, ApiJson(request): ApiJson<SignupRequest>) -> Result<Response> {
    let email = request.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(Error::BadRequest {
            message: "Please provide a valid email address".to_string(),
        });
    }
    if request.password.len() < MIN_PASSWORD_LENGTH {
        return Err(Error::BadRequest {
            message: format!("Password must be at least {MIN_PASSWORD_LENGTH} characters"),
        });
    }

    let password_hash = password::hash_string(&request.password)?;
    let user = state
        .store
        .create_user(&UserCreateDBRequest {
            email,
            display_name: request.display_name.filter(|name| !name.trim().is_empty()),
            password_hash: Some(password_hash),
            role: Role::StandardUser,
            is_admin: false,
            initial_credits: state.config.credits.signup_bonus,
            created_at: state.credits.now(),
        })
        .await?;

    info!("New account {} created with {} credits", user.id, user.credits);
    session_response(StatusCode::CREATED, user, &state)
}

// POST /auth/login - Start a session
#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "auth",
    summary = "Log in",
    description = "Verify credentials, apply a due daily reset and start a session. Attempts are limited per client address.",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = AuthResponse),
        (status = 401, description = "Incorrect email or password"),
        (status = 429, description = "Too many login attempts from this address"),
        (status = 500, description = "Internal server error"),
    )
)]
pub async fn login(
    State(state): State<AppState>,
    ClientIp(client): ClientIp,
    ApiJson(request): ApiJson<LoginRequest>,
) -> Result<Response> {
    if !state.login_limiter.try_attempt(client).await {
        debug!("Login attempts exhausted for {}", client);
        let minutes = state.config.auth.login_rate_limit.window.as_secs().div_ceil(60);
        return Err(Error::Throttled {
            message: format!("Too many login attempts from this IP, please try again after {minutes} minutes"),
        });
    }

    let email = request.email.trim().to_lowercase();
    let user = state.store.get_user_by_email(&email).await?.ok_or_else(invalid_credentials)?;

    let verified = user
        .password_hash
        .as_deref()
        .is_some_and(|hash| password::verify_string(&request.password, hash));
    if !verified {
        debug!("Failed login for user {}", user.id);
        return Err(invalid_credentials());
    }

    let user = state.credits.check_and_reset(user.id).await?;
    session_response(StatusCode::OK, user, &state)
}

// POST /auth/logout - End the session
#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "auth",
    summary = "Log out",
    description = "Clear the session cookie. Bearer tokens stay valid until they expire.",
    responses(
        (status = 204, description = "Session cookie cleared"),
    )
)]
pub async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::NO_CONTENT, [(header::SET_COOKIE, session::clear_session_cookie(&state.config))])
}
