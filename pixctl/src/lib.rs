pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod credits;
pub mod db;
pub mod errors;
pub mod openapi;
pub mod throttle;
pub mod types;

#[cfg(test)]
mod test_utils;

use crate::{
    api::models::users::Role,
    auth::password,
    config::{Config, CorsOrigin},
    credits::{Clock, CreditService, ResetScheduler},
    db::{models::users::UserCreateDBRequest, store::CreditStore},
    openapi::ApiDoc,
    throttle::{AttemptLimiter, MokaAttemptLimiter, MokaThrottle, UpdateThrottle},
};
use axum::{
    http::{header, HeaderValue, Method, Request, Response},
    routing::{get, patch, post},
    Router,
};
use bon::Builder;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, instrument, Span};
use utoipa::OpenApi;
use utoipa_rapidoc::RapiDoc;

pub use types::{EntryId, UserId};

#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn CreditStore>,
    pub credits: CreditService,
    pub throttle: Arc<dyn UpdateThrottle>,
    pub login_limiter: Arc<dyn AttemptLimiter>,
    pub scheduler: Arc<ResetScheduler>,
}

impl AppState {
    /// Wire the credit service, scheduler and throttle over one store and clock
    pub fn assemble(config: Config, store: Arc<dyn CreditStore>, clock: Arc<dyn Clock>) -> Self {
        let credits = CreditService::new(store.clone(), clock, config.credits.clone());
        let scheduler = Arc::new(ResetScheduler::new(credits.clone(), config.scheduler.clone()));
        let throttle: Arc<dyn UpdateThrottle> = Arc::new(MokaThrottle::new(config.auth.profile_update_throttle));
        let login_limit = &config.auth.login_rate_limit;
        let login_limiter: Arc<dyn AttemptLimiter> =
            Arc::new(MokaAttemptLimiter::new(login_limit.max_attempts, login_limit.window));

        AppState::builder()
            .config(config)
            .store(store)
            .credits(credits)
            .throttle(throttle)
            .login_limiter(login_limiter)
            .scheduler(scheduler)
            .build()
    }
}

/// Create the initial admin user if it doesn't exist
pub async fn create_initial_admin_user(
    email: &str,
    password: Option<&str>,
    store: &dyn CreditStore,
    now: DateTime<Utc>,
) -> anyhow::Result<UserId> {
    let email = email.trim().to_lowercase();
    let password_hash = password
        .map(password::hash_string)
        .transpose()
        .map_err(|e| anyhow::anyhow!("Failed to hash admin password: {e}"))?;

    if let Some(existing_user) = store.get_user_by_email(&email).await? {
        // User exists - update password if provided
        if let Some(password_hash) = password_hash {
            store.set_password_hash(existing_user.id, &password_hash, now).await?;
        }
        return Ok(existing_user.id);
    }

    // Credits arrive with the first reset
    let created_user = store
        .create_user(&UserCreateDBRequest {
            email,
            display_name: None,
            password_hash,
            role: Role::PlatformManager,
            is_admin: true,
            initial_credits: 0,
            created_at: now,
        })
        .await?;

    info!("Created initial admin user {}", created_user.id);
    Ok(created_user.id)
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors_config = &config.auth.cors;

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    // Credentials cannot be combined with a wildcard origin
    let mut cors = if cors_config.allowed_origins.contains(&CorsOrigin::Wildcard) {
        cors.allow_origin(AllowOrigin::any())
    } else {
        let mut origins = Vec::new();
        for origin in &cors_config.allowed_origins {
            origins.push(String::from(origin.clone()).parse::<HeaderValue>()?);
        }
        cors.allow_origin(origins).allow_credentials(cors_config.allow_credentials)
    };

    if let Some(max_age) = cors_config.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

#[instrument(skip(state))]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let api_routes = Router::new()
        // Sessions
        .route("/auth/signup", post(api::handlers::auth::signup))
        .route("/auth/login", post(api::handlers::auth::login))
        .route("/auth/logout", post(api::handlers::auth::logout))
        // Current user
        .route("/users/me", get(api::handlers::users::get_me))
        .route("/users/updateMe", patch(api::handlers::users::update_me))
        // Credits
        .route("/users/addCredits", post(api::handlers::credits::add_credits))
        .route("/users/useCredits", post(api::handlers::credits::use_credits))
        .route("/users/creditHistory", get(api::handlers::credits::credit_history))
        .route("/users/dashboard", get(api::handlers::credits::dashboard))
        .route("/users/creditStatus", get(api::handlers::credits::credit_status))
        // Reset job administration
        .route("/admin/credits/reset", post(api::handlers::jobs::trigger_credit_reset))
        .route("/admin/jobs", get(api::handlers::jobs::job_status))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                })
                .on_response(|response: &Response<_>, latency: Duration, _span: &Span| {
                    tracing::info!(
                        status = %response.status(),
                        latency = ?latency,
                        "request completed"
                    );
                }),
        )
        .with_state(state.clone());

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .nest("/api", api_routes)
        .merge(RapiDoc::with_openapi("/api/openapi.json", ApiDoc::openapi()).path("/api/docs"));

    let cors_layer = create_cors_layer(&state.config)?;
    Ok(router.layer(cors_layer))
}
