use crate::{
    api::models::users::{Role, UserResponse},
    auth::session,
    config::{Config, DatabaseConfig},
    credits::clock::ManualClock,
    db::{models::users::UserCreateDBRequest, store::InMemoryCreditStore},
    AppState,
};
use axum_test::TestServer;
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Router over a fresh in-memory store, with the credit engine on a manual clock
pub fn create_test_app() -> (TestServer, AppState, Arc<ManualClock>) {
    create_test_app_with_config(create_test_config())
}

pub fn create_test_app_with_config(config: Config) -> (TestServer, AppState, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()));
    let state = AppState::assemble(config, Arc::new(InMemoryCreditStore::new()), clock.clone());
    let router = crate::build_router(&state).expect("Failed to build test router");
    let server = TestServer::new(router).expect("Failed to create test server");
    (server, state, clock)
}

pub fn create_test_config() -> Config {
    let mut config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        database: DatabaseConfig::Memory,
        secret_key: Some("test-secret-key-for-testing-only".to_string()),
        admin_email: "admin@test.com".to_string(),
        admin_password: None,
        ..Default::default()
    };
    // Keep "today" independent of the machine running the tests
    config.credits.utc_offset_minutes = Some(0);
    config.scheduler.enabled = false;
    config
}

async fn insert_user(state: &AppState, role: Role, is_admin: bool) -> UserResponse {
    let email = format!("testuser_{}@example.com", Uuid::new_v4().simple());
    let user = state
        .store
        .create_user(&UserCreateDBRequest {
            email,
            display_name: Some("Test User".to_string()),
            password_hash: None,
            role,
            is_admin,
            initial_credits: state.config.credits.signup_bonus,
            created_at: state.credits.now(),
        })
        .await
        .expect("Failed to create test user");
    UserResponse::from(user)
}

pub async fn create_test_user(state: &AppState, role: Role) -> UserResponse {
    insert_user(state, role, false).await
}

pub async fn create_test_admin_user(state: &AppState, role: Role) -> UserResponse {
    insert_user(state, role, true).await
}

pub fn session_token(user: &UserResponse, state: &AppState) -> String {
    session::create_session_token(user.id, &state.config).expect("Failed to sign test token")
}

pub fn add_auth_headers(user: &UserResponse, state: &AppState) -> (String, String) {
    ("Authorization".to_string(), format!("Bearer {}", session_token(user, state)))
}
