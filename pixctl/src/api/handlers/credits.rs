use crate::{
    api::{
        extract::ApiJson,
        models::{
            credits::{
                parse_amount, AddCreditsRequest, CreditEntryResponse, CreditHistoryQuery, CreditStatusResponse,
                CreditsUpdatedResponse, DashboardResponse, UseCreditsRequest,
            },
            users::UserResponse,
        },
    },
    auth::permissions::{operation, resource, RequiresPermission},
    errors::Result,
    AppState,
};
use axum::{
    extract::{Query, State},
    response::Json,
};

// POST /users/addCredits - Grant credits to own account
#[utoipa::path(
    post,
    path = "/users/addCredits",
    tag = "credits",
    summary = "Add credits",
    description = "Grant a positive whole number of credits to the caller's account and record it on the ledger.",
    request_body = AddCreditsRequest,
    responses(
        (status = 200, description = "Credits granted", body = CreditsUpdatedResponse),
        (status = 400, description = "Amount is missing or not a positive integer"),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn add_credits(
    State(state): State<AppState>,
    current_user: RequiresPermission<resource::Credits, operation::CreateOwn>,
    ApiJson(request): ApiJson<AddCreditsRequest>,
) -> Result<Json<CreditsUpdatedResponse>> {
    let amount = parse_amount(request.amount.as_ref())?;
    state.credits.check_and_reset(current_user.id).await?;

    let user = state.credits.add_credits(current_user.id, amount, request.description).await?;
    Ok(Json(CreditsUpdatedResponse {
        user: UserResponse::from(user),
    }))
}

// POST /users/useCredits - Spend credits from own account
#[utoipa::path(
    post,
    path = "/users/useCredits",
    tag = "credits",
    summary = "Use credits",
    description = "Debit credits for an operation. Fails without changing anything when the balance does not cover the amount.",
    request_body = UseCreditsRequest,
    responses(
        (status = 200, description = "Credits spent", body = CreditsUpdatedResponse),
        (status = 400, description = "Invalid amount or insufficient credits"),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn use_credits(
    State(state): State<AppState>,
    current_user: RequiresPermission<resource::Credits, operation::UpdateOwn>,
    ApiJson(request): ApiJson<UseCreditsRequest>,
) -> Result<Json<CreditsUpdatedResponse>> {
    let amount = parse_amount(request.amount.as_ref())?;
    state.credits.check_and_reset(current_user.id).await?;

    let user = state
        .credits
        .use_credits(current_user.id, amount, request.operation.as_deref())
        .await?;
    Ok(Json(CreditsUpdatedResponse {
        user: UserResponse::from(user),
    }))
}

// GET /users/creditHistory - Own ledger, newest first
#[utoipa::path(
    get,
    path = "/users/creditHistory",
    tag = "credits",
    summary = "Credit history",
    description = "Ledger entries for the caller, newest first.",
    params(CreditHistoryQuery),
    responses(
        (status = 200, description = "Ledger entries", body = [CreditEntryResponse]),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn credit_history(
    State(state): State<AppState>,
    current_user: RequiresPermission<resource::Credits, operation::ReadOwn>,
    Query(query): Query<CreditHistoryQuery>,
) -> Result<Json<Vec<CreditEntryResponse>>> {
    let entries = state.credits.credit_history(current_user.id, query.limit).await?;
    Ok(Json(entries.into_iter().map(CreditEntryResponse::from).collect()))
}

// GET /users/dashboard - Balance, usage and recent activity
#[utoipa::path(
    get,
    path = "/users/dashboard",
    tag = "credits",
    summary = "Dashboard",
    description = "Account summary with today's usage, recent ledger activity grouped by kind, and lifetime statistics. A due daily reset is applied first.",
    responses(
        (status = 200, description = "Dashboard", body = DashboardResponse),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn dashboard(
    State(state): State<AppState>,
    current_user: RequiresPermission<resource::Credits, operation::ReadOwn>,
) -> Result<Json<DashboardResponse>> {
    let dashboard = state.credits.dashboard(current_user.id).await?;
    Ok(Json(DashboardResponse::from(dashboard)))
}

// GET /users/creditStatus - Balance and reset countdown
#[utoipa::path(
    get,
    path = "/users/creditStatus",
    tag = "credits",
    summary = "Credit status",
    description = "Current balance, reset bookkeeping and the time remaining until the next daily reset.",
    responses(
        (status = 200, description = "Credit status", body = CreditStatusResponse),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn credit_status(
    State(state): State<AppState>,
    current_user: RequiresPermission<resource::Credits, operation::ReadOwn>,
) -> Result<Json<CreditStatusResponse>> {
    let status = state.credits.credit_status(current_user.id).await?;
    Ok(Json(CreditStatusResponse::from(status)))
}

#[cfg(test)]
mod tests {
    use crate::api::models::{
        credits::{CreditEntryResponse, CreditStatusResponse, CreditsUpdatedResponse, DashboardResponse},
        users::Role,
    };
    use crate::test_utils::*;
    use chrono::TimeDelta;
    use serde_json::json;

    #[test_log::test(tokio::test)]
    async fn test_use_credits_debits_and_records_entry() {
        let (app, state, _clock) = create_test_app();
        let user = create_test_user(&state, Role::StandardUser).await;
        let (name, value) = add_auth_headers(&user, &state);

        let response = app
            .post("/api/users/useCredits")
            .add_header(name.clone(), value.clone())
            .json(&json!({"amount": 2, "operation": "text-to-image"}))
            .await;

        response.assert_status_ok();
        let body: CreditsUpdatedResponse = response.json();
        assert_eq!(body.user.credits, 8);

        let history: Vec<CreditEntryResponse> = app
            .get("/api/users/creditHistory")
            .add_header(name, value)
            .await
            .json();
        // Newest first: the debit, then the first daily reset
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].amount, -2);
        assert_eq!(history[0].operation, "text-to-image");
        assert_eq!(history[0].balance_after, 8);
        assert_eq!(history[0].description, "Used 2 credits for text-to-image");
        assert_eq!(history[1].operation, "daily-reset");
    }

    #[test_log::test(tokio::test)]
    async fn test_use_credits_beyond_balance_is_rejected() {
        let (app, state, _clock) = create_test_app();
        let user = create_test_user(&state, Role::StandardUser).await;
        let (name, value) = add_auth_headers(&user, &state);

        let response = app
            .post("/api/users/useCredits")
            .add_header(name, value)
            .json(&json!({"amount": 11}))
            .await;

        response.assert_status_bad_request();
        let body: serde_json::Value = response.json();
        assert_eq!(body["required"], 11);
        assert_eq!(body["available"], 10);

        let stored = state.store.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(stored.credits, 10);
    }

    #[test_log::test(tokio::test)]
    async fn test_invalid_amounts_are_bad_requests() {
        let (app, state, _clock) = create_test_app();
        let user = create_test_user(&state, Role::StandardUser).await;
        let (name, value) = add_auth_headers(&user, &state);

        for body in [json!({}), json!({"amount": 0}), json!({"amount": -3}), json!({"amount": 1.5}), json!({"amount": "4"})] {
            app.post("/api/users/useCredits")
                .add_header(name.clone(), value.clone())
                .json(&body)
                .await
                .assert_status_bad_request();
            app.post("/api/users/addCredits")
                .add_header(name.clone(), value.clone())
                .json(&body)
                .await
                .assert_status_bad_request();
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_malformed_bodies_are_bad_requests() {
        let (app, state, _clock) = create_test_app();
        let user = create_test_user(&state, Role::StandardUser).await;
        let (name, value) = add_auth_headers(&user, &state);

        let response = app
            .post("/api/users/useCredits")
            .add_header(name.clone(), value.clone())
            .json(&json!({"amount": 2, "operation": 5}))
            .await;
        response.assert_status_bad_request();
        let body: serde_json::Value = response.json();
        assert!(body["message"].as_str().unwrap().starts_with("Invalid request body"));

        app.post("/api/users/addCredits")
            .add_header(name, value)
            .text("{not json")
            .content_type("application/json")
            .await
            .assert_status_bad_request();

        let stored = state.store.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(stored.credits, 10);
    }

    #[test_log::test(tokio::test)]
    async fn test_add_credits_past_maximum_balance_is_rejected() {
        let (app, state, _clock) = create_test_app();
        let user = create_test_user(&state, Role::StandardUser).await;
        let (name, value) = add_auth_headers(&user, &state);

        let response = app
            .post("/api/users/addCredits")
            .add_header(name, value)
            .json(&json!({"amount": i64::MAX}))
            .await;
        response.assert_status_bad_request();
        let body: serde_json::Value = response.json();
        assert!(body["message"].as_str().unwrap().contains("maximum balance"));

        let stored = state.store.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(stored.credits, 10);
    }

    #[test_log::test(tokio::test)]
    async fn test_use_credits_rejects_engine_operation_tags() {
        let (app, state, _clock) = create_test_app();
        let user = create_test_user(&state, Role::StandardUser).await;
        let (name, value) = add_auth_headers(&user, &state);

        for operation in ["daily-reset", "grant"] {
            app.post("/api/users/useCredits")
                .add_header(name.clone(), value.clone())
                .json(&json!({"amount": 1, "operation": operation}))
                .await
                .assert_status_bad_request();
        }

        let dashboard: DashboardResponse = app.get("/api/users/dashboard").add_header(name, value).await.json();
        assert_eq!(dashboard.user.credits, 10);
        assert_eq!(dashboard.recent_activity.credit_resets.len(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_add_credits_records_description() {
        let (app, state, _clock) = create_test_app();
        let user = create_test_user(&state, Role::StandardUser).await;
        let (name, value) = add_auth_headers(&user, &state);

        let response = app
            .post("/api/users/addCredits")
            .add_header(name.clone(), value.clone())
            .json(&json!({"amount": 5, "description": "Promo"}))
            .await;
        response.assert_status_ok();
        let body: CreditsUpdatedResponse = response.json();
        assert_eq!(body.user.credits, 15);

        app.post("/api/users/addCredits")
            .add_header(name.clone(), value.clone())
            .json(&json!({"amount": 3}))
            .await
            .assert_status_ok();

        let history: Vec<CreditEntryResponse> = app
            .get("/api/users/creditHistory")
            .add_query_param("limit", 2)
            .add_header(name, value)
            .await
            .json();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].description, "Added 3 credits");
        assert_eq!(history[0].balance_after, 18);
        assert_eq!(history[1].description, "Promo");
    }

    #[test_log::test(tokio::test)]
    async fn test_credit_status_reports_countdown() {
        let (app, state, clock) = create_test_app();
        let user = create_test_user(&state, Role::StandardUser).await;
        let (name, value) = add_auth_headers(&user, &state);

        let status: CreditStatusResponse = app
            .get("/api/users/creditStatus")
            .add_header(name.clone(), value.clone())
            .await
            .json();
        assert_eq!(status.credits, 10);
        assert_eq!(status.reset_count, 1);
        assert_eq!(status.daily_limit, 10);
        assert!(!status.time_until_reset.can_reset);
        assert_eq!(status.time_until_reset.hours, 24);

        clock.advance(TimeDelta::hours(20) + TimeDelta::minutes(30));
        let status: CreditStatusResponse = app.get("/api/users/creditStatus").add_header(name, value).await.json();
        assert_eq!(status.time_until_reset.hours, 3);
        assert_eq!(status.time_until_reset.minutes, 30);
    }

    #[test_log::test(tokio::test)]
    async fn test_dashboard_resets_before_reporting() {
        let (app, state, clock) = create_test_app();
        let user = create_test_user(&state, Role::StandardUser).await;
        let (name, value) = add_auth_headers(&user, &state);

        app.post("/api/users/useCredits")
            .add_header(name.clone(), value.clone())
            .json(&json!({"amount": 8, "operation": "text-to-image"}))
            .await
            .assert_status_ok();

        clock.advance(TimeDelta::hours(25));
        let dashboard: DashboardResponse = app.get("/api/users/dashboard").add_header(name, value).await.json();

        assert_eq!(dashboard.user.credits, 10);
        assert_eq!(dashboard.credit_info.current_credits, 10);
        assert_eq!(dashboard.credit_info.daily_limit, 10);
        assert_eq!(dashboard.statistics.total_credit_resets, 2);
        assert_eq!(dashboard.recent_activity.image_generations.len(), 1);
        assert_eq!(dashboard.recent_activity.credit_resets.len(), 2);
    }

    #[test_log::test(tokio::test)]
    async fn test_credit_routes_require_authentication() {
        let (app, _state, _clock) = create_test_app();

        app.get("/api/users/creditStatus").await.assert_status_unauthorized();
        app.get("/api/users/dashboard").await.assert_status_unauthorized();
        app.post("/api/users/useCredits")
            .json(&json!({"amount": 1}))
            .await
            .assert_status_unauthorized();
    }
}
