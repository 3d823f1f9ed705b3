use utoipa::{
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
    Modify, OpenApi,
};

use crate::api;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components
                .security_schemes
                .insert("BearerAuth".to_string(), SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)));
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    servers(
        (url = "/api", description = "PromptPix API server")
    ),
    modifiers(&SecurityAddon),
    paths(
        api::handlers::auth::signup,
        api::handlers::auth::login,
        api::handlers::auth::logout,
        api::handlers::users::get_me,
        api::handlers::users::update_me,
        api::handlers::credits::add_credits,
        api::handlers::credits::use_credits,
        api::handlers::credits::credit_history,
        api::handlers::credits::dashboard,
        api::handlers::credits::credit_status,
        api::handlers::jobs::trigger_credit_reset,
        api::handlers::jobs::job_status,
    ),
    components(
        schemas(
            api::models::auth::SignupRequest,
            api::models::auth::LoginRequest,
            api::models::auth::AuthResponse,
            api::models::users::Role,
            api::models::users::UserUpdate,
            api::models::users::UserResponse,
            api::models::users::CurrentUser,
            api::models::credits::AddCreditsRequest,
            api::models::credits::UseCreditsRequest,
            api::models::credits::CreditEntryResponse,
            api::models::credits::CreditsUpdatedResponse,
            api::models::credits::TimeUntilReset,
            api::models::credits::CreditStatusResponse,
            api::models::credits::DashboardUser,
            api::models::credits::CreditInfoResponse,
            api::models::credits::RecentActivityResponse,
            api::models::credits::StatisticsResponse,
            api::models::credits::DashboardResponse,
            api::models::jobs::BatchResetResponse,
            api::models::jobs::JobStatusResponse,
        )
    ),
    tags(
        (name = "auth", description = "Sessions and signup"),
        (name = "users", description = "Current user profile"),
        (name = "credits", description = "Credit balance, ledger and dashboard"),
        (name = "admin", description = "Daily reset job administration"),
    ),
    info(
        title = "PromptPix Credits API",
        version = "0.1.0",
        description = "Daily-allotment credit ledger for the PromptPix image platform",
    ),
)]
pub struct ApiDoc;
