//! Typed HTTP client for the credits API, plus the write queue used for
//! optimistic profile updates.

pub mod reconcile;

use crate::api::models::{
    auth::{AuthResponse, LoginRequest, SignupRequest},
    credits::{CreditEntryResponse, CreditStatusResponse, CreditsUpdatedResponse, DashboardResponse},
    jobs::BatchResetResponse,
    users::{UserResponse, UserUpdate},
};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

pub use reconcile::{ProfileWriter, WriteQueue, Writer};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid base url: {0}")]
    Url(#[from] url::ParseError),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("could not decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("throttled: {message}")]
    Throttled { message: String },

    #[error("{status}: {message}")]
    Api { status: StatusCode, message: String },

    #[error("not logged in")]
    NoSession,
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    /// Always ends in `/` so relative joins stay under it
    base: Url,
    token: Option<String>,
}

impl ApiClient {
    /// `base_url` is the API root, e.g. `http://localhost:3001/api`
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("pixctl/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let base = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))?;
        Ok(Self { http, base, token: None })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self.base.join(path)?;
        Ok(self.http.request(method, url))
    }

    fn authed(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let token = self.token.as_deref().ok_or(ClientError::NoSession)?;
        Ok(self.request(method, path)?.bearer_auth(token))
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.message)
            .unwrap_or_else(|_| status.canonical_reason().unwrap_or("request failed").to_string());
        debug!("API responded {}: {}", status, message);

        if status == StatusCode::TOO_MANY_REQUESTS {
            Err(ClientError::Throttled { message })
        } else {
            Err(ClientError::Api { status, message })
        }
    }

    /// Create an account and keep its session
    pub async fn signup(&mut self, email: &str, password: &str, display_name: Option<&str>) -> Result<AuthResponse> {
        let body = SignupRequest {
            email: email.to_string(),
            password: password.to_string(),
            display_name: display_name.map(str::to_string),
        };
        let auth: AuthResponse = Self::send(self.request(Method::POST, "auth/signup")?.json(&body)).await?;
        self.token = Some(auth.token.clone());
        Ok(auth)
    }

    /// Start a session and keep its token for later calls
    pub async fn login(&mut self, email: &str, password: &str) -> Result<AuthResponse> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let auth: AuthResponse = Self::send(self.request(Method::POST, "auth/login")?.json(&body)).await?;
        self.token = Some(auth.token.clone());
        Ok(auth)
    }

    pub async fn me(&self) -> Result<UserResponse> {
        Self::send(self.authed(Method::GET, "users/me")?).await
    }

    pub async fn update_me(&self, update: &UserUpdate) -> Result<UserResponse> {
        Self::send(self.authed(Method::PATCH, "users/updateMe")?.json(update)).await
    }

    pub async fn add_credits(&self, amount: i64, description: Option<&str>) -> Result<CreditsUpdatedResponse> {
        let body = json!({ "amount": amount, "description": description });
        Self::send(self.authed(Method::POST, "users/addCredits")?.json(&body)).await
    }

    pub async fn use_credits(&self, amount: i64, operation: Option<&str>) -> Result<CreditsUpdatedResponse> {
        let body = json!({ "amount": amount, "operation": operation });
        Self::send(self.authed(Method::POST, "users/useCredits")?.json(&body)).await
    }

    pub async fn credit_history(&self, limit: Option<i64>) -> Result<Vec<CreditEntryResponse>> {
        let mut request = self.authed(Method::GET, "users/creditHistory")?;
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit)]);
        }
        Self::send(request).await
    }

    pub async fn credit_status(&self) -> Result<CreditStatusResponse> {
        Self::send(self.authed(Method::GET, "users/creditStatus")?).await
    }

    pub async fn dashboard(&self) -> Result<DashboardResponse> {
        Self::send(self.authed(Method::GET, "users/dashboard")?).await
    }

    pub async fn trigger_credit_reset(&self) -> Result<BatchResetResponse> {
        Self::send(self.authed(Method::POST, "admin/credits/reset")?).await
    }
}
