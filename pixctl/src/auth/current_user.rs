use crate::{
    api::models::users::CurrentUser,
    auth::session,
    errors::Error,
    AppState,
};
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use tracing::debug;

/// Session token from `Authorization: Bearer ...`, falling back to the session cookie
fn extract_token(parts: &Parts, cookie_name: &str) -> Option<String> {
    let bearer = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == cookie_name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = extract_token(parts, &state.config.auth.cookie_name).ok_or(Error::Unauthenticated { message: None })?;
        let user_id = session::verify_session_token(&token, &state.config)?;

        // Tokens outlive deleted accounts
        let user = state.store.get_user(user_id).await?.ok_or_else(|| {
            debug!("Session token for unknown user {}", user_id);
            Error::Unauthenticated {
                message: Some("Account no longer exists".to_string()),
            }
        })?;

        Ok(CurrentUser::from(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(headers: &[(header::HeaderName, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn bearer_token_wins_over_cookie() {
        let parts = parts(&[
            (header::AUTHORIZATION, "Bearer from-header"),
            (header::COOKIE, "jwt=from-cookie"),
        ]);
        assert_eq!(extract_token(&parts, "jwt").as_deref(), Some("from-header"));
    }

    #[test]
    fn session_cookie_is_found_among_others() {
        let parts = parts(&[(header::COOKIE, "theme=dark; jwt=abc.def.ghi; lang=en")]);
        assert_eq!(extract_token(&parts, "jwt").as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn missing_or_empty_tokens_yield_none() {
        assert_eq!(extract_token(&parts(&[]), "jwt"), None);
        assert_eq!(extract_token(&parts(&[(header::COOKIE, "jwt=")]), "jwt"), None);
        assert_eq!(extract_token(&parts(&[(header::AUTHORIZATION, "Basic xyz")]), "jwt"), None);
    }
}
