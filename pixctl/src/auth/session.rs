use crate::{config::Config, errors::Error, types::UserId};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub iat: i64,
    pub exp: i64,
}

fn secret(config: &Config) -> Result<&[u8], Error> {
    config
        .secret_key
        .as_deref()
        .filter(|key| !key.is_empty())
        .map(str::as_bytes)
        .ok_or_else(|| Error::Internal {
            operation: "sign session token: secret_key is not configured".to_string(),
        })
}

/// Issue an HS256 session token for `user_id`, valid for the configured lifetime
pub fn create_session_token(user_id: UserId, config: &Config) -> Result<String, Error> {
    let iat = Utc::now().timestamp();
    let lifetime = i64::try_from(config.auth.token_lifetime.as_secs()).unwrap_or(i64::MAX);
    let claims = Claims {
        sub: user_id,
        iat,
        exp: iat.saturating_add(lifetime),
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret(config)?)).map_err(|e| Error::Internal {
        operation: format!("sign session token: {e}"),
    })
}

/// Validate signature and expiry, returning the user the token was issued to
pub fn verify_session_token(token: &str, config: &Config) -> Result<UserId, Error> {
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret(config)?), &Validation::default()).map_err(|e| {
        debug!("Rejected session token: {}", e);
        Error::Unauthenticated {
            message: Some("Invalid or expired session".to_string()),
        }
    })?;
    Ok(data.claims.sub)
}

/// `Set-Cookie` value carrying a fresh session
pub fn session_cookie(token: &str, config: &Config) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        config.auth.cookie_name,
        token,
        config.auth.token_lifetime.as_secs()
    )
}

/// `Set-Cookie` value that removes the session
pub fn clear_session_cookie(config: &Config) -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", config.auth.cookie_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn config() -> Config {
        Config {
            secret_key: Some("test-secret".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn token_round_trips_user_id() {
        let config = config();
        let user_id = Uuid::new_v4();
        let token = create_session_token(user_id, &config).unwrap();
        assert_eq!(verify_session_token(&token, &config).unwrap(), user_id);
    }

    #[test]
    fn token_signed_with_another_key_is_rejected() {
        let token = create_session_token(Uuid::new_v4(), &config()).unwrap();
        let other = Config {
            secret_key: Some("other-secret".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            verify_session_token(&token, &other),
            Err(Error::Unauthenticated { .. })
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let config = config();
        let claims = Claims {
            sub: Uuid::new_v4(),
            iat: 1_000,
            exp: 2_000,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"test-secret")).unwrap();
        assert!(verify_session_token(&token, &config).is_err());
    }

    #[test]
    fn cookies_use_the_configured_name() {
        let config = config();
        assert!(session_cookie("abc", &config).starts_with("jwt=abc;"));
        assert!(clear_session_cookie(&config).contains("Max-Age=0"));
    }
}
