//! Configuration: defaults, then a YAML file, then `PIXCTL_`-prefixed environment
//! variables (`__` separates nested keys, e.g. `PIXCTL_CREDITS__DAILY_AMOUNT=20`).
//! A bare `DATABASE_URL` always wins for the database section.

use crate::credits::policy::DEFAULT_DAILY_CREDIT_AMOUNT;
use chrono::NaiveTime;
use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[derive(Parser, Debug)]
#[command(version, about = "Credit ledger and daily reset service")]
pub struct Args {
    /// Path to the YAML configuration file
    #[arg(short = 'f', long, env = "PIXCTL_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Load and validate the configuration, then exit
    #[arg(long)]
    pub validate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database: DatabaseConfig,
    /// HMAC key for session tokens
    pub secret_key: Option<String>,
    /// Bootstrap admin created (or updated) at startup
    pub admin_email: String,
    pub admin_password: Option<String>,
    pub credits: CreditsConfig,
    pub scheduler: SchedulerConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DatabaseConfig {
    /// A Postgres server reachable at `url`
    External { url: String },
    /// Process-local store; everything is lost on shutdown
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CreditsConfig {
    /// Balance a reset restores
    pub daily_amount: i64,
    /// Balance a new account starts with
    pub signup_bonus: i64,
    pub history_default_limit: i64,
    pub history_max_limit: i64,
    /// Offset used for the dashboard's "today"; the server's local offset when unset
    pub utc_offset_minutes: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// UTC time of day the batch reset fires
    pub run_at: NaiveTime,
    #[serde(with = "humantime_serde")]
    pub per_user_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    #[serde(with = "humantime_serde")]
    pub token_lifetime: Duration,
    pub cookie_name: String,
    /// Minimum interval between two profile updates of one user
    #[serde(with = "humantime_serde")]
    pub profile_update_throttle: Duration,
    pub login_rate_limit: LoginRateLimitConfig,
    pub cors: CorsConfig,
}

/// Per-address cap on `POST /auth/login`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginRateLimitConfig {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Take the client address from the first `X-Forwarded-For` hop. Only enable
    /// behind a proxy that overwrites the header.
    pub trust_forwarded_for: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<CorsOrigin>,
    pub allow_credentials: bool,
    /// Preflight cache lifetime in seconds
    pub max_age: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CorsOrigin {
    Wildcard,
    Url(Url),
}

impl TryFrom<String> for CorsOrigin {
    type Error = url::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == "*" {
            Ok(CorsOrigin::Wildcard)
        } else {
            Url::parse(&value).map(CorsOrigin::Url)
        }
    }
}

impl From<CorsOrigin> for String {
    fn from(origin: CorsOrigin) -> Self {
        match origin {
            CorsOrigin::Wildcard => "*".to_string(),
            // Origins never carry the trailing slash `Url` adds to bare hosts
            CorsOrigin::Url(url) => url.as_str().trim_end_matches('/').to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            database: DatabaseConfig::default(),
            secret_key: None,
            admin_email: "admin@example.org".to_string(),
            admin_password: None,
            credits: CreditsConfig::default(),
            scheduler: SchedulerConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig::External {
            url: "postgres://localhost:5432/pixctl".to_string(),
        }
    }
}

impl Default for CreditsConfig {
    fn default() -> Self {
        Self {
            daily_amount: DEFAULT_DAILY_CREDIT_AMOUNT,
            signup_bonus: DEFAULT_DAILY_CREDIT_AMOUNT,
            history_default_limit: 50,
            history_max_limit: 1000,
            utc_offset_minutes: None,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            run_at: NaiveTime::MIN,
            per_user_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_lifetime: Duration::from_secs(7 * 24 * 60 * 60),
            cookie_name: "jwt".to_string(),
            profile_update_throttle: Duration::from_millis(500),
            login_rate_limit: LoginRateLimitConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

impl Default for LoginRateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::from_secs(15 * 60),
            trust_forwarded_for: false,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: CorsOrigin::try_from("http://localhost:5173".to_string())
                .map(|origin| vec![origin])
                .unwrap_or_default(),
            allow_credentials: true,
            max_age: Some(3600),
        }
    }
}

impl Config {
    pub fn load(args: &Args) -> anyhow::Result<Self> {
        let config: Config = Self::figment(args).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(args: &Args) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("PIXCTL_").split("__"));

        if let Ok(url) = std::env::var("DATABASE_URL") {
            figment = figment.merge(("database", DatabaseConfig::External { url }));
        }
        figment
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.credits.daily_amount <= 0 {
            anyhow::bail!("credits.daily_amount must be positive, got {}", self.credits.daily_amount);
        }
        if self.credits.signup_bonus < 0 {
            anyhow::bail!("credits.signup_bonus must not be negative, got {}", self.credits.signup_bonus);
        }
        if self.credits.history_default_limit < 1 || self.credits.history_max_limit < self.credits.history_default_limit {
            anyhow::bail!(
                "credits.history_default_limit ({}) must be between 1 and credits.history_max_limit ({})",
                self.credits.history_default_limit,
                self.credits.history_max_limit
            );
        }
        if self.secret_key.as_deref().is_none_or(str::is_empty) {
            anyhow::bail!("secret_key is required to sign session tokens");
        }
        if self.scheduler.per_user_timeout.is_zero() {
            anyhow::bail!("scheduler.per_user_timeout must be greater than zero");
        }
        if self.auth.login_rate_limit.max_attempts == 0 || self.auth.login_rate_limit.window.is_zero() {
            anyhow::bail!("auth.login_rate_limit needs a positive max_attempts and window");
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn args(path: &str) -> Args {
        Args {
            config: path.to_string(),
            validate: false,
        }
    }

    #[test]
    fn defaults_are_used_without_a_file() {
        Jail::expect_with(|jail| {
            jail.set_env("PIXCTL_SECRET_KEY", "s3cret");

            let config = Config::load(&args("missing.yaml")).map_err(|e| e.to_string())?;
            assert_eq!(config.port, 3001);
            assert_eq!(config.credits.daily_amount, 10);
            assert_eq!(config.credits.history_default_limit, 50);
            assert_eq!(config.scheduler.run_at, NaiveTime::MIN);
            assert_eq!(config.auth.profile_update_throttle, Duration::from_millis(500));
            assert_eq!(config.auth.cookie_name, "jwt");
            assert_eq!(config.auth.login_rate_limit.max_attempts, 5);
            assert_eq!(config.auth.login_rate_limit.window, Duration::from_secs(900));
            assert!(!config.auth.login_rate_limit.trust_forwarded_for);
            Ok(())
        });
    }

    #[test]
    fn yaml_then_env_layering() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "test.yaml",
                r#"
secret_key: from-file
port: 8080
database:
  type: memory
credits:
  daily_amount: 25
  utc_offset_minutes: -300
scheduler:
  run_at: "03:30:00"
  per_user_timeout: 2s
auth:
  token_lifetime: 1h
  login_rate_limit:
    max_attempts: 10
    window: 5m
  cors:
    allowed_origins: ["*"]
    allow_credentials: false
"#,
            )?;
            jail.set_env("PIXCTL_CREDITS__DAILY_AMOUNT", "30");

            let config = Config::load(&args("test.yaml")).map_err(|e| e.to_string())?;
            assert_eq!(config.port, 8080);
            assert_eq!(config.database, DatabaseConfig::Memory);
            assert_eq!(config.credits.daily_amount, 30);
            assert_eq!(config.credits.utc_offset_minutes, Some(-300));
            assert_eq!(config.scheduler.run_at, NaiveTime::from_hms_opt(3, 30, 0).unwrap());
            assert_eq!(config.scheduler.per_user_timeout, Duration::from_secs(2));
            assert_eq!(config.auth.token_lifetime, Duration::from_secs(3600));
            assert_eq!(config.auth.login_rate_limit.max_attempts, 10);
            assert_eq!(config.auth.login_rate_limit.window, Duration::from_secs(300));
            assert_eq!(config.auth.cors.allowed_origins, vec![CorsOrigin::Wildcard]);
            Ok(())
        });
    }

    #[test]
    fn database_url_overrides_the_database_section() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "secret_key: k\ndatabase:\n  type: memory\n")?;
            jail.set_env("DATABASE_URL", "postgres://db.internal/credits");

            let config = Config::load(&args("test.yaml")).map_err(|e| e.to_string())?;
            assert_eq!(
                config.database,
                DatabaseConfig::External {
                    url: "postgres://db.internal/credits".to_string()
                }
            );
            Ok(())
        });
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = Config {
            secret_key: Some("k".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        config.credits.daily_amount = 0;
        assert!(config.validate().is_err());
        config.credits.daily_amount = 10;

        config.credits.history_default_limit = 2000;
        assert!(config.validate().is_err());
        config.credits.history_default_limit = 50;

        config.auth.login_rate_limit.max_attempts = 0;
        assert!(config.validate().is_err());
        config.auth.login_rate_limit.max_attempts = 5;

        config.secret_key = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn cors_origin_round_trips_without_trailing_slash() {
        let origin = CorsOrigin::try_from("https://app.example.com".to_string()).unwrap();
        assert_eq!(String::from(origin), "https://app.example.com");
        assert_eq!(CorsOrigin::try_from("*".to_string()).unwrap(), CorsOrigin::Wildcard);
    }
}
