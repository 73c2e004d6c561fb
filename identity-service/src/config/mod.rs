use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

use crate::services::agents::AgentKind;

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub session: SessionConfig,
    pub challenge: ChallengeConfig,
    pub verification: VerificationConfig,
    /// Emails granted `admin` through the commit path at startup.
    pub admin_seed_emails: Vec<String>,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub ttl_days: i64,
    pub cookie_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeConfig {
    pub ttl_seconds: i64,
    /// Lifetime of first-device enrolment tokens for privileged members.
    pub enrolment_ttl_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentEndpoint {
    pub kind: AgentKind,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerificationConfig {
    pub agents: Vec<AgentEndpoint>,
    /// Upper bound for a single agent call.
    pub step_timeout_ms: u64,
    pub retry_initial_interval_ms: u64,
    /// Total time budget for retries of one step.
    pub retry_max_elapsed_ms: u64,
    pub abandonment_minutes: i64,
    pub allow_dev_bypass: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    /// Marks the session cookie `Secure`.
    pub secure_cookies: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub passkey_attempts: u32,
    pub passkey_window_seconds: u64,
}

fn parse_env<T>(key: &str, default: Option<&str>, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, default, is_prod)?.parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!("{} is invalid: {}", key, e))
    })
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let mut agents = Vec::new();
        for kind in AgentKind::ALL {
            let key = format!("VERIFICATION_AGENT_{}_URL", kind.as_str().to_uppercase());
            if let Ok(url) = env::var(&key) {
                agents.push(AgentEndpoint { kind, url });
            }
        }

        let config = IdentityConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("identity-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", Some("10"), is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", Some("1"), is_prod)?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", None, is_prod)?,
            },
            session: SessionConfig {
                ttl_days: parse_env("SESSION_TTL_DAYS", Some("60"), is_prod)?,
                cookie_name: get_env("SESSION_COOKIE_NAME", Some("session_token"), is_prod)?,
            },
            challenge: ChallengeConfig {
                ttl_seconds: parse_env("CHALLENGE_TTL_SECONDS", Some("300"), is_prod)?,
                enrolment_ttl_hours: parse_env(
                    "CHALLENGE_ENROLMENT_TTL_HOURS",
                    Some("24"),
                    is_prod,
                )?,
            },
            verification: VerificationConfig {
                agents,
                step_timeout_ms: parse_env("VERIFICATION_STEP_TIMEOUT_MS", Some("20000"), is_prod)?,
                retry_initial_interval_ms: parse_env(
                    "VERIFICATION_RETRY_INITIAL_INTERVAL_MS",
                    Some("500"),
                    is_prod,
                )?,
                retry_max_elapsed_ms: parse_env(
                    "VERIFICATION_RETRY_MAX_ELAPSED_MS",
                    Some("45000"),
                    is_prod,
                )?,
                abandonment_minutes: parse_env(
                    "VERIFICATION_ABANDONMENT_MINUTES",
                    Some("30"),
                    is_prod,
                )?,
                // Never required: absent means off, in every environment.
                allow_dev_bypass: get_env("VERIFICATION_ALLOW_DEV_BYPASS", Some("false"), false)?
                    .parse()
                    .unwrap_or(false),
            },
            admin_seed_emails: split_list(&get_env("ADMIN_SEED_EMAILS", Some(""), false)?),
            security: SecurityConfig {
                allowed_origins: split_list(&get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?),
                secure_cookies: parse_env("SECURE_COOKIES", Some("false"), is_prod)?,
            },
            rate_limit: RateLimitConfig {
                passkey_attempts: get_env("RATE_LIMIT_PASSKEY_ATTEMPTS", Some("10"), is_prod)?
                    .parse()
                    .unwrap_or(10),
                passkey_window_seconds: get_env(
                    "RATE_LIMIT_PASSKEY_WINDOW_SECONDS",
                    Some("60"),
                    is_prod,
                )?
                .parse()
                .unwrap_or(60),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.session.ttl_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SESSION_TTL_DAYS must be positive"
            )));
        }

        if self.challenge.ttl_seconds <= 0 || self.challenge.enrolment_ttl_hours <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "CHALLENGE_TTL_SECONDS and CHALLENGE_ENROLMENT_TTL_HOURS must be positive"
            )));
        }

        if self.verification.step_timeout_ms == 0 || self.verification.abandonment_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Verification timeouts must be positive"
            )));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.verification.allow_dev_bypass {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "VERIFICATION_ALLOW_DEV_BYPASS must not be set in production"
                )));
            }

            if !self.security.secure_cookies {
                tracing::error!("Session cookies are not marked Secure in production");
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(environment: Environment) -> IdentityConfig {
        IdentityConfig {
            common: core_config::Config::default(),
            environment,
            service_name: "identity-service".into(),
            service_version: "test".into(),
            log_level: "info".into(),
            database: DatabaseConfig {
                url: "postgres://localhost/identity".into(),
                max_connections: 5,
                min_connections: 1,
            },
            redis: RedisConfig {
                url: "redis://localhost".into(),
            },
            session: SessionConfig {
                ttl_days: 60,
                cookie_name: "session_token".into(),
            },
            challenge: ChallengeConfig {
                ttl_seconds: 300,
                enrolment_ttl_hours: 24,
            },
            verification: VerificationConfig {
                agents: vec![],
                step_timeout_ms: 1000,
                retry_initial_interval_ms: 10,
                retry_max_elapsed_ms: 100,
                abandonment_minutes: 30,
                allow_dev_bypass: false,
            },
            admin_seed_emails: vec![],
            security: SecurityConfig {
                allowed_origins: vec!["https://app.example".into()],
                secure_cookies: true,
            },
            rate_limit: RateLimitConfig {
                passkey_attempts: 10,
                passkey_window_seconds: 60,
            },
        }
    }

    #[test]
    fn dev_bypass_flag_is_refused_in_prod() {
        let mut config = sample(Environment::Prod);
        config.verification.allow_dev_bypass = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn dev_bypass_flag_is_accepted_in_dev() {
        let mut config = sample(Environment::Dev);
        config.verification.allow_dev_bypass = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn wildcard_origin_is_refused_in_prod() {
        let mut config = sample(Environment::Prod);
        config.security.allowed_origins = vec!["*".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_positive_durations_are_refused() {
        let mut config = sample(Environment::Dev);
        config.session.ttl_days = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn list_values_are_trimmed() {
        assert_eq!(
            split_list(" a@x.example, ,b@x.example "),
            vec!["a@x.example", "b@x.example"]
        );
    }
}
