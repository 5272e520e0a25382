//! Service configuration
//! Mission: Collect all tunables from the environment with safe defaults

use crate::auth::rate_limit::RatePolicy;
use std::env;
use std::time::Duration;

/// Runtime configuration for the auth service.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Shared HS256 signing secret for access tokens.
    pub jwt_secret: String,
    /// Access-token lifetime in minutes.
    pub access_ttl_minutes: i64,
    /// Refresh-token lifetime in days.
    pub refresh_ttl_days: i64,
    /// Probability that a refresh call rotates the refresh token.
    pub rotation_probability: f64,
    /// Production mode: secure cookies with the `__Secure-` name prefix.
    pub production: bool,
    pub db_path: String,
    pub bind_addr: String,

    // Per-action rate limits. Each action namespace is counted
    // independently so a burst on one endpoint does not penalize another.
    pub login_limit: RatePolicy,
    pub refresh_limit: RatePolicy,
    pub verify_limit: RatePolicy,
}

impl AuthConfig {
    pub fn from_env() -> Self {
        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            tracing::warn!("JWT_SECRET not set, using development default");
            "tourguard-dev-secret-change-me".to_string()
        });

        let access_ttl_minutes = env::var("ACCESS_TOKEN_TTL_MINUTES")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(15);

        let refresh_ttl_days = env::var("REFRESH_TOKEN_TTL_DAYS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(30);

        let rotation_probability = env::var("REFRESH_ROTATION_PROBABILITY")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|&v| (0.0..=1.0).contains(&v))
            .unwrap_or(0.10);

        let production = env::var("ENVIRONMENT")
            .map(|v| matches!(v.as_str(), "production" | "prod"))
            .unwrap_or(false);

        let db_path = env::var("TOURGUARD_DB").unwrap_or_else(|_| "tourguard.db".to_string());

        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(8080);
        let bind_addr = format!("0.0.0.0:{port}");

        Self {
            jwt_secret,
            access_ttl_minutes,
            refresh_ttl_days,
            rotation_probability,
            production,
            db_path,
            bind_addr,
            login_limit: RatePolicy {
                max_attempts: limit_from_env("LOGIN_RATE_LIMIT", 5),
                window: Duration::from_secs(15 * 60),
                lockout: Duration::from_secs(15 * 60),
            },
            refresh_limit: RatePolicy {
                max_attempts: limit_from_env("REFRESH_RATE_LIMIT", 10),
                window: Duration::from_secs(15 * 60),
                lockout: Duration::from_secs(15 * 60),
            },
            // Verification codes are short and guessable, so this one is
            // strict: 5 attempts per hour.
            verify_limit: RatePolicy {
                max_attempts: limit_from_env("VERIFY_RATE_LIMIT", 5),
                window: Duration::from_secs(60 * 60),
                lockout: Duration::from_secs(60 * 60),
            },
        }
    }

    /// Refresh-cookie name for the current environment.
    pub fn refresh_cookie_name(&self) -> &'static str {
        if self.production {
            "__Secure-refreshToken"
        } else {
            "refreshToken"
        }
    }
}

fn limit_from_env(var: &str, default: u32) -> u32 {
    env::var(var)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|&v| v > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        // Only assert fields no test environment is expected to override.
        let config = AuthConfig::from_env();
        assert!(config.access_ttl_minutes > 0);
        assert!(config.refresh_ttl_days > 0);
        assert!((0.0..=1.0).contains(&config.rotation_probability));
        assert!(config.login_limit.max_attempts > 0);
    }

    #[test]
    fn test_cookie_name_follows_environment() {
        let mut config = AuthConfig::from_env();
        config.production = false;
        assert_eq!(config.refresh_cookie_name(), "refreshToken");
        config.production = true;
        assert_eq!(config.refresh_cookie_name(), "__Secure-refreshToken");
    }
}
