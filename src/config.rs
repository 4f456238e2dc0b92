use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub jwt: JwtConfig,
    pub otp_ttl_minutes: i64,
    pub password_min_length: usize,
    pub request_timeout_secs: u64,
    pub google_userinfo_url: String,
    pub host: String,
    pub port: u16,
}

/// Value of `DATABASE_URL` that selects the in-process store.
pub const MEMORY_DATABASE_URL: &str = "memory://";

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. `DATABASE_URL` and
    /// `JWT_SECRET` are required; everything else has a default.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("{key} must be set"))
        };
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<i64>().ok());

        let database_url = required("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: required("JWT_SECRET")?,
            issuer: lookup("JWT_ISSUER").unwrap_or_else(|| "user-accounts".into()),
            audience: lookup("JWT_AUDIENCE").unwrap_or_else(|| "user-accounts-clients".into()),
            ttl_minutes: parsed("JWT_TTL_MINUTES").unwrap_or(3 * 60),
            refresh_ttl_minutes: parsed("JWT_REFRESH_TTL_MINUTES").unwrap_or(3 * 24 * 60),
        };

        Ok(Self {
            database_url,
            database_max_connections: parsed("DATABASE_MAX_CONNECTIONS")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(10),
            jwt,
            otp_ttl_minutes: parsed("OTP_TTL_MINUTES").filter(|v| *v > 0).unwrap_or(5),
            password_min_length: parsed("PASSWORD_MIN_LENGTH")
                .and_then(|v| usize::try_from(v).ok())
                .unwrap_or(6),
            request_timeout_secs: parsed("REQUEST_TIMEOUT_SECS")
                .and_then(|v| u64::try_from(v).ok())
                .filter(|v| *v > 0)
                .unwrap_or(10),
            google_userinfo_url: lookup("GOOGLE_USERINFO_URL")
                .unwrap_or_else(|| "https://www.googleapis.com/oauth2/v2/userinfo".into()),
            host: lookup("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed("APP_PORT")
                .and_then(|v| u16::try_from(v).ok())
                .unwrap_or(8080),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url == MEMORY_DATABASE_URL
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_required_vars_are_set() {
        let cfg = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/accounts"),
            ("JWT_SECRET", "s3cret"),
        ]))
        .expect("config");

        assert_eq!(cfg.jwt.ttl_minutes, 180);
        assert_eq!(cfg.jwt.refresh_ttl_minutes, 4320);
        assert_eq!(cfg.otp_ttl_minutes, 5);
        assert_eq!(cfg.password_min_length, 6);
        assert_eq!(cfg.request_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.port, 8080);
        assert!(!cfg.uses_memory_store());
    }

    #[test]
    fn missing_database_url_is_an_error() {
        let err = AppConfig::from_lookup(lookup_from(&[("JWT_SECRET", "s3cret")])).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn blank_jwt_secret_is_an_error() {
        let err = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "memory://"),
            ("JWT_SECRET", "   "),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn garbage_numbers_fall_back_to_defaults() {
        let cfg = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "memory://"),
            ("JWT_SECRET", "s3cret"),
            ("REQUEST_TIMEOUT_SECS", "soon"),
            ("APP_PORT", "99999"),
            ("OTP_TTL_MINUTES", "15"),
        ]))
        .expect("config");

        assert_eq!(cfg.request_timeout_secs, 10);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.otp_ttl_minutes, 15);
        assert!(cfg.uses_memory_store());
    }

    #[test]
    fn non_positive_otp_ttl_falls_back_to_default() {
        for raw in ["0", "-3"] {
            let cfg = AppConfig::from_lookup(lookup_from(&[
                ("DATABASE_URL", "memory://"),
                ("JWT_SECRET", "s3cret"),
                ("OTP_TTL_MINUTES", raw),
            ]))
            .expect("config");
            assert_eq!(cfg.otp_ttl_minutes, 5, "OTP_TTL_MINUTES={raw}");
        }
    }
}
