//! API server configuration.

use std::sync::Arc;

use chrono::Duration;
use warden_core::audit::DEFAULT_QUEUE_CAPACITY;
use warden_core::auth::AuthError;
use warden_core::auth::jwt::{TokenCodec, parse_duration};
use warden_core::mail::{LogMailer, MailError, Mailer, ZeptoConfig, ZeptoMailer};

/// Configuration for the API server.
#[derive(Clone)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:5000").
    pub bind_addr: String,
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Access token HMAC secret.
    pub jwt_access_secret: Option<String>,
    /// Refresh token HMAC secret; must differ from the access secret.
    pub jwt_refresh_secret: Option<String>,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    /// Frontend base URL used in verification and reset links.
    pub app_base_url: String,
    /// Mail provider; `None` selects the logging mailer.
    pub zepto: Option<ZeptoConfig>,
    pub audit_queue_capacity: usize,
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |s: &Option<String>| s.as_ref().map(|_| "<redacted>");
        f.debug_struct("ApiConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_url", &self.database_url)
            .field("jwt_access_secret", &redact(&self.jwt_access_secret))
            .field("jwt_refresh_secret", &redact(&self.jwt_refresh_secret))
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("app_base_url", &self.app_base_url)
            .field("zepto", &self.zepto)
            .field("audit_queue_capacity", &self.audit_queue_capacity)
            .finish()
    }
}

impl ApiConfig {
    /// Reads configuration from environment variables.
    ///
    /// | Variable                 | Default                              |
    /// |--------------------------|--------------------------------------|
    /// | `BIND_ADDR`              | `127.0.0.1:5000`                     |
    /// | `DATABASE_URL`           | `postgres://localhost:5432/warden`   |
    /// | `JWT_ACCESS_SECRET`      | required                             |
    /// | `JWT_REFRESH_SECRET`     | required                             |
    /// | `JWT_ACCESS_EXPIRES_IN`  | `15m`                                |
    /// | `JWT_REFRESH_EXPIRES_IN` | `7d`                                 |
    /// | `APP_BASE_URL`           | `http://localhost:3000`              |
    /// | `ZEPTO_URL`, `ZEPTO_TOKEN`, `ZEPTO_FROM_ADDRESS`, `ZEPTO_FROM_NAME` | unset (log mailer) |
    /// | `AUDIT_QUEUE_CAPACITY`   | `1024`                               |
    ///
    /// Missing secrets are not rejected here; see [`ApiConfig::validate`].
    pub fn from_env() -> Result<Self, AuthError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AuthError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let zepto = match (var("ZEPTO_URL"), var("ZEPTO_TOKEN")) {
            (Some(url), Some(token)) => Some(ZeptoConfig {
                url,
                token,
                from_address: var("ZEPTO_FROM_ADDRESS").ok_or_else(|| {
                    AuthError::Config("ZEPTO_FROM_ADDRESS is required with ZEPTO_URL".into())
                })?,
                from_name: or("ZEPTO_FROM_NAME", "Warden"),
            }),
            _ => None,
        };

        let audit_queue_capacity = match var("AUDIT_QUEUE_CAPACITY") {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| AuthError::Config(format!("invalid AUDIT_QUEUE_CAPACITY: {v:?}")))?,
            None => DEFAULT_QUEUE_CAPACITY,
        };

        Ok(Self {
            bind_addr: or("BIND_ADDR", "127.0.0.1:5000"),
            database_url: or("DATABASE_URL", "postgres://localhost:5432/warden"),
            jwt_access_secret: var("JWT_ACCESS_SECRET"),
            jwt_refresh_secret: var("JWT_REFRESH_SECRET"),
            access_ttl: parse_duration(&or("JWT_ACCESS_EXPIRES_IN", "15m"))?,
            refresh_ttl: parse_duration(&or("JWT_REFRESH_EXPIRES_IN", "7d"))?,
            app_base_url: or("APP_BASE_URL", "http://localhost:3000"),
            zepto,
            audit_queue_capacity,
        })
    }

    /// Minimal config for in-process tests.
    pub fn for_tests() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".into(),
            database_url: String::new(),
            jwt_access_secret: Some("test-access-secret".into()),
            jwt_refresh_secret: Some("test-refresh-secret".into()),
            access_ttl: Duration::minutes(15),
            refresh_ttl: Duration::days(7),
            app_base_url: "http://app.test".into(),
            zepto: None,
            audit_queue_capacity: 64,
        }
    }

    /// Codec over the configured secrets and lifetimes.
    pub fn token_codec(&self) -> TokenCodec {
        TokenCodec::new(
            self.jwt_access_secret.as_deref(),
            self.jwt_refresh_secret.as_deref(),
            self.access_ttl,
            self.refresh_ttl,
        )
    }

    /// Startup check; the server refuses to start on error.
    pub fn validate(&self) -> Result<(), AuthError> {
        self.token_codec().ensure_configured()
    }

    /// ZeptoMail when configured, otherwise the logging mailer.
    pub fn mailer(&self) -> Result<Arc<dyn Mailer>, MailError> {
        Ok(match &self.zepto {
            Some(zepto) => Arc::new(ZeptoMailer::new(zepto.clone())?),
            None => Arc::new(LogMailer),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply() {
        let cfg = ApiConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.bind_addr, "127.0.0.1:5000");
        assert_eq!(cfg.database_url, "postgres://localhost:5432/warden");
        assert_eq!(cfg.access_ttl, Duration::minutes(15));
        assert_eq!(cfg.refresh_ttl, Duration::days(7));
        assert_eq!(cfg.audit_queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert!(cfg.zepto.is_none());
        assert!(matches!(cfg.validate(), Err(AuthError::Config(_))));
    }

    #[test]
    fn secrets_must_differ() {
        let cfg = ApiConfig::from_lookup(lookup(&[
            ("JWT_ACCESS_SECRET", "same"),
            ("JWT_REFRESH_SECRET", "same"),
        ]))
        .unwrap();
        assert!(cfg.validate().is_err());

        let cfg = ApiConfig::from_lookup(lookup(&[
            ("JWT_ACCESS_SECRET", "a"),
            ("JWT_REFRESH_SECRET", "b"),
            ("JWT_ACCESS_EXPIRES_IN", "5m"),
        ]))
        .unwrap();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.access_ttl, Duration::minutes(5));
    }

    #[test]
    fn bad_values_are_config_errors() {
        assert!(matches!(
            ApiConfig::from_lookup(lookup(&[("JWT_REFRESH_EXPIRES_IN", "soon")])),
            Err(AuthError::Config(_))
        ));
        assert!(matches!(
            ApiConfig::from_lookup(lookup(&[("AUDIT_QUEUE_CAPACITY", "0")])),
            Err(AuthError::Config(_))
        ));
        assert!(matches!(
            ApiConfig::from_lookup(lookup(&[("ZEPTO_URL", "https://x"), ("ZEPTO_TOKEN", "t")])),
            Err(AuthError::Config(_))
        ));
    }

    #[test]
    fn debug_redacts_secrets() {
        let dbg = format!("{:?}", ApiConfig::for_tests());
        assert!(!dbg.contains("test-access-secret"));
        assert!(dbg.contains("<redacted>"));
    }
}
