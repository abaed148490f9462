//! JWT token generation and verification.
//!
//! Access and refresh tokens are HS256 JWTs signed with distinct secrets.
//! Verification failures collapse into [`AuthError::InvalidToken`]; the
//! underlying cause is only logged at debug level.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use super::AuthError;
use crate::models::{AccessClaims, RefreshClaims};

/// Default access token lifetime: 15 minutes.
pub const DEFAULT_ACCESS_TTL_SECS: i64 = 15 * 60;

/// Default refresh token lifetime: 7 days.
pub const DEFAULT_REFRESH_TTL_SECS: i64 = 7 * 24 * 60 * 60;

const ACCESS_TYP: &str = "access";
const REFRESH_TYP: &str = "refresh";

/// What gets bound into an access token at issuance.
#[derive(Debug, Clone)]
pub struct AccessGrant<'a> {
    pub user_id: Uuid,
    pub roles: &'a [String],
    pub session_id: Option<Uuid>,
    pub device_id: Option<Uuid>,
}

/// Signs and verifies access/refresh tokens. Holds the only secret material.
#[derive(Clone)]
pub struct TokenCodec {
    access_secret: Option<Vec<u8>>,
    refresh_secret: Option<Vec<u8>>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("access_secret", &self.access_secret.as_ref().map(|_| "<redacted>"))
            .field("refresh_secret", &self.refresh_secret.as_ref().map(|_| "<redacted>"))
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish()
    }
}

impl TokenCodec {
    /// Build a codec. Empty secrets are treated as unset; signing then fails
    /// with [`AuthError::Config`].
    pub fn new(
        access_secret: Option<&str>,
        refresh_secret: Option<&str>,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        let secret = |s: Option<&str>| {
            s.filter(|s| !s.is_empty())
                .map(|s| s.as_bytes().to_vec())
        };
        Self {
            access_secret: secret(access_secret),
            refresh_secret: secret(refresh_secret),
            access_ttl,
            refresh_ttl,
        }
    }

    /// Codec with default lifetimes.
    pub fn with_secrets(access_secret: &str, refresh_secret: &str) -> Self {
        Self::new(
            Some(access_secret),
            Some(refresh_secret),
            Duration::seconds(DEFAULT_ACCESS_TTL_SECS),
            Duration::seconds(DEFAULT_REFRESH_TTL_SECS),
        )
    }

    /// Startup check: both secrets present and distinct.
    pub fn ensure_configured(&self) -> Result<(), AuthError> {
        let access = self.access_key()?;
        let refresh = self.refresh_key()?;
        if access == refresh {
            return Err(AuthError::Config(
                "JWT_ACCESS_SECRET and JWT_REFRESH_SECRET must differ".into(),
            ));
        }
        Ok(())
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Sign a short-lived access token carrying the role snapshot and session binding.
    pub fn sign_access(&self, grant: &AccessGrant<'_>) -> Result<String, AuthError> {
        let secret = self.access_key()?;
        let now = Utc::now();
        let claims = AccessClaims {
            sub: grant.user_id.to_string(),
            roles: grant.roles.to_vec(),
            sid: grant.session_id.map(|id| id.to_string()),
            did: grant.device_id.map(|id| id.to_string()),
            typ: ACCESS_TYP.to_string(),
            exp: (now + self.access_ttl).timestamp(),
            iat: now.timestamp(),
        };
        sign(&claims, secret)
    }

    /// Sign a long-lived refresh token.
    pub fn sign_refresh(&self, user_id: Uuid) -> Result<String, AuthError> {
        let secret = self.refresh_key()?;
        let now = Utc::now();
        let claims = RefreshClaims {
            sub: user_id.to_string(),
            jti: Uuid::new_v4().simple().to_string(),
            typ: REFRESH_TYP.to_string(),
            exp: (now + self.refresh_ttl).timestamp(),
            iat: now.timestamp(),
        };
        sign(&claims, secret)
    }

    /// Verify an access token, returning its claims.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, AuthError> {
        let claims: AccessClaims = verify(token, self.access_key()?)?;
        if claims.typ != ACCESS_TYP {
            debug!("access token rejected: wrong typ {}", claims.typ);
            return Err(AuthError::InvalidToken);
        }
        Ok(claims)
    }

    /// Verify a refresh token, returning its claims.
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, AuthError> {
        let claims: RefreshClaims = verify(token, self.refresh_key()?)?;
        if claims.typ != REFRESH_TYP {
            debug!("refresh token rejected: wrong typ {}", claims.typ);
            return Err(AuthError::InvalidToken);
        }
        Ok(claims)
    }

    fn access_key(&self) -> Result<&[u8], AuthError> {
        self.access_secret
            .as_deref()
            .ok_or_else(|| AuthError::Config("Access token secret missing".into()))
    }

    fn refresh_key(&self) -> Result<&[u8], AuthError> {
        self.refresh_secret
            .as_deref()
            .ok_or_else(|| AuthError::Config("Refresh token secret missing".into()))
    }
}

fn sign<C: Serialize>(claims: &C, secret: &[u8]) -> Result<String, AuthError> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))
}

fn verify<C: DeserializeOwned>(token: &str, secret: &[u8]) -> Result<C, AuthError> {
    let key = DecodingKey::from_secret(secret);
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    decode::<C>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            debug!(error = %e, "token verification failed");
            AuthError::InvalidToken
        })
}

/// Parse a lifetime like `15m`, `7d`, `12h`, `30s`. Bare digits are seconds.
pub fn parse_duration(value: &str) -> Result<Duration, AuthError> {
    let value = value.trim();
    let invalid = || AuthError::Config(format!("invalid duration: {value:?}"));
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let amount: i64 = digits.parse().map_err(|_| invalid())?;
    let duration = match unit.trim() {
        "" | "s" => Duration::seconds(amount),
        "m" => Duration::minutes(amount),
        "h" => Duration::hours(amount),
        "d" => Duration::days(amount),
        _ => return Err(invalid()),
    };
    if duration <= Duration::zero() {
        return Err(invalid());
    }
    Ok(duration)
}
