//! Authentication and authorization logic.
//!
//! Provides password hashing, JWT management, the session lifecycle,
//! permission resolution and the flows that compose them. Shared by
//! `warden_api` and `warden_cli`.

pub mod jwt;
pub mod password;
pub mod permissions;
pub mod service;
pub mod sessions;
pub mod verification;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::mail::MailError;

/// Role assigned on self-registration without an invite.
pub const ROLE_SUBSCRIBER_ADMIN: &str = "subscriber_admin";

/// Role assigned on registration through a valid invite.
pub const ROLE_SUBSCRIBER_MEMBER: &str = "subscriber_member";

/// Role gating the `/admin` surface.
pub const ROLE_SUPERADMIN: &str = "superadmin";

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Maximum accepted password length (bcrypt truncates at 72 bytes anyway).
pub const MAX_PASSWORD_LEN: usize = 100;

/// Authentication errors.
///
/// Messages are safe to surface to callers; causes that could act as an
/// oracle (wrong secret vs. expired vs. malformed) are logged, never carried.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Email address has not been verified")]
    EmailNotVerified,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Session expired or invalid")]
    SessionInvalid,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Invalid or expired verification token")]
    TokenInvalid,

    #[error("Invalid or expired invite")]
    InvalidInvite,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Email delivery failed: {0}")]
    Delivery(String),

    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<MailError> for AuthError {
    fn from(e: MailError) -> Self {
        match e {
            MailError::Delivery(msg) => AuthError::Delivery(msg),
            MailError::Config(msg) => AuthError::Config(msg),
        }
    }
}

/// Lowercase and trim an email address. Every lookup and insert goes through this.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Cheap structural email check; deliverability is the mail provider's concern.
pub fn validate_email(email: &str) -> Result<(), AuthError> {
    let invalid = || AuthError::Validation("Invalid email address".into());
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || domain.len() < 3
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
        || email.chars().any(char::is_whitespace)
        || domain.contains('@')
    {
        return Err(invalid());
    }
    Ok(())
}

/// Enforce password length bounds.
pub fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(AuthError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if password.len() > MAX_PASSWORD_LEN {
        return Err(AuthError::Validation("Password too long".into()));
    }
    Ok(())
}

/// SHA-256 hex digest of a bearer token. Only digests are persisted.
pub fn digest_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}
