//! Single-use email verification and password reset tokens.
//!
//! Tokens are 256-bit random hex strings carrying no claims. The typed,
//! expiring database row (keyed by the token digest) is the only source of
//! truth, and at most one pending token per (user, type) is kept.

use chrono::{Duration, Utc};
use rand::{Rng, rng};
use tracing::debug;
use uuid::Uuid;

use super::{AuthError, digest_token};
use crate::models::VerificationTokenType;
use crate::store::AuthStore;

/// Email verification tokens are valid for 24 hours.
pub const EMAIL_VERIFICATION_TTL_HOURS: i64 = 24;

/// Password reset tokens are valid for 1 hour.
pub const PASSWORD_RESET_TTL_HOURS: i64 = 1;

/// Lifetime for a token of the given type.
pub fn ttl_for(token_type: VerificationTokenType) -> Duration {
    match token_type {
        VerificationTokenType::EmailVerification => Duration::hours(EMAIL_VERIFICATION_TTL_HOURS),
        VerificationTokenType::PasswordReset => Duration::hours(PASSWORD_RESET_TTL_HOURS),
    }
}

/// Generate a random 256-bit token, hex encoded (64 chars).
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Issue a fresh token, replacing any pending token of the same type for the user.
/// Returns the plaintext token; only its digest is stored.
pub async fn issue(
    store: &dyn AuthStore,
    user_id: Uuid,
    token_type: VerificationTokenType,
) -> Result<String, AuthError> {
    let token = generate_token();
    let expires_at = Utc::now() + ttl_for(token_type);
    store
        .replace_verification_token(user_id, token_type, &digest_token(&token), expires_at)
        .await?;
    debug!(%user_id, %token_type, "verification token issued");
    Ok(token)
}

/// Consume a token of the expected type, returning its owner.
///
/// Missing, expired and wrong-type tokens all fail with
/// [`AuthError::TokenInvalid`]; a wrong-type presentation leaves the token in place.
pub async fn consume(
    store: &dyn AuthStore,
    token: &str,
    token_type: VerificationTokenType,
) -> Result<Uuid, AuthError> {
    store
        .consume_verification_token(&digest_token(token), token_type)
        .await?
        .ok_or(AuthError::TokenInvalid)
}
