//! Authentication middleware: Bearer token verification and role gating.

use axum::http::header::AUTHORIZATION;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use warden_core::auth::ROLE_SUPERADMIN;
use warden_core::auth::service::AuditActor;
use warden_core::models::AccessClaims;

use crate::AppState;
use crate::error::AppError;

/// Verified access token claims, stored in request extensions.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub AccessClaims);

impl AuthenticatedUser {
    /// The caller as an audit actor.
    pub fn actor(&self) -> Result<AuditActor, AppError> {
        AuditActor::from_claims(&self.0)
            .ok_or_else(|| AppError::Unauthorized("Invalid or expired token".into()))
    }
}

/// Axum middleware: extracts `Authorization: Bearer <token>`, verifies the
/// access token, and injects `AuthenticatedUser` into request extensions.
///
/// Roles are taken from the token as issued; they are not re-read per request.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing authorization header".into()))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Invalid authorization scheme".into()))?;

    let claims = state.auth.codec().verify_access(token.trim())?;

    request.extensions_mut().insert(AuthenticatedUser(claims));

    Ok(next.run(request).await)
}

/// Axum middleware: requires the `superadmin` role. Must run after [`require_auth`].
pub async fn require_superadmin(request: Request, next: Next) -> Result<Response, AppError> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| AppError::Unauthorized("Authentication required".into()))?;
    if !user.0.has_any_role(&[ROLE_SUPERADMIN]) {
        return Err(AppError::Forbidden("Insufficient role".into()));
    }
    Ok(next.run(request).await)
}
