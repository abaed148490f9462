//! Current-user profile operations.

use uuid::Uuid;
use warden_core::auth::{permissions, validate_password};
use warden_core::auth::service::{AuditActor, validate_name};
use warden_core::models::{ClientMeta, ProfileUpdate};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::{MeResponse, UpdateMeRequest, UserResponse};

/// Profile, roles and effective permissions of `user_id`.
pub async fn me(state: &AppState, user_id: Uuid) -> AppResult<MeResponse> {
    let user = state
        .store
        .find_active_user(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?
        .user;
    let roles = state.store.user_role_names(user_id).await?;
    let permissions = permissions::resolve(&*state.store, user_id)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();
    Ok(MeResponse {
        user: UserResponse::new(user, roles),
        permissions,
    })
}

/// Apply a name change and/or password change for the caller.
pub async fn update_me(
    state: &AppState,
    actor: &AuditActor,
    req: UpdateMeRequest,
    client: &ClientMeta,
) -> AppResult<UserResponse> {
    let wants_password = req.new_password.is_some();
    let wants_profile = req.first_name.is_some() || req.last_name.is_some();
    if !wants_password && !wants_profile {
        return Err(AppError::Validation("No changes supplied".into()));
    }

    // Every field is validated before anything is written.
    let update = if wants_profile {
        Some(ProfileUpdate {
            first_name: req
                .first_name
                .as_deref()
                .map(|v| validate_name("First name", v))
                .transpose()?,
            last_name: req
                .last_name
                .as_deref()
                .map(|v| validate_name("Last name", v))
                .transpose()?,
            is_email_verified: None,
        })
    } else {
        None
    };
    let password_change = match req.new_password.as_deref() {
        Some(new_password) => {
            let current = req.current_password.as_deref().ok_or_else(|| {
                AppError::Validation("Current password is required to change password".into())
            })?;
            validate_password(new_password)?;
            Some((current, new_password))
        }
        None => None,
    };

    if let Some((current, new_password)) = password_change {
        state
            .auth
            .change_password(actor, current, new_password, client)
            .await?;
    }

    if let Some(update) = update {
        state
            .store
            .update_user_profile(actor.user_id, &update)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".into()))?;
        state
            .auth
            .audit()
            .record(actor.entry("User updated profile", client));
    }

    let user = state
        .store
        .find_active_user(actor.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?
        .user;
    let roles = state.store.user_role_names(actor.user_id).await?;
    Ok(UserResponse::new(user, roles))
}
