//! Administrative operations over users, roles, permissions, invites and audit logs.
//!
//! Every mutation is audited with the acting admin's user, session and device.

use uuid::Uuid;
use warden_core::auth::password::hash_password;
use warden_core::auth::service::{AuditActor, validate_name};
use warden_core::auth::{normalize_email, permissions, validate_email, validate_password};
use warden_core::models::{ClientMeta, NewUser, ProfileUpdate};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::{
    AuditLogResponse, CreateUserRequest, InviteResponse, PermissionResponse,
    ResolvedPermissionResponse, RoleResponse, UpdateNamedRequest, UpdateUserRequest,
    UserResponse,
};

/// Audit log page size cap.
pub const MAX_AUDIT_LOGS: i64 = 100;

/// Parse a path id, reporting malformed ids as validation errors.
pub fn parse_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::Validation(format!("Invalid id: {raw:?}")))
}

fn required_name(value: &str) -> AppResult<&str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::Validation("Name is required".into()));
    }
    Ok(value)
}

fn optional_name(value: Option<&str>) -> AppResult<Option<&str>> {
    value.map(required_name).transpose()
}

fn record(state: &AppState, actor: &AuditActor, client: &ClientMeta, action: String) {
    state.auth.audit().record(actor.entry(action, client));
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

pub async fn list_users(state: &AppState) -> AppResult<Vec<UserResponse>> {
    let mut out = Vec::new();
    for user in state.store.list_users().await? {
        let roles = state.store.user_role_names(user.id).await?;
        out.push(UserResponse::new(user, roles));
    }
    Ok(out)
}

pub async fn get_user(state: &AppState, user_id: Uuid) -> AppResult<UserResponse> {
    let user = state
        .store
        .get_user(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    let roles = state.store.user_role_names(user_id).await?;
    Ok(UserResponse::new(user, roles))
}

/// Create a user directly. Admin-created accounts are verified unless the
/// request says otherwise; every named role must exist.
pub async fn create_user(
    state: &AppState,
    actor: &AuditActor,
    req: CreateUserRequest,
    client: &ClientMeta,
) -> AppResult<UserResponse> {
    let first_name = validate_name("First name", &req.first_name)?;
    let last_name = validate_name("Last name", &req.last_name)?;
    let email = normalize_email(&req.email);
    validate_email(&email)?;
    validate_password(&req.password)?;

    let known = state.store.list_roles().await?;
    if let Some(unknown) = req
        .roles
        .iter()
        .find(|name| !known.iter().any(|r| &r.name == *name))
    {
        return Err(AppError::Validation(format!("Unknown role: {unknown}")));
    }
    let role_names: Vec<&str> = req.roles.iter().map(String::as_str).collect();

    let user = state
        .store
        .create_user(
            &NewUser {
                first_name,
                last_name,
                email,
                password_hash: hash_password(&req.password)?,
                is_email_verified: req.is_email_verified.unwrap_or(true),
            },
            None,
            &role_names,
        )
        .await?;
    record(state, actor, client, format!("Admin created user {}", user.id));
    let roles = state.store.user_role_names(user.id).await?;
    Ok(UserResponse::new(user, roles))
}

pub async fn update_user(
    state: &AppState,
    actor: &AuditActor,
    user_id: Uuid,
    req: UpdateUserRequest,
    client: &ClientMeta,
) -> AppResult<UserResponse> {
    let update = ProfileUpdate {
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
        is_email_verified: req.is_email_verified,
    };
    let user = state
        .store
        .update_user_profile(user_id, &update)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    record(state, actor, client, format!("Admin updated user {user_id}"));
    let roles = state.store.user_role_names(user_id).await?;
    Ok(UserResponse::new(user, roles))
}

/// Replace a user's roles by name. Takes effect on the user's next refresh.
pub async fn replace_user_roles(
    state: &AppState,
    actor: &AuditActor,
    user_id: Uuid,
    roles: &[String],
    client: &ClientMeta,
) -> AppResult<Vec<String>> {
    if state.store.find_active_user(user_id).await?.is_none() {
        return Err(AppError::NotFound("User not found".into()));
    }
    if state.store.replace_user_roles(user_id, roles).await? == 0 {
        return Err(AppError::NotFound("No valid roles found".into()));
    }
    record(
        state,
        actor,
        client,
        format!("Admin set roles of user {user_id}"),
    );
    Ok(state.store.user_role_names(user_id).await?)
}

/// Soft-delete with session and token cascade. Returns sessions revoked.
pub async fn delete_user(
    state: &AppState,
    actor: &AuditActor,
    user_id: Uuid,
    client: &ClientMeta,
) -> AppResult<usize> {
    if actor.user_id == user_id {
        return Err(AppError::Validation("Cannot delete your own account".into()));
    }
    Ok(state.auth.soft_delete_user(actor, user_id, client).await?)
}

pub async fn user_permissions(
    state: &AppState,
    user_id: Uuid,
) -> AppResult<Vec<PermissionResponse>> {
    if state.store.get_user(user_id).await?.is_none() {
        return Err(AppError::NotFound("User not found".into()));
    }
    Ok(state
        .store
        .user_direct_permissions(user_id)
        .await?
        .into_iter()
        .map(Into::into)
        .collect())
}

pub async fn replace_user_permissions(
    state: &AppState,
    actor: &AuditActor,
    user_id: Uuid,
    permission_ids: &[String],
    client: &ClientMeta,
) -> AppResult<Vec<PermissionResponse>> {
    permissions::replace_direct(&*state.store, user_id, permission_ids).await?;
    record(
        state,
        actor,
        client,
        format!("Admin set direct permissions of user {user_id}"),
    );
    user_permissions(state, user_id).await
}

pub async fn effective_permissions(
    state: &AppState,
    user_id: Uuid,
) -> AppResult<Vec<ResolvedPermissionResponse>> {
    if state.store.get_user(user_id).await?.is_none() {
        return Err(AppError::NotFound("User not found".into()));
    }
    Ok(permissions::resolve(&*state.store, user_id)
        .await?
        .into_iter()
        .map(Into::into)
        .collect())
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

pub async fn list_roles(state: &AppState) -> AppResult<Vec<RoleResponse>> {
    Ok(state
        .store
        .list_roles()
        .await?
        .into_iter()
        .map(Into::into)
        .collect())
}

pub async fn create_role(
    state: &AppState,
    actor: &AuditActor,
    name: &str,
    description: Option<&str>,
    client: &ClientMeta,
) -> AppResult<RoleResponse> {
    let role = state
        .store
        .create_role(required_name(name)?, description, false)
        .await?;
    record(state, actor, client, format!("Admin created role {}", role.name));
    Ok(role.into())
}

pub async fn update_role(
    state: &AppState,
    actor: &AuditActor,
    role_id: Uuid,
    req: UpdateNamedRequest,
    client: &ClientMeta,
) -> AppResult<RoleResponse> {
    let role = state
        .store
        .update_role(
            role_id,
            optional_name(req.name.as_deref())?,
            req.description.as_deref(),
        )
        .await?
        .ok_or_else(|| AppError::NotFound("Role not found".into()))?;
    record(state, actor, client, format!("Admin updated role {}", role.name));
    Ok(role.into())
}

/// System roles cannot be deleted.
pub async fn delete_role(
    state: &AppState,
    actor: &AuditActor,
    role_id: Uuid,
    client: &ClientMeta,
) -> AppResult<()> {
    let role = state
        .store
        .get_role(role_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Role not found".into()))?;
    if role.is_system {
        return Err(AppError::Validation("System roles cannot be deleted".into()));
    }
    state.store.delete_role(role_id).await?;
    record(state, actor, client, format!("Admin deleted role {}", role.name));
    Ok(())
}

pub async fn role_permissions(
    state: &AppState,
    role_id: Uuid,
) -> AppResult<Vec<PermissionResponse>> {
    if state.store.get_role(role_id).await?.is_none() {
        return Err(AppError::NotFound("Role not found".into()));
    }
    Ok(state
        .store
        .role_permissions(role_id)
        .await?
        .into_iter()
        .map(Into::into)
        .collect())
}

pub async fn replace_role_permissions(
    state: &AppState,
    actor: &AuditActor,
    role_id: Uuid,
    permission_ids: &[String],
    client: &ClientMeta,
) -> AppResult<Vec<PermissionResponse>> {
    permissions::replace_role_permissions(&*state.store, role_id, permission_ids).await?;
    record(
        state,
        actor,
        client,
        format!("Admin set permissions of role {role_id}"),
    );
    role_permissions(state, role_id).await
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

pub async fn list_permissions(state: &AppState) -> AppResult<Vec<PermissionResponse>> {
    Ok(state
        .store
        .list_permissions()
        .await?
        .into_iter()
        .map(Into::into)
        .collect())
}

pub async fn create_permission(
    state: &AppState,
    actor: &AuditActor,
    name: &str,
    description: Option<&str>,
    client: &ClientMeta,
) -> AppResult<PermissionResponse> {
    let permission = state
        .store
        .create_permission(required_name(name)?, description)
        .await?;
    record(
        state,
        actor,
        client,
        format!("Admin created permission {}", permission.name),
    );
    Ok(permission.into())
}

pub async fn update_permission(
    state: &AppState,
    actor: &AuditActor,
    permission_id: Uuid,
    req: UpdateNamedRequest,
    client: &ClientMeta,
) -> AppResult<PermissionResponse> {
    let permission = state
        .store
        .update_permission(
            permission_id,
            optional_name(req.name.as_deref())?,
            req.description.as_deref(),
        )
        .await?
        .ok_or_else(|| AppError::NotFound("Permission not found".into()))?;
    record(
        state,
        actor,
        client,
        format!("Admin updated permission {}", permission.name),
    );
    Ok(permission.into())
}

pub async fn delete_permission(
    state: &AppState,
    actor: &AuditActor,
    permission_id: Uuid,
    client: &ClientMeta,
) -> AppResult<()> {
    if !state.store.delete_permission(permission_id).await? {
        return Err(AppError::NotFound("Permission not found".into()));
    }
    record(
        state,
        actor,
        client,
        format!("Admin deleted permission {permission_id}"),
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Invites and audit
// ---------------------------------------------------------------------------

pub async fn create_invite(
    state: &AppState,
    actor: &AuditActor,
    email: Option<&str>,
    client: &ClientMeta,
) -> AppResult<InviteResponse> {
    let email = match email.map(normalize_email).filter(|e| !e.is_empty()) {
        Some(e) => {
            validate_email(&e)?;
            Some(e)
        }
        None => None,
    };
    let invite = state
        .store
        .create_invite(email.as_deref(), Some(actor.user_id))
        .await?;
    record(state, actor, client, format!("Admin created invite {}", invite.id));
    Ok(invite.into())
}

/// Newest first, at most [`MAX_AUDIT_LOGS`].
pub async fn list_audit_logs(
    state: &AppState,
    limit: Option<i64>,
) -> AppResult<Vec<AuditLogResponse>> {
    let limit = limit.unwrap_or(MAX_AUDIT_LOGS).clamp(1, MAX_AUDIT_LOGS);
    Ok(state
        .store
        .list_audit_logs(limit)
        .await?
        .into_iter()
        .map(Into::into)
        .collect())
}
