//! Admin request handlers. Mounted under `/admin` behind `require_superadmin`.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};

use crate::AppState;
use crate::error::AppResult;
use crate::extract::ClientInfo;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{
    ApiResponse, AuditLogQuery, AuditLogResponse, CountResponse, CreateInviteRequest,
    CreateUserRequest, InviteResponse, NamedRequest, PermissionResponse,
    ReplacePermissionsRequest, ReplaceRolesRequest, ResolvedPermissionResponse, RoleResponse,
    UpdateNamedRequest, UpdateUserRequest, UserResponse,
};
use crate::services::admin::{self, parse_id};

type Admin = Extension<AuthenticatedUser>;

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// `GET /admin/users`
pub async fn list_users_handler(
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<Vec<UserResponse>>>> {
    Ok(Json(ApiResponse::data(admin::list_users(&state).await?)))
}

/// `POST /admin/users`
pub async fn create_user_handler(
    State(state): State<AppState>,
    Extension(user): Admin,
    ClientInfo(client): ClientInfo,
    Json(body): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<UserResponse>>)> {
    let created = admin::create_user(&state, &user.actor()?, body, &client).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message("User created", created)),
    ))
}

/// `GET /admin/users/{id}`
pub async fn get_user_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<UserResponse>>> {
    Ok(Json(ApiResponse::data(
        admin::get_user(&state, parse_id(&id)?).await?,
    )))
}

/// `PATCH /admin/users/{id}`
pub async fn update_user_handler(
    State(state): State<AppState>,
    Extension(user): Admin,
    ClientInfo(client): ClientInfo,
    Path(id): Path<String>,
    Json(body): Json<UpdateUserRequest>,
) -> AppResult<Json<ApiResponse<UserResponse>>> {
    let updated = admin::update_user(&state, &user.actor()?, parse_id(&id)?, body, &client).await?;
    Ok(Json(ApiResponse::with_message("User updated", updated)))
}

/// `DELETE /admin/users/{id}`: soft delete; revokes sessions and pending tokens.
pub async fn delete_user_handler(
    State(state): State<AppState>,
    Extension(user): Admin,
    ClientInfo(client): ClientInfo,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<CountResponse>>> {
    let count = admin::delete_user(&state, &user.actor()?, parse_id(&id)?, &client).await?;
    Ok(Json(ApiResponse::with_message(
        "User deleted",
        CountResponse { count },
    )))
}

/// `PUT /admin/users/{id}/roles`
pub async fn replace_user_roles_handler(
    State(state): State<AppState>,
    Extension(user): Admin,
    ClientInfo(client): ClientInfo,
    Path(id): Path<String>,
    Json(body): Json<ReplaceRolesRequest>,
) -> AppResult<Json<ApiResponse<Vec<String>>>> {
    let roles = admin::replace_user_roles(
        &state,
        &user.actor()?,
        parse_id(&id)?,
        &body.roles,
        &client,
    )
    .await?;
    Ok(Json(ApiResponse::with_message("Roles updated", roles)))
}

/// `GET /admin/users/{id}/permissions`: direct permissions only.
pub async fn get_user_permissions_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<Vec<PermissionResponse>>>> {
    Ok(Json(ApiResponse::data(
        admin::user_permissions(&state, parse_id(&id)?).await?,
    )))
}

/// `PUT /admin/users/{id}/permissions`
pub async fn replace_user_permissions_handler(
    State(state): State<AppState>,
    Extension(user): Admin,
    ClientInfo(client): ClientInfo,
    Path(id): Path<String>,
    Json(body): Json<ReplacePermissionsRequest>,
) -> AppResult<Json<ApiResponse<Vec<PermissionResponse>>>> {
    let perms = admin::replace_user_permissions(
        &state,
        &user.actor()?,
        parse_id(&id)?,
        &body.permission_ids,
        &client,
    )
    .await?;
    Ok(Json(ApiResponse::with_message("Permissions updated", perms)))
}

/// `GET /admin/users/{id}/effective-permissions`
pub async fn effective_permissions_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<Vec<ResolvedPermissionResponse>>>> {
    Ok(Json(ApiResponse::data(
        admin::effective_permissions(&state, parse_id(&id)?).await?,
    )))
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// `GET /admin/roles`
pub async fn list_roles_handler(
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<Vec<RoleResponse>>>> {
    Ok(Json(ApiResponse::data(admin::list_roles(&state).await?)))
}

/// `POST /admin/roles`
pub async fn create_role_handler(
    State(state): State<AppState>,
    Extension(user): Admin,
    ClientInfo(client): ClientInfo,
    Json(body): Json<NamedRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<RoleResponse>>)> {
    let role = admin::create_role(
        &state,
        &user.actor()?,
        &body.name,
        body.description.as_deref(),
        &client,
    )
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message("Role created", role)),
    ))
}

/// `PATCH /admin/roles/{id}`
pub async fn update_role_handler(
    State(state): State<AppState>,
    Extension(user): Admin,
    ClientInfo(client): ClientInfo,
    Path(id): Path<String>,
    Json(body): Json<UpdateNamedRequest>,
) -> AppResult<Json<ApiResponse<RoleResponse>>> {
    let role = admin::update_role(&state, &user.actor()?, parse_id(&id)?, body, &client).await?;
    Ok(Json(ApiResponse::with_message("Role updated", role)))
}

/// `DELETE /admin/roles/{id}`
pub async fn delete_role_handler(
    State(state): State<AppState>,
    Extension(user): Admin,
    ClientInfo(client): ClientInfo,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<()>>> {
    admin::delete_role(&state, &user.actor()?, parse_id(&id)?, &client).await?;
    Ok(Json(ApiResponse::message("Role deleted")))
}

/// `GET /admin/roles/{id}/permissions`
pub async fn get_role_permissions_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<Vec<PermissionResponse>>>> {
    Ok(Json(ApiResponse::data(
        admin::role_permissions(&state, parse_id(&id)?).await?,
    )))
}

/// `PUT /admin/roles/{id}/permissions`
pub async fn replace_role_permissions_handler(
    State(state): State<AppState>,
    Extension(user): Admin,
    ClientInfo(client): ClientInfo,
    Path(id): Path<String>,
    Json(body): Json<ReplacePermissionsRequest>,
) -> AppResult<Json<ApiResponse<Vec<PermissionResponse>>>> {
    let perms = admin::replace_role_permissions(
        &state,
        &user.actor()?,
        parse_id(&id)?,
        &body.permission_ids,
        &client,
    )
    .await?;
    Ok(Json(ApiResponse::with_message("Permissions updated", perms)))
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

/// `GET /admin/permissions`
pub async fn list_permissions_handler(
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<Vec<PermissionResponse>>>> {
    Ok(Json(ApiResponse::data(admin::list_permissions(&state).await?)))
}

/// `POST /admin/permissions`
pub async fn create_permission_handler(
    State(state): State<AppState>,
    Extension(user): Admin,
    ClientInfo(client): ClientInfo,
    Json(body): Json<NamedRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<PermissionResponse>>)> {
    let perm = admin::create_permission(
        &state,
        &user.actor()?,
        &body.name,
        body.description.as_deref(),
        &client,
    )
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message("Permission created", perm)),
    ))
}

/// `PATCH /admin/permissions/{id}`
pub async fn update_permission_handler(
    State(state): State<AppState>,
    Extension(user): Admin,
    ClientInfo(client): ClientInfo,
    Path(id): Path<String>,
    Json(body): Json<UpdateNamedRequest>,
) -> AppResult<Json<ApiResponse<PermissionResponse>>> {
    let perm =
        admin::update_permission(&state, &user.actor()?, parse_id(&id)?, body, &client).await?;
    Ok(Json(ApiResponse::with_message("Permission updated", perm)))
}

/// `DELETE /admin/permissions/{id}`
pub async fn delete_permission_handler(
    State(state): State<AppState>,
    Extension(user): Admin,
    ClientInfo(client): ClientInfo,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<()>>> {
    admin::delete_permission(&state, &user.actor()?, parse_id(&id)?, &client).await?;
    Ok(Json(ApiResponse::message("Permission deleted")))
}

// ---------------------------------------------------------------------------
// Invites and audit
// ---------------------------------------------------------------------------

/// `POST /admin/invites`
pub async fn create_invite_handler(
    State(state): State<AppState>,
    Extension(user): Admin,
    ClientInfo(client): ClientInfo,
    Json(body): Json<CreateInviteRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<InviteResponse>>)> {
    let invite =
        admin::create_invite(&state, &user.actor()?, body.email.as_deref(), &client).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message("Invite created", invite)),
    ))
}

/// `GET /admin/audit-logs?limit=`: newest first, at most 100.
pub async fn list_audit_logs_handler(
    State(state): State<AppState>,
    Query(query): Query<AuditLogQuery>,
) -> AppResult<Json<ApiResponse<Vec<AuditLogResponse>>>> {
    Ok(Json(ApiResponse::data(
        admin::list_audit_logs(&state, query.limit).await?,
    )))
}
