//! Current-user handlers.

use axum::extract::State;
use axum::{Extension, Json};

use crate::AppState;
use crate::error::AppResult;
use crate::extract::ClientInfo;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{ApiResponse, MeResponse, UpdateMeRequest, UserResponse};
use crate::services::users;

/// `GET /users/me`: profile, roles and effective permissions.
pub async fn get_me_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> AppResult<Json<ApiResponse<MeResponse>>> {
    let actor = user.actor()?;
    let me = users::me(&state, actor.user_id).await?;
    Ok(Json(ApiResponse::data(me)))
}

/// `PATCH /users/me`: change name and/or password.
pub async fn update_me_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    ClientInfo(client): ClientInfo,
    Json(body): Json<UpdateMeRequest>,
) -> AppResult<Json<ApiResponse<UserResponse>>> {
    let actor = user.actor()?;
    let updated = users::update_me(&state, &actor, body, &client).await?;
    Ok(Json(ApiResponse::with_message("Profile updated", updated)))
}
