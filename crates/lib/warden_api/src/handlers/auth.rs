//! Authentication request handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use warden_core::auth::service::RegisterInput;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::extract::ClientInfo;
use crate::models::{
    ApiResponse, EmailRequest, LoginRequest, LogoutAllResponse, RefreshRequest, RegisterRequest,
    ResetPasswordRequest, TokenResponse, UserResponse, VerifyEmailRequest,
};

/// Response for flows that must not reveal whether an account exists.
const CHECK_INBOX: &str = "If an account exists for that address, an email has been sent";

/// `POST /auth/register`: create an account and send the verification email.
pub async fn register_handler(
    State(state): State<AppState>,
    ClientInfo(client): ClientInfo,
    Json(body): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<UserResponse>>)> {
    let invite_id = body
        .invite_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            uuid::Uuid::parse_str(s)
                .map_err(|_| AppError::Validation("Invalid invite id".into()))
        })
        .transpose()?;
    let reg = state
        .auth
        .register(
            RegisterInput {
                first_name: body.first_name,
                last_name: body.last_name,
                email: body.email,
                password: body.password,
                invite_id,
            },
            &client,
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message(
            "Registration successful. Please verify your email.",
            UserResponse::new(reg.user, reg.roles),
        )),
    ))
}

/// `POST /auth/login`: authenticate with email + password.
pub async fn login_handler(
    State(state): State<AppState>,
    ClientInfo(client): ClientInfo,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<ApiResponse<TokenResponse>>> {
    let auth = state.auth.login(&body.email, &body.password, &client).await?;
    Ok(Json(ApiResponse::with_message("Login successful", auth.into())))
}

/// `POST /auth/refresh`: exchange a refresh token for a new token pair.
pub async fn refresh_handler(
    State(state): State<AppState>,
    ClientInfo(client): ClientInfo,
    Json(body): Json<RefreshRequest>,
) -> AppResult<Json<ApiResponse<TokenResponse>>> {
    let auth = state.auth.refresh(&body.refresh_token, &client).await?;
    Ok(Json(ApiResponse::with_message("Token refreshed", auth.into())))
}

/// `POST /auth/logout`: revoke the session behind a refresh token.
pub async fn logout_handler(
    State(state): State<AppState>,
    ClientInfo(client): ClientInfo,
    Json(body): Json<RefreshRequest>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.auth.logout(&body.refresh_token, &client).await?;
    Ok(Json(ApiResponse::message("Logged out")))
}

/// `POST /auth/logout-all`: revoke every session of the token's owner.
pub async fn logout_all_handler(
    State(state): State<AppState>,
    ClientInfo(client): ClientInfo,
    Json(body): Json<RefreshRequest>,
) -> AppResult<Json<ApiResponse<LogoutAllResponse>>> {
    let revoked_sessions = state.auth.logout_all(&body.refresh_token, &client).await?;
    Ok(Json(ApiResponse::with_message(
        "Logged out from all devices",
        LogoutAllResponse { revoked_sessions },
    )))
}

/// `POST /auth/resend-verification`: reissue the verification email.
pub async fn resend_verification_handler(
    State(state): State<AppState>,
    ClientInfo(client): ClientInfo,
    Json(body): Json<EmailRequest>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.auth.resend_verification(&body.email, &client).await?;
    Ok(Json(ApiResponse::message(CHECK_INBOX)))
}

/// `POST /auth/verify`: consume an email verification token.
pub async fn verify_email_handler(
    State(state): State<AppState>,
    ClientInfo(client): ClientInfo,
    Json(body): Json<VerifyEmailRequest>,
) -> AppResult<Json<ApiResponse<UserResponse>>> {
    let user = state.auth.verify_email(&body.token, &client).await?;
    Ok(Json(ApiResponse::with_message("Email verified", user.into())))
}

/// `POST /auth/forgot-password`: send a reset link if the account exists.
pub async fn forgot_password_handler(
    State(state): State<AppState>,
    ClientInfo(client): ClientInfo,
    Json(body): Json<EmailRequest>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.auth.forgot_password(&body.email, &client).await?;
    Ok(Json(ApiResponse::message(CHECK_INBOX)))
}

/// `POST /auth/reset-password`: consume a reset token and set a new password.
pub async fn reset_password_handler(
    State(state): State<AppState>,
    ClientInfo(client): ClientInfo,
    Json(body): Json<ResetPasswordRequest>,
) -> AppResult<Json<ApiResponse<()>>> {
    state
        .auth
        .reset_password(&body.token, &body.password, &client)
        .await?;
    Ok(Json(ApiResponse::message(
        "Password reset. Please log in again.",
    )))
}
