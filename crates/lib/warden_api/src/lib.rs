//! # warden_api
//!
//! HTTP API library for Warden.

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post, put};
use tower_http::cors::{Any, CorsLayer};
use warden_core::audit::AuditRecorder;
use warden_core::auth::service::AuthService;
use warden_core::mail::Mailer;
use warden_core::store::AuthStore;

use crate::config::ApiConfig;
use crate::handlers::{admin, auth, health, users};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Store handle shared with the auth service.
    pub store: Arc<dyn AuthStore>,
    /// Auth orchestrator.
    pub auth: AuthService,
    /// API configuration.
    pub config: ApiConfig,
}

impl AppState {
    pub fn new(
        store: Arc<dyn AuthStore>,
        mailer: Arc<dyn Mailer>,
        audit: AuditRecorder,
        config: ApiConfig,
    ) -> Self {
        let auth = AuthService::new(
            store.clone(),
            config.token_codec(),
            mailer,
            audit,
            config.app_base_url.clone(),
        );
        Self {
            store,
            auth,
            config,
        }
    }
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no auth required)
    let public = Router::new()
        .route(routes::GET_HEALTH, get(health::health_handler))
        .route(routes::POST_AUTH_REGISTER, post(auth::register_handler))
        .route(routes::POST_AUTH_LOGIN, post(auth::login_handler))
        .route(routes::POST_AUTH_REFRESH, post(auth::refresh_handler))
        .route(routes::POST_AUTH_LOGOUT, post(auth::logout_handler))
        .route(routes::POST_AUTH_LOGOUT_ALL, post(auth::logout_all_handler))
        .route(
            routes::POST_AUTH_RESEND_VERIFICATION,
            post(auth::resend_verification_handler),
        )
        .route(routes::POST_AUTH_VERIFY, post(auth::verify_email_handler))
        .route(
            routes::POST_AUTH_FORGOT_PASSWORD,
            post(auth::forgot_password_handler),
        )
        .route(
            routes::POST_AUTH_RESET_PASSWORD,
            post(auth::reset_password_handler),
        );

    // Protected routes (require auth)
    let protected = Router::new()
        .route(
            routes::USERS_ME,
            get(users::get_me_handler).patch(users::update_me_handler),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    // Admin routes (require auth + superadmin)
    let admin_routes = Router::new()
        .route(
            routes::ADMIN_USERS,
            get(admin::list_users_handler).post(admin::create_user_handler),
        )
        .route(
            routes::ADMIN_USERS_ID,
            get(admin::get_user_handler)
                .patch(admin::update_user_handler)
                .delete(admin::delete_user_handler),
        )
        .route(
            routes::ADMIN_USERS_ID_ROLES,
            put(admin::replace_user_roles_handler),
        )
        .route(
            routes::ADMIN_USERS_ID_PERMISSIONS,
            get(admin::get_user_permissions_handler).put(admin::replace_user_permissions_handler),
        )
        .route(
            routes::ADMIN_USERS_ID_EFFECTIVE_PERMISSIONS,
            get(admin::effective_permissions_handler),
        )
        .route(
            routes::ADMIN_ROLES,
            get(admin::list_roles_handler).post(admin::create_role_handler),
        )
        .route(
            routes::ADMIN_ROLES_ID,
            patch(admin::update_role_handler).delete(admin::delete_role_handler),
        )
        .route(
            routes::ADMIN_ROLES_ID_PERMISSIONS,
            get(admin::get_role_permissions_handler).put(admin::replace_role_permissions_handler),
        )
        .route(
            routes::ADMIN_PERMISSIONS,
            get(admin::list_permissions_handler).post(admin::create_permission_handler),
        )
        .route(
            routes::ADMIN_PERMISSIONS_ID,
            patch(admin::update_permission_handler)
                .delete(admin::delete_permission_handler),
        )
        .route(routes::ADMIN_INVITES, post(admin::create_invite_handler))
        .route(routes::ADMIN_AUDIT_LOGS, get(admin::list_audit_logs_handler))
        .layer(axum::middleware::from_fn(
            middleware::auth::require_superadmin,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .nest(routes::ADMIN_PREFIX, admin_routes)
        .layer(cors)
        .with_state(state)
}
