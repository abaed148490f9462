//! Route paths.

pub const GET_HEALTH: &str = "/health";

pub const POST_AUTH_REGISTER: &str = "/auth/register";
pub const POST_AUTH_LOGIN: &str = "/auth/login";
pub const POST_AUTH_REFRESH: &str = "/auth/refresh";
pub const POST_AUTH_LOGOUT: &str = "/auth/logout";
pub const POST_AUTH_LOGOUT_ALL: &str = "/auth/logout-all";
pub const POST_AUTH_RESEND_VERIFICATION: &str = "/auth/resend-verification";
pub const POST_AUTH_VERIFY: &str = "/auth/verify";
pub const POST_AUTH_FORGOT_PASSWORD: &str = "/auth/forgot-password";
pub const POST_AUTH_RESET_PASSWORD: &str = "/auth/reset-password";

pub const USERS_ME: &str = "/users/me";

/// Admin paths, relative to [`ADMIN_PREFIX`].
pub const ADMIN_PREFIX: &str = "/admin";
pub const ADMIN_USERS: &str = "/users";
pub const ADMIN_USERS_ID: &str = "/users/{id}";
pub const ADMIN_USERS_ID_ROLES: &str = "/users/{id}/roles";
pub const ADMIN_USERS_ID_PERMISSIONS: &str = "/users/{id}/permissions";
pub const ADMIN_USERS_ID_EFFECTIVE_PERMISSIONS: &str = "/users/{id}/effective-permissions";
pub const ADMIN_ROLES: &str = "/roles";
pub const ADMIN_ROLES_ID: &str = "/roles/{id}";
pub const ADMIN_ROLES_ID_PERMISSIONS: &str = "/roles/{id}/permissions";
pub const ADMIN_PERMISSIONS: &str = "/permissions";
pub const ADMIN_PERMISSIONS_ID: &str = "/permissions/{id}";
pub const ADMIN_INVITES: &str = "/invites";
pub const ADMIN_AUDIT_LOGS: &str = "/audit-logs";
