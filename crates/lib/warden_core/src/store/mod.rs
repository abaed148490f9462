//! Relational store collaborator.
//!
//! [`AuthStore`] is the only way the domain touches persistence. Handles are
//! constructed once at process start and passed explicitly (`Arc<dyn AuthStore>`).
//!
//! Session rotation and revocation are single conditional updates keyed by
//! the current token digest: implementations must never split them into a
//! read followed by a write.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::auth::AuthError;
use crate::models::{
    AuditLog, Device, Invite, NewUser, Permission, ProfileUpdate, Role, Session, User,
    UserWithPassword, VerificationTokenType,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// One audit row to append.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewAuditLog {
    pub user_id: Option<Uuid>,
    pub team_id: Option<Uuid>,
    pub device_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub action: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Persistence primitives over users, roles, permissions, devices, sessions,
/// verification tokens, invites and audit logs.
#[async_trait]
pub trait AuthStore: Send + Sync {
    /// Connectivity probe.
    async fn ping(&self) -> Result<(), AuthError>;

    // -- users --------------------------------------------------------------

    /// Non-deleted user by (already normalized) email.
    async fn find_active_user_by_email(
        &self,
        email: &str,
    ) -> Result<Option<UserWithPassword>, AuthError>;

    /// Non-deleted user by id.
    async fn find_active_user(&self, user_id: Uuid) -> Result<Option<UserWithPassword>, AuthError>;

    /// Any user by id, including soft-deleted ones.
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, AuthError>;

    async fn list_users(&self) -> Result<Vec<User>, AuthError>;

    /// Insert a user, consume `invite_id` (if any) and grant the named roles,
    /// all-or-nothing.
    ///
    /// Fails with [`AuthError::Conflict`] when the email belongs to a
    /// non-deleted user and [`AuthError::InvalidInvite`] when the invite is
    /// missing or already consumed. Unknown role names are skipped.
    async fn create_user(
        &self,
        user: &NewUser,
        invite_id: Option<Uuid>,
        role_names: &[&str],
    ) -> Result<User, AuthError>;

    /// Apply a partial profile update to a non-deleted user.
    async fn update_user_profile(
        &self,
        user_id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<Option<User>, AuthError>;

    /// Returns false when no non-deleted user matched.
    async fn set_password_hash(&self, user_id: Uuid, password_hash: &str)
    -> Result<bool, AuthError>;

    /// Returns false when no non-deleted user matched.
    async fn mark_email_verified(&self, user_id: Uuid) -> Result<bool, AuthError>;

    /// Stamp `deleted_at`. Returns false when no non-deleted user matched.
    async fn soft_delete_user(&self, user_id: Uuid) -> Result<bool, AuthError>;

    // -- roles --------------------------------------------------------------

    async fn user_role_names(&self, user_id: Uuid) -> Result<Vec<String>, AuthError>;

    /// Replace a user's roles by name. Returns the number granted; zero
    /// means no name matched and nothing was changed.
    async fn replace_user_roles(
        &self,
        user_id: Uuid,
        role_names: &[String],
    ) -> Result<usize, AuthError>;

    async fn list_roles(&self) -> Result<Vec<Role>, AuthError>;

    async fn get_role(&self, role_id: Uuid) -> Result<Option<Role>, AuthError>;

    /// Fails with [`AuthError::Conflict`] on a duplicate name.
    async fn create_role(
        &self,
        name: &str,
        description: Option<&str>,
        is_system: bool,
    ) -> Result<Role, AuthError>;

    async fn update_role(
        &self,
        role_id: Uuid,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Option<Role>, AuthError>;

    async fn delete_role(&self, role_id: Uuid) -> Result<bool, AuthError>;

    // -- permissions --------------------------------------------------------

    async fn list_permissions(&self) -> Result<Vec<Permission>, AuthError>;

    /// Fails with [`AuthError::Conflict`] on a duplicate name.
    async fn create_permission(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<Permission, AuthError>;

    async fn update_permission(
        &self,
        permission_id: Uuid,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Option<Permission>, AuthError>;

    async fn delete_permission(&self, permission_id: Uuid) -> Result<bool, AuthError>;

    async fn role_permissions(&self, role_id: Uuid) -> Result<Vec<Permission>, AuthError>;

    /// Replace a role's permissions with the known subset of `permission_ids`.
    /// Returns the number assigned; zero means none were known and nothing changed.
    async fn replace_role_permissions(
        &self,
        role_id: Uuid,
        permission_ids: &[Uuid],
    ) -> Result<usize, AuthError>;

    async fn user_direct_permissions(&self, user_id: Uuid) -> Result<Vec<Permission>, AuthError>;

    /// Same contract as [`AuthStore::replace_role_permissions`], for direct grants.
    async fn replace_user_permissions(
        &self,
        user_id: Uuid,
        permission_ids: &[Uuid],
    ) -> Result<usize, AuthError>;

    /// `(role name, permission)` for every permission reachable through the user's roles.
    async fn user_role_permissions(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<(String, Permission)>, AuthError>;

    // -- devices ------------------------------------------------------------

    /// Insert or touch the `(user_id, name)` device, refreshing IP and last-used.
    async fn upsert_device(
        &self,
        user_id: Uuid,
        name: &str,
        ip_address: Option<&str>,
    ) -> Result<Device, AuthError>;

    // -- sessions -----------------------------------------------------------

    async fn insert_session(
        &self,
        user_id: Uuid,
        device_id: Option<Uuid>,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Session, AuthError>;

    async fn find_session_by_token(&self, token_hash: &str) -> Result<Option<Session>, AuthError>;

    /// Atomically swap the token digest and expiry of the active session
    /// currently keyed by `old_hash`. `None` when no unrevoked, unexpired row
    /// matches (including when a concurrent rotation already won).
    async fn rotate_session(
        &self,
        old_hash: &str,
        new_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Session>, AuthError>;

    /// Atomically revoke the unrevoked session keyed by `token_hash`, setting
    /// `expires_at = now` and overwriting the digest with
    /// `revoked:<session id>:<salt>`.
    async fn revoke_session_by_token(
        &self,
        token_hash: &str,
        salt: &str,
    ) -> Result<Option<Session>, AuthError>;

    /// Same as [`AuthStore::revoke_session_by_token`], keyed by id.
    async fn revoke_session_by_id(
        &self,
        session_id: Uuid,
        salt: &str,
    ) -> Result<Option<Session>, AuthError>;

    /// Every unrevoked session of the user, expired or not.
    async fn list_unrevoked_sessions(&self, user_id: Uuid) -> Result<Vec<Session>, AuthError>;

    // -- verification tokens ------------------------------------------------

    /// Delete the user's pending tokens of `token_type`, then insert the new one.
    async fn replace_verification_token(
        &self,
        user_id: Uuid,
        token_type: VerificationTokenType,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AuthError>;

    /// Atomically delete an unexpired token of the given type, returning its owner.
    async fn consume_verification_token(
        &self,
        token_hash: &str,
        token_type: VerificationTokenType,
    ) -> Result<Option<Uuid>, AuthError>;

    async fn delete_verification_tokens_for_user(&self, user_id: Uuid) -> Result<u64, AuthError>;

    // -- invites ------------------------------------------------------------

    async fn create_invite(
        &self,
        email: Option<&str>,
        invited_by: Option<Uuid>,
    ) -> Result<Invite, AuthError>;

    async fn get_invite(&self, invite_id: Uuid) -> Result<Option<Invite>, AuthError>;

    // -- audit --------------------------------------------------------------

    async fn insert_audit_log(&self, entry: &NewAuditLog) -> Result<(), AuthError>;

    /// Newest first.
    async fn list_audit_logs(&self, limit: i64) -> Result<Vec<AuditLog>, AuthError>;
}
