//! Domain models.
//!
//! These are internal domain models, distinct from the API request/response
//! DTOs in `warden_api::models` (which carry `#[serde(rename_all)]` for
//! camelCase).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Domain user. Never carries the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    /// Always stored lowercased.
    pub email: String,
    pub is_email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    /// Display name used for outgoing mail.
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let trimmed = full.trim();
        if trimmed.is_empty() {
            self.email.clone()
        } else {
            trimmed.to_string()
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// User with password hash (for internal auth flows).
#[derive(Debug, Clone)]
pub struct UserWithPassword {
    pub user: User,
    pub password_hash: String,
}

/// Fields needed to insert a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: String,
    pub is_email_verified: bool,
}

/// Partial profile update. `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_email_verified: Option<bool>,
}

/// Named permission bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Seed-provisioned; not deletable through ordinary flows.
    pub is_system: bool,
}

/// Named capability string, e.g. `team:read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Permission {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
}

/// Where a resolved permission came from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PermissionSource {
    /// Granted through membership of the named role.
    Role { name: String },
    /// Assigned directly to the user.
    Direct,
}

/// A permission in a user's effective set, tagged with every path that grants it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPermission {
    pub permission: Permission,
    pub sources: Vec<PermissionSource>,
}

impl ResolvedPermission {
    pub fn is_direct(&self) -> bool {
        self.sources.contains(&PermissionSource::Direct)
    }
}

/// A (user, name) keyed device used for session attribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Device {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub ip_address: Option<String>,
    pub last_used_at: DateTime<Utc>,
}

/// A refresh-token grant. The token itself is only stored as a digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_id: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Not revoked and not past its expiry.
    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at > now
    }
}

/// Purpose of a single-use verification token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationTokenType {
    EmailVerification,
    PasswordReset,
}

impl VerificationTokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationTokenType::EmailVerification => "EMAIL_VERIFICATION",
            VerificationTokenType::PasswordReset => "PASSWORD_RESET",
        }
    }
}

impl std::fmt::Display for VerificationTokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pre-provisioned registration grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Invite {
    pub id: Uuid,
    pub email: Option<String>,
    pub invited_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub accepted_by: Option<Uuid>,
    pub accepted_at: Option<DateTime<Utc>>,
}

impl Invite {
    pub fn is_consumed(&self) -> bool {
        self.accepted_at.is_some()
    }
}

/// Persisted audit row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLog {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub team_id: Option<Uuid>,
    pub device_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub action: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Caller-side request metadata threaded into devices and audit rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    /// Value of the `x-device-name` header, if sent.
    pub device_name: Option<String>,
}

impl ClientMeta {
    /// Device name used when the client does not identify itself.
    pub const UNKNOWN_DEVICE: &'static str = "Unknown";

    pub fn device_name(&self) -> &str {
        self.device_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(Self::UNKNOWN_DEVICE)
    }
}

/// JWT claims embedded in access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject: the user ID.
    pub sub: String,
    /// Role names snapshotted at issuance; not re-checked per request.
    pub roles: Vec<String>,
    /// Session the token was minted for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    /// Device the token was minted for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub did: Option<String>,
    /// Token kind, always `access`.
    pub typ: String,
    /// Expiry (unix timestamp).
    pub exp: i64,
    /// Issued at (unix timestamp).
    pub iat: i64,
}

impl AccessClaims {
    pub fn user_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.sid.as_deref().and_then(|s| Uuid::parse_str(s).ok())
    }

    pub fn device_id(&self) -> Option<Uuid> {
        self.did.as_deref().and_then(|s| Uuid::parse_str(s).ok())
    }

    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        self.roles.iter().any(|r| roles.contains(&r.as_str()))
    }
}

/// JWT claims embedded in refresh tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// Subject: the user ID.
    pub sub: String,
    /// Random id; keeps two tokens minted in the same second distinct.
    pub jti: String,
    /// Token kind, always `refresh`.
    pub typ: String,
    pub exp: i64,
    pub iat: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(revoked: bool, expires_in: Duration) -> Session {
        Session {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            device_id: None,
            expires_at: Utc::now() + expires_in,
            revoked,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn session_activity_requires_unrevoked_and_unexpired() {
        assert!(session(false, Duration::minutes(5)).is_active());
        assert!(!session(true, Duration::minutes(5)).is_active());
        assert!(!session(false, Duration::minutes(-5)).is_active());
    }

    #[test]
    fn device_name_defaults_to_unknown() {
        let meta = ClientMeta::default();
        assert_eq!(meta.device_name(), "Unknown");

        let meta = ClientMeta {
            device_name: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(meta.device_name(), "Unknown");

        let meta = ClientMeta {
            device_name: Some("Pixel 8".into()),
            ..Default::default()
        };
        assert_eq!(meta.device_name(), "Pixel 8");
    }

    #[test]
    fn verification_token_type_wire_names() {
        assert_eq!(
            VerificationTokenType::EmailVerification.as_str(),
            "EMAIL_VERIFICATION"
        );
        let json = serde_json::to_string(&VerificationTokenType::PasswordReset).unwrap();
        assert_eq!(json, "\"PASSWORD_RESET\"");
    }

    #[test]
    fn display_name_falls_back_to_email() {
        let user = User {
            id: Uuid::new_v4(),
            first_name: String::new(),
            last_name: String::new(),
            email: "a@b.c".into(),
            is_email_verified: false,
            created_at: Utc::now(),
            deleted_at: None,
        };
        assert_eq!(user.display_name(), "a@b.c");
    }
}
