//! PostgreSQL-backed [`AuthStore`] over a sqlx pool.
//!
//! Rotation and revocation are single `UPDATE ... WHERE token_hash = $1`
//! statements; under READ COMMITTED a second concurrent update on the same
//! row re-evaluates its predicate against the committed row and matches
//! nothing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{AuthStore, NewAuditLog};
use crate::auth::AuthError;
use crate::models::{
    AuditLog, Device, Invite, NewUser, Permission, ProfileUpdate, Role, Session, User,
    UserWithPassword, VerificationTokenType,
};
use crate::uuid::uuidv7;

const USER_COLUMNS: &str =
    "id, first_name, last_name, email, is_email_verified, created_at, deleted_at";

const SESSION_COLUMNS: &str = "id, user_id, device_id, expires_at, revoked, created_at";

#[derive(sqlx::FromRow)]
struct UserPasswordRow {
    #[sqlx(flatten)]
    user: User,
    password_hash: String,
}

impl From<UserPasswordRow> for UserWithPassword {
    fn from(row: UserPasswordRow) -> Self {
        UserWithPassword {
            user: row.user,
            password_hash: row.password_hash,
        }
    }
}

/// Map a unique-constraint violation to [`AuthError::Conflict`].
fn conflict_on_unique(e: sqlx::Error, message: &str) -> AuthError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AuthError::Conflict(message.to_string())
        }
        _ => AuthError::Db(e),
    }
}

/// Store handle over a shared connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl AuthStore for PgStore {
    async fn ping(&self) -> Result<(), AuthError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn find_active_user_by_email(
        &self,
        email: &str,
    ) -> Result<Option<UserWithPassword>, AuthError> {
        let row = sqlx::query_as::<_, UserPasswordRow>(&format!(
            "SELECT {USER_COLUMNS}, password_hash FROM users \
             WHERE email = $1 AND deleted_at IS NULL"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn find_active_user(&self, user_id: Uuid) -> Result<Option<UserWithPassword>, AuthError> {
        let row = sqlx::query_as::<_, UserPasswordRow>(&format!(
            "SELECT {USER_COLUMNS}, password_hash FROM users \
             WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn list_users(&self) -> Result<Vec<User>, AuthError> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn create_user(
        &self,
        user: &NewUser,
        invite_id: Option<Uuid>,
        role_names: &[&str],
    ) -> Result<User, AuthError> {
        let mut tx = self.pool.begin().await?;

        let created = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (first_name, last_name, email, password_hash, is_email_verified) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
        ))
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.is_email_verified)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| conflict_on_unique(e, "Email is already registered"))?;

        if let Some(invite_id) = invite_id {
            let accepted = sqlx::query(
                "UPDATE invites SET accepted_by = $2, accepted_at = now() \
                 WHERE id = $1 AND accepted_at IS NULL",
            )
            .bind(invite_id)
            .bind(created.id)
            .execute(&mut *tx)
            .await?;
            if accepted.rows_affected() == 0 {
                // Dropping `tx` rolls the user insert back.
                return Err(AuthError::InvalidInvite);
            }
        }

        for name in role_names {
            sqlx::query(
                "INSERT INTO user_roles (user_id, role_id) \
                 SELECT $1, id FROM roles WHERE name = $2 \
                 ON CONFLICT DO NOTHING",
            )
            .bind(created.id)
            .bind(*name)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn update_user_profile(
        &self,
        user_id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET \
               first_name = COALESCE($2, first_name), \
               last_name = COALESCE($3, last_name), \
               is_email_verified = COALESCE($4, is_email_verified), \
               updated_at = now() \
             WHERE id = $1 AND deleted_at IS NULL \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(user_id)
        .bind(update.first_name.as_deref())
        .bind(update.last_name.as_deref())
        .bind(update.is_email_verified)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn set_password_hash(
        &self,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<bool, AuthError> {
        let result = sqlx::query(
            "UPDATE users SET password_hash = $2, updated_at = now() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .bind(password_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_email_verified(&self, user_id: Uuid) -> Result<bool, AuthError> {
        let result = sqlx::query(
            "UPDATE users SET is_email_verified = TRUE, updated_at = now() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn soft_delete_user(&self, user_id: Uuid) -> Result<bool, AuthError> {
        let result = sqlx::query(
            "UPDATE users SET deleted_at = now(), updated_at = now() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn user_role_names(&self, user_id: Uuid) -> Result<Vec<String>, AuthError> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT r.name FROM user_roles ur \
             JOIN roles r ON r.id = ur.role_id \
             WHERE ur.user_id = $1 ORDER BY r.name",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn replace_user_roles(
        &self,
        user_id: Uuid,
        role_names: &[String],
    ) -> Result<usize, AuthError> {
        let mut tx = self.pool.begin().await?;
        let role_ids = sqlx::query_scalar::<_, Uuid>("SELECT id FROM roles WHERE name = ANY($1)")
            .bind(role_names)
            .fetch_all(&mut *tx)
            .await?;
        if role_ids.is_empty() {
            return Ok(0);
        }
        sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO user_roles (user_id, role_id) SELECT $1, UNNEST($2::uuid[])")
            .bind(user_id)
            .bind(&role_ids)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(role_ids.len())
    }

    async fn list_roles(&self) -> Result<Vec<Role>, AuthError> {
        let roles = sqlx::query_as::<_, Role>(
            "SELECT id, name, description, is_system FROM roles ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(roles)
    }

    async fn get_role(&self, role_id: Uuid) -> Result<Option<Role>, AuthError> {
        let role = sqlx::query_as::<_, Role>(
            "SELECT id, name, description, is_system FROM roles WHERE id = $1",
        )
        .bind(role_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(role)
    }

    async fn create_role(
        &self,
        name: &str,
        description: Option<&str>,
        is_system: bool,
    ) -> Result<Role, AuthError> {
        sqlx::query_as::<_, Role>(
            "INSERT INTO roles (name, description, is_system) VALUES ($1, $2, $3) \
             RETURNING id, name, description, is_system",
        )
        .bind(name)
        .bind(description)
        .bind(is_system)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, &format!("Role '{name}' already exists")))
    }

    async fn update_role(
        &self,
        role_id: Uuid,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Option<Role>, AuthError> {
        sqlx::query_as::<_, Role>(
            "UPDATE roles SET name = COALESCE($2, name), description = COALESCE($3, description) \
             WHERE id = $1 RETURNING id, name, description, is_system",
        )
        .bind(role_id)
        .bind(name)
        .bind(description)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "Role name already exists"))
    }

    async fn delete_role(&self, role_id: Uuid) -> Result<bool, AuthError> {
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(role_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>, AuthError> {
        let perms = sqlx::query_as::<_, Permission>(
            "SELECT id, name, description FROM permissions ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(perms)
    }

    async fn create_permission(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<Permission, AuthError> {
        sqlx::query_as::<_, Permission>(
            "INSERT INTO permissions (name, description) VALUES ($1, $2) \
             RETURNING id, name, description",
        )
        .bind(name)
        .bind(description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "Permission name already exists"))
    }

    async fn update_permission(
        &self,
        permission_id: Uuid,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Option<Permission>, AuthError> {
        sqlx::query_as::<_, Permission>(
            "UPDATE permissions SET name = COALESCE($2, name), \
             description = COALESCE($3, description) \
             WHERE id = $1 RETURNING id, name, description",
        )
        .bind(permission_id)
        .bind(name)
        .bind(description)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "Permission name already exists"))
    }

    async fn delete_permission(&self, permission_id: Uuid) -> Result<bool, AuthError> {
        let result = sqlx::query("DELETE FROM permissions WHERE id = $1")
            .bind(permission_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn role_permissions(&self, role_id: Uuid) -> Result<Vec<Permission>, AuthError> {
        let perms = sqlx::query_as::<_, Permission>(
            "SELECT p.id, p.name, p.description FROM role_permissions rp \
             JOIN permissions p ON p.id = rp.permission_id \
             WHERE rp.role_id = $1 ORDER BY p.name",
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(perms)
    }

    async fn replace_role_permissions(
        &self,
        role_id: Uuid,
        permission_ids: &[Uuid],
    ) -> Result<usize, AuthError> {
        let mut tx = self.pool.begin().await?;
        let known =
            sqlx::query_scalar::<_, Uuid>("SELECT id FROM permissions WHERE id = ANY($1)")
                .bind(permission_ids)
                .fetch_all(&mut *tx)
                .await?;
        if known.is_empty() {
            return Ok(0);
        }
        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(role_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO role_permissions (role_id, permission_id) SELECT $1, UNNEST($2::uuid[])",
        )
        .bind(role_id)
        .bind(&known)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(known.len())
    }

    async fn user_direct_permissions(&self, user_id: Uuid) -> Result<Vec<Permission>, AuthError> {
        let perms = sqlx::query_as::<_, Permission>(
            "SELECT p.id, p.name, p.description FROM user_permissions up \
             JOIN permissions p ON p.id = up.permission_id \
             WHERE up.user_id = $1 ORDER BY p.name",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(perms)
    }

    async fn replace_user_permissions(
        &self,
        user_id: Uuid,
        permission_ids: &[Uuid],
    ) -> Result<usize, AuthError> {
        let mut tx = self.pool.begin().await?;
        let known =
            sqlx::query_scalar::<_, Uuid>("SELECT id FROM permissions WHERE id = ANY($1)")
                .bind(permission_ids)
                .fetch_all(&mut *tx)
                .await?;
        if known.is_empty() {
            return Ok(0);
        }
        sqlx::query("DELETE FROM user_permissions WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO user_permissions (user_id, permission_id) SELECT $1, UNNEST($2::uuid[])",
        )
        .bind(user_id)
        .bind(&known)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(known.len())
    }

    async fn user_role_permissions(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<(String, Permission)>, AuthError> {
        let rows = sqlx::query_as::<_, (String, Uuid, String, Option<String>)>(
            "SELECT r.name, p.id, p.name, p.description FROM user_roles ur \
             JOIN roles r ON r.id = ur.role_id \
             JOIN role_permissions rp ON rp.role_id = r.id \
             JOIN permissions p ON p.id = rp.permission_id \
             WHERE ur.user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(role, id, name, description)| {
                (
                    role,
                    Permission {
                        id,
                        name,
                        description,
                    },
                )
            })
            .collect())
    }

    async fn upsert_device(
        &self,
        user_id: Uuid,
        name: &str,
        ip_address: Option<&str>,
    ) -> Result<Device, AuthError> {
        let device = sqlx::query_as::<_, Device>(
            "INSERT INTO devices (id, user_id, name, ip_address) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_id, name) DO UPDATE \
               SET ip_address = EXCLUDED.ip_address, last_used_at = now() \
             RETURNING id, user_id, name, ip_address, last_used_at",
        )
        .bind(uuidv7())
        .bind(user_id)
        .bind(name)
        .bind(ip_address)
        .fetch_one(&self.pool)
        .await?;
        Ok(device)
    }

    async fn insert_session(
        &self,
        user_id: Uuid,
        device_id: Option<Uuid>,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Session, AuthError> {
        sqlx::query_as::<_, Session>(&format!(
            "INSERT INTO sessions (id, user_id, device_id, token_hash, expires_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {SESSION_COLUMNS}"
        ))
        .bind(uuidv7())
        .bind(user_id)
        .bind(device_id)
        .bind(token_hash)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "Session token already in use"))
    }

    async fn find_session_by_token(&self, token_hash: &str) -> Result<Option<Session>, AuthError> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE token_hash = $1"
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn rotate_session(
        &self,
        old_hash: &str,
        new_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Session>, AuthError> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "UPDATE sessions SET token_hash = $2, expires_at = $3, updated_at = now() \
             WHERE token_hash = $1 AND revoked = FALSE AND expires_at > now() \
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(old_hash)
        .bind(new_hash)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn revoke_session_by_token(
        &self,
        token_hash: &str,
        salt: &str,
    ) -> Result<Option<Session>, AuthError> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "UPDATE sessions SET revoked = TRUE, expires_at = now(), \
               token_hash = 'revoked:' || id::text || ':' || $2, updated_at = now() \
             WHERE token_hash = $1 AND revoked = FALSE \
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(token_hash)
        .bind(salt)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn revoke_session_by_id(
        &self,
        session_id: Uuid,
        salt: &str,
    ) -> Result<Option<Session>, AuthError> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "UPDATE sessions SET revoked = TRUE, expires_at = now(), \
               token_hash = 'revoked:' || id::text || ':' || $2, updated_at = now() \
             WHERE id = $1 AND revoked = FALSE \
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(session_id)
        .bind(salt)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn list_unrevoked_sessions(&self, user_id: Uuid) -> Result<Vec<Session>, AuthError> {
        let sessions = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE user_id = $1 AND revoked = FALSE ORDER BY id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn replace_verification_token(
        &self,
        user_id: Uuid,
        token_type: VerificationTokenType,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM verification_tokens WHERE user_id = $1 AND token_type = $2")
            .bind(user_id)
            .bind(token_type.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO verification_tokens (id, user_id, token_hash, token_type, expires_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(uuidv7())
        .bind(user_id)
        .bind(token_hash)
        .bind(token_type.as_str())
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn consume_verification_token(
        &self,
        token_hash: &str,
        token_type: VerificationTokenType,
    ) -> Result<Option<Uuid>, AuthError> {
        let user_id = sqlx::query_scalar::<_, Uuid>(
            "DELETE FROM verification_tokens \
             WHERE token_hash = $1 AND token_type = $2 AND expires_at > now() \
             RETURNING user_id",
        )
        .bind(token_hash)
        .bind(token_type.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(user_id)
    }

    async fn delete_verification_tokens_for_user(&self, user_id: Uuid) -> Result<u64, AuthError> {
        let result = sqlx::query("DELETE FROM verification_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn create_invite(
        &self,
        email: Option<&str>,
        invited_by: Option<Uuid>,
    ) -> Result<Invite, AuthError> {
        let invite = sqlx::query_as::<_, Invite>(
            "INSERT INTO invites (email, invited_by) VALUES ($1, $2) \
             RETURNING id, email, invited_by, created_at, accepted_by, accepted_at",
        )
        .bind(email)
        .bind(invited_by)
        .fetch_one(&self.pool)
        .await?;
        Ok(invite)
    }

    async fn get_invite(&self, invite_id: Uuid) -> Result<Option<Invite>, AuthError> {
        let invite = sqlx::query_as::<_, Invite>(
            "SELECT id, email, invited_by, created_at, accepted_by, accepted_at \
             FROM invites WHERE id = $1",
        )
        .bind(invite_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(invite)
    }

    async fn insert_audit_log(&self, entry: &NewAuditLog) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs
                (id, user_id, team_id, device_id, session_id, action, ip_address, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(uuidv7())
        .bind(entry.user_id)
        .bind(entry.team_id)
        .bind(entry.device_id)
        .bind(entry.session_id)
        .bind(&entry.action)
        .bind(entry.ip_address.as_deref())
        .bind(entry.user_agent.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_audit_logs(&self, limit: i64) -> Result<Vec<AuditLog>, AuthError> {
        let logs = sqlx::query_as::<_, AuditLog>(
            "SELECT id, user_id, team_id, device_id, session_id, action, ip_address, \
                    user_agent, created_at \
             FROM audit_logs ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }
}
