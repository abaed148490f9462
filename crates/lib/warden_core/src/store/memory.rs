//! In-process [`AuthStore`] used by tests and `--in-memory` dev mode.
//!
//! All tables sit behind one mutex, so every trait method is a single
//! critical section: conditional updates and multi-table writes are atomic
//! with respect to each other.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{AuthStore, NewAuditLog};
use crate::auth::AuthError;
use crate::models::{
    AuditLog, Device, Invite, NewUser, Permission, ProfileUpdate, Role, Session, User,
    UserWithPassword, VerificationTokenType,
};
use crate::uuid::uuidv7;

/// Upper bound for `(owner, _)` range scans over link sets.
const MAX_UUID: Uuid = Uuid::from_u128(u128::MAX);

#[derive(Debug, Clone)]
struct UserRow {
    user: User,
    password_hash: String,
}

#[derive(Debug, Clone)]
struct SessionRow {
    session: Session,
    token_hash: String,
}

#[derive(Debug, Clone)]
struct TokenRow {
    user_id: Uuid,
    token_type: VerificationTokenType,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<Uuid, UserRow>,
    roles: HashMap<Uuid, Role>,
    permissions: HashMap<Uuid, Permission>,
    user_roles: BTreeSet<(Uuid, Uuid)>,
    role_permissions: BTreeSet<(Uuid, Uuid)>,
    user_permissions: BTreeSet<(Uuid, Uuid)>,
    devices: HashMap<Uuid, Device>,
    sessions: HashMap<Uuid, SessionRow>,
    verification_tokens: HashMap<String, TokenRow>,
    invites: HashMap<Uuid, Invite>,
    audit_logs: Vec<AuditLog>,
}

impl Tables {
    fn active_user_by_email(&self, email: &str) -> Option<&UserRow> {
        self.users
            .values()
            .find(|row| row.user.email == email && !row.user.is_deleted())
    }

    fn active_user_mut(&mut self, user_id: Uuid) -> Option<&mut UserRow> {
        self.users
            .get_mut(&user_id)
            .filter(|row| !row.user.is_deleted())
    }

    fn role_by_name(&self, name: &str) -> Option<&Role> {
        self.roles.values().find(|r| r.name == name)
    }

    fn revoke(&mut self, session_id: Uuid, salt: &str) -> Option<Session> {
        let row = self.sessions.get_mut(&session_id)?;
        if row.session.revoked {
            return None;
        }
        row.session.revoked = true;
        row.session.expires_at = Utc::now();
        row.token_hash = format!("revoked:{session_id}:{salt}");
        Some(row.session.clone())
    }

    fn permissions_for(&self, links: &BTreeSet<(Uuid, Uuid)>, owner: Uuid) -> Vec<Permission> {
        let mut perms: Vec<Permission> = links
            .range((owner, Uuid::nil())..=(owner, MAX_UUID))
            .filter_map(|(_, pid)| self.permissions.get(pid).cloned())
            .collect();
        perms.sort_by(|a, b| a.name.cmp(&b.name));
        perms
    }
}

/// Mutex-guarded in-memory tables.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_audit_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fault injection: make every subsequent audit insert fail.
    pub fn set_fail_audit_writes(&self, fail: bool) {
        self.fail_audit_writes.store(fail, Ordering::SeqCst);
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn replace_links(
    links: &mut BTreeSet<(Uuid, Uuid)>,
    owner: Uuid,
    targets: impl IntoIterator<Item = Uuid>,
) -> usize {
    links.retain(|(o, _)| *o != owner);
    let before = links.len();
    links.extend(targets.into_iter().map(|t| (owner, t)));
    links.len() - before
}

#[async_trait]
impl AuthStore for MemoryStore {
    async fn ping(&self) -> Result<(), AuthError> {
        Ok(())
    }

    async fn find_active_user_by_email(
        &self,
        email: &str,
    ) -> Result<Option<UserWithPassword>, AuthError> {
        let tables = self.tables();
        Ok(tables.active_user_by_email(email).map(|row| UserWithPassword {
            user: row.user.clone(),
            password_hash: row.password_hash.clone(),
        }))
    }

    async fn find_active_user(&self, user_id: Uuid) -> Result<Option<UserWithPassword>, AuthError> {
        let tables = self.tables();
        Ok(tables
            .users
            .get(&user_id)
            .filter(|row| !row.user.is_deleted())
            .map(|row| UserWithPassword {
                user: row.user.clone(),
                password_hash: row.password_hash.clone(),
            }))
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, AuthError> {
        Ok(self.tables().users.get(&user_id).map(|row| row.user.clone()))
    }

    async fn list_users(&self) -> Result<Vec<User>, AuthError> {
        let mut users: Vec<User> = self.tables().users.values().map(|r| r.user.clone()).collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(users)
    }

    async fn create_user(
        &self,
        user: &NewUser,
        invite_id: Option<Uuid>,
        role_names: &[&str],
    ) -> Result<User, AuthError> {
        let mut tables = self.tables();
        if tables.active_user_by_email(&user.email).is_some() {
            return Err(AuthError::Conflict("Email is already registered".into()));
        }
        if let Some(invite_id) = invite_id {
            match tables.invites.get(&invite_id) {
                Some(invite) if !invite.is_consumed() => {}
                _ => return Err(AuthError::InvalidInvite),
            }
        }

        let now = Utc::now();
        let created = User {
            id: Uuid::new_v4(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
            is_email_verified: user.is_email_verified,
            created_at: now,
            deleted_at: None,
        };

        if let Some(invite) = invite_id.and_then(|id| tables.invites.get_mut(&id)) {
            invite.accepted_by = Some(created.id);
            invite.accepted_at = Some(now);
        }

        let role_ids: Vec<Uuid> = role_names
            .iter()
            .filter_map(|name| tables.role_by_name(name).map(|r| r.id))
            .collect();
        for role_id in role_ids {
            tables.user_roles.insert((created.id, role_id));
        }

        tables.users.insert(
            created.id,
            UserRow {
                user: created.clone(),
                password_hash: user.password_hash.clone(),
            },
        );
        Ok(created)
    }

    async fn update_user_profile(
        &self,
        user_id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<Option<User>, AuthError> {
        let mut tables = self.tables();
        let Some(row) = tables.active_user_mut(user_id) else {
            return Ok(None);
        };
        if let Some(first) = &update.first_name {
            row.user.first_name = first.clone();
        }
        if let Some(last) = &update.last_name {
            row.user.last_name = last.clone();
        }
        if let Some(verified) = update.is_email_verified {
            row.user.is_email_verified = verified;
        }
        Ok(Some(row.user.clone()))
    }

    async fn set_password_hash(
        &self,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<bool, AuthError> {
        let mut tables = self.tables();
        Ok(match tables.active_user_mut(user_id) {
            Some(row) => {
                row.password_hash = password_hash.to_string();
                true
            }
            None => false,
        })
    }

    async fn mark_email_verified(&self, user_id: Uuid) -> Result<bool, AuthError> {
        let mut tables = self.tables();
        Ok(match tables.active_user_mut(user_id) {
            Some(row) => {
                row.user.is_email_verified = true;
                true
            }
            None => false,
        })
    }

    async fn soft_delete_user(&self, user_id: Uuid) -> Result<bool, AuthError> {
        let mut tables = self.tables();
        Ok(match tables.active_user_mut(user_id) {
            Some(row) => {
                row.user.deleted_at = Some(Utc::now());
                true
            }
            None => false,
        })
    }

    async fn user_role_names(&self, user_id: Uuid) -> Result<Vec<String>, AuthError> {
        let tables = self.tables();
        let mut names: Vec<String> = tables
            .user_roles
            .range((user_id, Uuid::nil())..=(user_id, MAX_UUID))
            .filter_map(|(_, rid)| tables.roles.get(rid).map(|r| r.name.clone()))
            .collect();
        names.sort();
        Ok(names)
    }

    async fn replace_user_roles(
        &self,
        user_id: Uuid,
        role_names: &[String],
    ) -> Result<usize, AuthError> {
        let mut tables = self.tables();
        let role_ids: BTreeSet<Uuid> = role_names
            .iter()
            .filter_map(|name| tables.role_by_name(name).map(|r| r.id))
            .collect();
        if role_ids.is_empty() {
            return Ok(0);
        }
        Ok(replace_links(&mut tables.user_roles, user_id, role_ids))
    }

    async fn list_roles(&self) -> Result<Vec<Role>, AuthError> {
        let mut roles: Vec<Role> = self.tables().roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn get_role(&self, role_id: Uuid) -> Result<Option<Role>, AuthError> {
        Ok(self.tables().roles.get(&role_id).cloned())
    }

    async fn create_role(
        &self,
        name: &str,
        description: Option<&str>,
        is_system: bool,
    ) -> Result<Role, AuthError> {
        let mut tables = self.tables();
        if tables.role_by_name(name).is_some() {
            return Err(AuthError::Conflict(format!("Role '{name}' already exists")));
        }
        let role = Role {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: description.map(str::to_string),
            is_system,
        };
        tables.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn update_role(
        &self,
        role_id: Uuid,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Option<Role>, AuthError> {
        let mut tables = self.tables();
        if let Some(name) = name
            && tables
                .roles
                .values()
                .any(|r| r.name == name && r.id != role_id)
        {
            return Err(AuthError::Conflict(format!("Role '{name}' already exists")));
        }
        let Some(role) = tables.roles.get_mut(&role_id) else {
            return Ok(None);
        };
        if let Some(name) = name {
            role.name = name.to_string();
        }
        if let Some(description) = description {
            role.description = Some(description.to_string());
        }
        Ok(Some(role.clone()))
    }

    async fn delete_role(&self, role_id: Uuid) -> Result<bool, AuthError> {
        let mut tables = self.tables();
        if tables.roles.remove(&role_id).is_none() {
            return Ok(false);
        }
        tables.user_roles.retain(|(_, rid)| *rid != role_id);
        tables.role_permissions.retain(|(rid, _)| *rid != role_id);
        Ok(true)
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>, AuthError> {
        let mut perms: Vec<Permission> = self.tables().permissions.values().cloned().collect();
        perms.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(perms)
    }

    async fn create_permission(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<Permission, AuthError> {
        let mut tables = self.tables();
        if tables.permissions.values().any(|p| p.name == name) {
            return Err(AuthError::Conflict("Permission name already exists".into()));
        }
        let perm = Permission {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: description.map(str::to_string),
        };
        tables.permissions.insert(perm.id, perm.clone());
        Ok(perm)
    }

    async fn update_permission(
        &self,
        permission_id: Uuid,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Option<Permission>, AuthError> {
        let mut tables = self.tables();
        if let Some(name) = name
            && tables
                .permissions
                .values()
                .any(|p| p.name == name && p.id != permission_id)
        {
            return Err(AuthError::Conflict("Permission name already exists".into()));
        }
        let Some(perm) = tables.permissions.get_mut(&permission_id) else {
            return Ok(None);
        };
        if let Some(name) = name {
            perm.name = name.to_string();
        }
        if let Some(description) = description {
            perm.description = Some(description.to_string());
        }
        Ok(Some(perm.clone()))
    }

    async fn delete_permission(&self, permission_id: Uuid) -> Result<bool, AuthError> {
        let mut tables = self.tables();
        if tables.permissions.remove(&permission_id).is_none() {
            return Ok(false);
        }
        tables.role_permissions.retain(|(_, pid)| *pid != permission_id);
        tables.user_permissions.retain(|(_, pid)| *pid != permission_id);
        Ok(true)
    }

    async fn role_permissions(&self, role_id: Uuid) -> Result<Vec<Permission>, AuthError> {
        let tables = self.tables();
        Ok(tables.permissions_for(&tables.role_permissions, role_id))
    }

    async fn replace_role_permissions(
        &self,
        role_id: Uuid,
        permission_ids: &[Uuid],
    ) -> Result<usize, AuthError> {
        let mut tables = self.tables();
        let known: BTreeSet<Uuid> = permission_ids
            .iter()
            .copied()
            .filter(|id| tables.permissions.contains_key(id))
            .collect();
        if known.is_empty() {
            return Ok(0);
        }
        Ok(replace_links(&mut tables.role_permissions, role_id, known))
    }

    async fn user_direct_permissions(&self, user_id: Uuid) -> Result<Vec<Permission>, AuthError> {
        let tables = self.tables();
        Ok(tables.permissions_for(&tables.user_permissions, user_id))
    }

    async fn replace_user_permissions(
        &self,
        user_id: Uuid,
        permission_ids: &[Uuid],
    ) -> Result<usize, AuthError> {
        let mut tables = self.tables();
        let known: BTreeSet<Uuid> = permission_ids
            .iter()
            .copied()
            .filter(|id| tables.permissions.contains_key(id))
            .collect();
        if known.is_empty() {
            return Ok(0);
        }
        Ok(replace_links(&mut tables.user_permissions, user_id, known))
    }

    async fn user_role_permissions(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<(String, Permission)>, AuthError> {
        let tables = self.tables();
        let mut out = Vec::new();
        for (_, role_id) in tables
            .user_roles
            .range((user_id, Uuid::nil())..=(user_id, MAX_UUID))
        {
            let Some(role) = tables.roles.get(role_id) else {
                continue;
            };
            for perm in tables.permissions_for(&tables.role_permissions, *role_id) {
                out.push((role.name.clone(), perm));
            }
        }
        Ok(out)
    }

    async fn upsert_device(
        &self,
        user_id: Uuid,
        name: &str,
        ip_address: Option<&str>,
    ) -> Result<Device, AuthError> {
        let mut tables = self.tables();
        let now = Utc::now();
        if let Some(device) = tables
            .devices
            .values_mut()
            .find(|d| d.user_id == user_id && d.name == name)
        {
            device.ip_address = ip_address.map(str::to_string);
            device.last_used_at = now;
            return Ok(device.clone());
        }
        let device = Device {
            id: uuidv7(),
            user_id,
            name: name.to_string(),
            ip_address: ip_address.map(str::to_string),
            last_used_at: now,
        };
        tables.devices.insert(device.id, device.clone());
        Ok(device)
    }

    async fn insert_session(
        &self,
        user_id: Uuid,
        device_id: Option<Uuid>,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Session, AuthError> {
        let mut tables = self.tables();
        if tables.sessions.values().any(|s| s.token_hash == token_hash) {
            return Err(AuthError::Conflict("Session token already in use".into()));
        }
        let session = Session {
            id: uuidv7(),
            user_id,
            device_id,
            expires_at,
            revoked: false,
            created_at: Utc::now(),
        };
        tables.sessions.insert(
            session.id,
            SessionRow {
                session: session.clone(),
                token_hash: token_hash.to_string(),
            },
        );
        Ok(session)
    }

    async fn find_session_by_token(&self, token_hash: &str) -> Result<Option<Session>, AuthError> {
        Ok(self
            .tables()
            .sessions
            .values()
            .find(|s| s.token_hash == token_hash)
            .map(|s| s.session.clone()))
    }

    async fn rotate_session(
        &self,
        old_hash: &str,
        new_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Session>, AuthError> {
        let mut tables = self.tables();
        let now = Utc::now();
        let Some(row) = tables
            .sessions
            .values_mut()
            .find(|s| s.token_hash == old_hash && s.session.is_active_at(now))
        else {
            return Ok(None);
        };
        row.token_hash = new_hash.to_string();
        row.session.expires_at = expires_at;
        Ok(Some(row.session.clone()))
    }

    async fn revoke_session_by_token(
        &self,
        token_hash: &str,
        salt: &str,
    ) -> Result<Option<Session>, AuthError> {
        let mut tables = self.tables();
        let Some(id) = tables
            .sessions
            .values()
            .find(|s| s.token_hash == token_hash && !s.session.revoked)
            .map(|s| s.session.id)
        else {
            return Ok(None);
        };
        Ok(tables.revoke(id, salt))
    }

    async fn revoke_session_by_id(
        &self,
        session_id: Uuid,
        salt: &str,
    ) -> Result<Option<Session>, AuthError> {
        Ok(self.tables().revoke(session_id, salt))
    }

    async fn list_unrevoked_sessions(&self, user_id: Uuid) -> Result<Vec<Session>, AuthError> {
        let mut sessions: Vec<Session> = self
            .tables()
            .sessions
            .values()
            .filter(|s| s.session.user_id == user_id && !s.session.revoked)
            .map(|s| s.session.clone())
            .collect();
        sessions.sort_by_key(|s| s.id);
        Ok(sessions)
    }

    async fn replace_verification_token(
        &self,
        user_id: Uuid,
        token_type: VerificationTokenType,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let mut tables = self.tables();
        tables
            .verification_tokens
            .retain(|_, t| !(t.user_id == user_id && t.token_type == token_type));
        tables.verification_tokens.insert(
            token_hash.to_string(),
            TokenRow {
                user_id,
                token_type,
                expires_at,
            },
        );
        Ok(())
    }

    async fn consume_verification_token(
        &self,
        token_hash: &str,
        token_type: VerificationTokenType,
    ) -> Result<Option<Uuid>, AuthError> {
        let mut tables = self.tables();
        let matches = tables
            .verification_tokens
            .get(token_hash)
            .is_some_and(|t| t.token_type == token_type && t.expires_at > Utc::now());
        if !matches {
            return Ok(None);
        }
        Ok(tables
            .verification_tokens
            .remove(token_hash)
            .map(|t| t.user_id))
    }

    async fn delete_verification_tokens_for_user(&self, user_id: Uuid) -> Result<u64, AuthError> {
        let mut tables = self.tables();
        let before = tables.verification_tokens.len();
        tables.verification_tokens.retain(|_, t| t.user_id != user_id);
        Ok((before - tables.verification_tokens.len()) as u64)
    }

    async fn create_invite(
        &self,
        email: Option<&str>,
        invited_by: Option<Uuid>,
    ) -> Result<Invite, AuthError> {
        let invite = Invite {
            id: Uuid::new_v4(),
            email: email.map(str::to_string),
            invited_by,
            created_at: Utc::now(),
            accepted_by: None,
            accepted_at: None,
        };
        self.tables().invites.insert(invite.id, invite.clone());
        Ok(invite)
    }

    async fn get_invite(&self, invite_id: Uuid) -> Result<Option<Invite>, AuthError> {
        Ok(self.tables().invites.get(&invite_id).cloned())
    }

    async fn insert_audit_log(&self, entry: &NewAuditLog) -> Result<(), AuthError> {
        if self.fail_audit_writes.load(Ordering::SeqCst) {
            return Err(AuthError::Internal("audit store unavailable".into()));
        }
        self.tables().audit_logs.push(AuditLog {
            id: uuidv7(),
            user_id: entry.user_id,
            team_id: entry.team_id,
            device_id: entry.device_id,
            session_id: entry.session_id,
            action: entry.action.clone(),
            ip_address: entry.ip_address.clone(),
            user_agent: entry.user_agent.clone(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_audit_logs(&self, limit: i64) -> Result<Vec<AuditLog>, AuthError> {
        let tables = self.tables();
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(tables.audit_logs.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: email.into(),
            password_hash: "hash".into(),
            is_email_verified: false,
        }
    }

    #[tokio::test]
    async fn email_unique_among_active_users_only() {
        let store = MemoryStore::new();
        let user = store.create_user(&new_user("a@x.io"), None, &[]).await.unwrap();
        assert!(matches!(
            store.create_user(&new_user("a@x.io"), None, &[]).await,
            Err(AuthError::Conflict(_))
        ));

        assert!(store.soft_delete_user(user.id).await.unwrap());
        assert!(store.create_user(&new_user("a@x.io"), None, &[]).await.is_ok());
    }

    #[tokio::test]
    async fn failed_invite_leaves_no_user_behind() {
        let store = MemoryStore::new();
        let err = store
            .create_user(&new_user("b@x.io"), Some(Uuid::new_v4()), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidInvite));
        assert!(store.find_active_user_by_email("b@x.io").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rotate_is_keyed_by_current_digest() {
        let store = MemoryStore::new();
        let user = store.create_user(&new_user("c@x.io"), None, &[]).await.unwrap();
        let expires = Utc::now() + Duration::days(1);
        store.insert_session(user.id, None, "h1", expires).await.unwrap();

        assert!(store.rotate_session("h1", "h2", expires).await.unwrap().is_some());
        assert!(store.rotate_session("h1", "h3", expires).await.unwrap().is_none());
        assert!(store.find_session_by_token("h1").await.unwrap().is_none());
        assert!(store.find_session_by_token("h2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn rotate_refuses_expired_rows() {
        let store = MemoryStore::new();
        let user = store.create_user(&new_user("d@x.io"), None, &[]).await.unwrap();
        store
            .insert_session(user.id, None, "old", Utc::now() - Duration::seconds(1))
            .await
            .unwrap();
        assert!(
            store
                .rotate_session("old", "new", Utc::now() + Duration::days(1))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn replace_with_unknown_ids_keeps_existing_links() {
        let store = MemoryStore::new();
        let role = store.create_role("r", None, false).await.unwrap();
        let perm = store.create_permission("p:read", None).await.unwrap();
        assert_eq!(
            store.replace_role_permissions(role.id, &[perm.id]).await.unwrap(),
            1
        );
        assert_eq!(
            store
                .replace_role_permissions(role.id, &[Uuid::new_v4()])
                .await
                .unwrap(),
            0
        );
        assert_eq!(store.role_permissions(role.id).await.unwrap(), vec![perm]);
    }
}
