//! Default roles and permissions, plus an optional bootstrap superadmin.
//!
//! Safe to run repeatedly: existing rows are kept and only missing roles,
//! permissions and role grants are added.

use std::collections::BTreeSet;

use tracing::info;
use uuid::Uuid;

use crate::auth::password::hash_password;
use crate::auth::{
    AuthError, ROLE_SUBSCRIBER_ADMIN, ROLE_SUBSCRIBER_MEMBER, ROLE_SUPERADMIN, normalize_email,
    validate_email, validate_password,
};
use crate::models::{NewUser, User};
use crate::store::AuthStore;

pub const ROLE_SYSTEM_SUPPORT_LEAD: &str = "system_support_lead";
pub const ROLE_SYSTEM_SUPPORT_ENGINEER: &str = "system_support_engineer";

/// `(name, description, is_system)`
pub const DEFAULT_ROLES: &[(&str, &str, bool)] = &[
    (ROLE_SUPERADMIN, "Full platform access", true),
    (ROLE_SYSTEM_SUPPORT_LEAD, "Platform support lead", true),
    (ROLE_SYSTEM_SUPPORT_ENGINEER, "Platform support engineer", true),
    (ROLE_SUBSCRIBER_ADMIN, "Administrator of a subscriber account", false),
    (ROLE_SUBSCRIBER_MEMBER, "Member of a subscriber account", false),
];

/// `(name, description)`
pub const DEFAULT_PERMISSIONS: &[(&str, &str)] = &[
    ("team:read", "View team details"),
    ("team:update", "Edit team details"),
    ("team:delete", "Delete a team"),
    ("member:invite", "Invite new members"),
    ("member:remove", "Remove members"),
    ("member:view", "View members"),
    ("role:assign", "Assign roles to members"),
    ("role:manage", "Create and edit roles"),
    ("audit:view", "View audit logs"),
    ("dashboard:access", "Access the dashboard"),
    ("dashboard:admin_tools", "Use dashboard admin tools"),
    ("settings:manage_integrations", "Manage integrations"),
    ("settings:configure_security", "Configure security settings"),
];

/// Permission names granted to `role` by default.
pub fn default_grants(role: &str) -> Vec<&'static str> {
    let all = DEFAULT_PERMISSIONS.iter().map(|(name, _)| *name);
    match role {
        ROLE_SUPERADMIN | ROLE_SYSTEM_SUPPORT_LEAD | ROLE_SYSTEM_SUPPORT_ENGINEER => all.collect(),
        ROLE_SUBSCRIBER_ADMIN => all.filter(|name| *name != "team:delete").collect(),
        ROLE_SUBSCRIBER_MEMBER => vec!["dashboard:access", "member:view"],
        _ => Vec::new(),
    }
}

/// What a seed run added.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeedReport {
    pub roles_created: usize,
    pub permissions_created: usize,
    pub grants_added: usize,
}

/// Ensure the default roles, permissions and role grants exist.
pub async fn seed_defaults(store: &dyn AuthStore) -> Result<SeedReport, AuthError> {
    let mut report = SeedReport::default();

    let mut permissions = store.list_permissions().await?;
    for (name, description) in DEFAULT_PERMISSIONS {
        if !permissions.iter().any(|p| p.name == *name) {
            permissions.push(store.create_permission(name, Some(description)).await?);
            report.permissions_created += 1;
        }
    }

    let mut roles = store.list_roles().await?;
    for (name, description, is_system) in DEFAULT_ROLES {
        if !roles.iter().any(|r| r.name == *name) {
            roles.push(store.create_role(name, Some(description), *is_system).await?);
            report.roles_created += 1;
        }
    }

    for (name, _, _) in DEFAULT_ROLES {
        let Some(role) = roles.iter().find(|r| r.name == *name) else {
            continue;
        };
        let current: BTreeSet<Uuid> = store
            .role_permissions(role.id)
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect();
        let wanted: BTreeSet<Uuid> = default_grants(name)
            .into_iter()
            .filter_map(|perm| permissions.iter().find(|p| p.name == perm).map(|p| p.id))
            .collect();
        let missing = wanted.difference(&current).count();
        if missing > 0 {
            let merged: Vec<Uuid> = current.union(&wanted).copied().collect();
            store.replace_role_permissions(role.id, &merged).await?;
            report.grants_added += missing;
        }
    }

    info!(
        roles = report.roles_created,
        permissions = report.permissions_created,
        grants = report.grants_added,
        "seeded defaults"
    );
    Ok(report)
}

/// Create a verified superadmin unless an active user with that email exists.
///
/// Returns the user and whether it was created by this call.
pub async fn ensure_superadmin(
    store: &dyn AuthStore,
    email: &str,
    password: &str,
) -> Result<(User, bool), AuthError> {
    let email = normalize_email(email);
    validate_email(&email)?;
    if let Some(existing) = store.find_active_user_by_email(&email).await? {
        return Ok((existing.user, false));
    }
    validate_password(password)?;

    let user = store
        .create_user(
            &NewUser {
                first_name: "Super".into(),
                last_name: "Admin".into(),
                email,
                password_hash: hash_password(password)?,
                is_email_verified: true,
            },
            None,
            &[ROLE_SUPERADMIN],
        )
        .await?;
    info!(user_id = %user.id, email = %user.email, "bootstrap superadmin created");
    Ok((user, true))
}
