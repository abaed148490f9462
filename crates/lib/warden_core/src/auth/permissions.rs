//! Permission resolution: role-derived plus directly-assigned permissions.

use std::collections::BTreeMap;

use uuid::Uuid;

use super::AuthError;
use crate::models::{PermissionSource, ResolvedPermission};
use crate::store::AuthStore;

/// Effective permissions for a user, one entry per distinct permission id.
///
/// Each entry lists every source that grants it (roles by name, then
/// `Direct`). Output is ordered by permission name, then id.
pub async fn resolve(
    store: &dyn AuthStore,
    user_id: Uuid,
) -> Result<Vec<ResolvedPermission>, AuthError> {
    let via_roles = store.user_role_permissions(user_id).await?;
    let direct = store.user_direct_permissions(user_id).await?;

    let mut by_id: BTreeMap<Uuid, ResolvedPermission> = BTreeMap::new();
    let sourced = via_roles
        .into_iter()
        .map(|(role, perm)| (perm, PermissionSource::Role { name: role }))
        .chain(direct.into_iter().map(|perm| (perm, PermissionSource::Direct)));

    for (perm, source) in sourced {
        let entry = by_id
            .entry(perm.id)
            .or_insert_with(|| ResolvedPermission {
                permission: perm,
                sources: Vec::new(),
            });
        if !entry.sources.contains(&source) {
            entry.sources.push(source);
        }
    }

    let mut resolved: Vec<ResolvedPermission> = by_id.into_values().collect();
    for entry in &mut resolved {
        entry.sources.sort();
    }
    resolved.sort_by(|a, b| {
        a.permission
            .name
            .cmp(&b.permission.name)
            .then(a.permission.id.cmp(&b.permission.id))
    });
    Ok(resolved)
}

/// Replace a user's direct permissions with the known subset of `permission_ids`.
///
/// Returns the number of permissions now assigned.
pub async fn replace_direct(
    store: &dyn AuthStore,
    user_id: Uuid,
    permission_ids: &[String],
) -> Result<usize, AuthError> {
    let ids = parse_ids(permission_ids)?;
    if store.find_active_user(user_id).await?.is_none() {
        return Err(AuthError::NotFound("User not found".into()));
    }
    match store.replace_user_permissions(user_id, &ids).await? {
        0 => Err(AuthError::NotFound("No valid permissions found".into())),
        n => Ok(n),
    }
}

/// Replace a role's permission set; same validation policy as [`replace_direct`].
pub async fn replace_role_permissions(
    store: &dyn AuthStore,
    role_id: Uuid,
    permission_ids: &[String],
) -> Result<usize, AuthError> {
    let ids = parse_ids(permission_ids)?;
    if store.get_role(role_id).await?.is_none() {
        return Err(AuthError::NotFound("Role not found".into()));
    }
    match store.replace_role_permissions(role_id, &ids).await? {
        0 => Err(AuthError::NotFound("No valid permissions found".into())),
        n => Ok(n),
    }
}

/// Every entry must be a UUID; unknown-but-well-formed ids are filtered later.
fn parse_ids(ids: &[String]) -> Result<Vec<Uuid>, AuthError> {
    ids.iter()
        .map(|raw| {
            Uuid::parse_str(raw.trim()).map_err(|_| {
                AuthError::Validation(format!("Invalid permission id: {raw:?}"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewUser, Permission};
    use crate::store::MemoryStore;

    struct Fixture {
        store: MemoryStore,
        user_id: Uuid,
        read: Permission,
        write: Permission,
    }

    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let role = store.create_role("editor", None, false).await.unwrap();
        let read = store.create_permission("doc:read", None).await.unwrap();
        let write = store.create_permission("doc:write", None).await.unwrap();
        store
            .replace_role_permissions(role.id, &[read.id])
            .await
            .unwrap();
        let user_id = store
            .create_user(
                &NewUser {
                    first_name: "P".into(),
                    last_name: "R".into(),
                    email: "p@example.com".into(),
                    password_hash: "x".into(),
                    is_email_verified: true,
                },
                None,
                &["editor"],
            )
            .await
            .unwrap()
            .id;
        Fixture {
            store,
            user_id,
            read,
            write,
        }
    }

    #[tokio::test]
    async fn union_deduplicates_by_id_and_tags_sources() {
        let f = fixture().await;
        replace_direct(
            &f.store,
            f.user_id,
            &[f.read.id.to_string(), f.write.id.to_string()],
        )
        .await
        .unwrap();

        let resolved = resolve(&f.store, f.user_id).await.unwrap();
        assert_eq!(resolved.len(), 2);

        let read = &resolved[0];
        assert_eq!(read.permission, f.read);
        assert_eq!(
            read.sources,
            vec![
                PermissionSource::Role {
                    name: "editor".into()
                },
                PermissionSource::Direct
            ]
        );

        let write = &resolved[1];
        assert_eq!(write.permission, f.write);
        assert_eq!(write.sources, vec![PermissionSource::Direct]);
    }

    #[tokio::test]
    async fn resolve_is_deterministic() {
        let f = fixture().await;
        replace_direct(&f.store, f.user_id, &[f.read.id.to_string()])
            .await
            .unwrap();
        let a = resolve(&f.store, f.user_id).await.unwrap();
        let b = resolve(&f.store, f.user_id).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn unknown_ids_are_dropped_once_one_is_valid() {
        let f = fixture().await;
        let n = replace_direct(
            &f.store,
            f.user_id,
            &[f.write.id.to_string(), Uuid::new_v4().to_string()],
        )
        .await
        .unwrap();
        assert_eq!(n, 1);
        assert_eq!(
            f.store.user_direct_permissions(f.user_id).await.unwrap(),
            vec![f.write.clone()]
        );
    }

    #[tokio::test]
    async fn no_valid_ids_is_not_found_and_keeps_assignments() {
        let f = fixture().await;
        replace_direct(&f.store, f.user_id, &[f.write.id.to_string()])
            .await
            .unwrap();

        assert!(matches!(
            replace_direct(&f.store, f.user_id, &[Uuid::new_v4().to_string()]).await,
            Err(AuthError::NotFound(_))
        ));
        assert!(matches!(
            replace_direct(&f.store, f.user_id, &[]).await,
            Err(AuthError::NotFound(_))
        ));
        assert_eq!(
            f.store.user_direct_permissions(f.user_id).await.unwrap(),
            vec![f.write]
        );
    }

    #[tokio::test]
    async fn malformed_ids_are_validation_errors() {
        let f = fixture().await;
        assert!(matches!(
            replace_direct(&f.store, f.user_id, &["not-a-uuid".into()]).await,
            Err(AuthError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn role_permissions_follow_same_policy() {
        let f = fixture().await;
        let role = f.store.create_role("viewer", None, false).await.unwrap();
        assert!(matches!(
            replace_role_permissions(&f.store, role.id, &[Uuid::new_v4().to_string()]).await,
            Err(AuthError::NotFound(_))
        ));
        assert_eq!(
            replace_role_permissions(&f.store, role.id, &[f.read.id.to_string()])
                .await
                .unwrap(),
            1
        );
        assert!(matches!(
            replace_role_permissions(&f.store, Uuid::new_v4(), &[f.read.id.to_string()]).await,
            Err(AuthError::NotFound(_))
        ));
    }
}
