//! Session lifecycle: create, rotate, revoke.
//!
//! A session is `ACTIVE` until it is revoked (terminal) or its expiry passes
//! (terminal, checked lazily on refresh). Rotation keeps the row and swaps
//! the token digest in place; revocation overwrites the digest with a
//! placeholder so the original token can never match a row again.

use chrono::{Duration, Utc};
use rand::{Rng, rng};
use tracing::{debug, info};
use uuid::Uuid;

use super::{AuthError, digest_token};
use crate::models::Session;
use crate::store::AuthStore;

/// Salt appended to `revoked:<session id>:` when a session is revoked.
fn revocation_salt() -> String {
    let mut bytes = [0u8; 16];
    rng().fill(&mut bytes);
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("{nanos}:{}", hex::encode(bytes))
}

/// Open a new active session for `token`.
pub async fn create(
    store: &dyn AuthStore,
    user_id: Uuid,
    device_id: Option<Uuid>,
    token: &str,
    ttl: Duration,
) -> Result<Session, AuthError> {
    let expires_at = Utc::now() + ttl;
    let session = store
        .insert_session(user_id, device_id, &digest_token(token), expires_at)
        .await?;
    debug!(session_id = %session.id, %user_id, "session created");
    Ok(session)
}

/// Swap `old_token` for `new_token` and extend expiry, atomically.
///
/// Fails with [`AuthError::SessionInvalid`] if no unrevoked, unexpired session
/// is keyed by `old_token`, including when a concurrent rotation already
/// consumed it.
pub async fn rotate(
    store: &dyn AuthStore,
    old_token: &str,
    new_token: &str,
    ttl: Duration,
) -> Result<Session, AuthError> {
    let expires_at = Utc::now() + ttl;
    store
        .rotate_session(&digest_token(old_token), &digest_token(new_token), expires_at)
        .await?
        .ok_or(AuthError::SessionInvalid)
}

/// Revoke the session keyed by `token`.
pub async fn revoke(store: &dyn AuthStore, token: &str) -> Result<Session, AuthError> {
    let session = store
        .revoke_session_by_token(&digest_token(token), &revocation_salt())
        .await?
        .ok_or(AuthError::SessionNotFound)?;
    info!(session_id = %session.id, user_id = %session.user_id, "session revoked");
    Ok(session)
}

/// Revoke every unrevoked session of `user_id`. Returns the sessions this
/// call revoked; empty is not an error.
pub async fn revoke_all_for_user(
    store: &dyn AuthStore,
    user_id: Uuid,
) -> Result<Vec<Session>, AuthError> {
    let mut revoked = Vec::new();
    for session in store.list_unrevoked_sessions(user_id).await? {
        // A concurrent revoke may win; only count rows this call flipped.
        if let Some(s) = store
            .revoke_session_by_id(session.id, &revocation_salt())
            .await?
        {
            revoked.push(s);
        }
    }
    info!(%user_id, count = revoked.len(), "revoked all sessions for user");
    Ok(revoked)
}

/// Pure lookup by token. Returns revoked/expired rows too; callers check
/// [`Session::is_active`].
pub async fn find_by_token(
    store: &dyn AuthStore,
    token: &str,
) -> Result<Option<Session>, AuthError> {
    store.find_session_by_token(&digest_token(token)).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::models::NewUser;
    use crate::store::MemoryStore;

    async fn user(store: &MemoryStore) -> Uuid {
        store
            .create_user(
                &NewUser {
                    first_name: "S".into(),
                    last_name: "T".into(),
                    email: format!("{}@example.com", Uuid::new_v4()),
                    password_hash: "x".into(),
                    is_email_verified: true,
                },
                None,
                &[],
            )
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn rotation_invalidates_old_token() {
        let store = MemoryStore::new();
        let uid = user(&store).await;
        let created = create(&store, uid, None, "token-a", Duration::days(7))
            .await
            .unwrap();

        let rotated = rotate(&store, "token-a", "token-b", Duration::days(7))
            .await
            .unwrap();
        assert_eq!(rotated.id, created.id);
        assert!(rotated.expires_at >= created.expires_at);

        assert!(matches!(
            rotate(&store, "token-a", "token-c", Duration::days(7)).await,
            Err(AuthError::SessionInvalid)
        ));
        assert!(find_by_token(&store, "token-a").await.unwrap().is_none());
        assert_eq!(
            find_by_token(&store, "token-b").await.unwrap().map(|s| s.id),
            Some(created.id)
        );
    }

    #[tokio::test]
    async fn concurrent_rotations_have_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let uid = user(&store).await;
        create(&*store, uid, None, "shared", Duration::days(1))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                rotate(&*store, "shared", &format!("next-{i}"), Duration::days(1)).await
            }));
        }
        let mut wins = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => wins += 1,
                Err(AuthError::SessionInvalid) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(store.list_unrevoked_sessions(uid).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expired_session_cannot_rotate() {
        let store = MemoryStore::new();
        let uid = user(&store).await;
        create(&store, uid, None, "stale", Duration::seconds(-1))
            .await
            .unwrap();
        assert!(matches!(
            rotate(&store, "stale", "fresh", Duration::days(1)).await,
            Err(AuthError::SessionInvalid)
        ));
    }

    #[tokio::test]
    async fn revoke_is_terminal() {
        let store = MemoryStore::new();
        let uid = user(&store).await;
        create(&store, uid, None, "t1", Duration::days(1))
            .await
            .unwrap();

        let revoked = revoke(&store, "t1").await.unwrap();
        assert!(revoked.revoked);
        assert!(revoked.expires_at <= Utc::now());

        assert!(matches!(
            revoke(&store, "t1").await,
            Err(AuthError::SessionNotFound)
        ));
        assert!(matches!(
            rotate(&store, "t1", "t2", Duration::days(1)).await,
            Err(AuthError::SessionInvalid)
        ));
        assert!(find_by_token(&store, "t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revoke_unknown_token_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            revoke(&store, "never-issued").await,
            Err(AuthError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn revoke_all_is_exhaustive_and_idempotent() {
        let store = MemoryStore::new();
        let uid = user(&store).await;
        let other = user(&store).await;
        for i in 0..3 {
            create(&store, uid, None, &format!("u{i}"), Duration::days(1))
                .await
                .unwrap();
        }
        create(&store, other, None, "other", Duration::days(1))
            .await
            .unwrap();

        let revoked = revoke_all_for_user(&store, uid).await.unwrap();
        assert_eq!(revoked.len(), 3);
        assert!(store.list_unrevoked_sessions(uid).await.unwrap().is_empty());
        assert_eq!(store.list_unrevoked_sessions(other).await.unwrap().len(), 1);

        assert!(revoke_all_for_user(&store, uid).await.unwrap().is_empty());
    }

    #[test]
    fn revocation_salts_differ() {
        assert_ne!(revocation_salt(), revocation_salt());
    }
}
