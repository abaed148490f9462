//! End-to-end session lifecycle over the in-memory store.

use std::sync::Arc;

use warden_core::audit::AuditRecorder;
use warden_core::auth::jwt::TokenCodec;
use warden_core::auth::permissions;
use warden_core::auth::service::{AuditActor, AuthService, RegisterInput};
use warden_core::auth::{AuthError, ROLE_SUPERADMIN};
use warden_core::mail::{MailRecorder, extract_token};
use warden_core::models::{ClientMeta, PermissionSource};
use warden_core::seed::{ensure_superadmin, seed_defaults};
use warden_core::store::{AuthStore, MemoryStore};

fn client() -> ClientMeta {
    ClientMeta {
        ip_address: Some("192.0.2.10".into()),
        user_agent: Some("lifecycle-test".into()),
        device_name: Some("ci".into()),
    }
}

#[tokio::test]
async fn register_login_rotate_and_revoke() {
    let store = Arc::new(MemoryStore::new());
    seed_defaults(&*store).await.unwrap();
    let (root, _) = ensure_superadmin(&*store, "root@example.com", "root-password")
        .await
        .unwrap();

    let mail = Arc::new(MailRecorder::new());
    let (audit, worker) = AuditRecorder::spawn(store.clone(), 64);
    let svc = AuthService::new(
        store.clone(),
        TokenCodec::with_secrets("lifecycle-access", "lifecycle-refresh"),
        mail.clone(),
        audit,
        "https://warden.test",
    );

    // Register and verify.
    let reg = svc
        .register(
            RegisterInput {
                first_name: "Grace".into(),
                last_name: "Hopper".into(),
                email: "Grace@Example.com".into(),
                password: "cobol-forever".into(),
                invite_id: None,
            },
            &client(),
        )
        .await
        .unwrap();
    let sent = mail.last_to("grace@example.com").unwrap();
    assert!(sent.html_body.contains("https://warden.test/verify-email?token="));
    svc.verify_email(&extract_token(&sent.html_body).unwrap(), &client())
        .await
        .unwrap();

    // Role permissions plus a direct grant of one they already hold.
    let perms = store.list_permissions().await.unwrap();
    let dashboard = perms.iter().find(|p| p.name == "dashboard:access").unwrap();
    permissions::replace_direct(&*store, reg.user.id, &[dashboard.id.to_string()])
        .await
        .unwrap();
    let resolved = permissions::resolve(&*store, reg.user.id).await.unwrap();
    assert_eq!(resolved.len(), 12);
    let entry = resolved
        .iter()
        .find(|r| r.permission.id == dashboard.id)
        .unwrap();
    assert!(entry.is_direct());
    assert!(entry.sources.contains(&PermissionSource::Role {
        name: "subscriber_admin".into()
    }));

    // Login, rotate twice, then log out.
    let auth = svc
        .login("grace@example.com", "cobol-forever", &client())
        .await
        .unwrap();
    let second = svc.refresh(&auth.tokens.refresh_token, &client()).await.unwrap();
    let third = svc
        .refresh(&second.tokens.refresh_token, &client())
        .await
        .unwrap();
    assert_eq!(third.session_id, auth.session_id);
    for stale in [&auth.tokens.refresh_token, &second.tokens.refresh_token] {
        assert!(matches!(
            svc.refresh(stale, &client()).await,
            Err(AuthError::SessionInvalid)
        ));
    }
    svc.logout(&third.tokens.refresh_token, &client()).await.unwrap();
    assert!(store.list_unrevoked_sessions(reg.user.id).await.unwrap().is_empty());

    // Admin deletes the account.
    let root_login = svc
        .login("root@example.com", "root-password", &client())
        .await
        .unwrap();
    let claims = svc
        .codec()
        .verify_access(&root_login.tokens.access_token)
        .unwrap();
    assert!(claims.has_any_role(&[ROLE_SUPERADMIN]));
    let actor = AuditActor::from_claims(&claims).unwrap();
    assert_eq!(actor.user_id, root.id);
    svc.soft_delete_user(&actor, reg.user.id, &client())
        .await
        .unwrap();
    assert!(matches!(
        svc.login("grace@example.com", "cobol-forever", &client()).await,
        Err(AuthError::InvalidCredentials)
    ));

    worker.shutdown().await;
    let logs = store.list_audit_logs(100).await.unwrap();
    let deleted = logs
        .iter()
        .find(|l| l.action.starts_with("Admin deleted user"))
        .unwrap();
    assert_eq!(deleted.user_id, Some(root.id));
    assert_eq!(deleted.session_id, Some(root_login.session_id));
    assert_eq!(deleted.ip_address.as_deref(), Some("192.0.2.10"));
    assert!(logs.iter().any(|l| l.action == "Token refreshed"));
}
