//! Integration tests: build the router over the in-memory store and drive it with `oneshot`.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;
use warden_api::{AppState, config::ApiConfig};
use warden_core::audit::AuditRecorder;
use warden_core::mail::{MailRecorder, extract_token};
use warden_core::seed::{ensure_superadmin, seed_defaults};
use warden_core::store::{AuthStore, MemoryStore};

struct TestApp {
    router: Router,
    state: AppState,
    store: Arc<MemoryStore>,
    mail: Arc<MailRecorder>,
}

async fn app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    seed_defaults(&*store).await.unwrap();
    ensure_superadmin(&*store, "root@example.com", "root-password")
        .await
        .unwrap();
    let mail = Arc::new(MailRecorder::new());
    let (audit, _worker) = AuditRecorder::spawn(store.clone(), 256);
    let state = AppState::new(store.clone(), mail.clone(), audit, ApiConfig::for_tests());
    TestApp {
        router: warden_api::router(state.clone()),
        state,
        store,
        mail,
    }
}

impl TestApp {
    async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-device-name", "integration")
            .header("user-agent", "api-tests");
        if let Some(token) = token {
            req = req.header("authorization", format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => req
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();

        let resp = self.router.clone().oneshot(req).await.expect("request");
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .expect("read body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("parse JSON")
        };
        (status, json)
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, None, Some(body)).await
    }

    async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.call(Method::GET, uri, Some(token), None).await
    }

    /// Register, verify and log in; returns `(access, refresh)`.
    async fn signed_in(&self, email: &str) -> (String, String) {
        let (status, _) = self
            .post(
                "/auth/register",
                json!({
                    "firstName": "Test",
                    "lastName": "User",
                    "email": email,
                    "password": "password123",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let token = extract_token(&self.mail.last_to(&email.to_lowercase()).unwrap().html_body)
            .unwrap();
        let (status, _) = self.post("/auth/verify", json!({ "token": token })).await;
        assert_eq!(status, StatusCode::OK);
        self.login(email, "password123").await
    }

    async fn login(&self, email: &str, password: &str) -> (String, String) {
        let (status, body) = self
            .post("/auth/login", json!({ "email": email, "password": password }))
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
        (
            body["data"]["accessToken"].as_str().unwrap().to_string(),
            body["data"]["refreshToken"].as_str().unwrap().to_string(),
        )
    }
}

#[tokio::test]
async fn health_reports_database() {
    let app = app().await;
    let (status, body) = app.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "up");
}

#[tokio::test]
async fn register_verify_login_and_me() {
    let app = app().await;
    let (access, _) = app.signed_in("Alice@Example.com").await;

    let (status, body) = app.get("/users/me", &access).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user"]["email"], "alice@example.com");
    assert_eq!(body["data"]["user"]["roles"][0], "subscriber_admin");
    assert_eq!(body["data"]["permissions"].as_array().unwrap().len(), 12);
}

#[tokio::test]
async fn duplicate_registration_is_conflict() {
    let app = app().await;
    app.signed_in("bob@example.com").await;
    let (status, body) = app
        .post(
            "/auth/register",
            json!({
                "firstName": "Bob",
                "lastName": "Again",
                "email": "BOB@example.com",
                "password": "password123",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn unverified_login_and_bad_credentials_are_401() {
    let app = app().await;
    app.post(
        "/auth/register",
        json!({
            "firstName": "Carol",
            "lastName": "Unverified",
            "email": "carol@example.com",
            "password": "password123",
        }),
    )
    .await;
    let (status, _) = app
        .post(
            "/auth/login",
            json!({ "email": "carol@example.com", "password": "password123" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .post(
            "/auth/login",
            json!({ "email": "nobody@example.com", "password": "password123" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid credentials");
}

#[tokio::test]
async fn refresh_rotation_and_logout_all() {
    let app = app().await;
    let (_, refresh) = app.signed_in("dave@example.com").await;
    app.login("dave@example.com", "password123").await;

    let (status, body) = app
        .post("/auth/refresh", json!({ "refreshToken": refresh }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let rotated = body["data"]["refreshToken"].as_str().unwrap().to_string();

    let (status, _) = app
        .post("/auth/refresh", json!({ "refreshToken": refresh }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .post("/auth/logout-all", json!({ "refreshToken": rotated }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["revokedSessions"], 2);

    let (status, body) = app
        .post("/auth/logout-all", json!({ "refreshToken": rotated }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["revokedSessions"], 0);

    let (status, _) = app
        .post("/auth/logout", json!({ "refreshToken": rotated }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn forgot_password_is_success_shaped() {
    let app = app().await;
    let (status, body) = app
        .post("/auth/forgot-password", json!({ "email": "ghost@example.com" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(app.mail.sent().is_empty());
}

#[tokio::test]
async fn reset_password_flow() {
    let app = app().await;
    let (_, refresh) = app.signed_in("erin@example.com").await;
    app.post("/auth/forgot-password", json!({ "email": "erin@example.com" }))
        .await;
    let token = extract_token(&app.mail.last_to("erin@example.com").unwrap().html_body).unwrap();

    let (status, _) = app
        .post("/auth/verify", json!({ "token": token }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "reset token must not verify email");

    let (status, _) = app
        .post(
            "/auth/reset-password",
            json!({ "token": token, "password": "new-password-1" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .post("/auth/refresh", json!({ "refreshToken": refresh }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    app.login("erin@example.com", "new-password-1").await;
}

#[tokio::test]
async fn protected_routes_require_bearer() {
    let app = app().await;
    let (status, body) = app.call(Method::GET, "/users/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = app.get("/users/me", "not-a-token").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_routes_require_superadmin() {
    let app = app().await;
    let (access, _) = app.signed_in("frank@example.com").await;
    let (status, body) = app.get("/admin/users", &access).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], false);

    let (root, _) = app.login("root@example.com", "root-password").await;
    let (status, body) = app.get("/admin/users", &root).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn admin_manages_permissions_roles_and_invites() {
    let app = app().await;
    let (root, _) = app.login("root@example.com", "root-password").await;
    let (_, member_refresh) = app.signed_in("gina@example.com").await;
    let gina = app
        .store
        .find_active_user_by_email("gina@example.com")
        .await
        .unwrap()
        .unwrap()
        .user;

    // Direct permissions: unknown ids only -> 404, malformed -> 400.
    let uri = format!("/admin/users/{}/permissions", gina.id);
    let (status, _) = app
        .call(
            Method::PUT,
            &uri,
            Some(&root),
            Some(json!({ "permissionIds": [uuid::Uuid::new_v4().to_string()] })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app
        .call(
            Method::PUT,
            &uri,
            Some(&root),
            Some(json!({ "permissionIds": ["nope"] })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, perms) = app.get("/admin/permissions", &root).await;
    let team_delete = perms["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["name"] == "team:delete")
        .unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string();
    let (status, body) = app
        .call(
            Method::PUT,
            &uri,
            Some(&root),
            Some(json!({ "permissionIds": [team_delete] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (_, effective) = app
        .get(
            &format!("/admin/users/{}/effective-permissions", gina.id),
            &root,
        )
        .await;
    assert_eq!(effective["data"].as_array().unwrap().len(), 13);

    // System roles are protected.
    let (_, roles) = app.get("/admin/roles", &root).await;
    let superadmin_id = roles["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["name"] == "superadmin")
        .unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string();
    let (status, _) = app
        .call(
            Method::DELETE,
            &format!("/admin/roles/{superadmin_id}"),
            Some(&root),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Duplicate permission names conflict.
    let (status, _) = app
        .call(
            Method::POST,
            "/admin/permissions",
            Some(&root),
            Some(json!({ "name": "team:read" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Invite is single use.
    let (status, invite) = app
        .call(Method::POST, "/admin/invites", Some(&root), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let invite_id = invite["data"]["id"].as_str().unwrap().to_string();
    let register = |email: &str| {
        json!({
            "firstName": "Invited",
            "lastName": "Member",
            "email": email,
            "password": "password123",
            "inviteId": invite_id,
        })
    };
    let (status, body) = app.post("/auth/register", register("hank@example.com")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["roles"][0], "subscriber_member");
    let (status, _) = app.post("/auth/register", register("ivy@example.com")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Soft delete cascades to sessions.
    let (status, body) = app
        .call(
            Method::DELETE,
            &format!("/admin/users/{}", gina.id),
            Some(&root),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["count"], 1);
    let (status, _) = app
        .post("/auth/refresh", json!({ "refreshToken": member_refresh }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Admin actions are audited with the admin's session.
    app.state.auth.audit().flush().await;
    let (status, logs) = app.get("/admin/audit-logs?limit=100", &root).await;
    assert_eq!(status, StatusCode::OK);
    let deleted = logs["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|l| {
            l["action"]
                .as_str()
                .is_some_and(|a| a.starts_with("Admin deleted user"))
        })
        .unwrap()
        .clone();
    assert!(deleted["sessionId"].is_string());
    assert_eq!(deleted["userAgent"], "api-tests");
}

#[tokio::test]
async fn update_me_changes_name_and_password() {
    let app = app().await;
    let (access, _) = app.signed_in("jill@example.com").await;

    let (status, body) = app
        .call(
            Method::PATCH,
            "/users/me",
            Some(&access),
            Some(json!({ "firstName": "Jillian" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["firstName"], "Jillian");

    let (status, _) = app
        .call(
            Method::PATCH,
            "/users/me",
            Some(&access),
            Some(json!({ "newPassword": "another-pass" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .call(
            Method::PATCH,
            "/users/me",
            Some(&access),
            Some(json!({ "currentPassword": "password123", "newPassword": "another-pass" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    app.login("jill@example.com", "another-pass").await;
}

#[tokio::test]
async fn update_me_rejects_whole_request_on_invalid_name() {
    let app = app().await;
    let (access, _) = app.signed_in("kate@example.com").await;

    let (status, body) = app
        .call(
            Method::PATCH,
            "/users/me",
            Some(&access),
            Some(json!({
                "firstName": "X",
                "currentPassword": "password123",
                "newPassword": "changed-pass",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, _) = app
        .post(
            "/auth/login",
            json!({ "email": "kate@example.com", "password": "changed-pass" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    app.login("kate@example.com", "password123").await;

    app.state.auth.audit().flush().await;
    let logs = app.store.list_audit_logs(100).await.unwrap();
    assert!(!logs.iter().any(|l| l.action == "User changed password"));
}
