use super::{ok, settings_for, test_runtime, user_body};
use magicapp::{AppPaths, MagicApp};
use magicapp_core::session::SessionStatus;
use magicapp_core::storage::{KeyValueStore, MemoryStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{bearer_token, body_json, method, path};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

struct NoAuthorization;

impl Match for NoAuthorization {
    fn matches(&self, request: &Request) -> bool {
        !request.headers.contains_key("authorization")
    }
}

fn expired() -> ResponseTemplate {
    ResponseTemplate::new(401).set_body_json(json!({"success": false, "error": "Token expired"}))
}

#[test]
fn deep_link_sign_in_installs_and_clears_the_credential() {
    let runtime = test_runtime();
    runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/me"))
            .and(bearer_token("deep-a"))
            .respond_with(ok(user_body("u1", "Ada")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/projects"))
            .and(bearer_token("deep-a"))
            .respond_with(ok(json!({"success": true, "data": {"data": []}})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/projects"))
            .and(NoAuthorization)
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "success": false,
                "error": {"message": "Unauthorized"}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/logout"))
            .and(body_json(json!({"refreshToken": "deep-r"})))
            .respond_with(ok(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let store = MemoryStore::new();
        let mut app = MagicApp::new(settings_for(&server), Arc::new(store.clone()));
        let session = app
            .start(Some(
                "magicappdev://auth/callback?accessToken=deep-a&refreshToken=deep-r",
            ))
            .await;
        assert_eq!(session.status(), SessionStatus::Authenticated);
        assert!(app.api().projects().await.unwrap().is_empty());

        let mut out = Vec::new();
        app.callback_result(&mut out).unwrap();
        app.logout(&mut out).await.unwrap();
        app.flush_events(&mut out).unwrap();
        let printed = String::from_utf8(out).unwrap();
        assert!(printed.starts_with("Signed in as Ada <u1@example.com>"));
        assert!(printed.contains("-> /tabs/home"));

        let err = app.api().projects().await.unwrap_err();
        assert!(err.is_auth());
        assert!(store.is_empty());
    });
}

#[test]
fn expired_token_is_refreshed_once_and_persisted() {
    let runtime = test_runtime();
    runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/me"))
            .and(bearer_token("old"))
            .respond_with(expired())
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(body_json(json!({"refreshToken": "r1"})))
            .respond_with(ok(json!({"success": true, "data": {"accessToken": "new"}})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/auth/me"))
            .and(bearer_token("new"))
            .respond_with(ok(user_body("u1", "Ada")))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let paths = AppPaths::at(dir.path());
        let store = paths.open_store().await.unwrap();
        store.set(ACCESS_TOKEN_KEY, "old").await.unwrap();
        store.set(REFRESH_TOKEN_KEY, "r1").await.unwrap();

        let app = MagicApp::new(settings_for(&server), store);
        let session = app.start(None).await;
        assert_eq!(session.status(), SessionStatus::Authenticated);
        assert_eq!(session.access_token(), Some("new"));

        let native = std::fs::read_to_string(paths.native_store()).unwrap();
        let native: serde_json::Value = serde_json::from_str(&native).unwrap();
        assert_eq!(native[ACCESS_TOKEN_KEY], "new");
        assert_eq!(native[REFRESH_TOKEN_KEY], "r1");
    });
}

#[test]
fn rejected_token_without_refresh_signs_out() {
    let runtime = test_runtime();
    runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/me"))
            .respond_with(expired())
            .expect(1)
            .mount(&server)
            .await;

        let store = MemoryStore::new();
        store.set(ACCESS_TOKEN_KEY, "old").await.unwrap();
        let app = MagicApp::new(settings_for(&server), Arc::new(store.clone()));
        let session = app.start(None).await;

        assert_eq!(session.status(), SessionStatus::Unauthenticated);
        assert!(store.get(ACCESS_TOKEN_KEY).await.unwrap().is_none());
        let mut out = Vec::new();
        assert!(app.whoami(&mut out).is_err());
    });
}

#[test]
fn login_reports_server_message_and_then_succeeds() {
    let runtime = test_runtime();
    runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .and(body_json(json!({"email": "ada@example.com", "password": "wrong"})))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "success": false,
                "error": {"message": "Invalid email or password"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .and(body_json(json!({"email": "ada@example.com", "password": "right"})))
            .respond_with(ok(json!({
                "success": true,
                "data": {"accessToken": "a1", "refreshToken": "r1"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/auth/me"))
            .and(bearer_token("a1"))
            .respond_with(ok(user_body("u1", "Ada")))
            .expect(1)
            .mount(&server)
            .await;

        let store = MemoryStore::new();
        let app = MagicApp::new(settings_for(&server), Arc::new(store.clone()));
        app.start(None).await;

        let mut out = Vec::new();
        let err = app
            .login("ada@example.com", "wrong", &mut out)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid email or password");
        assert_eq!(app.session().status(), SessionStatus::Unauthenticated);

        app.login("ada@example.com", "right", &mut out).await.unwrap();
        app.whoami(&mut out).unwrap();
        assert_eq!(
            store.get(REFRESH_TOKEN_KEY).await.unwrap().as_deref(),
            Some("r1")
        );
        let printed = String::from_utf8(out).unwrap();
        assert_eq!(
            printed.lines().collect::<Vec<_>>(),
            vec![
                "Signed in as Ada <u1@example.com>",
                "Ada <u1@example.com>"
            ]
        );

        assert!(app.login("ada@example.com", "right", &mut Vec::new()).await.is_err());
    });
}

async fn signed_in_app(server: &MockServer, store: &MemoryStore) -> MagicApp {
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .and(bearer_token("a1"))
        .respond_with(ok(user_body("u1", "Ada")))
        .mount(server)
        .await;
    store.set(ACCESS_TOKEN_KEY, "a1").await.unwrap();
    store.set(REFRESH_TOKEN_KEY, "r1").await.unwrap();
    let app = MagicApp::new(settings_for(server), Arc::new(store.clone()));
    let session = app.start(None).await;
    assert_eq!(session.status(), SessionStatus::Authenticated);
    app
}

#[test]
fn deleting_the_account_signs_out() {
    let runtime = test_runtime();
    runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/auth/account"))
            .and(bearer_token("a1"))
            .respond_with(ok(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/logout"))
            .and(body_json(json!({"refreshToken": "r1"})))
            .respond_with(ok(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let store = MemoryStore::new();
        let mut app = signed_in_app(&server, &store).await;
        let mut out = Vec::new();
        let err = app.delete_account(false, &mut out).await.unwrap_err();
        assert!(err.to_string().contains("--yes"));

        app.delete_account(true, &mut out).await.unwrap();
        app.flush_events(&mut out).unwrap();
        assert_eq!(app.session().status(), SessionStatus::Unauthenticated);
        assert!(store.is_empty());
        let printed = String::from_utf8(out).unwrap();
        assert_eq!(
            printed.lines().collect::<Vec<_>>(),
            vec!["Account deleted", "-> /login"]
        );
    });
}

#[test]
fn failed_account_deletion_keeps_the_session() {
    let runtime = test_runtime();
    runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/auth/account"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/logout"))
            .respond_with(ok(json!({"success": true})))
            .expect(0)
            .mount(&server)
            .await;

        let store = MemoryStore::new();
        let app = signed_in_app(&server, &store).await;
        let err = app.delete_account(true, &mut Vec::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to delete account. Please try again.");
        assert_eq!(app.session().status(), SessionStatus::Authenticated);
        assert_eq!(store.get(ACCESS_TOKEN_KEY).await.unwrap().as_deref(), Some("a1"));
    });
}

#[test]
fn password_change_sends_both_passwords() {
    let runtime = test_runtime();
    runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/change-password"))
            .and(bearer_token("a1"))
            .and(body_json(json!({"currentPassword": "old", "newPassword": "new"})))
            .respond_with(ok(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let store = MemoryStore::new();
        let app = signed_in_app(&server, &store).await;
        let mut out = Vec::new();
        assert!(app.change_password("old", "", &mut out).await.is_err());
        app.change_password("old", "new", &mut out).await.unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Password changed\n");
    });
}
