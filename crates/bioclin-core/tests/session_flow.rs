//! End-to-end session lifecycle through the public API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mockito::Matcher;
use serde_json::json;

use bioclin_core::api::ApiClient;
use bioclin_core::auth::{
    CaptureError, CaptureRequest, CookieMap, LoginCapture, Session, SessionStore, SessionVerifier, UserSummary,
};
use bioclin_core::tools::{ErrorKind, ToolCallEnvelope};
use bioclin_core::ToolDispatcher;

struct NoBrowser;

#[async_trait]
impl LoginCapture for NoBrowser {
    fn check_available(&self) -> Result<(), CaptureError> {
        Err(CaptureError::AutomationUnavailable("headless test".to_string()))
    }

    async fn capture(&self, _request: &CaptureRequest) -> Result<CookieMap, CaptureError> {
        Err(CaptureError::AutomationUnavailable("headless test".to_string()))
    }
}

fn dispatcher(base_url: &str, session_path: std::path::PathBuf) -> ToolDispatcher {
    let store = SessionStore::new(session_path);
    let client = reqwest::Client::new();
    ToolDispatcher::new(
        ApiClient::new(client.clone(), base_url, store.clone()),
        SessionVerifier::new(client, base_url, store),
        Arc::new(NoBrowser),
        CaptureRequest {
            login_url: format!("{base_url}/login"),
            success_url_fragment: None,
            poll_interval: Duration::from_millis(10),
            timeout: Duration::from_secs(1),
        },
    )
}

#[test]
fn session_saved_by_one_handle_is_read_by_another() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("session.json");
    let cookies: CookieMap = [("access_token", "T1"), ("csrf_token", "C1"), ("refresh_token", "R1")]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let session = Session::new(
        cookies,
        UserSummary {
            id: Some("u1".to_string()),
            username: Some("a".to_string()),
            email: Some("a@b.com".to_string()),
        },
    );

    SessionStore::new(path.clone()).save(&session).unwrap();
    let loaded = SessionStore::new(path.clone()).load_valid().unwrap().unwrap();
    assert_eq!(loaded, session);

    SessionStore::new(path.clone()).clear().unwrap();
    SessionStore::new(path.clone()).clear().unwrap();
    assert!(SessionStore::new(path).load().unwrap().is_none());
}

#[tokio::test]
async fn login_call_logout_round_trip() {
    let mut server = mockito::Server::new_async().await;
    let base_url = server.url();
    server
        .mock("POST", "/identity/login")
        .match_body(Matcher::UrlEncoded("grant_type".into(), "password".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_header("set-cookie", "access_token=T1; Path=/; HttpOnly")
        .with_header("set-cookie", "csrf_token=C1; Path=/")
        .with_header("set-cookie", "refresh_token=R1; Path=/; HttpOnly")
        .with_body(r#"{"user": {"id": "u1", "username": "a", "email": "a@b.com"}}"#)
        .create_async()
        .await;
    let project = server
        .mock("GET", "/project/projects/p1")
        .match_header("cookie", "access_token=T1; csrf_token=C1; refresh_token=R1")
        .match_header("x-csrf-token", "C1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id": "p1", "name": "RNA-Seq pilot"}"#)
        .expect(1)
        .create_async()
        .await;
    let logout = server
        .mock("POST", "/identity/logout")
        .with_status(204)
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let session_path = dir.path().join("session.json");
    let first = dispatcher(&base_url, session_path.clone());

    let login = first
        .dispatch("bioclin_login", json!({"username": "a@b.com", "password": "x"}))
        .await;
    assert!(login.is_success(), "{login:?}");

    // A fresh dispatcher sees the session written by the first.
    let second = dispatcher(&base_url, session_path.clone());
    let envelope = second.dispatch("bioclin_get_project", json!({"project_id": "p1"})).await;
    assert_eq!(
        envelope,
        ToolCallEnvelope::Success {
            data: json!({"id": "p1", "name": "RNA-Seq pilot"})
        }
    );
    project.assert_async().await;

    let out = second.dispatch("bioclin_logout", json!({})).await;
    let ToolCallEnvelope::Success { data } = out else {
        panic!("logout failed: {out:?}");
    };
    assert_eq!(data["message"], "No content");
    assert_eq!(data["session_file_deleted"], true);
    logout.assert_async().await;
    assert!(!session_path.exists());

    let after = first.dispatch("bioclin_get_user_me", json!({})).await;
    assert_eq!(after.error().unwrap().kind, ErrorKind::NotAuthenticated);
}

#[tokio::test]
async fn rejected_login_reports_status_without_leaking_password() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/identity/login")
        .with_status(401)
        .with_header("content-type", "application/json")
        .with_body(r#"{"detail": "Incorrect username or password"}"#)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher(&server.url(), dir.path().join("session.json"));
    let envelope = dispatcher
        .dispatch("bioclin_login", json!({"username": "a@b.com", "password": "s3cret-pass"}))
        .await;

    let error = envelope.error().unwrap();
    assert_eq!(error.kind, ErrorKind::AuthenticationRejected);
    assert_eq!(error.status_code, Some(401));
    let rendered = serde_json::to_string(&envelope).unwrap();
    assert!(!rendered.contains("s3cret-pass"));
}
