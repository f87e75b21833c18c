use reqwest::{header, Client, StatusCode};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::credentials::Credentials;
use super::session::{
    cookie_header, filter_auth_cookies, missing_required_cookies, CookieMap, Session, UserSummary,
    CSRF_HEADER, CSRF_TOKEN_COOKIE,
};
use super::store::{SessionStore, StoreError};
use crate::api::error::remote_message;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("Login rejected (HTTP {status}): {message}")]
    AuthenticationRejected { status: u16, message: String },

    #[error("Session cookies were not accepted (HTTP {status})")]
    SessionInvalid { status: u16 },

    #[error("Identity endpoint returned a non-JSON body (HTTP {status})")]
    InvalidResponse { status: u16 },

    #[error("Login response is missing required cookies: {}", .0.join(", "))]
    IncompleteCookies(Vec<String>),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Turns credentials or captured cookies into a persisted [`Session`].
#[derive(Clone)]
pub struct SessionVerifier {
    client: Client,
    base_url: String,
    store: SessionStore,
}

impl SessionVerifier {
    pub fn new(client: Client, base_url: impl Into<String>, store: SessionStore) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            store,
        }
    }

    /// Exchange username/password at the login endpoint.
    pub async fn verify_with_credentials(&self, credentials: &Credentials) -> Result<Session, VerifyError> {
        let url = format!("{}/identity/login", self.base_url);
        debug!(username = %credentials.username, "submitting credentials");

        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .form(&[
                ("username", credentials.username.as_str()),
                ("password", credentials.password()),
                ("grant_type", "password"),
            ])
            .send()
            .await?;

        let status = response.status();
        let cookies = filter_auth_cookies(response.cookies().map(|c| (c.name().to_string(), c.value().to_string())));
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            let message = remote_message(&body).unwrap_or_else(|| reason(status));
            warn!(status = status.as_u16(), "login rejected");
            return Err(VerifyError::AuthenticationRejected {
                status: status.as_u16(),
                message,
            });
        }

        let missing = missing_required_cookies(&cookies);
        if !missing.is_empty() {
            warn!(missing = ?missing, "login response lacks required cookies");
            return Err(VerifyError::IncompleteCookies(missing));
        }

        let user = match serde_json::from_str(&body).ok().and_then(|v| UserSummary::from_json(&v)) {
            Some(user) => user,
            None => self.who_am_i(&cookies).await?,
        };

        self.establish(cookies, user)
    }

    /// Validate cookies captured elsewhere (e.g. a browser) against the
    /// who-am-I endpoint.
    pub async fn verify_with_cookies(&self, cookies: CookieMap) -> Result<Session, VerifyError> {
        let cookies = filter_auth_cookies(cookies);
        let missing = missing_required_cookies(&cookies);
        if !missing.is_empty() {
            return Err(VerifyError::IncompleteCookies(missing));
        }
        let user = self.who_am_i(&cookies).await?;
        self.establish(cookies, user)
    }

    async fn who_am_i(&self, cookies: &CookieMap) -> Result<UserSummary, VerifyError> {
        let url = format!("{}/identity/user_me", self.base_url);
        let mut request = self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/json")
            .header(header::COOKIE, cookie_header(cookies));
        if let Some(csrf) = cookies.get(CSRF_TOKEN_COOKIE) {
            request = request.header(CSRF_HEADER, csrf);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "session cookies rejected by identity endpoint");
            return Err(VerifyError::SessionInvalid {
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        let body: serde_json::Value = serde_json::from_str(&body).map_err(|_| {
            warn!(status = status.as_u16(), "identity endpoint returned a non-JSON body");
            VerifyError::InvalidResponse {
                status: status.as_u16(),
            }
        })?;
        Ok(UserSummary::from_json(&body).unwrap_or_default())
    }

    fn establish(&self, cookies: CookieMap, user: UserSummary) -> Result<Session, VerifyError> {
        let session = Session::new(cookies, user);
        self.store.save(&session)?;
        info!(user = %session.user.display_name(), expires_at = %session.expires_at, "session established");
        Ok(session)
    }
}

fn reason(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| status.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use mockito::Matcher;

    fn verifier(server: &mockito::Server, dir: &tempfile::TempDir) -> SessionVerifier {
        SessionVerifier::new(
            Client::new(),
            server.url(),
            SessionStore::new(dir.path().join("session.json")),
        )
    }

    #[tokio::test]
    async fn test_fresh_login_persists_exact_cookies() {
        let mut server = mockito::Server::new_async().await;
        let login = server
            .mock("POST", "/identity/login")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("username".into(), "a@b.com".into()),
                Matcher::UrlEncoded("password".into(), "x".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("set-cookie", "access_token=T1; Path=/; HttpOnly")
            .with_header("set-cookie", "csrf_token=C1; Path=/")
            .with_body(r#"{"user": {"username": "a"}}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let verifier = verifier(&server, &dir);
        let session = verifier
            .verify_with_credentials(&Credentials::new("a@b.com", "x"))
            .await
            .unwrap();

        login.assert_async().await;
        assert_eq!(session.cookie("access_token"), Some("T1"));
        assert_eq!(session.cookie("csrf_token"), Some("C1"));
        assert_eq!(session.user.username.as_deref(), Some("a"));
        assert_eq!(session.expires_at - session.created_at, Duration::days(7));

        let persisted = SessionStore::new(dir.path().join("session.json")).load().unwrap().unwrap();
        assert_eq!(persisted, session);
    }

    #[tokio::test]
    async fn test_login_without_identity_body_asks_who_am_i() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/identity/login")
            .with_status(200)
            .with_header("set-cookie", "access_token=T1")
            .with_header("set-cookie", "csrf_token=C1")
            .with_body("{}")
            .create_async()
            .await;
        let me = server
            .mock("GET", "/identity/user_me")
            .match_header("cookie", "access_token=T1; csrf_token=C1")
            .match_header("x-csrf-token", "C1")
            .with_status(200)
            .with_body(r#"{"id": 7, "username": "a", "email": "a@b.com"}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let session = verifier(&server, &dir)
            .verify_with_credentials(&Credentials::new("a@b.com", "x"))
            .await
            .unwrap();

        me.assert_async().await;
        assert_eq!(session.user.id.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_rejected_login_carries_status_and_detail() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/identity/login")
            .with_status(401)
            .with_body(r#"{"detail": "Incorrect username or password"}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = verifier(&server, &dir)
            .verify_with_credentials(&Credentials::new("a@b.com", "wrong"))
            .await
            .unwrap_err();

        match err {
            VerifyError::AuthenticationRejected { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Incorrect username or password");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!dir.path().join("session.json").exists());
    }

    #[tokio::test]
    async fn test_login_missing_csrf_cookie_is_incomplete() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/identity/login")
            .with_status(200)
            .with_header("set-cookie", "access_token=T1")
            .with_body(r#"{"username": "a"}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = verifier(&server, &dir)
            .verify_with_credentials(&Credentials::new("a@b.com", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::IncompleteCookies(ref names) if names == &vec!["csrf_token".to_string()]));
    }

    #[tokio::test]
    async fn test_captured_cookies_rejected_is_session_invalid() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/identity/user_me")
            .with_status(401)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cookies: CookieMap = [("access_token", "T1"), ("csrf_token", "C1")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let err = verifier(&server, &dir).verify_with_cookies(cookies).await.unwrap_err();
        assert!(matches!(err, VerifyError::SessionInvalid { status: 401 }));
    }

    #[tokio::test]
    async fn test_html_identity_page_is_invalid_response() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/identity/user_me")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html><body>Sign in</body></html>")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cookies: CookieMap = [("access_token", "T1"), ("csrf_token", "C1")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let err = verifier(&server, &dir).verify_with_cookies(cookies).await.unwrap_err();
        assert!(matches!(err, VerifyError::InvalidResponse { status: 200 }));
        assert!(!err.to_string().contains("Sign in"));
        assert!(SessionStore::new(dir.path().join("session.json")).load().unwrap().is_none());
    }
}
