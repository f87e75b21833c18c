//! Authenticated HTTP client for the Bioclin REST API.
//!
//! Every call re-reads the session from the [`SessionStore`], sends its
//! cookies plus the CSRF header, and on a 401/403 refreshes the access token
//! once and retries once.

use std::time::Duration;

use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::ApiError;
use crate::auth::session::{
    filter_auth_cookies, CookieMap, Session, AUTH_COOKIE_NAMES, CSRF_HEADER,
};
use crate::auth::SessionStore;

/// Refresh endpoint, relative to the base URL.
const REFRESH_PATH: &str = "/identity/refresh_token";

/// Build the shared HTTP client with the fixed request timeout.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
pub fn build_http_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(timeout)
        .timeout(timeout)
        .build()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_reqwest(self) -> Method {
        match self {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum Body {
    #[default]
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
}

/// Query string and body for one request.
#[derive(Debug, Clone, Default)]
pub struct Payload {
    pub query: Vec<(String, String)>,
    pub body: Body,
}

/// Where a single call currently stands.
enum Attempt {
    First,
    AfterRefresh,
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    store: SessionStore,
}

impl ApiClient {
    pub fn new(client: Client, base_url: impl Into<String>, store: SessionStore) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            store,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Make an authenticated call. Fails with `NotAuthenticated` before any
    /// request when there is no valid session.
    pub async fn call(&self, method: HttpMethod, path: &str, payload: &Payload) -> Result<Value, ApiError> {
        let mut session = self.store.load_valid()?.ok_or(ApiError::NotAuthenticated)?;
        let url = self.url(path);
        let mut attempt = Attempt::First;

        loop {
            let response = self.request(method, &url, payload, Some(&session)).send().await?;
            let status = response.status();
            debug!(method = ?method, path, status = status.as_u16(), "API response");

            if status.is_success() {
                return Self::read_body(response).await;
            }

            let body = response.text().await.unwrap_or_default();
            let auth_failure = matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN);

            if auth_failure && matches!(attempt, Attempt::First) && session.refresh_token().is_some() {
                attempt = Attempt::AfterRefresh;
                match self.refresh(&mut session).await {
                    Ok(()) => {
                        info!(path, "access token refreshed, retrying");
                        continue;
                    }
                    Err(e) => warn!(error = %e, "token refresh failed"),
                }
            }

            return Err(ApiError::from_status(status, &body));
        }
    }

    /// Call an endpoint that needs no session (password recovery and reset).
    pub async fn call_public(&self, method: HttpMethod, path: &str, payload: &Payload) -> Result<Value, ApiError> {
        let response = self.request(method, &self.url(path), payload, None).send().await?;
        let status = response.status();
        if status.is_success() {
            return Self::read_body(response).await;
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::from_status(status, &body))
    }

    /// Refresh the stored session's access token on demand.
    pub async fn refresh_session(&self) -> Result<Session, ApiError> {
        let mut session = self.store.load_valid()?.ok_or(ApiError::NotAuthenticated)?;
        if session.refresh_token().is_none() {
            return Err(ApiError::InvalidResponse(
                "session has no refresh token; log in again".to_string(),
            ));
        }
        self.refresh(&mut session).await?;
        Ok(session)
    }

    fn request(&self, method: HttpMethod, url: &str, payload: &Payload, session: Option<&Session>) -> RequestBuilder {
        let mut request = self
            .client
            .request(method.as_reqwest(), url)
            .header(header::ACCEPT, "application/json");

        if let Some(session) = session {
            request = request.header(header::COOKIE, session.cookie_header());
            if let Some(csrf) = session.csrf_token() {
                request = request.header(CSRF_HEADER, csrf);
            }
        }

        if !payload.query.is_empty() {
            request = request.query(&payload.query);
        }

        match payload.body {
            Body::Empty => request,
            Body::Json(ref body) => request.json(body),
            Body::Form(ref fields) => request.form(fields),
        }
    }

    /// Exchange the refresh token for new cookies and persist them.
    async fn refresh(&self, session: &mut Session) -> Result<(), ApiError> {
        let response = self
            .request(HttpMethod::Post, &self.url(REFRESH_PATH), &Payload::default(), Some(session))
            .send()
            .await?;
        let status = response.status();
        let mut fresh: CookieMap =
            filter_auth_cookies(response.cookies().map(|c| (c.name().to_string(), c.value().to_string())));
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(ApiError::from_status(status, &body));
        }

        // Some deployments return tokens in the body instead of Set-Cookie.
        if let Ok(value) = serde_json::from_str::<Value>(&body) {
            for name in AUTH_COOKIE_NAMES {
                if let Some(token) = value.get(*name).and_then(Value::as_str) {
                    fresh.entry(name.to_string()).or_insert_with(|| token.to_string());
                }
            }
        }

        if fresh.is_empty() {
            return Err(ApiError::InvalidResponse("refresh returned no tokens".to_string()));
        }

        let changed = session.merge_cookies(fresh);
        self.store.save(session)?;
        debug!(cookies = ?changed, "session cookies updated");
        Ok(())
    }

    async fn read_body(response: Response) -> Result<Value, ApiError> {
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(json!({"status": "success", "message": "No content"}));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let text = response.text().await?;

        if content_type.contains("application/json") {
            if text.trim().is_empty() {
                return Ok(json!({"status": "success", "message": "No content"}));
            }
            return serde_json::from_str(&text)
                .map_err(|e| ApiError::InvalidResponse(format!("malformed JSON body: {e}")));
        }

        Ok(json!({"content": text, "content_type": content_type}))
    }
}
