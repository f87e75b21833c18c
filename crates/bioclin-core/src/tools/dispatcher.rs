use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::envelope::{ToolCallEnvelope, ToolError};
use super::registry::{self, ArgTarget, Field, LocalTool, Route, ToolKind, ToolSpec};
use crate::api::{build_http_client, ApiClient, Body, HttpMethod, Payload};
use crate::auth::{
    CaptureRequest, ChromiumLoginCapture, CredentialResolver, LoginCapture, Session, SessionStore, SessionVerifier,
};
use crate::config::Config;

/// Entry point for tool calls: validates arguments, routes to the API or a
/// local handler, and folds every outcome into a [`ToolCallEnvelope`].
pub struct ToolDispatcher {
    api: ApiClient,
    verifier: SessionVerifier,
    capture: Arc<dyn LoginCapture>,
    capture_request: CaptureRequest,
    credentials: CredentialResolver,
}

impl ToolDispatcher {
    pub fn new(
        api: ApiClient,
        verifier: SessionVerifier,
        capture: Arc<dyn LoginCapture>,
        capture_request: CaptureRequest,
    ) -> Self {
        Self {
            api,
            verifier,
            capture,
            capture_request,
            credentials: CredentialResolver::non_interactive(),
        }
    }

    /// Replace where `bioclin_login` looks for credentials it was not given.
    pub fn with_credentials(mut self, credentials: CredentialResolver) -> Self {
        self.credentials = credentials;
        self
    }

    /// Wire up the real HTTP client, session file and Chromium capture.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let base_url = config.base_url()?;
        let store = SessionStore::new(config.session_path()?);
        let client = build_http_client(config.request_timeout())?;
        let capture = Arc::new(ChromiumLoginCapture::new(config.chrome_path.clone()));

        Ok(Self::new(
            ApiClient::new(client.clone(), base_url.clone(), store.clone()),
            SessionVerifier::new(client, base_url, store),
            capture,
            CaptureRequest::from_config(config)?,
        ))
    }

    pub fn tools(&self) -> &'static [ToolSpec] {
        registry::TOOLS
    }

    pub fn store(&self) -> &SessionStore {
        self.api.store()
    }

    pub async fn dispatch(&self, name: &str, arguments: Value) -> ToolCallEnvelope {
        info!(tool = name, "tool call");
        let outcome = AssertUnwindSafe(self.run(name, arguments)).catch_unwind().await;

        let result = match outcome {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(tool = name, panic = %message, "tool call panicked");
                Err(ToolError::internal(format!("Tool {name} failed unexpectedly: {message}")))
            }
        };

        if let Err(ref error) = result {
            warn!(tool = name, kind = ?error.kind, status = ?error.status_code, "tool call failed");
        }
        result.into()
    }

    async fn run(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        let tool = registry::find(name).ok_or_else(|| ToolError::unknown_tool(name))?;

        let args = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(ToolError::invalid_arguments(format!(
                    "Arguments must be a JSON object, got {}",
                    json_type(&other)
                )))
            }
        };

        let missing: Vec<String> = tool
            .required_fields()
            .filter(|field| !is_present(args.get(*field)))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(ToolError::missing_fields(missing));
        }

        match tool.kind {
            ToolKind::Forward(route) => {
                let (path, payload) = build_request(&route, tool.fields, &args);
                debug!(tool = name, method = ?route.method, path = %path, "forwarding");
                let value = if route.public {
                    self.api.call_public(route.method, &path, &payload).await?
                } else {
                    self.api.call(route.method, &path, &payload).await?
                };
                Ok(value)
            }
            ToolKind::Local(local) => self.run_local(local, &args).await,
        }
    }

    async fn run_local(&self, tool: LocalTool, args: &Map<String, Value>) -> Result<Value, ToolError> {
        match tool {
            LocalTool::Login => {
                let username = string_arg(args, "username");
                let password = string_arg(args, "password");
                let (credentials, source) = self.credentials.resolve(username.as_deref(), password.as_deref())?;
                debug!(source = ?source, "credentials resolved");
                let session = self.verifier.verify_with_credentials(&credentials).await?;
                Ok(authenticated(&session, "Logged in"))
            }
            LocalTool::BrowserLogin => {
                self.capture.check_available()?;
                let cookies = self.capture.capture(&self.capture_request).await?;
                let session = self.verifier.verify_with_cookies(cookies).await?;
                Ok(authenticated(&session, "Logged in through the browser"))
            }
            LocalTool::Logout => self.logout().await,
            LocalTool::CheckSession => Ok(match self.store().load_valid()? {
                Some(session) => authenticated(&session, "Session active"),
                None => json!({
                    "status": "not_authenticated",
                    "message": "No active session found",
                    "instructions": "Use bioclin_browser_login or bioclin_login to sign in",
                }),
            }),
            LocalTool::RefreshToken => {
                let session = self.api.refresh_session().await?;
                Ok(authenticated(&session, "Access token refreshed"))
            }
        }
    }

    /// Best-effort remote logout, then always drop the local session.
    async fn logout(&self) -> Result<Value, ToolError> {
        let existed = self.store().path().is_file();

        let mut result = match self.api.call(HttpMethod::Post, "/identity/logout", &Payload::default()).await {
            Ok(Value::Object(map)) => Value::Object(map),
            Ok(other) => json!({"status": "success", "data": other}),
            Err(e) => {
                debug!(error = %e, "remote logout failed");
                json!({"status": "error", "message": e.to_string()})
            }
        };

        self.store().clear()?;
        result["session_file_deleted"] = Value::Bool(existed);
        Ok(result)
    }
}

fn authenticated(session: &Session, message: &str) -> Value {
    json!({
        "status": "authenticated",
        "message": message,
        "user": session.user,
        "created_at": session.created_at,
        "expires_at": session.expires_at,
        "remaining": session.remaining_display(),
    })
}

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

fn string_arg(args: &Map<String, Value>, name: &str) -> Option<String> {
    args.get(name).filter(|v| !v.is_null()).map(scalar_text)
}

/// Text form of a value for paths, query strings and form bodies.
fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Fill path placeholders and place the remaining known fields.
fn build_request(route: &Route, fields: &[Field], args: &Map<String, Value>) -> (String, Payload) {
    let mut path = route.path.to_string();
    let mut forwarded: Vec<(&str, Value)> = Vec::new();

    for field in fields {
        let value = match args.get(field.name).filter(|v| !v.is_null()) {
            Some(value) => value.clone(),
            None => match field.default {
                Some(default) => default.to_value(),
                None => continue,
            },
        };
        let placeholder = format!("{{{}}}", field.name);
        if path.contains(&placeholder) {
            path = path.replace(&placeholder, &urlencoding::encode(&scalar_text(&value)));
        } else {
            forwarded.push((field.wire_name, value));
        }
    }

    let text_pairs = |pairs: &[(&str, Value)]| -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), scalar_text(v))).collect()
    };

    let payload = match route.target {
        ArgTarget::Query => Payload {
            query: text_pairs(&forwarded),
            body: Body::Empty,
        },
        ArgTarget::Form => Payload {
            query: Vec::new(),
            body: Body::Form(text_pairs(&forwarded)),
        },
        // Nothing to send means no body at all, not `{}`.
        ArgTarget::Json if forwarded.is_empty() => Payload::default(),
        ArgTarget::Json => Payload {
            query: Vec::new(),
            body: Body::Json(Value::Object(
                forwarded.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            )),
        },
    };
    (path, payload)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
