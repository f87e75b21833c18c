use serde::Serialize;
use serde_json::Value;

use crate::api::ApiError;
use crate::auth::{CaptureError, CredentialError, StoreError, VerifyError};

/// Outcome of one tool call, as handed back across the tool boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolCallEnvelope {
    Success { data: Value },
    Error { error: ToolError },
}

impl ToolCallEnvelope {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolCallEnvelope::Success { .. })
    }

    pub fn error(&self) -> Option<&ToolError> {
        match self {
            ToolCallEnvelope::Error { error } => Some(error),
            ToolCallEnvelope::Success { .. } => None,
        }
    }
}

impl From<Result<Value, ToolError>> for ToolCallEnvelope {
    fn from(result: Result<Value, ToolError>) -> Self {
        match result {
            Ok(data) => ToolCallEnvelope::Success { data },
            Err(error) => ToolCallEnvelope::Error { error },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotAuthenticated,
    AuthenticationRejected,
    SessionInvalid,
    LoginTimeout,
    AutomationUnavailable,
    InteractiveInputUnavailable,
    InvalidArguments,
    UnknownTool,
    Http,
    Network,
    Storage,
    InternalError,
}

impl ErrorKind {
    fn hint(self) -> Option<&'static str> {
        let hint = match self {
            ErrorKind::NotAuthenticated | ErrorKind::SessionInvalid => {
                "Log in with bioclin_browser_login or bioclin_login, or run `bioclin login`"
            }
            ErrorKind::AuthenticationRejected => "Check the username and password",
            ErrorKind::LoginTimeout => "Finish signing in within the time limit, then try again",
            ErrorKind::AutomationUnavailable => "Use bioclin_login or set BIOCLIN_EMAIL and BIOCLIN_PASSWORD",
            ErrorKind::InteractiveInputUnavailable => "Set BIOCLIN_EMAIL and BIOCLIN_PASSWORD",
            ErrorKind::InvalidArguments => "Supply the listed fields",
            ErrorKind::UnknownTool => "Run `bioclin tools` to list the available tools",
            ErrorKind::Storage => "Check the session file path (BIOCLIN_SESSION_FILE)",
            ErrorKind::Network => "Check connectivity and BIOCLIN_API_URL",
            ErrorKind::Http | ErrorKind::InternalError => return None,
        };
        Some(hint)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_body: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ToolError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            fields: Vec::new(),
            remote_body: None,
            hint: kind.hint().map(str::to_string),
        }
    }

    fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        if self.kind == ErrorKind::Http && status == 401 {
            self.hint = ErrorKind::NotAuthenticated.hint().map(str::to_string);
        }
        self
    }

    pub fn unknown_tool(name: &str) -> Self {
        Self::new(ErrorKind::UnknownTool, format!("Unknown tool: {name}"))
    }

    pub fn missing_fields(fields: Vec<String>) -> Self {
        let message = format!("Missing required arguments: {}", fields.join(", "));
        Self {
            fields,
            ..Self::new(ErrorKind::InvalidArguments, message)
        }
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArguments, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, message)
    }
}

impl From<ApiError> for ToolError {
    fn from(err: ApiError) -> Self {
        let message = err.to_string();
        match err {
            ApiError::NotAuthenticated => ToolError::new(ErrorKind::NotAuthenticated, message),
            ApiError::Http { status, body, .. } => ToolError {
                remote_body: body,
                ..ToolError::new(ErrorKind::Http, message).with_status(status)
            },
            ApiError::Network(e) => {
                let error = ToolError::new(ErrorKind::Network, message);
                match e.status() {
                    Some(status) => error.with_status(status.as_u16()),
                    None => error,
                }
            }
            ApiError::InvalidResponse(_) => ToolError::new(ErrorKind::Http, message),
            ApiError::Store(e) => e.into(),
        }
    }
}

impl From<VerifyError> for ToolError {
    fn from(err: VerifyError) -> Self {
        let message = err.to_string();
        match err {
            VerifyError::AuthenticationRejected { status, .. } => {
                ToolError::new(ErrorKind::AuthenticationRejected, message).with_status(status)
            }
            VerifyError::SessionInvalid { status } => {
                ToolError::new(ErrorKind::SessionInvalid, message).with_status(status)
            }
            VerifyError::InvalidResponse { status } => {
                ToolError::new(ErrorKind::SessionInvalid, message).with_status(status)
            }
            VerifyError::IncompleteCookies(names) => ToolError {
                fields: names,
                ..ToolError::new(ErrorKind::SessionInvalid, message)
            },
            VerifyError::Network(_) => ToolError::new(ErrorKind::Network, message),
            VerifyError::Store(e) => e.into(),
        }
    }
}

impl From<CaptureError> for ToolError {
    fn from(err: CaptureError) -> Self {
        let kind = match err {
            CaptureError::AutomationUnavailable(_) => ErrorKind::AutomationUnavailable,
            CaptureError::LoginTimeout(_) => ErrorKind::LoginTimeout,
            CaptureError::NoAuthCookies => ErrorKind::SessionInvalid,
            CaptureError::Browser(_) => ErrorKind::InternalError,
        };
        ToolError::new(kind, err.to_string())
    }
}

impl From<CredentialError> for ToolError {
    fn from(err: CredentialError) -> Self {
        let kind = match err {
            CredentialError::InteractiveInputUnavailable => ErrorKind::InteractiveInputUnavailable,
            CredentialError::EmptyUsername => ErrorKind::InvalidArguments,
            CredentialError::Prompt(_) => ErrorKind::InternalError,
        };
        ToolError::new(kind, err.to_string())
    }
}

impl From<StoreError> for ToolError {
    fn from(err: StoreError) -> Self {
        ToolError::new(ErrorKind::Storage, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use serde_json::json;

    #[test]
    fn test_success_serializes_with_status_tag() {
        let envelope = ToolCallEnvelope::Success { data: json!({"id": 1}) };
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({"status": "success", "data": {"id": 1}})
        );
    }

    #[test]
    fn test_http_error_keeps_status_and_remote_body() {
        let err: ToolError = ApiError::from_status(StatusCode::UNPROCESSABLE_ENTITY, r#"{"detail": "bad"}"#).into();
        assert_eq!(err.kind, ErrorKind::Http);
        assert_eq!(err.status_code, Some(422));
        assert_eq!(err.remote_body, Some(json!({"detail": "bad"})));

        let value = serde_json::to_value(ToolCallEnvelope::Error { error: err }).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"]["kind"], "http");
        assert!(value["error"].get("fields").is_none());
    }

    #[test]
    fn test_missing_fields_lists_names() {
        let err = ToolError::missing_fields(vec!["project_id".to_string()]);
        assert_eq!(err.kind, ErrorKind::InvalidArguments);
        assert_eq!(err.fields, vec!["project_id"]);
        assert!(err.message.contains("project_id"));
    }

    #[test]
    fn test_not_authenticated_has_login_hint() {
        let err: ToolError = ApiError::NotAuthenticated.into();
        assert_eq!(err.kind, ErrorKind::NotAuthenticated);
        assert!(err.hint.unwrap().contains("bioclin_login"));
    }

    #[test]
    fn test_non_json_identity_body_is_session_invalid() {
        let err: ToolError = VerifyError::InvalidResponse { status: 200 }.into();
        assert_eq!(err.kind, ErrorKind::SessionInvalid);
        assert_eq!(err.status_code, Some(200));
        assert!(err.hint.is_some());
    }
}
