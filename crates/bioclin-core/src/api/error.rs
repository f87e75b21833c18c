use thiserror::Error;

use crate::auth::StoreError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not authenticated - no valid session. Log in first")]
    NotAuthenticated,

    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        /// Remote error body, parsed when it was JSON
        body: Option<serde_json::Value>,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let detail = remote_message(body).unwrap_or_else(|| Self::truncate_body(body.trim()));
        let prefix = match status.as_u16() {
            401 => "Unauthorized - session may be expired",
            403 => "Access denied",
            404 => "Resource not found",
            422 => "Validation failed",
            429 => "Rate limited - please wait before retrying",
            500..=599 => "Server error",
            _ => "Request failed",
        };
        let message = if detail.is_empty() {
            prefix.to_string()
        } else {
            format!("{prefix}: {detail}")
        };
        ApiError::Http {
            status: status.as_u16(),
            message,
            body: serde_json::from_str(body).ok(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Human-readable message from a remote error body: the `detail`, `message`
/// or `error` field when present and a string.
pub fn remote_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["detail", "message", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
}
