//! Authentication: obtaining, persisting and validating sessions.
//!
//! This module provides:
//! - `Session`: cookie-based session with a 7 day validity window
//! - `SessionStore`: the on-disk session file, written atomically with mode 0600
//! - `CredentialResolver`: username/password from arguments, environment or terminal
//! - `LoginCapture`: interactive browser login that lifts the auth cookies
//! - `SessionVerifier`: turns credentials or captured cookies into a stored session

pub mod browser;
pub mod credentials;
pub mod session;
pub mod store;
pub mod verifier;

pub use browser::{detect_browser, CaptureError, CaptureRequest, ChromiumLoginCapture, LoginCapture};
pub use credentials::{CredentialError, CredentialResolver, CredentialSource, Credentials, NoPrompt, Prompter, TerminalPrompter};
pub use session::{
    CookieMap, Session, UserSummary, ACCESS_TOKEN_COOKIE, CSRF_HEADER, CSRF_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE,
};
pub use store::{SessionStore, StoreError};
pub use verifier::{SessionVerifier, VerifyError};
