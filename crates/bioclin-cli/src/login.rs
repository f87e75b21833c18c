use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{Context, Result};
use tracing::{info, warn};

use bioclin_core::api::build_http_client;
use bioclin_core::auth::{
    CaptureError, CaptureRequest, ChromiumLoginCapture, CredentialResolver, CredentialSource, LoginCapture, Session,
    SessionStore, SessionVerifier,
};
use bioclin_core::config::{ENV_PASSWORD, ENV_USERNAME};
use bioclin_core::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginMethod {
    Browser,
    Credentials,
}

/// Log in with the requested method, or pick one when none was given.
pub async fn run(config: &Config, requested: Option<LoginMethod>, username: Option<&str>) -> Result<()> {
    let base_url = config.base_url()?;
    let store = SessionStore::new(config.session_path()?);
    let client = build_http_client(config.request_timeout())?;
    let verifier = SessionVerifier::new(client, base_url.as_str(), store.clone());
    let capture = ChromiumLoginCapture::new(config.chrome_path.clone());
    let resolver = CredentialResolver::new();

    if let Some(session) = store.load_valid()? {
        eprintln!(
            "Already logged in as {} ({} left). Logging in again replaces that session.",
            session.user.display_name(),
            session.remaining_display()
        );
    }

    let method = match requested {
        Some(method) => method,
        None => choose_method(&resolver, &capture)?,
    };

    let session = match method {
        LoginMethod::Browser => match browser_login(config, &capture, &verifier).await {
            Err(LoginFailure::Unavailable(reason)) => {
                warn!(%reason, "browser login unavailable, falling back to credentials");
                eprintln!("Browser login unavailable: {reason}");
                eprintln!("Falling back to username/password login.\n");
                credential_login(&resolver, &verifier, username).await?
            }
            Err(LoginFailure::Other(e)) => return Err(e),
            Ok(session) => session,
        },
        LoginMethod::Credentials => credential_login(&resolver, &verifier, username).await?,
    };

    println!("Login successful! Signed in as {}", session.user.display_name());
    println!("Session valid until {}", session.expires_at.to_rfc3339());
    println!("Saved to {}", store.path().display());
    Ok(())
}

/// Environment credentials win; otherwise offer the browser when it can run.
fn choose_method(resolver: &CredentialResolver, capture: &dyn LoginCapture) -> Result<LoginMethod> {
    if resolver.has_env_credentials() {
        return Ok(LoginMethod::Credentials);
    }

    if let Err(e) = capture.check_available() {
        info!(reason = %e, "browser login not available");
        return Ok(LoginMethod::Credentials);
    }

    if !io::stdin().is_terminal() {
        return Ok(LoginMethod::Browser);
    }

    eprintln!("\n=== Bioclin Login ===\n");
    eprintln!("  [1] Browser window (recommended)");
    eprintln!("  [2] Username and password");
    eprint!("Choose a login method [1]: ");
    io::stderr().flush()?;

    let mut input = String::new();
    io::stdin().lock().read_line(&mut input)?;
    Ok(match input.trim() {
        "2" => LoginMethod::Credentials,
        _ => LoginMethod::Browser,
    })
}

enum LoginFailure {
    Unavailable(String),
    Other(anyhow::Error),
}

async fn browser_login(
    config: &Config,
    capture: &ChromiumLoginCapture,
    verifier: &SessionVerifier,
) -> std::result::Result<Session, LoginFailure> {
    let request = CaptureRequest::from_config(config).map_err(LoginFailure::Other)?;

    capture.check_available().map_err(|e| match e {
        CaptureError::AutomationUnavailable(reason) => LoginFailure::Unavailable(reason),
        other => LoginFailure::Other(other.into()),
    })?;

    eprintln!("Opening {} - sign in there. Waiting up to {}s...", request.login_url, request.timeout.as_secs());
    let cookies = capture.capture(&request).await.map_err(|e| match e {
        CaptureError::AutomationUnavailable(reason) => LoginFailure::Unavailable(reason),
        other => LoginFailure::Other(other.into()),
    })?;

    eprintln!("Login detected, verifying session...");
    verifier
        .verify_with_cookies(cookies)
        .await
        .context("Captured browser session was not accepted")
        .map_err(LoginFailure::Other)
}

async fn credential_login(
    resolver: &CredentialResolver,
    verifier: &SessionVerifier,
    username: Option<&str>,
) -> Result<Session> {
    let (credentials, source) = resolver.resolve(username, None)?;
    if source == CredentialSource::Environment {
        eprintln!("Using credentials from {ENV_USERNAME}/{ENV_PASSWORD}");
    }

    eprintln!("\nAuthenticating...");
    let session = verifier
        .verify_with_credentials(&credentials)
        .await
        .context("Login failed")?;
    Ok(session)
}
