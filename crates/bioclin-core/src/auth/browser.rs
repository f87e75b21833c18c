//! Interactive browser login.
//!
//! Opens a visible Chromium window on the login page, waits for the user to
//! sign in, then lifts the authentication cookies out of the browser. The
//! browser process never outlives [`LoginCapture::capture`]: it is closed on
//! success and timeout, and killed if the capture future is dropped.

use std::fmt::Display;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::session::{filter_auth_cookies, CookieMap, ACCESS_TOKEN_COOKIE};
use crate::config::{Config, CAPTURE_POLL_INTERVAL_SECS, CAPTURE_TIMEOUT_SECS};

/// Pause after login is detected so late Set-Cookie responses land.
const COOKIE_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Chromium-family executables that speak CDP.
const CHROMIUM_EXECUTABLES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chrome",
    "chromium",
    "chromium-browser",
    "microsoft-edge",
    "microsoft-edge-stable",
    "brave-browser",
];

#[cfg(target_os = "macos")]
const MACOS_APP_PATHS: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
];

#[cfg(target_os = "windows")]
const WINDOWS_PATHS: &[&str] = &[
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
];

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Browser login unavailable: {0}")]
    AutomationUnavailable(String),

    #[error("No login detected within {}s", .0.as_secs())]
    LoginTimeout(Duration),

    #[error("Login finished but the browser held no authentication cookies")]
    NoAuthCookies,

    #[error("Browser error: {0}")]
    Browser(String),
}

impl From<chromiumoxide::error::CdpError> for CaptureError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        CaptureError::Browser(err.to_string())
    }
}

/// Parameters for one interactive login.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub login_url: String,
    /// Login counts as done once the page URL contains this. When unset, any
    /// page outside the login path counts.
    pub success_url_fragment: Option<String>,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl CaptureRequest {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            login_url: config.login_url()?,
            success_url_fragment: config.login_success_fragment.clone(),
            poll_interval: Duration::from_secs(CAPTURE_POLL_INTERVAL_SECS),
            timeout: Duration::from_secs(CAPTURE_TIMEOUT_SECS),
        })
    }

    /// Whether the browser state shows a completed login.
    pub fn login_detected(&self, current_url: Option<&str>, cookies: &CookieMap) -> bool {
        if cookies.get(ACCESS_TOKEN_COOKIE).is_some_and(|v| !v.is_empty()) {
            return true;
        }
        let Some(current) = current_url else {
            return false;
        };
        match self.success_url_fragment {
            Some(ref fragment) => current.contains(fragment.as_str()),
            None => left_login_page(&self.login_url, current),
        }
    }
}

fn left_login_page(login_url: &str, current: &str) -> bool {
    let (Ok(login), Ok(current)) = (Url::parse(login_url), Url::parse(current)) else {
        return false;
    };
    if !matches!(current.scheme(), "http" | "https") {
        return false;
    }
    current.host_str() == login.host_str() && !current.path().starts_with(login.path())
}

/// Source of authentication cookies from an interactive login.
#[async_trait]
pub trait LoginCapture: Send + Sync {
    /// Cheap pre-flight check; `Err(AutomationUnavailable)` lets callers fall
    /// back to credential login before anything is launched.
    fn check_available(&self) -> Result<(), CaptureError>;

    async fn capture(&self, request: &CaptureRequest) -> Result<CookieMap, CaptureError>;
}

/// Drives a local Chrome/Chromium over CDP.
#[derive(Debug, Clone, Default)]
pub struct ChromiumLoginCapture {
    chrome_path: Option<PathBuf>,
}

impl ChromiumLoginCapture {
    pub fn new(chrome_path: Option<PathBuf>) -> Self {
        Self { chrome_path }
    }

    fn locate_browser(&self) -> Result<PathBuf, CaptureError> {
        if running_in_container() {
            return Err(CaptureError::AutomationUnavailable(
                "running inside a container with no display. Log in on the host, or set \
                 BIOCLIN_EMAIL and BIOCLIN_PASSWORD for credential login"
                    .to_string(),
            ));
        }
        detect_browser(self.chrome_path.as_deref()).ok_or_else(|| {
            CaptureError::AutomationUnavailable(format!(
                "Chrome/Chromium not found. {} Or use credential login instead",
                install_hint()
            ))
        })
    }

    async fn launch(&self, executable: &Path) -> Result<LaunchedBrowser, CaptureError> {
        let config = BrowserConfig::builder()
            .with_head()
            .chrome_executable(executable)
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .build()
            .map_err(|e| CaptureError::Browser(format!("failed to build browser config: {e}")))?;

        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(|e| CaptureError::Browser(format!("browser launch failed: {e}")))?;

        let handler = tokio::spawn(async move {
            drive_handler(handler).await;
        });

        Ok(LaunchedBrowser {
            browser: Some(browser),
            handler,
        })
    }

    async fn wait_for_login(page: &Page, request: &CaptureRequest) -> Result<(), CaptureError> {
        let mut ticker = tokio::time::interval(request.poll_interval);
        loop {
            ticker.tick().await;
            let url = page.url().await?;
            let cookies = page_cookies(page).await?;
            if request.login_detected(url.as_deref(), &cookies) {
                info!(url = ?url, "login detected");
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl LoginCapture for ChromiumLoginCapture {
    fn check_available(&self) -> Result<(), CaptureError> {
        self.locate_browser().map(|_| ())
    }

    async fn capture(&self, request: &CaptureRequest) -> Result<CookieMap, CaptureError> {
        let executable = self.locate_browser()?;
        info!(browser = %executable.display(), login_url = %request.login_url, "opening login browser");

        let mut launched = self.launch(&executable).await?;
        let outcome = launched.run(request).await;
        launched.shutdown().await;

        let cookies = outcome?;
        if cookies.is_empty() {
            return Err(CaptureError::NoAuthCookies);
        }
        info!(cookies = ?cookies.keys().collect::<Vec<_>>(), "captured authentication cookies");
        Ok(cookies)
    }
}

/// A running browser plus its CDP event loop.
struct LaunchedBrowser {
    browser: Option<Browser>,
    handler: JoinHandle<()>,
}

impl LaunchedBrowser {
    async fn run(&mut self, request: &CaptureRequest) -> Result<CookieMap, CaptureError> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| CaptureError::Browser("browser already closed".to_string()))?;

        within_deadline(request.timeout, async {
            let page = browser.new_page(request.login_url.as_str()).await?;
            ChromiumLoginCapture::wait_for_login(&page, request).await?;
            tokio::time::sleep(COOKIE_SETTLE_DELAY).await;
            page_cookies(&page).await
        })
        .await
    }

    async fn shutdown(&mut self) {
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                warn!(error = %e, "browser close failed, killing process");
                let _ = browser.kill().await;
            }
            let _ = browser.wait().await;
            debug!("login browser closed");
        }
        self.handler.abort();
    }
}

impl Drop for LaunchedBrowser {
    fn drop(&mut self) {
        // Reached with a live browser only when the capture was cancelled;
        // dropping chromiumoxide's Browser kills the child process.
        if self.browser.take().is_some() {
            warn!("login cancelled, killing browser");
        }
        self.handler.abort();
    }
}

/// Poll the CDP event stream until the connection closes. A failed event is
/// logged and skipped.
async fn drive_handler<S, E>(mut events: S) -> usize
where
    S: Stream<Item = Result<(), E>> + Unpin,
    E: Display,
{
    let mut errors = 0;
    while let Some(event) = events.next().await {
        if let Err(e) = event {
            errors += 1;
            debug!(error = %e, "browser event error");
        }
    }
    debug!(errors, "browser event handler exited");
    errors
}

/// Bound a whole capture run, page load to final cookie read, by one timeout.
async fn within_deadline<T>(
    timeout: Duration,
    run: impl Future<Output = Result<T, CaptureError>>,
) -> Result<T, CaptureError> {
    match tokio::time::timeout(timeout, run).await {
        Ok(result) => result,
        Err(_) => {
            warn!(timeout_secs = timeout.as_secs(), "browser login timed out");
            Err(CaptureError::LoginTimeout(timeout))
        }
    }
}

async fn page_cookies(page: &Page) -> Result<CookieMap, CaptureError> {
    let cookies = page.get_cookies().await?;
    Ok(filter_auth_cookies(cookies.into_iter().map(|c| (c.name, c.value))))
}

fn running_in_container() -> bool {
    Path::new("/.dockerenv").exists() || std::env::var_os("DOCKER_CONTAINER").is_some()
}

/// Find a Chromium-family browser: explicit path, `CHROME`, platform install
/// locations, then `PATH`.
pub fn detect_browser(custom_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = custom_path.filter(|p| p.exists()) {
        return Some(path.to_path_buf());
    }

    if let Some(path) = std::env::var_os("CHROME").map(PathBuf::from).filter(|p| p.exists()) {
        return Some(path);
    }

    #[cfg(target_os = "macos")]
    if let Some(path) = MACOS_APP_PATHS.iter().map(PathBuf::from).find(|p| p.exists()) {
        return Some(path);
    }

    #[cfg(target_os = "windows")]
    if let Some(path) = WINDOWS_PATHS.iter().map(PathBuf::from).find(|p| p.exists()) {
        return Some(path);
    }

    CHROMIUM_EXECUTABLES.iter().find_map(|name| which::which(name).ok())
}

fn install_hint() -> &'static str {
    if cfg!(target_os = "macos") {
        "Install Google Chrome (brew install --cask google-chrome) or set CHROME to its path."
    } else if cfg!(target_os = "windows") {
        "Install Google Chrome from https://www.google.com/chrome/ or set CHROME to its path."
    } else {
        "Install chromium (e.g. sudo apt install chromium-browser) or set CHROME to its path."
    }
}
