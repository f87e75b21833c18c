use std::fmt;
use std::io::{self, BufRead, IsTerminal, Write};

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::debug;

use crate::config::{ENV_PASSWORD, ENV_USERNAME};

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error(
        "No terminal available to prompt for credentials. Set BIOCLIN_EMAIL and \
         BIOCLIN_PASSWORD, or pass username and password explicitly"
    )]
    InteractiveInputUnavailable,

    #[error("Username must not be empty")]
    EmptyUsername,

    #[error("Failed to read credentials from terminal: {0}")]
    Prompt(#[from] io::Error),
}

/// Username and password used once to obtain a session. Never persisted.
pub struct Credentials {
    pub username: String,
    password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::new(password.into()),
        }
    }

    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Where the resolver found the credentials it returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Explicit,
    Environment,
    Prompt,
}

/// Interactive input channel for credential prompts.
pub trait Prompter: Send + Sync {
    fn is_interactive(&self) -> bool;
    fn read_line(&self, label: &str) -> io::Result<String>;
    /// Read without echoing input.
    fn read_password(&self, label: &str) -> io::Result<String>;
}

/// Prompts on the controlling terminal.
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn is_interactive(&self) -> bool {
        io::stdin().is_terminal()
    }

    fn read_line(&self, label: &str) -> io::Result<String> {
        // Prompts go to stderr; stdout carries command output.
        eprint!("{label}");
        io::stderr().flush()?;
        let mut input = String::new();
        io::stdin().lock().read_line(&mut input)?;
        Ok(input.trim().to_string())
    }

    fn read_password(&self, label: &str) -> io::Result<String> {
        rpassword::prompt_password(label)
    }
}

/// Never prompts. Used where no user sits at a terminal, such as the tool
/// boundary.
pub struct NoPrompt;

impl Prompter for NoPrompt {
    fn is_interactive(&self) -> bool {
        false
    }

    fn read_line(&self, _label: &str) -> io::Result<String> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "prompting is disabled"))
    }

    fn read_password(&self, _label: &str) -> io::Result<String> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "prompting is disabled"))
    }
}

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Decides which credentials to log in with: explicit arguments, then the
/// environment pair, then an interactive prompt.
pub struct CredentialResolver {
    env: EnvLookup,
    prompter: Box<dyn Prompter>,
}

impl Default for CredentialResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialResolver {
    /// Resolver over the process environment and the terminal.
    pub fn new() -> Self {
        Self::with_sources(|key| std::env::var(key).ok(), TerminalPrompter)
    }

    /// Resolver over the process environment that never prompts.
    pub fn non_interactive() -> Self {
        Self::with_sources(|key| std::env::var(key).ok(), NoPrompt)
    }

    pub fn with_sources(
        env: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
        prompter: impl Prompter + 'static,
    ) -> Self {
        Self {
            env: Box::new(env),
            prompter: Box::new(prompter),
        }
    }

    pub fn resolve(
        &self,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<(Credentials, CredentialSource), CredentialError> {
        let username = username.map(str::trim).filter(|u| !u.is_empty());
        let password = password.filter(|p| !p.is_empty());

        if let (Some(user), Some(pass)) = (username, password) {
            debug!(username = user, "using explicit credentials");
            return Ok((Credentials::new(user, pass), CredentialSource::Explicit));
        }

        if let Some(creds) = self.from_env() {
            debug!(username = %creds.username, "using credentials from environment");
            return Ok((creds, CredentialSource::Environment));
        }

        if !self.prompter.is_interactive() {
            return Err(CredentialError::InteractiveInputUnavailable);
        }

        let user = match username {
            Some(u) => u.to_string(),
            None => self.prompter.read_line("Email: ")?,
        };
        if user.is_empty() {
            return Err(CredentialError::EmptyUsername);
        }
        let pass = self.prompter.read_password("Password: ")?;
        Ok((Credentials::new(user, pass), CredentialSource::Prompt))
    }

    /// Whether both `BIOCLIN_EMAIL` and `BIOCLIN_PASSWORD` are set.
    pub fn has_env_credentials(&self) -> bool {
        self.from_env().is_some()
    }

    fn from_env(&self) -> Option<Credentials> {
        let user = (self.env)(ENV_USERNAME).filter(|v| !v.trim().is_empty())?;
        let pass = (self.env)(ENV_PASSWORD).filter(|v| !v.is_empty())?;
        Some(Credentials::new(user.trim(), pass))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct ScriptedPrompter {
        interactive: bool,
        prompts: Arc<AtomicUsize>,
    }

    impl Prompter for ScriptedPrompter {
        fn is_interactive(&self) -> bool {
            self.interactive
        }

        fn read_line(&self, _label: &str) -> io::Result<String> {
            self.prompts.fetch_add(1, Ordering::SeqCst);
            Ok("typed@b.com".to_string())
        }

        fn read_password(&self, _label: &str) -> io::Result<String> {
            self.prompts.fetch_add(1, Ordering::SeqCst);
            Ok("typed-pass".to_string())
        }
    }

    fn resolver(env: &'static [(&'static str, &'static str)], interactive: bool) -> (CredentialResolver, Arc<AtomicUsize>) {
        let prompts = Arc::new(AtomicUsize::new(0));
        let resolver = CredentialResolver::with_sources(
            move |key| env.iter().find(|(k, _)| *k == key).map(|(_, v)| v.to_string()),
            ScriptedPrompter {
                interactive,
                prompts: prompts.clone(),
            },
        );
        (resolver, prompts)
    }

    const FULL_ENV: &[(&str, &str)] = &[("BIOCLIN_EMAIL", "env@b.com"), ("BIOCLIN_PASSWORD", "env-pass")];

    #[test]
    fn test_explicit_pair_wins() {
        let (resolver, prompts) = resolver(FULL_ENV, true);
        let (creds, source) = resolver.resolve(Some("a@b.com"), Some("x")).unwrap();
        assert_eq!(source, CredentialSource::Explicit);
        assert_eq!(creds.username, "a@b.com");
        assert_eq!(creds.password(), "x");
        assert_eq!(prompts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_env_pair_never_prompts() {
        let (resolver, prompts) = resolver(FULL_ENV, true);
        let (creds, source) = resolver.resolve(None, None).unwrap();
        assert_eq!(source, CredentialSource::Environment);
        assert_eq!(creds.username, "env@b.com");
        assert_eq!(prompts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_partial_explicit_falls_back_to_env() {
        let (resolver, _) = resolver(FULL_ENV, true);
        let (creds, source) = resolver.resolve(Some("a@b.com"), None).unwrap();
        assert_eq!(source, CredentialSource::Environment);
        assert_eq!(creds.username, "env@b.com");
    }

    #[test]
    fn test_prompts_when_nothing_else_available() {
        let (resolver, prompts) = resolver(&[("BIOCLIN_EMAIL", "env@b.com")], true);
        let (creds, source) = resolver.resolve(None, None).unwrap();
        assert_eq!(source, CredentialSource::Prompt);
        assert_eq!(creds.username, "typed@b.com");
        assert_eq!(creds.password(), "typed-pass");
        assert_eq!(prompts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_explicit_username_skips_username_prompt() {
        let (resolver, prompts) = resolver(&[], true);
        let (creds, _) = resolver.resolve(Some("a@b.com"), None).unwrap();
        assert_eq!(creds.username, "a@b.com");
        assert_eq!(prompts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_terminal_is_distinct_error() {
        let (resolver, _) = resolver(&[], false);
        let err = resolver.resolve(None, None).unwrap_err();
        assert!(matches!(err, CredentialError::InteractiveInputUnavailable));
        assert!(err.to_string().contains("BIOCLIN_EMAIL"));
    }

    #[test]
    fn test_has_env_credentials_needs_both_values() {
        assert!(resolver(FULL_ENV, false).0.has_env_credentials());
        assert!(!resolver(&[("BIOCLIN_EMAIL", "env@b.com")], false).0.has_env_credentials());
        assert!(!resolver(&[("BIOCLIN_EMAIL", "env@b.com"), ("BIOCLIN_PASSWORD", "")], false).0.has_env_credentials());
    }

    #[test]
    fn test_no_prompt_resolver_fails_without_env() {
        let resolver = CredentialResolver::with_sources(|_| None, NoPrompt);
        let err = resolver.resolve(Some("a@b.com"), None).unwrap_err();
        assert!(matches!(err, CredentialError::InteractiveInputUnavailable));
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = Credentials::new("a@b.com", "hunter2");
        assert!(!format!("{creds:?}").contains("hunter2"));
    }
}
