use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Primary access-token cookie set by the identity service
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// CSRF cookie; its value is echoed back in [`CSRF_HEADER`]
pub const CSRF_TOKEN_COOKIE: &str = "csrf_token";

/// Long-lived cookie used to mint a new access token
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";

/// Header carrying the CSRF token on every API request
pub const CSRF_HEADER: &str = "X-CSRF-Token";

/// Cookies worth keeping from a login response or a browser context.
pub const AUTH_COOKIE_NAMES: &[&str] = &[ACCESS_TOKEN_COOKIE, CSRF_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE];

/// Cookies a session cannot work without.
pub const REQUIRED_COOKIE_NAMES: &[&str] = &[ACCESS_TOKEN_COOKIE, CSRF_TOKEN_COOKIE];

/// Sessions are valid for a fixed window after login.
pub const SESSION_VALIDITY_DAYS: i64 = 7;

/// Cookie name to value, as received from the server or a browser.
pub type CookieMap = BTreeMap<String, String>;

/// Keep only the authentication cookies out of an arbitrary cookie set.
pub fn filter_auth_cookies<I, K, V>(cookies: I) -> CookieMap
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    cookies
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .filter(|(k, _)| AUTH_COOKIE_NAMES.contains(&k.as_str()))
        .collect()
}

/// Required cookie names absent from `cookies`.
pub fn missing_required_cookies(cookies: &CookieMap) -> Vec<String> {
    REQUIRED_COOKIE_NAMES
        .iter()
        .filter(|name| cookies.get(**name).map_or(true, |v| v.is_empty()))
        .map(|name| name.to_string())
        .collect()
}

/// Who the session belongs to, as reported by the identity service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl UserSummary {
    /// Extract an identity from a JSON body. Accepts either a nested `user`
    /// object or the identity fields at the top level.
    pub fn from_json(body: &serde_json::Value) -> Option<Self> {
        let candidate = body.get("user").filter(|u| u.is_object()).unwrap_or(body);
        let user: UserSummary = serde_json::from_value(candidate.clone()).ok()?;
        if user.id.is_none() && user.username.is_none() && user.email.is_none() {
            None
        } else {
            Some(user)
        }
    }

    pub fn display_name(&self) -> String {
        match (&self.username, &self.email) {
            (Some(name), Some(email)) => format!("{name} ({email})"),
            (Some(name), None) => name.clone(),
            (None, Some(email)) => email.clone(),
            (None, None) => self.id.clone().unwrap_or_else(|| "unknown user".to_string()),
        }
    }
}

/// A verified login: auth cookies plus identity and a validity window.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub cookies: CookieMap,
    pub user: UserSummary,
    #[serde(deserialize_with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(deserialize_with = "timestamp")]
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Start a new session now.
    pub fn new(cookies: CookieMap, user: UserSummary) -> Self {
        Self::issued_at(cookies, user, Utc::now())
    }

    pub fn issued_at(cookies: CookieMap, user: UserSummary, created_at: DateTime<Utc>) -> Self {
        Self {
            cookies,
            user,
            created_at,
            expires_at: created_at + Duration::days(SESSION_VALIDITY_DAYS),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    pub fn has_required_cookies(&self) -> bool {
        missing_required_cookies(&self.cookies).is_empty()
    }

    /// Check if session is usable (not expired, all required cookies present)
    pub fn is_valid(&self) -> bool {
        !self.is_expired() && self.has_required_cookies()
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn csrf_token(&self) -> Option<&str> {
        self.cookie(CSRF_TOKEN_COOKIE)
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.cookie(REFRESH_TOKEN_COOKIE)
    }

    /// Value for an outgoing `Cookie` header.
    pub fn cookie_header(&self) -> String {
        cookie_header(&self.cookies)
    }

    /// Merge freshly issued auth cookies. Returns the names that changed.
    pub fn merge_cookies(&mut self, fresh: CookieMap) -> Vec<String> {
        let mut changed = Vec::new();
        for (name, value) in filter_auth_cookies(fresh) {
            if value.is_empty() {
                continue;
            }
            if self.cookies.get(&name) != Some(&value) {
                changed.push(name.clone());
                self.cookies.insert(name, value);
            }
        }
        changed
    }

    pub fn time_until_expiry(&self) -> Duration {
        self.expires_at - Utc::now()
    }

    /// Remaining validity for display, e.g. `6d 23h`
    pub fn remaining_display(&self) -> String {
        let remaining = self.time_until_expiry();
        if remaining <= Duration::zero() {
            return "expired".to_string();
        }
        let days = remaining.num_days();
        let hours = remaining.num_hours() % 24;
        let minutes = remaining.num_minutes() % 60;
        if days > 0 {
            format!("{days}d {hours}h")
        } else if hours > 0 {
            format!("{hours}h {minutes}m")
        } else {
            format!("{}m", minutes.max(1))
        }
    }
}

// Cookie values are bearer credentials; only names are printed.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("cookies", &self.cookies.keys().collect::<Vec<_>>())
            .field("user", &self.user)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

pub fn cookie_header(cookies: &CookieMap) -> String {
    cookies
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Accepts RFC 3339 as well as the naive ISO-8601 local timestamps
/// written by older session files.
fn timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookies(pairs: &[(&str, &str)]) -> CookieMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_expiry_is_seven_days_after_creation() {
        let session = Session::new(cookies(&[("access_token", "T1"), ("csrf_token", "C1")]), UserSummary::default());
        assert_eq!(session.expires_at - session.created_at, Duration::days(7));
        assert!(session.is_valid());
    }

    #[test]
    fn test_missing_csrf_is_invalid() {
        let session = Session::new(cookies(&[("access_token", "T1")]), UserSummary::default());
        assert!(!session.has_required_cookies());
        assert!(!session.is_valid());
        assert_eq!(missing_required_cookies(&session.cookies), vec!["csrf_token"]);
    }

    #[test]
    fn test_expired_session_is_invalid() {
        let created = Utc::now() - Duration::days(7) - Duration::seconds(1);
        let session = Session::issued_at(
            cookies(&[("access_token", "T1"), ("csrf_token", "C1")]),
            UserSummary::default(),
            created,
        );
        assert!(session.is_expired());
        assert!(!session.is_valid());
        assert_eq!(session.remaining_display(), "expired");
    }

    #[test]
    fn test_filter_auth_cookies_drops_others() {
        let filtered = filter_auth_cookies(vec![
            ("access_token", "T1"),
            ("_ga", "analytics"),
            ("refresh_token", "R1"),
        ]);
        assert_eq!(filtered.len(), 2);
        assert!(!filtered.contains_key("_ga"));
    }

    #[test]
    fn test_merge_cookies_reports_changes() {
        let mut session = Session::new(
            cookies(&[("access_token", "T1"), ("csrf_token", "C1"), ("refresh_token", "R1")]),
            UserSummary::default(),
        );
        let changed = session.merge_cookies(cookies(&[("access_token", "T2"), ("csrf_token", "C1"), ("other", "x")]));
        assert_eq!(changed, vec!["access_token"]);
        assert_eq!(session.cookie("access_token"), Some("T2"));
        assert!(!session.cookies.contains_key("other"));
    }

    #[test]
    fn test_cookie_header_format() {
        let header = cookie_header(&cookies(&[("access_token", "T1"), ("csrf_token", "C1")]));
        assert_eq!(header, "access_token=T1; csrf_token=C1");
    }

    #[test]
    fn test_debug_hides_cookie_values() {
        let session = Session::new(cookies(&[("access_token", "secret-value"), ("csrf_token", "C1")]), UserSummary::default());
        let printed = format!("{session:?}");
        assert!(printed.contains("access_token"));
        assert!(!printed.contains("secret-value"));
    }

    #[test]
    fn test_user_summary_from_nested_and_flat_bodies() {
        let nested = serde_json::json!({"user": {"username": "a", "id": 42}});
        let user = UserSummary::from_json(&nested).unwrap();
        assert_eq!(user.username.as_deref(), Some("a"));
        assert_eq!(user.id.as_deref(), Some("42"));

        let flat = serde_json::json!({"email": "a@b.com", "id": "u-1"});
        let user = UserSummary::from_json(&flat).unwrap();
        assert_eq!(user.email.as_deref(), Some("a@b.com"));

        assert!(UserSummary::from_json(&serde_json::json!({"message": "ok"})).is_none());
    }

    #[test]
    fn test_reads_legacy_naive_timestamps() {
        let json = r#"{
            "cookies": {"access_token": "T1", "csrf_token": "C1"},
            "csrf_token": "C1",
            "user": {"email": "a@b.com", "username": "a", "id": null},
            "created_at": "2025-01-01T10:00:00.123456",
            "expires_at": "2025-01-08T10:00:00.123456"
        }"#;
        let session: Session = serde_json::from_str(json).expect("legacy session should parse");
        assert_eq!(session.expires_at - session.created_at, Duration::days(7));
        assert!(session.user.id.is_none());
    }
}
