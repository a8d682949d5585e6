//! Session token pair and the cookie store it lives in.
//!
//! A session is two cookies, the access token and the refresh token, written and
//! removed together. Where the cookies live depends on who runs the code: a
//! server-rendered request only sees the cookies of that request
//! ([`RequestCookies`]), a long-lived client keeps them for its whole lifetime
//! ([`CookieJar`]). Both sit behind [`SessionStore`].

mod store;

pub use self::store::{CookieJar, RequestCookies};

use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use tracing::debug;

pub const ACCESS_TOKEN_COOKIE: &str = "session-access-token";
pub const REFRESH_TOKEN_COOKIE: &str = "session-refresh-token";

/// 30 days
pub const SESSION_MAX_AGE_SECONDS: u64 = 60 * 60 * 24 * 30;

/// Attributes applied when a cookie is written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CookieOptions {
    pub max_age_seconds: u64,
    pub path: String,
}

impl CookieOptions {
    /// Options used for both session cookies.
    #[must_use]
    pub fn session() -> Self {
        Self {
            max_age_seconds: SESSION_MAX_AGE_SECONDS,
            path: "/".to_string(),
        }
    }
}

/// Key-value cookie access scoped to a request or to a client.
pub trait SessionStore: Send + Sync + fmt::Debug {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&self, name: &str, value: &str, options: &CookieOptions);
    fn remove(&self, name: &str);
}

/// Access and refresh token, always stored as a pair.
#[derive(Clone)]
pub struct Session {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

impl Session {
    #[must_use]
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            refresh_token: SecretString::from(refresh_token.into()),
        }
    }

    /// Reads both cookies; `None` unless both are present and non-empty.
    pub fn load(store: &dyn SessionStore) -> Option<Self> {
        let access_token = access_token(store)?;
        let refresh_token = refresh_token(store)?;
        Some(Self {
            access_token,
            refresh_token,
        })
    }

    /// Writes both cookies with a 30 day lifetime on `/`.
    pub fn save(&self, store: &dyn SessionStore) {
        let options = CookieOptions::session();
        store.set(
            ACCESS_TOKEN_COOKIE,
            self.access_token.expose_secret(),
            &options,
        );
        store.set(
            REFRESH_TOKEN_COOKIE,
            self.refresh_token.expose_secret(),
            &options,
        );
    }

    /// Removes both cookies.
    pub fn destroy(store: &dyn SessionStore) {
        store.remove(ACCESS_TOKEN_COOKIE);
        store.remove(REFRESH_TOKEN_COOKIE);
        debug!("session cookies removed");
    }
}

/// Current access token, treating an empty cookie as missing.
pub fn access_token(store: &dyn SessionStore) -> Option<SecretString> {
    non_empty(store.get(ACCESS_TOKEN_COOKIE))
}

/// Current refresh token, treating an empty cookie as missing.
pub fn refresh_token(store: &dyn SessionStore) -> Option<SecretString> {
    non_empty(store.get(REFRESH_TOKEN_COOKIE))
}

fn non_empty(value: Option<String>) -> Option<SecretString> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(SecretString::from)
}

/// Hook run when the session must end: a non-expiry `401`, or a failed refresh
/// in server context.
pub trait SignOut: Send + Sync {
    fn sign_out(&self, store: &dyn SessionStore);
}

/// Default sign-out: drop both session cookies.
#[derive(Clone, Copy, Debug, Default)]
pub struct DestroySession;

impl SignOut for DestroySession {
    fn sign_out(&self, store: &dyn SessionStore) {
        Session::destroy(store);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_returns_pair() {
        let jar = CookieJar::default();
        Session::new("access", "refresh").save(&jar);

        let session = Session::load(&jar).expect("session");
        assert_eq!(session.access_token.expose_secret(), "access");
        assert_eq!(session.refresh_token.expose_secret(), "refresh");
    }

    #[test]
    fn load_requires_both_tokens() {
        let jar = CookieJar::default();
        jar.set(ACCESS_TOKEN_COOKIE, "access", &CookieOptions::session());
        assert!(Session::load(&jar).is_none());
        assert!(access_token(&jar).is_some());
    }

    #[test]
    fn empty_cookie_counts_as_missing() {
        let jar = CookieJar::default();
        jar.set(ACCESS_TOKEN_COOKIE, "  ", &CookieOptions::session());
        assert!(access_token(&jar).is_none());
    }

    #[test]
    fn destroy_session_sign_out_clears_both() {
        let jar = CookieJar::default();
        Session::new("access", "refresh").save(&jar);

        DestroySession.sign_out(&jar);

        assert!(jar.get(ACCESS_TOKEN_COOKIE).is_none());
        assert!(jar.get(REFRESH_TOKEN_COOKIE).is_none());
    }

    #[test]
    fn debug_redacts_tokens() {
        let session = Session::new("access-secret", "refresh-secret");
        let rendered = format!("{session:?}");
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn session_options_are_thirty_days_on_root() {
        let options = CookieOptions::session();
        assert_eq!(options.max_age_seconds, 2_592_000);
        assert_eq!(options.path, "/");
    }
}
