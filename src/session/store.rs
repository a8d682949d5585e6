use super::{CookieOptions, SessionStore};
use axum::http::{
    header::{COOKIE, SET_COOKIE},
    HeaderMap, HeaderValue,
};
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};
use tracing::warn;

/// Cookies of a single server-rendered request.
///
/// Values are parsed from the incoming `Cookie` header. Writes update the local
/// view immediately and are recorded as `Set-Cookie` lines for the response.
#[derive(Debug, Default)]
pub struct RequestCookies {
    values: Mutex<HashMap<String, String>>,
    pending: Mutex<Vec<String>>,
}

impl RequestCookies {
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut values = HashMap::new();

        for header in headers.get_all(COOKIE) {
            let Ok(value) = header.to_str() else {
                continue;
            };
            for pair in value.split(';') {
                let mut parts = pair.trim().splitn(2, '=');
                let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                    continue;
                };
                let key = key.trim();
                if !key.is_empty() {
                    values.insert(key.to_string(), val.trim().to_string());
                }
            }
        }

        Self {
            values: Mutex::new(values),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// `Set-Cookie` lines recorded so far, in write order.
    pub fn set_cookie_lines(&self) -> Vec<String> {
        lock(&self.pending).clone()
    }

    /// Appends the recorded `Set-Cookie` headers to a response.
    pub fn write_set_cookie(&self, headers: &mut HeaderMap) {
        for line in lock(&self.pending).iter() {
            match HeaderValue::from_str(line) {
                Ok(value) => {
                    headers.append(SET_COOKIE, value);
                }
                Err(e) => warn!("Skipping invalid Set-Cookie value: {}", e),
            }
        }
    }
}

impl SessionStore for RequestCookies {
    fn get(&self, name: &str) -> Option<String> {
        lock(&self.values).get(name).cloned()
    }

    fn set(&self, name: &str, value: &str, options: &CookieOptions) {
        lock(&self.values).insert(name.to_string(), value.to_string());
        lock(&self.pending).push(format!(
            "{name}={value}; Path={}; Max-Age={}; SameSite=Lax",
            options.path, options.max_age_seconds
        ));
    }

    fn remove(&self, name: &str) {
        lock(&self.values).remove(name);

        let line = format!("{name}=; Path=/; Max-Age=0");
        let prefix = format!("{name}=");
        let mut pending = lock(&self.pending);
        // Removing twice in a row emits one header.
        let last = pending.iter().rev().find(|entry| entry.starts_with(&prefix));
        if last != Some(&line) {
            pending.push(line);
        }
    }
}

/// Cookies kept for the lifetime of a client, the way a browser keeps them.
#[derive(Debug, Default)]
pub struct CookieJar {
    values: Mutex<HashMap<String, String>>,
}

impl SessionStore for CookieJar {
    fn get(&self, name: &str) -> Option<String> {
        lock(&self.values).get(name).cloned()
    }

    fn set(&self, name: &str, value: &str, options: &CookieOptions) {
        let mut values = lock(&self.values);
        if options.max_age_seconds == 0 {
            values.remove(name);
        } else {
            values.insert(name.to_string(), value.to_string());
        }
    }

    fn remove(&self, name: &str) {
        lock(&self.values).remove(name);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
