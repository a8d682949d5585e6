use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION},
    Method,
};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;

use super::ApiError;

/// Everything needed to send, and later replay, a request.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl RequestDescriptor {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Attaches a JSON body.
    ///
    /// # Errors
    /// Returns an error if the body cannot be serialized.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|err| ApiError::Parse(format!("Failed to encode request: {err}")))?;
        self.body = Some(value);
        Ok(self)
    }

    /// Adds a header.
    ///
    /// # Errors
    /// Returns an error if the name or value is not a valid header.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, ApiError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| ApiError::Config(format!("Invalid header name {name}: {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| ApiError::Config(format!("Invalid header value: {err}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    #[must_use]
    pub fn has_authorization(&self) -> bool {
        self.headers.contains_key(AUTHORIZATION)
    }

    /// Copy of this request carrying `Authorization: Bearer <token>`.
    ///
    /// # Errors
    /// Returns an error if the token contains characters not allowed in headers.
    pub fn with_bearer(&self, token: &SecretString) -> Result<Self, ApiError> {
        let mut patched = self.clone();
        patched
            .headers
            .insert(AUTHORIZATION, bearer_header(token)?);
        Ok(patched)
    }
}

pub(crate) fn bearer_header(token: &SecretString) -> Result<HeaderValue, ApiError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
        .map_err(|_| ApiError::Config("Access token is not a valid header value".to_string()))?;
    value.set_sensitive(true);
    Ok(value)
}
