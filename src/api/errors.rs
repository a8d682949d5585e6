use serde::Deserialize;
use thiserror::Error;

/// Maximum number of error body characters kept in error messages.
const MAX_ERROR_CHARS: usize = 200;

/// Backend code for an access token that is well-formed but expired.
pub const TOKEN_EXPIRED_CODE: &str = "token.expired";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Request failed ({status}): {message}")]
    Http {
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error("Response error: {0}")]
    Parse(String),
    /// The session could not be refreshed; the caller has to sign in again.
    #[error("Session expired: {0}")]
    AuthToken(#[source] RefreshError),
    /// The session could not be refreshed and was already cleared.
    #[error("Signed out: {0}")]
    SignedOut(#[source] RefreshError),
}

impl ApiError {
    /// `true` when the error means the user must sign in again.
    #[must_use]
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::AuthToken(_) | Self::SignedOut(_))
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn is_token_expired(&self) -> bool {
        matches!(
            self,
            Self::Http { status: 401, code: Some(code), .. } if code == TOKEN_EXPIRED_CODE
        )
    }
}

/// Outcome of a failed refresh, handed to every queued request.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RefreshError {
    #[error("no refresh token in session")]
    MissingRefreshToken,
    #[error("refresh rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("refresh request failed: {0}")]
    Network(String),
    #[error("refresh request timed out")]
    Timeout,
    #[error("invalid refresh response: {0}")]
    InvalidResponse(String),
    #[error("refresh ended without a result")]
    Abandoned,
    #[error("refreshed token was rejected as expired")]
    TokenRejected,
}

/// Error payload returned by the backend.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    /// Parses a JSON error body, keeping the raw text as message otherwise.
    pub(crate) fn parse(body: &str) -> (Option<String>, String) {
        match serde_json::from_str::<Self>(body) {
            Ok(parsed) => {
                let message = parsed
                    .message
                    .map_or_else(|| sanitize_body(body), |message| sanitize_body(&message));
                (parsed.code, message)
            }
            Err(_) => (None, sanitize_body(body)),
        }
    }
}

/// Trims and truncates error bodies before they end up in messages.
pub(crate) fn sanitize_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "Request failed.".to_string()
    } else {
        trimmed.chars().take(MAX_ERROR_CHARS).collect()
    }
}

/// Maps transport errors, separating timeouts.
pub(crate) fn map_request_error(err: &reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout("Request timed out. Please try again.".to_string())
    } else {
        ApiError::Network(format!("Unable to reach the server: {err}"))
    }
}
