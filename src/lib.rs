//! # Tollgate
//!
//! Session handling for applications that talk to a token-protected backend.
//!
//! Flow Overview:
//! 1. A page loader is wrapped in a [`guard::RouteGuard`], which checks the
//!    session cookies and the claims of the access token before the page runs.
//! 2. The page calls the backend through an [`api::ApiClient`] that sends
//!    `Authorization: Bearer <access-token>` on every request.
//! 3. When the backend answers `401` with code `token.expired`, the client runs a
//!    single refresh for every request that failed meanwhile, stores the new
//!    token pair and replays the queued requests.
//! 4. If the refresh fails, the session is dropped and the guard turns the error
//!    into a redirect to the public landing page.
//!
//! Token material is held in `secrecy` wrappers and is never logged.

pub mod api;
pub mod auth;
pub mod cli;
pub mod guard;
pub mod host;
pub mod session;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
