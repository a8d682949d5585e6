//! Guards for server-rendered page loaders.
//!
//! Flow Overview: [`RouteGuard`] reads the session cookie of the request, checks
//! the access token's claims against optional [`Requirements`], runs the page
//! loader and turns failures into redirects:
//!
//! - no session: public landing page
//! - signed in but missing rights: authenticated landing page
//! - session could not be refreshed: session cookies cleared, public landing page
//! - anything else: generic error page, so a failing page never renders half
//!   authenticated
//!
//! [`GuestGuard`] is the opposite check for pages only signed-out visitors see.

mod page;

pub use self::page::{PageContext, PageResult, Redirect};

use crate::api::ApiError;
use crate::auth::{Claims, Requirements};
use crate::session::{self, Session};
use secrecy::ExposeSecret;
use std::future::Future;
use tracing::{debug, error, instrument, warn};

/// Redirect targets used by the guards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardRoutes {
    /// Landing page for visitors without a session.
    pub public: String,
    /// Landing page for signed-in users.
    pub authenticated: String,
    pub error: String,
}

impl Default for GuardRoutes {
    fn default() -> Self {
        Self {
            public: "/".to_string(),
            authenticated: "/dashboard".to_string(),
            error: "/error".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct RouteGuard {
    routes: GuardRoutes,
    requirements: Option<Requirements>,
}

impl RouteGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_requirements(mut self, requirements: Requirements) -> Self {
        self.requirements = Some(requirements);
        self
    }

    #[must_use]
    pub fn with_routes(mut self, routes: GuardRoutes) -> Self {
        self.routes = routes;
        self
    }

    /// Runs `page` if the request carries a session that meets the requirements.
    #[instrument(skip_all, fields(path = %ctx.path()))]
    pub async fn run<T, F, Fut>(&self, ctx: PageContext, page: F) -> PageResult<T>
    where
        F: FnOnce(PageContext) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let Some(token) = session::access_token(ctx.cookies().as_ref()) else {
            debug!("No session, redirecting to {}", self.routes.public);
            return PageResult::Redirect(Redirect::temporary(&self.routes.public));
        };

        if let Some(requirements) = &self.requirements {
            let claims = match Claims::decode(token.expose_secret()) {
                Ok(claims) => Some(claims),
                Err(e) => {
                    warn!("Failed to decode access token claims: {}", e);
                    None
                }
            };

            if !requirements.allows(claims.as_ref()) {
                debug!(
                    "Missing permissions, redirecting to {}",
                    self.routes.authenticated
                );
                return PageResult::Redirect(Redirect::temporary(&self.routes.authenticated));
            }
        }

        match page(ctx.clone()).await {
            Ok(props) => PageResult::Props(props),
            Err(err) if is_session_expired(&err) => {
                warn!("Session expired: {:#}", err);
                Session::destroy(ctx.cookies().as_ref());
                PageResult::Redirect(Redirect::temporary(&self.routes.public))
            }
            Err(err) => {
                error!("Page loader failed: {:#}", err);
                PageResult::Redirect(Redirect::temporary(&self.routes.error))
            }
        }
    }
}

/// Keeps signed-in users away from pages meant for visitors, such as sign-in.
#[derive(Clone, Debug, Default)]
pub struct GuestGuard {
    routes: GuardRoutes,
}

impl GuestGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_routes(mut self, routes: GuardRoutes) -> Self {
        self.routes = routes;
        self
    }

    #[instrument(skip_all, fields(path = %ctx.path()))]
    pub async fn run<T, F, Fut>(&self, ctx: PageContext, page: F) -> PageResult<T>
    where
        F: FnOnce(PageContext) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if session::access_token(ctx.cookies().as_ref()).is_some() {
            debug!(
                "Session present, redirecting to {}",
                self.routes.authenticated
            );
            return PageResult::Redirect(Redirect::temporary(&self.routes.authenticated));
        }

        match page(ctx).await {
            Ok(props) => PageResult::Props(props),
            Err(err) => {
                error!("Page loader failed: {:#}", err);
                PageResult::Redirect(Redirect::temporary(&self.routes.error))
            }
        }
    }
}

/// Looks through the whole error chain, so loaders may add context.
fn is_session_expired(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<ApiError>()
            .is_some_and(ApiError::is_session_expired)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RefreshError;
    use crate::session::{SessionStore, ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE};
    use anyhow::{anyhow, Context};
    use axum::http::{header::COOKIE, HeaderMap, HeaderValue};
    use base64ct::{Base64UrlUnpadded, Encoding};
    use serde_json::json;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    fn token(permissions: &[&str], roles: &[&str]) -> String {
        let payload = json!({ "sub": "u1", "permissions": permissions, "roles": roles });
        let payload = Base64UrlUnpadded::encode_string(payload.to_string().as_bytes());
        format!("eyJhbGciOiJIUzI1NiJ9.{payload}.c2ln")
    }

    fn ctx_with_session(access_token: &str) -> PageContext {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!(
                "{ACCESS_TOKEN_COOKIE}={access_token}; {REFRESH_TOKEN_COOKIE}=r1"
            ))
            .unwrap(),
        );
        PageContext::from_headers("/page", &headers)
    }

    fn ctx_without_session() -> PageContext {
        PageContext::from_headers("/page", &HeaderMap::new())
    }

    #[tokio::test]
    async fn no_session_redirects_home_without_running_page() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();

        let result = RouteGuard::new()
            .run(ctx_without_session(), |_| async move {
                flag.store(true, Ordering::SeqCst);
                Ok("props")
            })
            .await;

        assert_eq!(
            result,
            PageResult::Redirect(Redirect {
                destination: "/".to_string(),
                permanent: false,
            })
        );
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn missing_rights_redirect_to_dashboard() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let guard = RouteGuard::new().with_requirements(
            Requirements::new()
                .permissions(["metrics.list"])
                .roles(["administrator"]),
        );

        let result = guard
            .run(ctx_with_session(&token(&["users.list"], &["administrator"])), |_| async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert_eq!(result, PageResult::Redirect(Redirect::temporary("/dashboard")));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn undecodable_token_lacks_rights() {
        let guard =
            RouteGuard::new().with_requirements(Requirements::new().permissions(["metrics.list"]));

        let result = guard
            .run(ctx_with_session("opaque-token"), |_| async { Ok(()) })
            .await;

        assert_eq!(result, PageResult::Redirect(Redirect::temporary("/dashboard")));
    }

    #[tokio::test]
    async fn authorized_page_returns_props() {
        let guard = RouteGuard::new().with_requirements(
            Requirements::new().permissions(["metrics.list", "metrics.create"]),
        );

        let result = guard
            .run(ctx_with_session(&token(&["metrics.list"], &[])), |ctx| async move {
                Ok(ctx.path().to_string())
            })
            .await;

        assert_eq!(result, PageResult::Props("/page".to_string()));
    }

    #[tokio::test]
    async fn null_permissions_still_match_roles() {
        let payload = json!({ "sub": "u1", "permissions": null, "roles": ["administrator"] });
        let payload = Base64UrlUnpadded::encode_string(payload.to_string().as_bytes());
        let token = format!("eyJhbGciOiJIUzI1NiJ9.{payload}.c2ln");
        let guard = RouteGuard::new().with_requirements(Requirements::new().roles(["administrator"]));

        let result = guard
            .run(ctx_with_session(&token), |_| async { Ok("metrics") })
            .await;

        assert_eq!(result, PageResult::Props("metrics"));
    }

    #[tokio::test]
    async fn expired_session_clears_cookies_and_redirects_home() {
        let ctx = ctx_with_session("a1");

        let result: PageResult<()> = RouteGuard::new()
            .run(ctx.clone(), |_| async {
                Err(anyhow::Error::new(ApiError::AuthToken(
                    RefreshError::Rejected {
                        status: 401,
                        message: "refresh token revoked".to_string(),
                    },
                ))
                .context("loading dashboard"))
            })
            .await;

        assert_eq!(result, PageResult::Redirect(Redirect::temporary("/")));
        assert!(ctx.cookies().get(ACCESS_TOKEN_COOKIE).is_none());
        assert!(ctx.cookies().get(REFRESH_TOKEN_COOKIE).is_none());
        assert_eq!(
            ctx.cookies().set_cookie_lines(),
            vec![
                "session-access-token=; Path=/; Max-Age=0".to_string(),
                "session-refresh-token=; Path=/; Max-Age=0".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn signed_out_error_also_redirects_home() {
        let result: PageResult<()> = RouteGuard::new()
            .run(ctx_with_session("a1"), |_| async {
                Err(ApiError::SignedOut(RefreshError::MissingRefreshToken)).context("me")
            })
            .await;

        assert_eq!(result, PageResult::Redirect(Redirect::temporary("/")));
    }

    #[tokio::test]
    async fn other_errors_redirect_to_error_page() {
        let ctx = ctx_with_session("a1");

        let result: PageResult<()> = RouteGuard::new()
            .run(ctx.clone(), |_| async { Err(anyhow!("database unavailable")) })
            .await;

        assert_eq!(result, PageResult::Redirect(Redirect::temporary("/error")));
        assert!(ctx.cookies().get(ACCESS_TOKEN_COOKIE).is_some());

        let http_error: PageResult<()> = RouteGuard::new()
            .run(ctx_with_session("a1"), |_| async {
                Err(ApiError::Http {
                    status: 500,
                    code: None,
                    message: "boom".to_string(),
                }
                .into())
            })
            .await;
        assert_eq!(http_error, PageResult::Redirect(Redirect::temporary("/error")));
    }

    #[tokio::test]
    async fn custom_routes() {
        let routes = GuardRoutes {
            public: "/login".to_string(),
            authenticated: "/home".to_string(),
            error: "/oops".to_string(),
        };

        let result: PageResult<()> = RouteGuard::new()
            .with_routes(routes)
            .run(ctx_without_session(), |_| async { Ok(()) })
            .await;

        assert_eq!(result, PageResult::Redirect(Redirect::temporary("/login")));
    }

    #[tokio::test]
    async fn guest_guard_redirects_signed_in_users() {
        let result = GuestGuard::new()
            .run(ctx_with_session("a1"), |_| async { Ok("sign in") })
            .await;
        assert_eq!(result, PageResult::Redirect(Redirect::temporary("/dashboard")));

        let result = GuestGuard::new()
            .run(ctx_without_session(), |_| async { Ok("sign in") })
            .await;
        assert_eq!(result, PageResult::Props("sign in"));
    }
}
