use crate::api::{ApiClient, ApiConfig, ApiError, ExecutionContext};
use crate::session::{RequestCookies, SessionStore};
use axum::{
    http::HeaderMap,
    response::{IntoResponse, Redirect as HttpRedirect, Response},
};
use std::sync::Arc;

/// Request data a page loader gets: its path and the request's cookies.
#[derive(Clone, Debug)]
pub struct PageContext {
    path: String,
    cookies: Arc<RequestCookies>,
}

impl PageContext {
    #[must_use]
    pub fn new(path: impl Into<String>, cookies: RequestCookies) -> Self {
        Self {
            path: path.into(),
            cookies: Arc::new(cookies),
        }
    }

    #[must_use]
    pub fn from_headers(path: impl Into<String>, headers: &HeaderMap) -> Self {
        Self::new(path, RequestCookies::from_headers(headers))
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn cookies(&self) -> &Arc<RequestCookies> {
        &self.cookies
    }

    /// Server-context client bound to this request's cookies, so a refresh
    /// rewrites the cookies sent back with the response.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn api_client(&self, config: &ApiConfig) -> Result<ApiClient, ApiError> {
        let store: Arc<dyn SessionStore> = self.cookies.clone();
        ApiClient::new(config.clone(), ExecutionContext::Server, store)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Redirect {
    pub destination: String,
    pub permanent: bool,
}

impl Redirect {
    #[must_use]
    pub fn temporary(destination: &str) -> Self {
        Self {
            destination: destination.to_string(),
            permanent: false,
        }
    }
}

impl IntoResponse for Redirect {
    fn into_response(self) -> Response {
        if self.permanent {
            HttpRedirect::permanent(&self.destination).into_response()
        } else {
            HttpRedirect::temporary(&self.destination).into_response()
        }
    }
}

/// What a guarded page produces: its props, or a redirect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PageResult<T> {
    Props(T),
    Redirect(Redirect),
}

impl<T> PageResult<T> {
    #[must_use]
    pub fn is_redirect(&self) -> bool {
        matches!(self, Self::Redirect(_))
    }
}

impl<T: IntoResponse> PageResult<T> {
    /// Renders the result and attaches the cookie changes made during the
    /// request.
    pub fn into_response_with(self, ctx: &PageContext) -> Response {
        let mut response = match self {
            Self::Props(props) => props.into_response(),
            Self::Redirect(redirect) => redirect.into_response(),
        };
        ctx.cookies().write_set_cookie(response.headers_mut());
        response
    }
}
