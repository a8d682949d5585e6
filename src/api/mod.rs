//! HTTP client for the backend API with transparent token refresh.
//!
//! The client sends the session's access token on every request. A `401` whose
//! body carries the `token.expired` code is not returned to the caller: the
//! request waits for a refresh (see [`refresh`]) and is replayed with the new
//! token. Other `401`s end the session. What a failed refresh means depends on
//! where the client runs, see [`ExecutionContext`].
//!
//! The client does not log token material; only the outcome of refreshes and
//! sign-outs is traced.

mod errors;
mod refresh;
mod request;

pub use self::errors::{ApiError, RefreshError, TOKEN_EXPIRED_CODE};
pub use self::request::RequestDescriptor;

use self::errors::{map_request_error, ErrorBody};
use self::refresh::{RefreshCoordinator, RefreshOutcome, SettleOnDrop};
use self::request::bearer_header;
use crate::session::{self, DestroySession, Session, SessionStore, SignOut};
use crate::APP_USER_AGENT;
use reqwest::{header::AUTHORIZATION, Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

/// Default request timeout applied to every call, refreshes included.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the client runs, which decides how a failed refresh is reported.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExecutionContext {
    /// Rendering a page for one request; nobody is around to sign in again, so a
    /// failed refresh signs out right away.
    Server,
    /// Long-lived client; a failed refresh is reported as
    /// [`ApiError::AuthToken`] and the caller decides what to do.
    Browser,
}

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub base_url: Url,
    pub refresh_path: String,
    pub timeout: Duration,
}

impl ApiConfig {
    /// # Errors
    /// Returns an error if `base_url` is not an absolute URL.
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url.trim())
            .map_err(|err| ApiError::Config(format!("Invalid API base URL {base_url}: {err}")))?;

        if base_url.cannot_be_a_base() {
            return Err(ApiError::Config(format!(
                "API base URL cannot be a base: {base_url}"
            )));
        }

        Ok(Self {
            base_url,
            refresh_path: "/refresh".to_string(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Joins `path` onto the base URL, keeping any base path prefix.
    ///
    /// # Errors
    /// Returns an error if the result is not a valid URL.
    pub fn url(&self, path: &str) -> Result<Url, ApiError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim().trim_start_matches('/');
        let joined = if path.is_empty() {
            base.to_string()
        } else {
            format!("{base}/{path}")
        };

        Url::parse(&joined).map_err(|err| ApiError::Config(format!("Invalid URL {joined}: {err}")))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    token: String,
    refresh_token: String,
}

struct Inner {
    http: Client,
    config: ApiConfig,
    context: ExecutionContext,
    store: Arc<dyn SessionStore>,
    sign_out: Arc<dyn SignOut>,
    authorization: Mutex<Option<SecretString>>,
    refresh: RefreshCoordinator,
}

/// Backend client; cheap to clone, clones share session and refresh state.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.config.base_url.as_str())
            .field("context", &self.inner.context)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Builds a client whose default `Authorization` header comes from the
    /// access token currently in `store`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        config: ApiConfig,
        context: ExecutionContext,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self, ApiError> {
        let http = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(|err| ApiError::Config(format!("Failed to build HTTP client: {err}")))?;

        let authorization = session::access_token(store.as_ref());

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                config,
                context,
                store,
                sign_out: Arc::new(DestroySession),
                authorization: Mutex::new(authorization),
                refresh: RefreshCoordinator::default(),
            }),
        })
    }

    /// Replaces the sign-out hook. Must be called before the client is cloned.
    ///
    /// # Errors
    /// Returns an error if the client has already been shared.
    pub fn with_sign_out(mut self, sign_out: Arc<dyn SignOut>) -> Result<Self, ApiError> {
        let inner = Arc::get_mut(&mut self.inner).ok_or_else(|| {
            ApiError::Config("Sign-out hook must be set before sharing the client".to_string())
        })?;
        inner.sign_out = sign_out;
        Ok(self)
    }

    #[must_use]
    pub fn context(&self) -> ExecutionContext {
        self.inner.context
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.inner.store
    }

    /// Current default `Authorization` header value, if a token is known.
    #[must_use]
    pub fn authorization(&self) -> Option<String> {
        self.inner
            .authorization
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|token| format!("Bearer {}", token.expose_secret()))
    }

    /// Sends `request`, refreshing the session once if the access token expired.
    ///
    /// # Errors
    /// Returns the backend error for non-auth failures, [`ApiError::AuthToken`]
    /// or [`ApiError::SignedOut`] when the session could not be refreshed.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn send(&self, request: RequestDescriptor) -> Result<Response, ApiError> {
        let request = self.authorize(request)?;

        match self.dispatch(&request).await {
            Ok(response) => Ok(response),
            Err(err) => self.intercept(err, request).await,
        }
    }

    /// `GET path` and decode the JSON response.
    ///
    /// # Errors
    /// See [`ApiClient::send`]; also fails if the body is not the expected JSON.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send(RequestDescriptor::get(path)).await?;
        decode_json(response).await
    }

    /// `POST path` with a JSON body and decode the JSON response.
    ///
    /// # Errors
    /// See [`ApiClient::send`]; also fails if the body is not the expected JSON.
    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = self.send(RequestDescriptor::post(path).json(body)?).await?;
        decode_json(response).await
    }

    /// Ends the session through the sign-out hook and forgets the default token.
    pub fn sign_out(&self) {
        self.inner.sign_out.sign_out(self.inner.store.as_ref());
        *self
            .inner
            .authorization
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        info!("Signed out");
    }

    /// Applies the default token unless the request brings its own.
    fn authorize(&self, request: RequestDescriptor) -> Result<RequestDescriptor, ApiError> {
        if request.has_authorization() {
            return Ok(request);
        }

        let token = self
            .inner
            .authorization
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match token {
            Some(token) => request.with_bearer(&token),
            None => Ok(request),
        }
    }

    /// Sends a request as is; non-2xx responses become [`ApiError::Http`].
    async fn dispatch(&self, request: &RequestDescriptor) -> Result<Response, ApiError> {
        let url = self.inner.config.url(&request.path)?;

        let mut builder = self
            .inner
            .http
            .request(request.method.clone(), url)
            .headers(request.headers.clone());

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| map_request_error(&e))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let (code, message) = ErrorBody::parse(&body);

        debug!(status, code = code.as_deref().unwrap_or(""), "Request failed");

        Err(ApiError::Http {
            status,
            code,
            message,
        })
    }

    /// Response-error interceptor.
    async fn intercept(
        &self,
        err: ApiError,
        request: RequestDescriptor,
    ) -> Result<Response, ApiError> {
        if err.status() != Some(401) {
            return Err(err);
        }

        if !err.is_token_expired() {
            warn!("Backend rejected the session, signing out");
            self.sign_out();
            return Err(err);
        }

        let ticket = self.inner.refresh.join();

        if ticket.leader {
            let refresh_token = session::refresh_token(self.inner.store.as_ref());
            let client = self.clone();
            // Runs on its own so queued requests are not tied to this caller.
            tokio::spawn(async move { client.run_refresh(refresh_token).await });
        } else {
            debug!("Refresh already in flight, queued");
        }

        match ticket.receiver.await {
            Ok(Ok(token)) => {
                let replay = request.with_bearer(&token)?;
                match self.dispatch(&replay).await {
                    Ok(response) => Ok(response),
                    Err(err) => Err(self.replay_failure(err)),
                }
            }
            Ok(Err(refresh_err)) => Err(self.refresh_failure(refresh_err)),
            Err(_) => Err(self.refresh_failure(RefreshError::Abandoned)),
        }
    }

    /// Auth failures of a replayed request end the session; one refresh per
    /// burst, so an expired token here is not refreshed again.
    fn replay_failure(&self, err: ApiError) -> ApiError {
        if err.status() != Some(401) {
            return err;
        }

        if err.is_token_expired() {
            warn!("Refreshed token rejected as expired");
            if self.inner.context == ExecutionContext::Server {
                self.sign_out();
            }
            return self.refresh_failure(RefreshError::TokenRejected);
        }

        warn!("Backend rejected the refreshed session, signing out");
        self.sign_out();
        err
    }

    fn refresh_failure(&self, err: RefreshError) -> ApiError {
        // The refresh task never reported, so nobody cleared the session.
        if err == RefreshError::Abandoned && self.inner.context == ExecutionContext::Server {
            self.sign_out();
        }

        match self.inner.context {
            ExecutionContext::Server => ApiError::SignedOut(err),
            ExecutionContext::Browser => ApiError::AuthToken(err),
        }
    }

    /// Performs the refresh and settles every queued request.
    #[instrument(skip_all)]
    async fn run_refresh(&self, refresh_token: Option<SecretString>) {
        let guard = SettleOnDrop::new(&self.inner.refresh);

        let outcome: RefreshOutcome = match self.request_refresh(refresh_token).await {
            Ok(session) => match bearer_header(&session.access_token) {
                Ok(_) => {
                    session.save(self.inner.store.as_ref());
                    *self
                        .inner
                        .authorization
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner) =
                        Some(session.access_token.clone());
                    Ok(session.access_token)
                }
                Err(_) => Err(RefreshError::InvalidResponse(
                    "access token is not a valid header value".to_string(),
                )),
            },
            Err(err) => Err(err),
        };

        match &outcome {
            Ok(_) => info!("Session refreshed"),
            Err(err) => {
                error!("Failed to refresh session: {}", err);
                if self.inner.context == ExecutionContext::Server {
                    // Waiters must observe the cleared session.
                    self.sign_out();
                }
            }
        }

        let notified = guard.settle(&outcome);
        debug!(notified, "Refresh settled");
    }

    /// `POST /refresh`, outside the interceptor.
    async fn request_refresh(
        &self,
        refresh_token: Option<SecretString>,
    ) -> Result<Session, RefreshError> {
        let refresh_token = refresh_token.ok_or(RefreshError::MissingRefreshToken)?;

        let url = self
            .inner
            .config
            .url(&self.inner.config.refresh_path)
            .map_err(|err| RefreshError::Network(err.to_string()))?;

        let mut builder = self.inner.http.post(url).json(&RefreshRequest {
            refresh_token: refresh_token.expose_secret(),
        });

        if let Ok(header) = self.current_bearer() {
            builder = builder.header(AUTHORIZATION, header);
        }

        let response = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                RefreshError::Timeout
            } else {
                RefreshError::Network(err.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            let (_, message) = ErrorBody::parse(&body);
            return Err(RefreshError::Rejected { status, message });
        }

        let tokens: RefreshResponse = response
            .json()
            .await
            .map_err(|err| RefreshError::InvalidResponse(err.to_string()))?;

        Ok(Session::new(tokens.token, tokens.refresh_token))
    }

    fn current_bearer(&self) -> Result<reqwest::header::HeaderValue, ApiError> {
        let token = self
            .inner
            .authorization
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| ApiError::Config("no access token".to_string()))?;
        bearer_header(&token)
    }
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    response
        .json::<T>()
        .await
        .map_err(|err| ApiError::Parse(format!("Failed to decode response: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{CookieJar, ACCESS_TOKEN_COOKIE};

    #[test]
    fn config_joins_paths() {
        let config = ApiConfig::new("http://localhost:3333").unwrap();
        assert_eq!(
            config.url("/me").unwrap().as_str(),
            "http://localhost:3333/me"
        );

        let nested = ApiConfig::new("https://api.tollgate.dev/v1/").unwrap();
        assert_eq!(
            nested.url("refresh").unwrap().as_str(),
            "https://api.tollgate.dev/v1/refresh"
        );
        assert_eq!(nested.timeout, DEFAULT_TIMEOUT);
        assert_eq!(nested.refresh_path, "/refresh");
    }

    #[test]
    fn config_rejects_relative_url() {
        assert!(matches!(
            ApiConfig::new("localhost"),
            Err(ApiError::Config(_))
        ));
        assert!(matches!(
            ApiConfig::new("mailto:team@tollgate.dev"),
            Err(ApiError::Config(_))
        ));
    }

    #[test]
    fn default_header_comes_from_store() {
        let jar = Arc::new(CookieJar::default());
        Session::new("a1", "r1").save(jar.as_ref());

        let client = ApiClient::new(
            ApiConfig::new("http://localhost:3333").unwrap(),
            ExecutionContext::Browser,
            jar,
        )
        .unwrap();

        assert_eq!(client.authorization().as_deref(), Some("Bearer a1"));
    }

    #[test]
    fn no_session_means_no_header() {
        let client = ApiClient::new(
            ApiConfig::new("http://localhost:3333").unwrap(),
            ExecutionContext::Server,
            Arc::new(CookieJar::default()),
        )
        .unwrap();

        assert!(client.authorization().is_none());
        let request = client.authorize(RequestDescriptor::get("/me")).unwrap();
        assert!(!request.has_authorization());
    }

    #[test]
    fn explicit_authorization_wins() {
        let jar = Arc::new(CookieJar::default());
        Session::new("a1", "r1").save(jar.as_ref());
        let client = ApiClient::new(
            ApiConfig::new("http://localhost:3333").unwrap(),
            ExecutionContext::Browser,
            jar,
        )
        .unwrap();

        let request = RequestDescriptor::get("/me")
            .header("Authorization", "Bearer other")
            .unwrap();
        let request = client.authorize(request).unwrap();
        assert_eq!(request.headers.get(AUTHORIZATION).unwrap(), "Bearer other");
    }

    #[test]
    fn sign_out_clears_store_and_header() {
        let jar = Arc::new(CookieJar::default());
        Session::new("a1", "r1").save(jar.as_ref());
        let client = ApiClient::new(
            ApiConfig::new("http://localhost:3333").unwrap(),
            ExecutionContext::Browser,
            jar.clone(),
        )
        .unwrap();

        client.sign_out();

        assert!(client.authorization().is_none());
        assert!(jar.get(ACCESS_TOKEN_COOKIE).is_none());
    }

    #[test]
    fn abandoned_refresh_clears_server_session() {
        let jar = Arc::new(CookieJar::default());
        Session::new("a1", "r1").save(jar.as_ref());
        let client = ApiClient::new(
            ApiConfig::new("http://localhost:3333").unwrap(),
            ExecutionContext::Server,
            jar.clone(),
        )
        .unwrap();

        let err = client.refresh_failure(RefreshError::Abandoned);

        assert!(matches!(err, ApiError::SignedOut(RefreshError::Abandoned)));
        assert!(client.authorization().is_none());
        assert!(jar.get(ACCESS_TOKEN_COOKIE).is_none());
    }

    #[test]
    fn abandoned_refresh_keeps_browser_session() {
        let jar = Arc::new(CookieJar::default());
        Session::new("a1", "r1").save(jar.as_ref());
        let client = ApiClient::new(
            ApiConfig::new("http://localhost:3333").unwrap(),
            ExecutionContext::Browser,
            jar.clone(),
        )
        .unwrap();

        let err = client.refresh_failure(RefreshError::Abandoned);

        assert!(matches!(err, ApiError::AuthToken(RefreshError::Abandoned)));
        assert_eq!(jar.get(ACCESS_TOKEN_COOKIE).as_deref(), Some("a1"));
    }

    #[test]
    fn sign_out_hook_only_before_sharing() {
        let client = ApiClient::new(
            ApiConfig::new("http://localhost:3333").unwrap(),
            ExecutionContext::Browser,
            Arc::new(CookieJar::default()),
        )
        .unwrap();
        let _shared = client.clone();

        assert!(client.with_sign_out(Arc::new(DestroySession)).is_err());
    }
}
