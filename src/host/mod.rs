//! Demo host rendering guarded pages on top of a backend API.
//!
//! Every page builds a server-context [`ApiClient`](crate::api::ApiClient) from
//! the request cookies, so a token refresh during rendering is sent back to the
//! visitor as `Set-Cookie` headers on the same response.

pub mod handlers;

use crate::api::ApiConfig;
use anyhow::Result;
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderName, HeaderValue, Request},
    routing::get,
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    propagate_header::PropagateHeaderLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{debug_span, info, Span};
use ulid::Ulid;

const REQUEST_ID: &str = "x-request-id";

/// Router with all pages; `config` points at the backend API.
pub fn router(config: ApiConfig) -> Router {
    Router::new()
        .route("/", get(handlers::pages::home))
        .route("/dashboard", get(handlers::pages::dashboard))
        .route("/metrics", get(handlers::pages::metrics))
        .route("/error", get(handlers::pages::error))
        .route("/health", get(handlers::health::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static(REQUEST_ID),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateHeaderLayer::new(HeaderName::from_static(REQUEST_ID)))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(Arc::new(config))),
        )
}

/// Serve the pages until ctrl-c.
/// # Errors
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn new(port: u16, config: ApiConfig) -> Result<()> {
    info!("Backend API: {}", config.base_url);

    let app = router(config);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

// Headers stay out of the span, they carry the session cookies.
fn make_span(request: &Request<Body>) -> Span {
    let path = request.uri().path();
    let request_id = request
        .headers()
        .get(REQUEST_ID)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", path, request_id)
}
