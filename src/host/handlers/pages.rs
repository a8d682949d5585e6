//! Pages of the demo host. Each handler wraps its loader in a guard and turns
//! the result into a response carrying the request's cookie changes.

use crate::api::ApiConfig;
use crate::auth::Requirements;
use crate::guard::{GuestGuard, PageContext, RouteGuard};
use anyhow::{Context, Result};
use axum::{
    extract::Extension,
    http::HeaderMap,
    response::{Html, IntoResponse, Json, Response},
};
use serde_json::Value;
use std::sync::Arc;

/// Sign-in page, only for visitors without a session.
pub async fn home(headers: HeaderMap) -> Response {
    let ctx = PageContext::from_headers("/", &headers);

    GuestGuard::new()
        .run(ctx.clone(), |_| async {
            Ok(Html("<h1>Sign in</h1><p>Sign in to continue.</p>"))
        })
        .await
        .into_response_with(&ctx)
}

pub async fn dashboard(
    headers: HeaderMap,
    Extension(config): Extension<Arc<ApiConfig>>,
) -> Response {
    let ctx = PageContext::from_headers("/dashboard", &headers);

    RouteGuard::new()
        .run(ctx.clone(), |ctx| load_me(ctx, config))
        .await
        .into_response_with(&ctx)
}

/// Requires `metrics.list` and the `administrator` role.
pub async fn metrics(
    headers: HeaderMap,
    Extension(config): Extension<Arc<ApiConfig>>,
) -> Response {
    let ctx = PageContext::from_headers("/metrics", &headers);

    RouteGuard::new()
        .with_requirements(
            Requirements::new()
                .permissions(["metrics.list"])
                .roles(["administrator"]),
        )
        .run(ctx.clone(), |ctx| load_me(ctx, config))
        .await
        .into_response_with(&ctx)
}

pub async fn error() -> impl IntoResponse {
    Html("<h1>Something went wrong</h1><p>Please try again later.</p>")
}

async fn load_me(ctx: PageContext, config: Arc<ApiConfig>) -> Result<Json<Value>> {
    let client = ctx.api_client(&config)?;
    let me: Value = client.get_json("/me").await.context("Failed to load /me")?;
    Ok(Json(me))
}
