//! Diagnostic endpoints for exercising authentication sources from
//! integration-test harnesses.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod render;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{connect_info::ConnectInfo, MatchedPath};
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::middleware::{from_fn, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use common_auth::AuthSourceFactory;
use common_obs::{
    encode_prometheus_metrics, health_router, http_requests_total, PROMETHEUS_CONTENT_TYPE,
};
use tracing::{info_span, Instrument};
use uuid::Uuid;

pub const SERVICE_NAME: &str = "autotest";
const REQUEST_ID_HEADER: &str = "x-request-id";
/// Route label for requests no route matched, so unknown paths share one series.
pub const UNMATCHED_ROUTE: &str = "unmatched";

#[derive(Clone)]
pub struct AppState {
    /// Builds a fresh authentication source for every request.
    pub sources: Arc<dyn AuthSourceFactory>,
}

impl AppState {
    pub fn new(sources: Arc<dyn AuthSourceFactory>) -> Self {
        Self { sources }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/login", get(diagnostics::login))
        .route("/logout", get(diagnostics::logout))
        .route("/attributes", get(diagnostics::attributes))
        .route("/metrics", get(metrics))
        .with_state(state)
        .merge(health_router(SERVICE_NAME))
        .layer(from_fn(track_http_metrics))
        .layer(from_fn(request_context))
}

async fn request_context(mut req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let remote_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let request_id = match req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        Some(value) => value.to_string(),
        None => {
            let id = Uuid::new_v4().to_string();
            if let Ok(value) = HeaderValue::from_str(&id) {
                req.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            id
        }
    };

    let span = info_span!(
        "http.request",
        method = %method,
        path = %path,
        remote_addr = remote_addr.as_str(),
        request_id = %request_id
    );

    let start = Instant::now();
    span.in_scope(|| tracing::info!(event = "request_start", method = %method, path = %path));
    let mut response = next.run(req).instrument(span.clone()).await;

    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    span.in_scope(|| {
        tracing::info!(
            event = "request_end",
            method = %method,
            path = %path,
            status = response.status().as_u16(),
            latency_ms
        )
    });

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

async fn track_http_metrics(req: Request<Body>, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_string());

    let response = next.run(req).await;
    let status = response.status().as_u16().to_string();
    http_requests_total().inc(&[SERVICE_NAME, route.as_str(), status.as_str()], 1);

    response
}

async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static(PROMETHEUS_CONTENT_TYPE),
        )],
        encode_prometheus_metrics(),
    )
}
