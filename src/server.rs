use std::{sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{
            ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
            ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONTENT_TYPE, RETRY_AFTER,
        },
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use crate::{
    config::Settings,
    rate_limit::{RateLimitDecision, RateLimiter, spawn_sweeper},
    upstream::{UpstreamClient, UpstreamError},
    validator::validate_json_url,
};

pub const PROXY_PATH: &str = "/alldl-proxy";

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const CORS_ALLOW_HEADERS: &str = "authorization, x-client-info, apikey, content-type";
const CORS_ALLOW_METHODS: &str = "POST, OPTIONS";
const UNKNOWN_CLIENT: &str = "unknown";
const RATE_LIMIT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct AppState {
    pub rate_limiter: Arc<RateLimiter>,
    pub upstream: UpstreamClient,
}

impl AppState {
    pub fn new(rate_limiter: RateLimiter, upstream: UpstreamClient) -> Self {
        Self {
            rate_limiter: Arc::new(rate_limiter),
            upstream,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, UpstreamError> {
        let upstream = UpstreamClient::new(&settings.upstream_url, settings.upstream_timeout)?;
        let rate_limiter = RateLimiter::new(settings.rate_limit_window, settings.rate_limit_max);
        Ok(Self::new(rate_limiter, upstream))
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    upstream_status: Option<u16>,
    retry_after_seconds: Option<u64>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            upstream_status: None,
            retry_after_seconds: None,
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn method_not_allowed() -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    }

    fn too_many_requests(retry_after_seconds: u64) -> Self {
        Self {
            retry_after_seconds: Some(retry_after_seconds),
            ..Self::new(StatusCode::TOO_MANY_REQUESTS, "Too many requests")
        }
    }

    /// Relays upstream 4xx/5xx codes. Anything else (e.g. a bodiless 304)
    /// becomes 502; the body still names the upstream code.
    fn upstream_status(code: u16) -> Self {
        let status = StatusCode::from_u16(code)
            .ok()
            .filter(|status| status.is_client_error() || status.is_server_error())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        Self {
            upstream_status: Some(code),
            ..Self::new(status, "Upstream API error")
        }
    }
}

impl From<UpstreamError> for ApiError {
    fn from(error: UpstreamError) -> Self {
        match error {
            UpstreamError::Timeout => Self::new(StatusCode::GATEWAY_TIMEOUT, "Upstream timeout"),
            UpstreamError::Status(code) => Self::upstream_status(code),
            UpstreamError::Unreachable(_)
            | UpstreamError::InvalidBase(_)
            | UpstreamError::Client(_) => {
                Self::new(StatusCode::BAD_GATEWAY, "Failed to reach upstream")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            status: self.upstream_status,
        };
        let mut response = json_response(self.status, &body);

        if let Some(seconds) = self.retry_after_seconds
            && let Ok(value) = HeaderValue::from_str(&seconds.to_string())
        {
            response.headers_mut().insert(RETRY_AFTER, value);
        }

        response
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    let payload = match serde_json::to_vec(body) {
        Ok(payload) => payload,
        Err(error) => {
            warn!("Could not serialize response body: {error}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))],
                r#"{"error":"Internal error"}"#,
            )
                .into_response();
        }
    };

    (
        status,
        [(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))],
        payload,
    )
        .into_response()
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route(
            PROXY_PATH,
            post(resolve_links)
                .options(preflight)
                .fallback(method_not_allowed),
        )
        .with_state(state)
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(CORS_ALLOW_HEADERS),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(CORS_ALLOW_METHODS),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(TraceLayer::new_for_http())
}

/// Binds `settings.bind_addr` and serves the proxy until the process exits.
pub async fn serve(settings: &Settings) -> anyhow::Result<()> {
    let state = AppState::from_settings(settings).context("Invalid upstream configuration")?;
    let sweeper = spawn_sweeper(Arc::clone(&state.rate_limiter), RATE_LIMIT_SWEEP_INTERVAL);
    let app = create_router(state);

    let listener = TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("Could not bind {}", settings.bind_addr))?;

    info!(
        "Proxy ready at http://{}{PROXY_PATH} (upstream {}, timeout {:?}, {} req / {:?})",
        settings.bind_addr,
        settings.upstream_url,
        settings.upstream_timeout,
        settings.rate_limit_max,
        settings.rate_limit_window
    );

    let result = axum::serve(listener, app).await;
    sweeper.abort();
    result.context("HTTP server error")
}

async fn health() -> Response {
    json_response(StatusCode::OK, &json!({ "status": "ok" }))
}

async fn preflight() -> &'static str {
    "ok"
}

async fn method_not_allowed() -> ApiError {
    ApiError::method_not_allowed()
}

async fn resolve_links(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let client_key = client_key(&headers);
    if let RateLimitDecision::Limited {
        retry_after_seconds,
    } = state.rate_limiter.check(&client_key).await
    {
        warn!("Too many requests from {client_key}, retry in {retry_after_seconds}s");
        return Err(ApiError::too_many_requests(retry_after_seconds));
    }

    let payload: Value = serde_json::from_slice(&body).map_err(|error| {
        debug!("Rejected request body from {client_key}: {error}");
        ApiError::bad_request("Invalid JSON body")
    })?;

    let target = validate_json_url(payload.get("url"))
        .map_err(|error| ApiError::bad_request(error.to_string()))?;

    info!("Resolving media links for {target}");
    let upstream = state.upstream.fetch(&target).await?;

    Ok(json_response(StatusCode::OK, &into_object(upstream)))
}

fn client_key(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|forwarded| forwarded.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn into_object(value: Value) -> Value {
    if value.is_object() {
        value
    } else {
        json!({ "data": value })
    }
}
