//! HTTP surface of the capability gateway.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/mcp/manifest` | Capabilities available to the bearer token |
//! | `POST` | `/mcp/invoke` | `{action, parameters}` capability call |
//! | `*`    | `/mcp/rpc` | MCP JSON-RPC (Streamable HTTP) |
//!
//! # Response Contract
//!
//! ```json
//! { "success": true, "data": { ... } }
//! { "success": false, "error": { "code": "forbidden", "message": "..." } }
//! ```
//!
//! Error codes: `unauthorized` (401), `forbidden` (403), `rate_limited` (429),
//! `invalid_input` (400), `not_found` (404), `internal` (500).

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use brandkb_core::error::{ErrorKind, KbError};

use crate::app::Services;
use crate::config::Config;
use crate::gateway::Gateway;
use crate::mcp::McpBridge;
use crate::rate_limit::client_ip;

#[derive(Clone)]
struct AppState {
    gateway: Arc<Gateway>,
}

/// Serve the gateway on `[server].bind` until the process ends.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = Services::open(config).await?;
    let app = router(Arc::clone(&services.gateway));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "gateway listening");
    eprintln!("Gateway listening on http://{}", config.server.bind);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// The full route table, without a listener. Used by `run_server` and tests.
pub fn router(gateway: Arc<Gateway>) -> Router {
    let bridge = McpBridge::new(Arc::clone(&gateway));
    let mcp_service = StreamableHttpService::new(
        move || Ok(bridge.clone()),
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig::default(),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/mcp/manifest", get(handle_manifest))
        .route("/mcp/invoke", post(handle_invoke))
        .nest_service("/mcp/rpc", mcp_service)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { gateway })
}

/// The secret from `Authorization: Bearer <secret>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("authorization")?.to_str().ok()?.trim();
    let (scheme, secret) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let secret = secret.trim();
    (!secret.is_empty()).then(|| secret.to_string())
}

// ============ Envelope ============

#[derive(Serialize)]
struct SuccessBody<T: Serialize> {
    success: bool,
    data: T,
}

fn ok<T: Serialize>(data: T) -> Json<SuccessBody<T>> {
    Json(SuccessBody {
        success: true,
        data,
    })
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

struct AppError(KbError);

impl From<KbError> for AppError {
    fn from(err: KbError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        if kind == ErrorKind::Internal {
            tracing::error!(error = %self.0, "gateway request failed");
        }
        let status =
            StatusCode::from_u16(kind.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            success: false,
            error: ErrorDetail {
                code: kind.code(),
                message: self.0.public_message(),
            },
        };
        (status, Json(body)).into_response()
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /mcp/manifest ============

async fn handle_manifest(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let secret = bearer_token(&headers).ok_or(KbError::InvalidToken)?;
    let manifest = state.gateway.manifest(&secret).await?;
    Ok(ok(manifest))
}

// ============ POST /mcp/invoke ============

#[derive(Deserialize)]
struct InvokeRequest {
    action: String,
    #[serde(default)]
    parameters: serde_json::Value,
}

async fn handle_invoke(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Result<Json<InvokeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let secret = bearer_token(&headers).ok_or(KbError::InvalidToken)?;
    let Json(request) = body.map_err(|e| KbError::invalid_input(e.body_text()))?;
    let ip = client_ip(&headers, Some(remote));

    let data = state
        .gateway
        .invoke(&secret, &ip, &request.action, request.parameters)
        .await?;
    Ok(ok(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer bkb_abc"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("bkb_abc"));

        headers.insert("authorization", HeaderValue::from_static("bearer   bkb_abc  "));
        assert_eq!(bearer_token(&headers).as_deref(), Some("bkb_abc"));

        headers.insert("authorization", HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(bearer_token(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_error_status_mapping() {
        let resp = AppError(KbError::RateLimited).into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        let resp = AppError(KbError::Forbidden("x".into())).into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let resp = AppError(KbError::Storage(anyhow::anyhow!("disk"))).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
