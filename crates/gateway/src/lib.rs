//! HTTP API gateway for Campusd.
//!
//! Exposes the chat surface (JSON, SSE streaming, WebSocket), student CRUD,
//! analytics, and health checks.
//!
//! Built on Axum for high performance async HTTP.
//!
//! Security layers applied:
//! - Bearer token authentication on all /v1 routes (static tokens from
//!   config; an empty token list runs open for local development)
//! - CORS with restrictive origin policy unless configured otherwise
//! - Request body size limit (1 MB)
//! - HTTP trace logging

pub mod api;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    middleware::{self, Next},
    response::Json,
    routing::get,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use campusd_agent::DispatchLoop;
use campusd_core::store::{CampusStore, ConversationStore};
use campusd_guard::DenylistFilter;

/// Shared application state for the gateway.
pub struct ApiState {
    pub dispatch: Arc<DispatchLoop>,
    pub campus: Arc<dyn CampusStore>,
    pub sessions: Arc<dyn ConversationStore>,
    pub bearer_tokens: Vec<String>,
}

pub type SharedState = Arc<ApiState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState, allowed_origins: &[String]) -> Router {
    let v1 = api::v1_router(state.clone())
        .layer(middleware::from_fn_with_state(state, auth_middleware));

    // CORS: same-origin by default; explicit origins (or "*") can be configured.
    let cors = if allowed_origins.iter().any(|o| o == "*") {
        CorsLayer::permissive()
    } else {
        let origins: Vec<axum::http::HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::PUT,
                axum::http::Method::DELETE,
            ])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::header::AUTHORIZATION,
            ])
            .max_age(std::time::Duration::from_secs(3600))
    };

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", v1)
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1 MB body limit
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
pub async fn start(config: campusd_config::AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let host = config.gateway.host.clone();
    let port = config.gateway.port;
    let addr = format!("{host}:{port}");

    // === Build shared subsystems ===
    let reasoner = Arc::new(campusd_reasoner::build_from_config(&config)?);

    let (campus, sessions): (Arc<dyn CampusStore>, Arc<dyn ConversationStore>) =
        match config.store.backend.as_str() {
            "memory" => {
                let store = Arc::new(campusd_store::InMemoryStore::new());
                (store.clone(), store)
            }
            _ => {
                let store = Arc::new(campusd_store::SqliteStore::new(&config.store.path).await?);
                (store.clone(), store)
            }
        };

    let tools = Arc::new(campusd_tools::default_registry(campus.clone()));

    let guardrail = if config.guardrail.denylist.is_empty() {
        Arc::new(DenylistFilter::default())
    } else {
        Arc::new(DenylistFilter::new(config.guardrail.denylist.clone()))
    };

    let dispatch = Arc::new(
        DispatchLoop::new(reasoner, tools, sessions.clone(), guardrail)
            .with_system_prompt(&config.agent.system_prompt)
            .with_temperature(config.reasoner.temperature)
            .with_max_tokens(config.reasoner.max_tokens)
            .with_call_timeout(std::time::Duration::from_secs(config.reasoner.timeout_secs))
            .with_history_capacity(config.agent.history_cache_capacity),
    );

    if config.gateway.bearer_tokens.is_empty() {
        warn!("No bearer tokens configured — /v1 API is open (dev mode)");
    }

    let state = Arc::new(ApiState {
        dispatch,
        campus,
        sessions,
        bearer_tokens: config.gateway.bearer_tokens.clone(),
    });

    let app = build_router(state, &config.gateway.allowed_origins);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Bearer-token auth on /v1 routes. An empty token list runs open so local
/// development works without pairing.
async fn auth_middleware(
    State(state): State<SharedState>,
    req: axum::extract::Request,
    next: Next,
) -> Result<axum::response::Response, StatusCode> {
    if state.bearer_tokens.is_empty() {
        return Ok(next.run(req).await);
    }

    let auth_header = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match auth_header {
        Some(token) if state.bearer_tokens.iter().any(|t| t == token) => {
            Ok(next.run(req).await)
        }
        _ => {
            warn!("Unauthorized request to /v1 API — missing or invalid bearer token");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
