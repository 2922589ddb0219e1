use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderName, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::GatewayConfig;
use crate::presence::{PresenceRegistry, SharedRegistry};
use crate::security::{self, ConnectionLimits, FixedWindowRateLimiter};
use crate::signal;

const REGISTER_LIMITER_MAX_KEYS: usize = 50_000;

/// Everything a request handler may touch. Cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub registry: SharedRegistry,
    pub config: Arc<GatewayConfig>,
    pub limits: Arc<ConnectionLimits>,
    pub register_limiter: Arc<FixedWindowRateLimiter>,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> Self {
        let register_limiter = FixedWindowRateLimiter::new(
            config.register_rate_limit,
            config.register_rate_window,
            REGISTER_LIMITER_MAX_KEYS,
        );
        Self {
            registry: Arc::new(PresenceRegistry::new()),
            config: Arc::new(config),
            limits: Arc::new(ConnectionLimits::new()),
            register_limiter: Arc::new(register_limiter),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RuntimeMetrics {
    pub active_connections: usize,
    pub registered_identities: usize,
}

async fn runtime_metrics(state: &AppState) -> RuntimeMetrics {
    RuntimeMetrics {
        active_connections: state.registry.connection_count().await,
        registered_identities: state.registry.registered_count().await,
    }
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(runtime_metrics(&state).await))
}

async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = runtime_metrics(&state).await;

    let prometheus_text = format!(
        r#"# HELP duet_gateway_control_connections Open control connections
# TYPE duet_gateway_control_connections gauge
duet_gateway_control_connections {active_connections}
# HELP duet_gateway_registered_identities Identities in the roster
# TYPE duet_gateway_registered_identities gauge
duet_gateway_registered_identities {registered_identities}
"#,
        active_connections = metrics.active_connections,
        registered_identities = metrics.registered_identities,
    );

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        prometheus_text,
    )
}

fn build_cors_layer(config: &GatewayConfig) -> CorsLayer {
    let allow_origin = if config.cors_allow_any {
        AllowOrigin::any()
    } else {
        let origins = security::cors_origin_values(config);
        if origins.is_empty() {
            tracing::warn!(
                "no valid CORS origins configured; cross-origin browser access will be blocked"
            );
        }
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static("x-request-id")])
}

pub fn router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config);
    Router::new()
        .route("/", get(|| async { "Duet Gateway Online" }))
        .route("/health", get(health))
        .route("/metrics/runtime", get(health))
        .route("/metrics/prometheus", get(prometheus_metrics))
        .route("/ws", get(signal::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
