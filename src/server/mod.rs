//! Gateway assembly
//!
//! Builds the shared, read-only state from configuration and composes the
//! request pipeline:
//!
//! ```text
//! access log -> panic recovery -> [health | metrics | authentication -> login rewrite -> dispatch]
//! ```

use crate::auth::{Credentials, JwtCredentials};
use crate::config::GatewayConfig;
use crate::error::{error_response, GatewayError};
use crate::health::HealthChecker;
use crate::metrics::GatewayMetrics;
use crate::middleware::{self, client_addr, ExcludedPaths, LoginRoute};
use crate::proxy::ProxyRegistry;
use crate::router::RouteTable;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::any::Any;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{debug, error};

/// State shared by every request; never mutated after startup
#[derive(Clone)]
pub struct GatewayState {
    pub routes: Arc<RouteTable>,
    pub proxies: Arc<ProxyRegistry>,
    pub credentials: Arc<dyn Credentials>,
    pub excluded: Arc<ExcludedPaths>,
    pub login: Option<Arc<LoginRoute>>,
    pub metrics: Arc<GatewayMetrics>,
    pub health: Arc<HealthChecker>,
}

impl GatewayState {
    /// Build the route table, proxy registry and credentials from configuration
    pub fn from_config(config: &GatewayConfig) -> anyhow::Result<Self> {
        let routes = RouteTable::new(&config.upstreams)?;
        let proxies = ProxyRegistry::from_config(&config.upstreams);
        let login = if config.login.enabled {
            let route = LoginRoute::new(&config.login.method, &config.login.path)?
                .with_body_limit(config.login.max_body_bytes);
            Some(Arc::new(route))
        } else {
            None
        };
        let health = HealthChecker::new(config.upstreams.len(), proxies.len());
        let credentials = JwtCredentials::from_config(&config.jwt)?;

        Ok(Self {
            routes: Arc::new(routes),
            proxies: Arc::new(proxies),
            credentials: Arc::new(credentials),
            excluded: Arc::new(ExcludedPaths::new(&config.jwt.exclude_paths)),
            login,
            metrics: Arc::new(GatewayMetrics::new()),
            health: Arc::new(health),
        })
    }

    /// Replace the credential provider
    pub fn with_credentials(mut self, credentials: Arc<dyn Credentials>) -> Self {
        self.credentials = credentials;
        self
    }
}

/// Compose the full gateway router
pub fn build_router(config: &GatewayConfig, state: GatewayState) -> Router {
    let gateway = Router::new()
        .fallback(dispatch)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::enrich_login,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::authenticate,
        ))
        .with_state(state.clone());

    let mut app = Router::new();
    if config.health.enabled {
        app = app.route(&config.health.path, get(health_handler));
    }
    if config.metrics.enabled {
        app = app.route(&config.metrics.path, get(metrics_handler));
    }

    app.fallback_service(gateway)
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    middleware::access_log,
                ))
                .layer(CatchPanicLayer::custom(panic_response)),
        )
        .with_state(state)
}

/// Route the request to its upstream and forward it
pub async fn dispatch(
    State(state): State<GatewayState>,
    request: Request,
) -> Result<Response, GatewayError> {
    let upstream = state
        .routes
        .find(request.method(), request.uri().path())
        .ok_or_else(|| {
            debug!(method = %request.method(), path = %request.uri().path(), "No matching route");
            GatewayError::RouteNotFound
        })?;

    let proxy = state.proxies.get(upstream).ok_or_else(|| {
        error!(upstream = %upstream, "Route matched an upstream without a proxy");
        GatewayError::UpstreamUnavailable(upstream.to_string())
    })?;

    let client = client_addr(&request);
    let start = Instant::now();
    let result = proxy.forward(request, client).await;

    let status = match &result {
        Ok(response) => response.status(),
        Err(e) => e.status_code(),
    };
    state
        .metrics
        .record_upstream(upstream, status.as_u16(), start.elapsed());

    result
}

/// Health check handler
async fn health_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    // degraded still answers 200: the gateway is serving, only some routes are dead
    (StatusCode::OK, Json(state.health.liveness()))
}

/// Metrics handler
async fn metrics_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    (StatusCode::OK, state.metrics.prometheus_output())
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic"
    };
    error!(panic = %detail, "Request handler panicked");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
}
