//! Access log middleware
//!
//! Outermost layer. Logs one structured event per request once the whole
//! inner stack has produced its response, and feeds the request metrics.
//! The response itself passes through untouched.

use crate::auth::AuthContext;
use crate::middleware::client_addr;
use crate::server::GatewayState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tracing::{info, warn};

pub async fn access_log(State(state): State<GatewayState>, request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let client = client_addr(&request)
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "-".to_string());

    let response = next.run(request).await;

    let elapsed = start.elapsed();
    let status = response.status();
    let user_id = response
        .extensions()
        .get::<AuthContext>()
        .map(|context| context.user_id);

    state
        .metrics
        .record_request(method.as_str(), status.as_u16(), elapsed);

    if status.is_server_error() {
        warn!(
            target: "access_log",
            method = %method,
            path = %path,
            status = status.as_u16(),
            elapsed_ms = elapsed.as_millis() as u64,
            client = %client,
            user_id = ?user_id,
            "[GATEWAY] {} {} {} {:?} {}",
            method, path, status.as_u16(), elapsed, client
        );
    } else {
        info!(
            target: "access_log",
            method = %method,
            path = %path,
            status = status.as_u16(),
            elapsed_ms = elapsed.as_millis() as u64,
            client = %client,
            user_id = ?user_id,
            "[GATEWAY] {} {} {} {:?} {}",
            method, path, status.as_u16(), elapsed, client
        );
    }

    response
}
