//! Login response enrichment
//!
//! The user service answers a successful login with `{id, name, email}` and
//! knows nothing about tokens. For the configured login route this layer
//! captures that answer, mints a token for the user and returns
//! `{id, name, email, token}` instead. Non-200 answers are replayed
//! untouched.

use crate::auth::AuthContext;
use crate::config::DEFAULT_MAX_BODY_BYTES;
use crate::error::GatewayError;
use crate::middleware::auth::X_USER_ID;
use crate::middleware::capture::{buffer_request, CapturedResponse};
use crate::server::GatewayState;
use axum::extract::{Request, State};
use axum::http::header::HeaderValue;
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// The route whose responses are enriched
#[derive(Debug, Clone, PartialEq)]
pub struct LoginRoute {
    pub method: Method,
    pub path: String,
    /// Cap on the buffered request and captured response
    pub max_body_bytes: usize,
}

impl LoginRoute {
    pub fn new(method: &str, path: &str) -> anyhow::Result<Self> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| anyhow::anyhow!("invalid login method '{}'", method))?;
        Ok(Self {
            method,
            path: path.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        })
    }

    pub fn with_body_limit(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn matches(&self, method: &Method, path: &str) -> bool {
        self.method == *method && self.path == path
    }
}

/// Successful login answer from the user service
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// Login answer returned to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedLoginResponse {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub token: String,
}

pub async fn enrich_login(
    State(state): State<GatewayState>,
    request: Request,
    next: Next,
) -> Response {
    let limit = match &state.login {
        Some(login) if login.matches(request.method(), request.uri().path()) => {
            login.max_body_bytes
        }
        _ => return next.run(request).await,
    };

    match rewrite(&state, request, next, limit).await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "Login enrichment failed");
            e.into_response()
        }
    }
}

async fn rewrite(
    state: &GatewayState,
    request: Request,
    next: Next,
    limit: usize,
) -> Result<Response, GatewayError> {
    let (request, body) = buffer_request(request, limit).await?;
    debug!(body_len = body.len(), "Buffered login request");

    let captured = CapturedResponse::capture(next.run(request).await, limit).await?;
    if captured.status != StatusCode::OK {
        return Ok(captured.into_response());
    }

    let user: LoginResponse = serde_json::from_slice(&captured.body)
        .map_err(|e| GatewayError::UpstreamResponseMalformed(e.to_string()))?;

    let token = state
        .credentials
        .issue(user.id, &user.name)
        .map_err(|e| GatewayError::CredentialIssuance(e.to_string()))?;
    state.metrics.record_token_issued();
    info!(user_id = user.id, username = %user.name, "Issued login token");

    let context = AuthContext {
        user_id: user.id,
        username: user.name.clone(),
    };
    let enriched = EnrichedLoginResponse {
        id: user.id,
        name: user.name,
        email: user.email,
        token,
    };

    let mut response = (StatusCode::OK, Json(enriched)).into_response();
    response
        .headers_mut()
        .insert(X_USER_ID, HeaderValue::from(context.user_id));
    response.extensions_mut().insert(context);
    Ok(response)
}
