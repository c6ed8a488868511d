//! Per-request error types
//!
//! Every error the gateway originates itself is rendered as
//! `{"code": <status>, "message": <text>}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// JSON error body returned for gateway-originated failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
}

/// Errors raised while handling a single request
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No mapping rule matched the method and path
    #[error("route not found")]
    RouteNotFound,

    /// A route matched but its upstream has no usable proxy
    #[error("upstream '{0}' is unavailable")]
    UpstreamUnavailable(String),

    /// Missing, malformed or invalid bearer token
    #[error("{0}")]
    Unauthenticated(String),

    /// The login upstream answered 200 with a body of the wrong shape
    #[error("malformed upstream response: {0}")]
    UpstreamResponseMalformed(String),

    /// Signing a token failed
    #[error("failed to issue token: {0}")]
    CredentialIssuance(String),

    /// The inbound request body could not be read
    #[error("failed to read request body: {0}")]
    BodyRead(String),

    /// The inbound request body exceeds the buffering limit
    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    /// The upstream call failed at the transport level
    #[error("failed to forward request: {0}")]
    UpstreamRequest(String),

    /// The upstream did not answer within its timeout
    #[error("upstream '{0}' timed out")]
    UpstreamTimeout(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::RouteNotFound => StatusCode::NOT_FOUND,
            GatewayError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            GatewayError::BodyRead(_) => StatusCode::BAD_REQUEST,
            GatewayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::UpstreamRequest(_) => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::UpstreamUnavailable(_)
            | GatewayError::UpstreamResponseMalformed(_)
            | GatewayError::CredentialIssuance(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        error_response(status, self.to_string())
    }
}

/// Build a structured JSON error response
pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        code: status.as_u16(),
        message: message.into(),
    };
    (status, Json(body)).into_response()
}
