//! In-memory request and response buffering
//!
//! Bodies are single-read streams. To inspect one and still pass it on, the
//! stream is drained into an owned buffer and a fresh body over that buffer
//! takes its place. Both directions are capped at a byte limit so one
//! oversized login cannot pin an unbounded buffer.

use crate::error::GatewayError;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};

/// Read the whole request body and rebuild the request over the buffer.
///
/// Returns the rebuilt request and the buffered bytes. A body longer than
/// `limit` fails with [`GatewayError::PayloadTooLarge`].
pub async fn buffer_request(
    request: Request,
    limit: usize,
) -> Result<(Request, Bytes), GatewayError> {
    let (parts, body) = request.into_parts();
    let bytes = Limited::new(body, limit)
        .collect()
        .await
        .map_err(|e| {
            if e.downcast_ref::<LengthLimitError>().is_some() {
                GatewayError::PayloadTooLarge(limit)
            } else {
                GatewayError::BodyRead(e.to_string())
            }
        })?
        .to_bytes();
    Ok((Request::from_parts(parts, Body::from(bytes.clone())), bytes))
}

/// A downstream response held in memory
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CapturedResponse {
    /// Drain a response of at most `limit` bytes into memory
    pub async fn capture(response: Response, limit: usize) -> Result<Self, GatewayError> {
        let (parts, body) = response.into_parts();
        let body = Limited::new(body, limit)
            .collect()
            .await
            .map_err(|e| GatewayError::UpstreamRequest(format!("failed to read response body: {}", e)))?
            .to_bytes();

        Ok(Self {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}

impl IntoResponse for CapturedResponse {
    /// Replay the captured response verbatim
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}
