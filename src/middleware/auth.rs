//! Bearer-token authentication middleware
//!
//! Requests to excluded paths pass straight through. Every other request
//! must carry `Authorization: Bearer <token>` with a token the configured
//! [`Credentials`](crate::auth::Credentials) accept; otherwise the request
//! ends here with a 401.
//!
//! On success the caller's [`AuthContext`] is inserted into the request
//! extensions and mirrored into `X-User-ID` / `X-Username` so upstreams
//! get the identity without re-validating the token. The context is also
//! copied onto the response for the outer access log.

use crate::auth::AuthContext;
use crate::error::GatewayError;
use crate::server::GatewayState;
use axum::extract::{Request, State};
use axum::http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

pub const X_USER_ID: HeaderName = HeaderName::from_static("x-user-id");
pub const X_USERNAME: HeaderName = HeaderName::from_static("x-username");

/// Paths that skip authentication, together with everything below them
#[derive(Debug, Clone, Default)]
pub struct ExcludedPaths(Vec<String>);

impl ExcludedPaths {
    pub fn new(paths: &[String]) -> Self {
        Self(paths.to_vec())
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.0.iter().any(|excluded| {
            path == excluded
                || path
                    .strip_prefix(excluded.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

/// Why a request failed authentication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    Missing,
    Malformed,
    Invalid,
}

impl Rejection {
    fn label(self) -> &'static str {
        match self {
            Rejection::Missing => "missing",
            Rejection::Malformed => "malformed",
            Rejection::Invalid => "invalid",
        }
    }

    fn into_error(self) -> GatewayError {
        let message = match self {
            Rejection::Missing => "missing Authorization header",
            Rejection::Malformed => "malformed Authorization header",
            Rejection::Invalid => "invalid token",
        };
        GatewayError::Unauthenticated(message.to_string())
    }
}

pub async fn authenticate(
    State(state): State<GatewayState>,
    mut request: Request,
    next: Next,
) -> Response {
    if state.excluded.is_excluded(request.uri().path()) {
        // identity headers are only trusted when this layer set them
        strip_identity_headers(request.headers_mut());
        return next.run(request).await;
    }

    let context = match verify(&state, request.headers()) {
        Ok(context) => context,
        Err(rejection) => {
            debug!(
                path = %request.uri().path(),
                reason = rejection.label(),
                "Rejected unauthenticated request"
            );
            state.metrics.record_auth_failure(rejection.label());
            return rejection.into_error().into_response();
        }
    };

    set_identity_headers(request.headers_mut(), &context);
    request.extensions_mut().insert(context.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(context);
    response
}

fn verify(state: &GatewayState, headers: &HeaderMap) -> Result<AuthContext, Rejection> {
    let header = headers.get(AUTHORIZATION).ok_or(Rejection::Missing)?;
    let token = header
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(Rejection::Malformed)?;

    let claims = state.credentials.verify(token).map_err(|e| {
        warn!(error = %e, "Token verification failed");
        Rejection::Invalid
    })?;

    Ok(AuthContext::from(&claims))
}

fn strip_identity_headers(headers: &mut HeaderMap) {
    headers.remove(X_USER_ID);
    headers.remove(X_USERNAME);
}

fn set_identity_headers(headers: &mut HeaderMap, context: &AuthContext) {
    strip_identity_headers(headers);
    headers.insert(X_USER_ID, HeaderValue::from(context.user_id));
    match HeaderValue::from_bytes(context.username.as_bytes()) {
        Ok(value) => {
            headers.insert(X_USERNAME, value);
        }
        Err(_) => warn!(
            user_id = context.user_id,
            "Username is not a valid header value, X-Username not set"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excluded_paths() {
        let excluded = ExcludedPaths::new(&[
            "/v1/user/login".to_string(),
            "/v1/public".to_string(),
        ]);

        assert!(excluded.is_excluded("/v1/user/login"));
        assert!(excluded.is_excluded("/v1/public"));
        assert!(excluded.is_excluded("/v1/public/posts/1"));
        assert!(!excluded.is_excluded("/v1/publicity"));
        assert!(!excluded.is_excluded("/v1/user/login2"));
        assert!(!excluded.is_excluded("/v1/user"));
    }

    #[test]
    fn test_empty_exclusions() {
        assert!(!ExcludedPaths::default().is_excluded("/"));
    }

    #[test]
    fn test_identity_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(X_USER_ID, HeaderValue::from_static("999"));

        set_identity_headers(
            &mut headers,
            &AuthContext {
                user_id: 7,
                username: "zq".to_string(),
            },
        );

        assert_eq!(headers[X_USER_ID], "7");
        assert_eq!(headers[X_USERNAME], "zq");
        assert_eq!(headers.get_all(X_USER_ID).iter().count(), 1);
    }

    #[test]
    fn test_non_ascii_username_header() {
        let mut headers = HeaderMap::new();
        set_identity_headers(
            &mut headers,
            &AuthContext {
                user_id: 1,
                username: "张强".to_string(),
            },
        );

        assert_eq!(headers[X_USERNAME].as_bytes(), "张强".as_bytes());
    }

    #[test]
    fn test_rejection_messages() {
        assert_eq!(
            Rejection::Missing.into_error().to_string(),
            "missing Authorization header"
        );
        assert_eq!(Rejection::Malformed.label(), "malformed");
        assert_eq!(Rejection::Invalid.into_error().to_string(), "invalid token");
    }
}
