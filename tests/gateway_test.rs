//! In-process tests for the composed gateway
//!
//! A spy upstream is served on an ephemeral port; the gateway router is
//! driven directly with `tower::ServiceExt::oneshot`.

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode, Version};
use axum::routing::{get, post};
use axum::{Json, Router};
use blog_gateway::auth::{AuthError, Claims, Credentials, JwtCredentials};
use jsonwebtoken::errors::ErrorKind;
use blog_gateway::{build_router, GatewayConfig, GatewayState};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const SECRET: &str = "moon_zhang";

/// Spy upstream that counts every request it receives
#[derive(Clone, Default)]
struct Spy {
    hits: Arc<AtomicUsize>,
}

impl Spy {
    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn login(State(spy): State<Spy>, Json(body): Json<Value>) -> (StatusCode, String) {
    spy.hits.fetch_add(1, Ordering::SeqCst);
    match (body["username"].as_str(), body["password"].as_str()) {
        (Some("zq"), Some("123456")) => (
            StatusCode::OK,
            r#"{"id":7,"name":"zq","email":"a@b.com"}"#.to_string(),
        ),
        (Some("broken"), _) => (StatusCode::OK, r#"{"unexpected":true}"#.to_string()),
        _ => (
            StatusCode::UNAUTHORIZED,
            r#"{"code": 401, "message": "wrong username or password"}"#.to_string(),
        ),
    }
}

async fn echo(State(spy): State<Spy>, request: Request<Body>) -> Json<Value> {
    spy.hits.fetch_add(1, Ordering::SeqCst);
    let header = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    };
    Json(json!({
        "path": request.uri().path(),
        "query": request.uri().query(),
        "user_id": header("x-user-id"),
        "username": header("x-username"),
    }))
}

async fn slow(State(spy): State<Spy>) -> &'static str {
    spy.hits.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(3)).await;
    "late"
}

async fn spawn_upstream(spy: Spy) -> u16 {
    let app = Router::new()
        .route("/v1/user/login", post(login))
        .route("/v1/user/:id", get(echo))
        .route("/v1/post/*rest", get(echo))
        .route("/v1/open/feed", get(echo))
        .route("/v1/slow", get(slow))
        .with_state(spy);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn gateway_config(upstream_port: u16, dead_port: u16) -> GatewayConfig {
    GatewayConfig::parse(&format!(
        r#"
[jwt]
secret = "{secret}"
exclude_paths = ["/v1/user/login", "/v1/open"]

[[upstreams]]
name = "user-api"
target = "127.0.0.1:{port}"
timeout = 1
mappings = [
    {{ method = "POST", path = "/v1/user/login" }},
    {{ method = "GET", path = "/v1/user/:id" }},
    {{ method = "GET", path = "/v1/slow" }},
    {{ method = "GET", path = "/v1/open/feed" }},
]

[[upstreams]]
name = "post-api"
target = "http://127.0.0.1:{port}"
mappings = [{{ method = "GET", path = "/v1/post/*" }}]

[[upstreams]]
name = "misconfigured"
target = "not a host"
mappings = [{{ method = "GET", path = "/v1/broken" }}]

[[upstreams]]
name = "offline"
target = "127.0.0.1:{dead}"
mappings = [{{ method = "GET", path = "/v1/offline" }}]
"#,
        secret = SECRET,
        port = upstream_port,
        dead = dead_port,
    ))
    .unwrap()
}

struct Harness {
    app: Router,
    spy: Spy,
    credentials: JwtCredentials,
}

impl Harness {
    async fn new() -> Self {
        Self::with_state(|state| state).await
    }

    async fn with_state(customize: impl FnOnce(GatewayState) -> GatewayState) -> Self {
        let spy = Spy::default();
        let port = spawn_upstream(spy.clone()).await;
        let config = gateway_config(port, closed_port().await);
        let state = customize(GatewayState::from_config(&config).unwrap());

        Self {
            app: build_router(&config, state),
            spy,
            credentials: JwtCredentials::from_config(&config.jwt).unwrap(),
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body.to_vec())
    }

    fn token(&self) -> String {
        self.credentials.issue(7, "zq").unwrap()
    }
}

fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

fn login_request(username: &str, password: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/user/login")
        .header("Content-Type", "application/json")
        .body(Body::from(
            json!({ "username": username, "password": password }).to_string(),
        ))
        .unwrap()
}

fn json_body(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn test_login_is_enriched_with_token() {
    let harness = Harness::new().await;

    let (status, headers, body) = harness.send(login_request("zq", "123456")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["x-user-id"], "7");

    let body = json_body(&body);
    assert_eq!(body["id"], 7);
    assert_eq!(body["name"], "zq");
    assert_eq!(body["email"], "a@b.com");

    let token = body["token"].as_str().unwrap();
    assert!(!token.is_empty());
    let claims = harness.credentials.verify(token).unwrap();
    assert_eq!(claims.user_id, 7);
    assert_eq!(claims.username, "zq");
    assert_eq!(harness.spy.hits(), 1);
}

#[tokio::test]
async fn test_repeated_login_issues_distinct_tokens() {
    let harness = Harness::new().await;

    let (_, _, first) = harness.send(login_request("zq", "123456")).await;
    let (_, _, second) = harness.send(login_request("zq", "123456")).await;
    let first = json_body(&first)["token"].as_str().unwrap().to_string();
    let second = json_body(&second)["token"].as_str().unwrap().to_string();

    assert_ne!(first, second);
    assert!(harness.credentials.verify(&first).is_ok());
    assert!(harness.credentials.verify(&second).is_ok());
}

#[tokio::test]
async fn test_failed_login_passes_through_verbatim() {
    let harness = Harness::new().await;

    let (status, _, body) = harness.send(login_request("zq", "wrong")).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        body,
        br#"{"code": 401, "message": "wrong username or password"}"#.to_vec()
    );
}

#[tokio::test]
async fn test_malformed_login_response_is_500() {
    let harness = Harness::new().await;

    let (status, _, body) = harness.send(login_request("broken", "x")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(&body);
    assert_eq!(body["code"], 500);
    assert!(body.get("token").is_none());
}

#[tokio::test]
async fn test_excluded_path_needs_no_token() {
    let harness = Harness::new().await;

    let spoofed = Request::builder()
        .uri("/v1/open/feed")
        .header("X-User-ID", "1")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = harness.send(spoofed).await;

    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(body["path"], "/v1/open/feed");
    assert_eq!(body["user_id"], Value::Null);
    assert_eq!(harness.spy.hits(), 1);
}

#[tokio::test]
async fn test_valid_token_propagates_identity() {
    let harness = Harness::new().await;
    let token = harness.token();

    let mut request = get_request("/v1/user/7", Some(&token));
    request
        .headers_mut()
        .insert("x-user-id", "999".parse().unwrap());
    let (status, _, body) = harness.send(request).await;

    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(body["user_id"], "7");
    assert_eq!(body["username"], "zq");
}

#[tokio::test]
async fn test_missing_or_malformed_header_is_rejected() {
    let harness = Harness::new().await;
    let token = harness.token();

    let (status, _, body) = harness.send(get_request("/v1/user/7", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(&body)["code"], 401);

    let malformed = Request::builder()
        .uri("/v1/user/7")
        .header("Authorization", format!("Token {}", token))
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = harness.send(malformed).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert_eq!(harness.spy.hits(), 0);
}

#[tokio::test]
async fn test_expired_or_tampered_token_never_reaches_upstream() {
    let harness = Harness::new().await;

    let expired = JwtCredentials::new(SECRET, "blog", chrono::Duration::hours(-1))
        .issue(7, "zq")
        .unwrap();
    let (status, _, _) = harness.send(get_request("/v1/user/7", Some(&expired))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let forged = JwtCredentials::new("other-secret", "blog", chrono::Duration::hours(24))
        .issue(7, "zq")
        .unwrap();
    let (status, _, body) = harness.send(get_request("/v1/user/7", Some(&forged))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(&body)["message"], "invalid token");

    assert_eq!(harness.spy.hits(), 0);
}

#[tokio::test]
async fn test_http2_caller_is_forwarded() {
    let harness = Harness::new().await;
    let token = harness.token();

    let mut request = get_request("/v1/user/7", Some(&token));
    *request.version_mut() = Version::HTTP_2;
    let (status, _, body) = harness.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["path"], "/v1/user/7");
    assert_eq!(harness.spy.hits(), 1);
}

#[tokio::test]
async fn test_wildcard_route_forwards_path_and_query() {
    let harness = Harness::new().await;
    let token = harness.token();

    let (status, _, body) = harness
        .send(get_request("/v1/post/42/comments?page=2", Some(&token)))
        .await;

    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(body["path"], "/v1/post/42/comments");
    assert_eq!(body["query"], "page=2");
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let harness = Harness::new().await;
    let token = harness.token();

    let (status, _, body) = harness.send(get_request("/v1/nothing", Some(&token))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json_body(&body)["code"], 404);

    // method mismatch on a known path
    let delete = Request::builder()
        .method("DELETE")
        .uri("/v1/user/7")
        .header("Authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = harness.send(delete).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert_eq!(harness.spy.hits(), 0);
}

#[tokio::test]
async fn test_misconfigured_upstream_is_500() {
    let harness = Harness::new().await;
    let token = harness.token();

    let (status, _, body) = harness.send(get_request("/v1/broken", Some(&token))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(&body);
    assert_eq!(body["code"], 500);
    assert_eq!(body["message"], "upstream 'misconfigured' is unavailable");
}

#[tokio::test]
async fn test_offline_upstream_is_502() {
    let harness = Harness::new().await;
    let token = harness.token();

    let (status, _, body) = harness.send(get_request("/v1/offline", Some(&token))).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json_body(&body)["code"], 502);
}

#[tokio::test]
async fn test_slow_upstream_times_out() {
    let harness = Harness::new().await;
    let token = harness.token();

    let (status, _, body) = harness.send(get_request("/v1/slow", Some(&token))).await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(json_body(&body)["code"], 504);
}

#[tokio::test]
async fn test_health_and_metrics_skip_auth() {
    let harness = Harness::new().await;

    let (status, _, body) = harness.send(get_request("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["upstreams_configured"], 4);
    assert_eq!(body["upstreams_reachable"], 3);

    harness.send(login_request("zq", "123456")).await;
    let (status, _, body) = harness.send(get_request("/metrics", None)).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("gateway_requests_total"));
    assert!(text.contains("gateway_tokens_issued_total 1"));
}

/// Verifies like the real credentials but can never sign
struct UnsignableCredentials(JwtCredentials);

impl Credentials for UnsignableCredentials {
    fn issue(&self, _user_id: i64, _username: &str) -> Result<String, AuthError> {
        Err(AuthError::Sign(ErrorKind::InvalidKeyFormat.into()))
    }

    fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        self.0.verify(token)
    }
}

#[tokio::test]
async fn test_signing_failure_on_login_is_500() {
    let harness = Harness::with_state(|state| {
        let inner = JwtCredentials::new(SECRET, "blog", chrono::Duration::hours(24));
        state.with_credentials(Arc::new(UnsignableCredentials(inner)))
    })
    .await;

    let (status, _, body) = harness.send(login_request("zq", "123456")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(&body);
    assert_eq!(body["code"], 500);
    assert!(body["message"].as_str().unwrap().starts_with("failed to issue token"));
    assert!(body.get("token").is_none());
    assert_eq!(harness.spy.hits(), 1);

    let (_, _, metrics) = harness.send(get_request("/metrics", None)).await;
    let text = String::from_utf8(metrics).unwrap();
    assert!(text.contains("gateway_tokens_issued_total 0"));
}

#[tokio::test]
async fn test_oversized_login_request_is_413() {
    let harness = Harness::new().await;

    let padding = "x".repeat(2 * 1024 * 1024);
    let (status, _, body) = harness.send(login_request("zq", &padding)).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json_body(&body)["code"], 413);
    assert_eq!(harness.spy.hits(), 0);
}

struct PanickingCredentials;

impl Credentials for PanickingCredentials {
    fn issue(&self, _user_id: i64, _username: &str) -> Result<String, AuthError> {
        panic!("issue should not be called")
    }

    fn verify(&self, _token: &str) -> Result<Claims, AuthError> {
        panic!("credential store exploded")
    }
}

#[tokio::test]
async fn test_panic_is_recovered_as_500() {
    let harness =
        Harness::with_state(|state| state.with_credentials(Arc::new(PanickingCredentials))).await;

    let (status, _, body) = harness
        .send(get_request("/v1/user/7", Some("anything")))
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(&body);
    assert_eq!(body["code"], 500);
    assert_eq!(body["message"], "internal server error");

    // the gateway keeps serving
    let (status, _, _) = harness.send(get_request("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
}
