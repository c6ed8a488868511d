//! Blog Gateway - A small API gateway for the blog services
//!
//! This is a gateway service that provides:
//! - Declarative routing of `(method, path)` to upstream services
//! - Reverse proxying with per-upstream timeouts
//! - Bearer-token (JWT) authentication with excluded paths
//! - Token enrichment of the login response
//! - Structured access logging, Prometheus metrics and a health endpoint

pub mod auth;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod middleware;
pub mod proxy;
pub mod router;
pub mod server;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use server::{build_router, GatewayState};

/// Application result type
pub type Result<T> = anyhow::Result<T>;
