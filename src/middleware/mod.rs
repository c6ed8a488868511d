//! Request middleware
//!
//! Layers are composed in [`crate::server::build_router`], outermost first:
//! - [`access_log`]: status, latency and client logging plus request metrics
//! - [`auth`]: bearer-token authentication with excluded path prefixes
//! - [`login`]: token enrichment of the login route's upstream response

pub mod access_log;
pub mod auth;
pub mod capture;
pub mod login;

use axum::extract::{ConnectInfo, Request};
use std::net::SocketAddr;

pub use access_log::access_log;
pub use auth::{authenticate, ExcludedPaths};
pub use login::{enrich_login, LoginRoute};

/// Peer address of the connection, when the server was started with connect info
pub(crate) fn client_addr(request: &Request) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}
