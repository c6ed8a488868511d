//! Health check module
//!
//! Liveness of the gateway process. The status is `degraded` when some
//! configured upstreams have no usable proxy (their target failed to parse
//! at startup) and those routes will always answer 500.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub upstreams_configured: usize,
    pub upstreams_reachable: usize,
}

/// Health checker service
#[derive(Debug, Clone)]
pub struct HealthChecker {
    start_time: Instant,
    version: String,
    configured: usize,
    reachable: usize,
}

impl HealthChecker {
    /// `configured` upstreams, of which `reachable` have a proxy
    pub fn new(configured: usize, reachable: usize) -> Self {
        Self {
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            configured,
            reachable,
        }
    }

    pub fn liveness(&self) -> HealthResponse {
        let status = if self.reachable < self.configured {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthResponse {
            status,
            version: self.version.clone(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            upstreams_configured: self.configured,
            upstreams_reachable: self.reachable,
        }
    }
}
