//! Metrics module for Prometheus
//!
//! This module provides metrics collection for the gateway service:
//! - Request count by method and status
//! - Request latency histogram
//! - Upstream call count and latency by upstream
//! - Authentication failures by reason
//! - Login tokens issued

use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounter, Opts, Registry, TextEncoder,
};
use std::time::Duration;
use tracing::warn;

const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Gateway metrics collector
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,
    request_counter: CounterVec,
    request_latency: HistogramVec,
    upstream_counter: CounterVec,
    upstream_latency: HistogramVec,
    auth_failures: CounterVec,
    tokens_issued: IntCounter,
}

impl GatewayMetrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        let registry = Registry::new();

        let request_counter = CounterVec::new(
            Opts::new("gateway_requests_total", "Total number of requests"),
            &["method", "status"],
        )
        .expect("Failed to create request counter");

        let request_latency = HistogramVec::new(
            HistogramOpts::new(
                "gateway_request_latency_seconds",
                "Request latency in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["method"],
        )
        .expect("Failed to create latency histogram");

        let upstream_counter = CounterVec::new(
            Opts::new(
                "gateway_upstream_requests_total",
                "Total number of requests forwarded per upstream",
            ),
            &["upstream", "status"],
        )
        .expect("Failed to create upstream counter");

        let upstream_latency = HistogramVec::new(
            HistogramOpts::new(
                "gateway_upstream_latency_seconds",
                "Upstream call latency in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["upstream"],
        )
        .expect("Failed to create upstream latency histogram");

        let auth_failures = CounterVec::new(
            Opts::new(
                "gateway_auth_failures_total",
                "Total number of rejected authentication attempts",
            ),
            &["reason"],
        )
        .expect("Failed to create auth failure counter");

        let tokens_issued = IntCounter::new(
            "gateway_tokens_issued_total",
            "Total number of login tokens issued",
        )
        .expect("Failed to create token counter");

        registry
            .register(Box::new(request_counter.clone()))
            .expect("Failed to register request counter");
        registry
            .register(Box::new(request_latency.clone()))
            .expect("Failed to register latency histogram");
        registry
            .register(Box::new(upstream_counter.clone()))
            .expect("Failed to register upstream counter");
        registry
            .register(Box::new(upstream_latency.clone()))
            .expect("Failed to register upstream latency histogram");
        registry
            .register(Box::new(auth_failures.clone()))
            .expect("Failed to register auth failure counter");
        registry
            .register(Box::new(tokens_issued.clone()))
            .expect("Failed to register token counter");

        Self {
            registry,
            request_counter,
            request_latency,
            upstream_counter,
            upstream_latency,
            auth_failures,
            tokens_issued,
        }
    }

    /// Record a finished request with its status and latency
    pub fn record_request(&self, method: &str, status: u16, latency: Duration) {
        self.request_counter
            .with_label_values(&[method, &status.to_string()])
            .inc();
        self.request_latency
            .with_label_values(&[method])
            .observe(latency.as_secs_f64());
    }

    /// Record a call to an upstream
    pub fn record_upstream(&self, upstream: &str, status: u16, latency: Duration) {
        self.upstream_counter
            .with_label_values(&[upstream, &status.to_string()])
            .inc();
        self.upstream_latency
            .with_label_values(&[upstream])
            .observe(latency.as_secs_f64());
    }

    /// Record a rejected authentication attempt
    pub fn record_auth_failure(&self, reason: &str) {
        self.auth_failures.with_label_values(&[reason]).inc();
    }

    pub fn record_token_issued(&self) {
        self.tokens_issued.inc();
    }

    /// Number of login tokens issued so far
    pub fn tokens_issued(&self) -> u64 {
        self.tokens_issued.get()
    }

    /// Get the Prometheus metrics output
    pub fn prometheus_output(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}
