//! Configuration module for the gateway service
//!
//! This module handles loading and parsing configuration from TOML files.
//! The configuration is read once at startup; nothing in it changes while
//! the gateway is running.

use crate::middleware::ExcludedPaths;
use crate::router::PathPattern;
use axum::http::Method;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// A single `(method, path pattern)` pair bound to an upstream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MappingConfig {
    /// HTTP method, matched case-sensitively (e.g. "GET")
    pub method: String,
    /// Literal path, `/*` wildcard or `:param` pattern
    pub path: String,
}

/// Upstream service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Unique upstream name
    pub name: String,
    /// Target host (`host:port`) or base URL (`http://host:port/base`)
    pub target: String,
    /// Upstream call timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Mapping rules, evaluated in declaration order
    #[serde(default)]
    pub mappings: Vec<MappingConfig>,
}

impl UpstreamConfig {
    /// Timeout as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server name (optional, for display purposes)
    #[serde(default)]
    pub name: Option<String>,
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8888
}

fn default_timeout() -> u64 {
    30
}

fn default_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: None,
            host: default_host(),
            port: default_port(),
        }
    }
}

/// JWT configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// HMAC secret shared with nothing but this gateway
    #[serde(default)]
    pub secret: String,
    /// Issuer written into (and required from) every token
    #[serde(default = "default_issuer")]
    pub issuer: String,
    /// Token lifetime in hours
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: i64,
    /// Paths (and their sub-paths) that skip authentication
    #[serde(default)]
    pub exclude_paths: Vec<String>,
}

fn default_issuer() -> String {
    "blog".to_string()
}

fn default_ttl_hours() -> i64 {
    24
}

/// Ten years; longer lifetimes overflow token expiry arithmetic
pub const MAX_TTL_HOURS: i64 = 24 * 365 * 10;

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            issuer: default_issuer(),
            ttl_hours: default_ttl_hours(),
            exclude_paths: vec![],
        }
    }
}

/// Login route whose upstream response is enriched with a token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginConfig {
    /// Whether the login rewrite is active
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_login_method")]
    pub method: String,
    #[serde(default = "default_login_path")]
    pub path: String,
    /// Largest login request or upstream response body held in memory
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Default cap on login bodies held in memory
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

fn default_login_method() -> String {
    "POST".to_string()
}

fn default_login_path() -> String {
    "/v1/user/login".to_string()
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            method: default_login_method(),
            path: default_login_path(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics are enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Path to expose metrics
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_metrics_path(),
        }
    }
}

/// Health check configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Whether health check is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Path for health check endpoint
    #[serde(default = "default_health_path")]
    pub path: String,
}

fn default_health_path() -> String {
    "/health".to_string()
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_health_path(),
        }
    }
}

/// Main gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub jwt: JwtConfig,
    #[serde(default)]
    pub login: LoginConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub health: HealthConfig,
    /// Upstreams in evaluation order
    #[serde(default)]
    pub upstreams: Vec<UpstreamConfig>,
}

impl GatewayConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Load configuration from a TOML string
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        let config: GatewayConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.jwt.secret.is_empty() {
            anyhow::bail!("JWT secret must not be empty");
        }
        if self.jwt.ttl_hours <= 0 || self.jwt.ttl_hours > MAX_TTL_HOURS {
            anyhow::bail!(
                "JWT ttl_hours must be between 1 and {}, got {}",
                MAX_TTL_HOURS,
                self.jwt.ttl_hours
            );
        }

        let mut names = HashSet::new();
        for upstream in &self.upstreams {
            if upstream.name.is_empty() {
                anyhow::bail!("Upstream with target '{}' has no name", upstream.target);
            }
            if !names.insert(upstream.name.as_str()) {
                anyhow::bail!("Duplicate upstream name '{}'", upstream.name);
            }
            if upstream.target.is_empty() {
                anyhow::bail!("Upstream '{}' has an empty target", upstream.name);
            }
            for mapping in &upstream.mappings {
                validate_method(&mapping.method).map_err(|e| {
                    anyhow::anyhow!("Upstream '{}': {}", upstream.name, e)
                })?;
                if !mapping.path.starts_with('/') {
                    anyhow::bail!(
                        "Upstream '{}' mapping path '{}' must start with '/'",
                        upstream.name,
                        mapping.path
                    );
                }
            }
        }

        if self.login.enabled {
            validate_method(&self.login.method)
                .map_err(|e| anyhow::anyhow!("Login route: {}", e))?;
            if !self.login.path.starts_with('/') {
                anyhow::bail!("Login path '{}' must start with '/'", self.login.path);
            }
            if self.login.max_body_bytes == 0 {
                anyhow::bail!("Login max_body_bytes must be positive");
            }
            // callers have no token yet when they log in
            if !ExcludedPaths::new(&self.jwt.exclude_paths).is_excluded(&self.login.path) {
                anyhow::bail!(
                    "Login path '{}' must be listed in jwt.exclude_paths",
                    self.login.path
                );
            }
            if !self.is_mapped(&self.login.method, &self.login.path) {
                anyhow::bail!(
                    "Login route {} {} has no upstream mapping",
                    self.login.method,
                    self.login.path
                );
            }
        }

        Ok(())
    }

    /// Whether some upstream mapping serves `method` and `path`
    fn is_mapped(&self, method: &str, path: &str) -> bool {
        self.upstreams
            .iter()
            .flat_map(|upstream| &upstream.mappings)
            .any(|mapping| mapping.method == method && PathPattern::parse(&mapping.path).matches(path))
    }

    /// Get server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Total number of mapping rules across all upstreams
    pub fn mapping_count(&self) -> usize {
        self.upstreams.iter().map(|u| u.mappings.len()).sum()
    }
}

fn validate_method(method: &str) -> anyhow::Result<()> {
    if method.is_empty() {
        anyhow::bail!("mapping method must not be empty");
    }
    Method::from_bytes(method.as_bytes())
        .map_err(|_| anyhow::anyhow!("invalid HTTP method '{}'", method))?;
    Ok(())
}
