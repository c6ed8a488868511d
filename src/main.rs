//! Blog Gateway - CLI Application
//!
//! A small API gateway with:
//! - Route configuration via TOML
//! - JWT authentication and login token enrichment
//! - Prometheus metrics

use blog_gateway::{build_router, config::GatewayConfig, GatewayState};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Blog Gateway - A small API gateway for the blog services
#[derive(Parser)]
#[command(name = "blog-gateway")]
#[command(version, about = "A small API gateway for the blog services", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Start {
        /// Configuration file path
        #[arg(short, long, default_value = "gateway.toml")]
        config: String,
    },
    /// Validate the configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long, default_value = "gateway.toml")]
        config: String,
    },
    /// Generate a sample configuration file
    Init {
        /// Output file path
        #[arg(short, long, default_value = "gateway.toml")]
        output: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { config } => start_server(&config).await?,
        Commands::Validate { config } => validate_config(&config)?,
        Commands::Init { output } => generate_sample_config(&output)?,
    }

    Ok(())
}

/// Start the gateway server
async fn start_server(config_path: &str) -> anyhow::Result<()> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = GatewayConfig::from_file(config_path)?;
    info!("Loaded configuration from {}", config_path);

    let state = GatewayState::from_config(&config)?;
    info!(
        "Upstreams configured: {} ({} reachable), mappings: {}",
        config.upstreams.len(),
        state.proxies.len(),
        config.mapping_count()
    );
    if let Some(login) = &state.login {
        info!("Login enrichment enabled for {} {}", login.method, login.path);
    }
    if config.health.enabled {
        info!("Health endpoint enabled at {}", config.health.path);
    }
    if config.metrics.enabled {
        info!("Metrics endpoint enabled at {}", config.metrics.path);
    }

    let app = build_router(&config, state);

    // Start server
    let addr: SocketAddr = config.server_addr().parse()?;
    info!(
        "Starting {} on {}",
        config.server.name.as_deref().unwrap_or("gateway"),
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Validate configuration file
fn validate_config(config_path: &str) -> anyhow::Result<()> {
    match GatewayConfig::from_file(config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid!");
            println!();
            println!("Server: {}:{}", config.server.host, config.server.port);
            println!("Excluded paths: {}", config.jwt.exclude_paths.join(", "));
            if config.login.enabled {
                println!("Login route: {} {}", config.login.method, config.login.path);
            }
            println!();
            println!("Upstreams:");
            for upstream in &config.upstreams {
                println!(
                    "  {} → {} (timeout {}s)",
                    upstream.name, upstream.target, upstream.timeout
                );
                for mapping in &upstream.mappings {
                    println!("    {} {}", mapping.method, mapping.path);
                }
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration is invalid:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}

/// Generate sample configuration file
fn generate_sample_config(output_path: &str) -> anyhow::Result<()> {
    let sample_config = r#"# Blog Gateway Configuration

[server]
name = "blog-gateway"
host = "0.0.0.0"
port = 8888

[jwt]
secret = "change-me"
issuer = "blog"
ttl_hours = 24
exclude_paths = ["/v1/user/login", "/v1/user/register"]

# Upstream response for this route gets a freshly issued token
[login]
enabled = true
method = "POST"
path = "/v1/user/login"

[metrics]
enabled = true
path = "/metrics"

[health]
enabled = true
path = "/health"

# Upstreams are matched in order; the first matching mapping wins
[[upstreams]]
name = "user-api"
target = "127.0.0.1:8001"
timeout = 30
mappings = [
    { method = "POST", path = "/v1/user/login" },
    { method = "POST", path = "/v1/user/register" },
    { method = "GET", path = "/v1/user/:id" },
]

[[upstreams]]
name = "post-api"
target = "127.0.0.1:8002"
timeout = 30
mappings = [
    { method = "GET", path = "/v1/post/:id" },
    { method = "POST", path = "/v1/post" },
    { method = "GET", path = "/v1/posts/*" },
]
"#;

    std::fs::write(output_path, sample_config)?;
    println!("Sample configuration written to {}", output_path);
    Ok(())
}
