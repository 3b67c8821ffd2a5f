//! Array Provisioner
//!
//! Controller process: loads the backend configuration, refreshes every
//! array's capabilities, then serves the provisioning API alongside health
//! and metrics endpoints until interrupted.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use array_provisioner::{
    ApiServer, ApiServerConfig, BackendRegistry, ControllerConfig, ControllerMetrics, Error,
    Orchestrator, OrchestratorConfig, RefreshRole, Result,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Array Provisioner - volume provisioning for OceanStor and FusionStorage arrays
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Backend configuration file (.json, .yaml or .yml)
    #[arg(long, env = "PROVISIONER_CONFIG")]
    config: PathBuf,

    /// Run as the controller, which owns the periodic capability refresh
    #[arg(long, env = "CONTROLLER")]
    controller: bool,

    /// Refresh only while this file exists
    #[arg(long, env = "CONTROLLER_FLAG_FILE")]
    controller_flag_file: Option<PathBuf>,

    /// Capability refresh interval in seconds
    #[arg(
        long,
        env = "REFRESH_INTERVAL",
        default_value = "60",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    refresh_interval_secs: u64,

    /// REST API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8090")]
    api_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting Array Provisioner");
    info!("  Version: {}", array_provisioner::VERSION);
    info!("  Config: {}", args.config.display());
    info!("  REST API: {}", args.api_addr);
    info!("  Controller: {}", args.controller);

    let config = ControllerConfig::load(&args.config)?;

    // Backends are fixed for the life of the process
    let registry = BackendRegistry::new();
    registry.register_backends(&config.backends)?;
    info!("Backend registry initialized ({} backends)", registry.len());

    let metrics = ControllerMetrics::new()?;

    let orch_config = OrchestratorConfig {
        workflow: config.workflow.clone(),
        refresh_interval: Duration::from_secs(args.refresh_interval_secs),
    };
    let orchestrator = Orchestrator::new(orch_config, registry.clone(), metrics.clone());

    orchestrator.refresh_capabilities_now().await.map_err(|e| {
        error!("Initial capability refresh failed: {}", e);
        e
    })?;
    info!("Orchestrator initialized");

    let shutdown = CancellationToken::new();

    let role = RefreshRole::from_flags(args.controller, args.controller_flag_file.clone());
    let refresh_handle = orchestrator.start_periodic_refresh(role, shutdown.clone());

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_registry = registry.clone();
    let health_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_registry, health_shutdown).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let metrics_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics, metrics_shutdown).await {
            error!("Metrics server error: {}", e);
        }
    });

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutdown signal received");
        signal_shutdown.cancel();
    });

    // Create and run API server
    let api_config = ApiServerConfig {
        rest_addr: args.api_addr.parse().map_err(|e| {
            Error::Configuration(format!("Invalid REST API address: {}", e))
        })?,
        ..Default::default()
    };

    let api_server = ApiServer::new(api_config, orchestrator.clone());

    info!("Starting API server");
    let served = api_server.run(shutdown.clone()).await;

    shutdown.cancel();
    if let Err(e) = refresh_handle.await {
        warn!("Capability refresh task ended abnormally: {}", e);
    }

    served?;
    info!("Provisioner shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "tower=warn", "axum=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

fn text_response(
    status: hyper::StatusCode,
    body: impl Into<hyper::Body>,
) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(body.into());
    *response.status_mut() = status;
    response
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(
    addr: &str,
    registry: Arc<BackendRegistry>,
    shutdown: CancellationToken,
) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => text_response(StatusCode::OK, "ok"),
                        "/readyz" if registry.is_synced() => text_response(StatusCode::OK, "ok"),
                        "/readyz" => {
                            text_response(StatusCode::SERVICE_UNAVAILABLE, "backends not synced")
                        }
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid health server address: {}", e))
    })?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(
    addr: &str,
    metrics: ControllerMetrics,
    shutdown: CancellationToken,
) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{header, Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => match metrics.encode() {
                            Ok(text) => {
                                let mut response = text_response(StatusCode::OK, text);
                                if let Ok(value) = metrics.content_type().parse() {
                                    response.headers_mut().insert(header::CONTENT_TYPE, value);
                                }
                                response
                            }
                            Err(e) => {
                                warn!("Metrics encoding failed: {}", e);
                                text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                            }
                        },
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid metrics server address: {}", e))
    })?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
