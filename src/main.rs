//! Collector Operator
//!
//! Runs OpenTelemetry collectors described by `TelemetryCollector` custom
//! resources: every collector gets its ConfigMap, Services, Deployment or
//! DaemonSet and (when the Prometheus operator is installed) ServiceMonitor.

use clap::Parser;
use kube::{Client, CustomResourceExt};
use prometheus::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use collector_operator::config::{default_image, probe_monitoring_capability};
use collector_operator::controller::{self, Context, Metrics};
use collector_operator::{
    ControllerConfig, Error, KubeStore, OperatorConfig, Reconciler, Result, TelemetryCollector,
};

/// How long to keep retrying the ServiceMonitor CRD lookup at startup
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// CLI Arguments
// =============================================================================

/// Collector Operator - manages OpenTelemetry collectors on Kubernetes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Image used for collectors that do not name one
    #[arg(long, env = "COLLECTOR_IMAGE")]
    default_image: Option<String>,

    /// Resync interval for converged collectors, in seconds
    #[arg(long, env = "RESYNC_INTERVAL", default_value = "300")]
    resync_interval_secs: u64,

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

    /// Manage ServiceMonitors without probing for their CRD
    #[arg(long, env = "ASSUME_MONITORING_AVAILABLE")]
    assume_monitoring_available: bool,

    /// Print the TelemetryCollector CRD as YAML and exit
    #[arg(long)]
    print_crd: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_crd {
        print!("{}", serde_yaml::to_string(&TelemetryCollector::crd())?);
        return Ok(());
    }

    init_logging(&args);

    info!("Starting Collector Operator");
    info!("  Version: {}", collector_operator::VERSION);
    info!(
        "  Default image: {}",
        args.default_image.clone().filter(|image| !image.is_empty()).unwrap_or_else(default_image)
    );
    info!("  Resync interval: {}s", args.resync_interval_secs);

    let client = Client::try_default().await?;

    let monitoring_available = if args.assume_monitoring_available {
        true
    } else {
        probe_monitoring_capability(client.clone(), PROBE_TIMEOUT).await?
    };

    let config = Arc::new(OperatorConfig::new(
        args.default_image.clone(),
        monitoring_available,
    ));
    let controller_config = ControllerConfig {
        resync_interval: Duration::from_secs(args.resync_interval_secs),
        ..Default::default()
    };

    let registry = Registry::new();
    let metrics = Metrics::new(&registry)?;

    let store = Arc::new(KubeStore::new(client.clone()));
    let reconciler = Reconciler::new(store, config);
    let ctx = Arc::new(Context::new(reconciler, metrics, controller_config));

    // Start health server
    let health_addr = parse_addr(&args.health_addr, "health")?;
    tokio::spawn(async move {
        if let Err(e) = run_health_server(health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = parse_addr(&args.metrics_addr, "metrics")?;
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr, registry).await {
            error!("Metrics server error: {}", e);
        }
    });

    controller::run(client, ctx).await;

    info!("Operator shutdown complete");
    Ok(())
}

fn parse_addr(addr: &str, server: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|e| Error::Configuration(format!("Invalid {} server address {}: {}", server, addr, e)))
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

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},hyper=warn,kube=info", level)));

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

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: SocketAddr) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => Response::new(Body::from("ok")),
                _ => {
                    let mut response = Response::new(Body::from("not found"));
                    *response.status_mut() = StatusCode::NOT_FOUND;
                    response
                }
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: SocketAddr, registry: Registry) -> Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => {
                            let encoder = TextEncoder::new();
                            let mut buffer = Vec::new();
                            match encoder.encode(&registry.gather(), &mut buffer) {
                                Ok(()) => {
                                    let mut response = Response::new(Body::from(buffer));
                                    if let Ok(content_type) = HeaderValue::from_str(encoder.format_type()) {
                                        response.headers_mut().insert(CONTENT_TYPE, content_type);
                                    }
                                    response
                                }
                                Err(e) => {
                                    let mut response = Response::new(Body::from(e.to_string()));
                                    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                                    response
                                }
                            }
                        }
                        _ => {
                            let mut response = Response::new(Body::from("not found"));
                            *response.status_mut() = StatusCode::NOT_FOUND;
                            response
                        }
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
