//! Deploy Orchestrator
//!
//! Runs one deployment described by a service template against the device
//! management backends, with an admin endpoint for health and metrics.

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use deploy_orchestrator::{
    rules, spawn_sweeper, CacheConfig, CacheDirectory, Collaborators, ComponentPipeline,
    DeviceStateTracker, PipelineConfig, ServiceTemplate,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Deploy Orchestrator - drives a service template to its desired state
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the service template (YAML)
    #[arg(long, env = "TEMPLATE")]
    template: PathBuf,

    /// Rule definition search path (platform path-separator-delimited
    /// directories); built-in rules are used when omitted
    #[arg(long, env = "RULES_PATH")]
    rules_path: Option<String>,

    /// Directory for per-failure diagnostic artifacts
    #[arg(long, env = "ARTIFACT_DIR", default_value = "./artifacts")]
    artifact_dir: PathBuf,

    /// Worker pool bound per type-batch
    #[arg(long, env = "MAX_WORKERS", default_value = "8")]
    max_workers: usize,

    /// Concurrent heavy device operations
    #[arg(long, env = "HEAVY_OP_LIMIT", default_value = "4")]
    heavy_op_limit: usize,

    /// Seconds a worker may wait for a device operation slot
    #[arg(long, env = "ADMISSION_TIMEOUT", default_value = "300")]
    admission_timeout_secs: u64,

    /// Admin server bind address (health + metrics)
    #[arg(long, env = "ADMIN_ADDR", default_value = "0.0.0.0:8081")]
    admin_addr: String,

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
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting Deploy Orchestrator");
    info!("  Version: {}", deploy_orchestrator::VERSION);
    info!("  Template: {}", args.template.display());
    info!("  Artifacts: {}", args.artifact_dir.display());
    info!("  Admin: {}", args.admin_addr);

    let template = ServiceTemplate::from_file(&args.template)
        .with_context(|| format!("loading template {}", args.template.display()))?;
    info!(
        deployment = %template.deployment_id,
        components = template.components.len(),
        "Loaded service template"
    );

    // Rule engine: built-ins, extended from the search path when given.
    let mut engine = rules::standard_engine()?;
    if let Some(search_path) = &args.rules_path {
        let registry = rules::builtin_registry();
        for rule in rules::load_rules(search_path, &registry)? {
            engine.add_rule(rule)?;
        }
    }
    let engine = Arc::new(engine);
    info!(rules = engine.len(), "Rule engine ready");

    // Shared services.
    let tracker = DeviceStateTracker::new();
    let caches = CacheDirectory::new(CacheConfig::default());
    let shutdown = CancellationToken::new();
    let sweeper = spawn_sweeper(caches.clone(), shutdown.clone());

    // Admin endpoint (health + metrics).
    let admin_addr = args.admin_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_admin_server(&admin_addr).await {
            error!("Admin server error: {}", e);
        }
    });

    // Collaborators: the simulated set; real agents slot in behind the
    // same traits.
    let collaborators = Collaborators::simulated();

    let config = PipelineConfig {
        max_workers: args.max_workers,
        heavy_op_limit: args.heavy_op_limit,
        admission_timeout: Duration::from_secs(args.admission_timeout_secs),
        artifact_dir: args.artifact_dir.clone(),
        ..Default::default()
    };

    let pipeline = ComponentPipeline::new(
        config,
        template,
        collaborators,
        engine,
        tracker,
        caches,
    )?;

    let exit = match pipeline.run().await {
        Ok(report) => {
            print_summary(&pipeline, &report.deployment_id).await;
            if report.succeeded {
                info!("Deployment succeeded");
                0
            } else {
                error!(failed = report.failed.len(), "Deployment finished with errors");
                1
            }
        }
        Err(e) => {
            print_summary(&pipeline, "aborted").await;
            error!("Deployment aborted: {}", e);
            1
        }
    };

    shutdown.cancel();
    let _ = sweeper.await;

    if exit != 0 {
        std::process::exit(exit);
    }
    Ok(())
}

/// Component status summary for the operator
async fn print_summary(pipeline: &ComponentPipeline, deployment: &str) {
    info!("Component status ({})", deployment);
    for (id, status) in pipeline.components().statuses().await {
        info!("  {:<24} {}", id.to_string(), status);
    }
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

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap());

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
// Admin Server
// =============================================================================

/// Serves liveness/readiness probes and the prometheus exposition
async fn run_admin_server(addr: &str) -> anyhow::Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => Response::builder()
                    .status(StatusCode::OK)
                    .body(Body::from("ok"))
                    .unwrap(),
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let metric_families = prometheus::gather();
                    let mut buffer = Vec::new();
                    match encoder.encode(&metric_families, &mut buffer) {
                        Ok(()) => Response::builder()
                            .status(StatusCode::OK)
                            .header("Content-Type", encoder.format_type())
                            .body(Body::from(buffer))
                            .unwrap(),
                        Err(e) => Response::builder()
                            .status(StatusCode::INTERNAL_SERVER_ERROR)
                            .body(Body::from(e.to_string()))
                            .unwrap(),
                    }
                }
                _ => Response::builder()
                    .status(StatusCode::NOT_FOUND)
                    .body(Body::from("not found"))
                    .unwrap(),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid admin address {addr}"))?;

    info!("Admin server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .context("admin server")?;

    Ok(())
}
