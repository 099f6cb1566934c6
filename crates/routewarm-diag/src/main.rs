//! Routewarm Diagnostics
//!
//! Inspect preload tables, analyze bundles and dry-run the scheduler on a
//! native host.
//!
//! ## Usage
//!
//! ```bash
//! # Bundle analysis from `scheduler.artifact_path`, or the registry estimate
//! routewarm-diag analyze
//!
//! # Read a specific build artifact (file path or URL)
//! routewarm-diag analyze --artifact dist/bundle-analysis.json
//!
//! # Simulate three seconds after landing on /dashboard
//! routewarm-diag simulate --current /dashboard --duration-ms 3000
//!
//! # Custom tables
//! routewarm-diag --registry routes.json routes
//! ```

mod config;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use routewarm::port::TokioPort;
use routewarm::{
    artifact_source, BundleAnalyzer, ImportError, PerformanceReport, PreloadScheduler, RouteState,
    ServiceStatus,
};

use crate::config::RegistryFile;

#[derive(Parser, Debug)]
#[command(name = "routewarm-diag")]
#[command(author = "Daemoniorum LLC")]
#[command(version)]
#[command(about = "Route preloading diagnostics", long_about = None)]
struct Args {
    /// Registry file (JSON with optional routes, flow and scheduler sections)
    #[arg(short, long, global = true)]
    registry: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the bundle analysis as JSON
    Analyze {
        /// Artifact file path or http(s) URL (defaults to `scheduler.artifact_path`)
        #[arg(long)]
        artifact: Option<String>,
    },

    /// Run the scheduler with simulated imports
    Simulate {
        /// Route the user is on
        #[arg(long, default_value = "/dashboard")]
        current: String,

        /// How long to let the scheduler run
        #[arg(long, default_value = "3000")]
        duration_ms: u64,

        /// Arm every route, not just the likely next ones
        #[arg(long)]
        all: bool,
    },

    /// List routes and the flow table
    Routes,
}

#[derive(Serialize)]
struct SimulationOutput {
    status: ServiceStatus,
    routes: BTreeMap<String, RouteState>,
    report: PerformanceReport,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let file = RegistryFile::load(args.registry.as_deref())?;

    match args.command {
        Command::Analyze { artifact } => analyze(&file, artifact).await,
        Command::Simulate {
            current,
            duration_ms,
            all,
        } => simulate(&file, &current, Duration::from_millis(duration_ms), all).await,
        Command::Routes => routes(&file),
    }
}

async fn analyze(
    file: &RegistryFile,
    artifact: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let location = artifact.unwrap_or_else(|| file.scheduler.artifact_path.clone());
    let mut analyzer = BundleAnalyzer::new(file.scheduler.thresholds.clone());
    if let Some(source) = artifact_source(&location) {
        analyzer = analyzer.with_source(source);
    }

    let analysis = analyzer.analyze(&file.registry()).await;
    println!("{}", serde_json::to_string_pretty(&analysis)?);
    Ok(())
}

async fn simulate(
    file: &RegistryFile,
    current: &str,
    duration: Duration,
    all: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let registry = file.registry();
    let port = Arc::new(TokioPort::new(file.scheduler.idle_poll_interval)?);
    let scheduler = PreloadScheduler::builder()
        .with_registry(registry.clone())
        .with_flow(file.flow())
        .with_config(file.scheduler.clone())
        .build(port);

    for (route, config) in registry.iter() {
        let delay = Duration::from_millis(config.estimated_load_time_ms.unwrap_or(0));
        let name = route.to_string();
        scheduler.lazy(route.clone(), move || {
            let name = name.clone();
            async move {
                tokio::time::sleep(delay).await;
                Ok::<_, ImportError>(name)
            }
        })?;
    }

    info!(current, duration_ms = duration.as_millis() as u64, "Starting simulation");
    scheduler.start();
    if all {
        scheduler.preload_all_routes();
    } else {
        scheduler.preload_based_on_current_route(current);
    }

    tokio::time::sleep(duration).await;

    let routes = registry
        .routes()
        .map(|route| (route.to_string(), scheduler.route_state(route.as_str())))
        .collect();
    let output = SimulationOutput {
        status: scheduler.service_status(),
        routes,
        report: scheduler.performance_report(),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn routes(file: &RegistryFile) -> Result<(), Box<dyn std::error::Error>> {
    let registry = file.registry();
    let flow = file.flow();

    println!(
        "{:<22} {:<9} {:<13} {:>8} {:>8}  DEPENDENCIES",
        "ROUTE", "PRIORITY", "TRIGGER", "SIZE KB", "LOAD MS"
    );
    for (route, config) in registry.iter() {
        let dependencies: Vec<&str> = config.dependencies.iter().map(|d| d.as_str()).collect();
        println!(
            "{:<22} {:<9} {:<13} {:>8} {:>8}  {}",
            route.as_str(),
            format!("{:?}", config.priority).to_lowercase(),
            config.trigger.to_string(),
            config.size_kb(),
            config
                .estimated_load_time_ms
                .map_or_else(|| "-".to_string(), |ms| ms.to_string()),
            dependencies.join(", ")
        );
    }

    println!();
    println!("LIKELY NEXT");
    for (route, next) in flow.iter() {
        let next: Vec<&str> = next.iter().map(|r| r.as_str()).collect();
        println!("  {:<22} -> {}", route.as_str(), next.join(", "));
    }
    Ok(())
}
