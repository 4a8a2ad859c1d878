//! OTLP metrics exporter for OtelCast.

use std::sync::Arc;

use clap::Parser;
use opentelemetry::global;
use tracing::info;

use otelcast_exporter_otlp::config::WorkerMode;
use otelcast_exporter_otlp::periodic::{ThreadWorkerFactory, TokioWorkerFactory, WorkerFactory};
use otelcast_exporter_otlp::{ExporterConfig, MetricsPipelineBuilder};

/// OTLP metrics exporter for OtelCast.
#[derive(Parser, Debug)]
#[command(name = "otelcast-exporter-otlp")]
#[command(about = "Export process metrics via OpenTelemetry OTLP")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// OTLP endpoint (overrides config).
    #[arg(long)]
    endpoint: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)?
    } else {
        ExporterConfig::default()
    };

    // Apply CLI overrides
    if let Some(endpoint) = args.endpoint {
        config.export.otlp.endpoint = Some(endpoint);
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    otelcast_common::init_tracing(&config.logging)?;

    info!("Starting OtelCast OTLP metrics exporter");
    info!(
        transport = ?config.metrics.export.otlp.transport.unwrap_or(config.export.otlp.transport),
        interval_secs = config.metrics.export.interval_secs,
        workers = ?config.workers,
        "Configuration loaded"
    );

    let worker_factory: Arc<dyn WorkerFactory> = match config.workers {
        WorkerMode::Thread => Arc::new(ThreadWorkerFactory),
        WorkerMode::Tokio => Arc::new(TokioWorkerFactory::current()),
    };

    let pipeline = MetricsPipelineBuilder::new(&config.export, &config.metrics.export)
        .with_worker_factory(worker_factory)
        .build()?;

    let Some(pipeline) = pipeline else {
        info!("No metrics exporter enabled, exiting");
        return Ok(());
    };

    // Make the pipeline's provider available to instrumented code
    global::set_meter_provider(pipeline.meter_provider().clone());

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate()
                ).expect("failed to install SIGTERM handler");
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    // Print final stats before shutting the provider down
    let reader = pipeline.reader().clone();
    info!(
        worker = reader.worker_name(),
        pushes = reader.pushes(),
        failures = reader.failures(),
        "Final statistics"
    );

    pipeline.shutdown();

    info!("Exporter stopped");
    Ok(())
}
