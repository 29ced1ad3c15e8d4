use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

use inspector::VERSION;
use inspector::agent::{Inspector, ScanSettings};
use inspector::config::{LogLevel, load_config};
use inspector::metrics::record::TAG_REGION;
use inspector::metrics::{MetricsPipeline, create_sink};
use inspector::prober::ProberFactory;
use inspector::util::logging;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "inspector", version, about = "Probe configured targets and ship the measurements to a metrics sink")]
struct Args {
    /// Path to the configuration file (required)
    #[arg(short, long)]
    config: PathBuf,

    /// Override the configured log level
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,

    /// Run a single scan cycle, wait for its probes, flush and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;
    logging::init(args.log_level.unwrap_or(config.log_level)).context("failed to initialize logging")?;
    info!("inspector {} starting", VERSION);

    let sink = create_sink(&config.metrics_db)
        .await
        .context("failed to initialize metrics sink")?;
    let pipeline = MetricsPipeline::start(sink, config.inspector.queue_capacity);

    let mut emitter = pipeline.emitter();
    if let Some(region) = &config.inspector.region {
        emitter = emitter.with_tag(TAG_REGION, region.as_str());
    }

    let grace = Duration::from_secs(config.inspector.shutdown_grace_secs);
    let settings = ScanSettings::from(&config.inspector);
    let mut inspector = Inspector::new(config.targets, ProberFactory::with_defaults(), emitter, settings);

    if args.once {
        let summary = inspector.scan_once().await;
        info!(
            "Single scan done: {} launched, {} skipped",
            summary.launched, summary.skipped
        );
    } else {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl-C, shutting down"),
                Err(e) => error!("Failed to listen for Ctrl-C, shutting down: {}", e),
            }
            let _ = shutdown_tx.send(true);
        });
        inspector.run(shutdown_rx).await;
    }

    inspector.wait_in_flight(grace).await;
    drop(inspector);

    let stats = pipeline.shutdown().await?;
    info!(
        "inspector stopped: {} metrics delivered, {} dropped",
        stats.delivered, stats.dropped
    );
    Ok(())
}
