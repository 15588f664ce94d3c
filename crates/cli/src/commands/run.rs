//! `run` command implementation.

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let mut blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // Apply CLI overrides
    if let Some(ref source) = args.source {
        info!(source = %source.display(), "Overriding source from CLI");
        blueprint.source.path = source.clone();
    }

    info!(
        source = %blueprint.source.path.display(),
        batch_size = blueprint.source.batch_size,
        sinks = blueprint.sinks.len(),
        max_attempts = blueprint.delivery.max_attempts,
        dry_run = args.dry_run,
        "Configuration loaded"
    );

    let pipeline = Pipeline::new(PipelineConfig {
        blueprint,
        dry_run: args.dry_run,
        buffer_size: args.buffer_size,
        metrics_port: if args.metrics_port == 0 {
            None
        } else {
            Some(args.metrics_port)
        },
    });

    // Signals cancel the token; in-flight sessions see it through child tokens
    let shutdown = CancellationToken::new();
    let watcher = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_signal() => {
                    warn!("Received shutdown signal, cancelling in-flight deliveries...");
                    shutdown.cancel();
                }
                _ = shutdown.cancelled() => {}
            }
        })
    };

    info!("Starting pipeline...");
    let result = pipeline.run(shutdown.clone()).await;
    shutdown.cancel();
    let _ = watcher.await;

    let stats = result.context("Pipeline execution failed")?;
    stats.print_summary();

    if stats.consumer.failed > 0 {
        anyhow::bail!(
            "{} record(s) failed delivery and were not acknowledged",
            stats.consumer.failed
        );
    }

    info!("batchline finished");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
