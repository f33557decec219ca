//! Relay Ingest - MQTT to DynamoDB telemetry relay

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use relay_common::logging::{init_logging, LogConfig, LogLevel};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use relay_ingest::{
    config::Cli, reporter::run_reporter, Dispatcher, DynamoStore, IngestHandler, MqttTransport,
    OutcomeCounter,
};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize logging based on verbose flag
    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("relay-ingest")
        .filter_directives("rumqttc=info,aws_config=warn,aws_smithy_runtime=warn")
        .build();

    // Merge with environment variables (they take precedence)
    let log_config = log_config.merge_env()?;

    // Keep the guard alive so buffered file output is flushed on exit
    let _log_guard = init_logging(&log_config)?;

    info!("Starting relay");

    let config = cli.into_config().context("Invalid configuration")?;
    info!(
        table = %config.table_name,
        topics = ?config.topics,
        broker = %format!("{}:{}", config.mqtt.host, config.mqtt.port),
        "Configuration loaded"
    );

    let store = DynamoStore::new(config.store.clone())
        .await
        .context("Failed to initialize DynamoDB store")?;

    let counter = Arc::new(OutcomeCounter::new());
    let handler = Arc::new(IngestHandler::new(
        Arc::new(store),
        config.table_name.clone(),
        Arc::clone(&counter),
        config.write_timeout,
    ));

    let transport = MqttTransport::new(&config.mqtt);
    transport
        .subscribe(&config.topics)
        .await
        .context("Failed to subscribe to topics")?;

    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let shutdown = CancellationToken::new();

    let reporter = tokio::spawn(run_reporter(
        Arc::clone(&counter),
        config.report_interval,
        shutdown.clone(),
    ));

    let dispatcher = {
        let dispatcher = Dispatcher::new(handler, config.max_in_flight);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { dispatcher.run(rx, shutdown).await })
    };

    let mut transport = tokio::spawn(transport.run(tx, shutdown.clone()));

    let exit = tokio::select! {
        _ = shutdown_signal() => Ok(()),
        joined = &mut transport => match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!(error = %e, "transport failed");
                Err(anyhow::Error::new(e).context("MQTT transport failed"))
            }
            Err(e) => Err(anyhow::Error::new(e).context("MQTT transport task failed")),
        },
    };

    shutdown.cancel();

    // The transport owns the sender; once it stops the dispatcher sees a closed channel
    if !transport.is_finished() {
        let _ = transport.await;
    }
    if let Err(e) = dispatcher.await {
        error!(error = %e, "dispatcher task failed");
    }
    let _ = reporter.await;

    let snapshot = counter.snapshot();
    info!(valid = snapshot.valid, invalid = snapshot.invalid, "Relay stopped: {}", snapshot);

    exit
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
