use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use nntp_feed::{Daemon, DaemonConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "nntp-feed.toml")]
    config: String,

    /// Log filter (overrides RUST_LOG), e.g. "debug" or "nntp_feed=trace"
    #[arg(short, long)]
    log: Option<String>,
}

fn init_logging(filter: Option<&str>) {
    let filter = match filter {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log.as_deref());

    let config = DaemonConfig::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config))?;
    info!(
        instance = %config.instance_name,
        feeds = config.feeds.len(),
        "Loaded configuration from {}",
        args.config
    );

    let daemon = Daemon::bind(config).await.context("starting daemon")?;
    let stop = daemon.shutdown_handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        stop.shutdown();
    });

    daemon.run().await?;
    Ok(())
}
