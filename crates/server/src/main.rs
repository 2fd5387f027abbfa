mod agents;
mod api;
mod approvals;
mod bootstrap;
mod compliance;
mod evals;
mod events;
mod health;
mod policies;

use anyhow::Result;
use conductor_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use conductor_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other work.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let router = api::router(app.state.clone()).merge(health::router(app.db_pool.clone()));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        bind_address = %address,
        "conductor-server started"
    );

    // In-flight requests get the configured grace period to drain
    // after the shutdown signal; stragglers are cut off.
    let grace = std::time::Duration::from_secs(app.config.server.graceful_shutdown_secs);
    let (drained_tx, drained_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        wait_for_shutdown().await;
        let _ = drained_tx.send(());
    });

    tokio::select! {
        result = server => result?,
        _ = async {
            let _ = drained_rx.await;
            tokio::time::sleep(grace).await;
        } => {
            tracing::warn!(
                event_name = "system.server.shutdown_deadline",
                grace_secs = grace.as_secs(),
                "graceful shutdown deadline reached, dropping remaining connections"
            );
        }
    }

    tracing::info!(event_name = "system.server.stopping", "conductor-server stopping");
    app.db_pool.close().await;

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            error = %error,
            "failed to install shutdown signal handler"
        );
    }
}
