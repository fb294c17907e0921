//! Startup helpers for the relay server.
//!
//! Configuration comes from `RELAY_*` environment variables layered over the
//! defaults; the retention scheduler runs alongside the HTTP server.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use crate::conversations::core::config::RelayConfig;
use crate::conversations::retention::scheduler::RetentionScheduler;
use crate::server::{self, AppState};

/// Run the relay server until it exits.
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting chat-relay v{}", env!("CARGO_PKG_VERSION"));

    let config = config_from_env();
    let port = config.server.port;

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    let result = rt.block_on(async {
        let state = AppState::new(config).await?;

        let scheduler = RetentionScheduler::new(
            Arc::clone(&state.scopes),
            state.config.retention.clone(),
        );
        let _worker = scheduler.spawn();

        server::run_server(state, port).await
    });

    if let Err(e) = result {
        tracing::error!("Server error: {e}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

/// Build the relay configuration from environment variables.
#[must_use]
pub fn config_from_env() -> RelayConfig {
    let mut config = RelayConfig::default();

    if let Ok(dir) = std::env::var("RELAY_DATA_DIR") {
        config.storage.data_dir = PathBuf::from(dir);
    }
    if let Ok(url) = std::env::var("RELAY_OLLAMA_URL") {
        config.generator.base_url = Some(url);
    }
    if let Ok(model) = std::env::var("RELAY_MODEL") {
        config.generator.model = model;
    }
    if let Some(port) = std::env::var("RELAY_PORT").ok().and_then(|p| p.parse().ok()) {
        config.server.port = port;
    }
    if let Some(days) = std::env::var("RELAY_RETENTION_DAYS")
        .ok()
        .and_then(|d| d.parse::<u64>().ok())
    {
        config.retention.threshold_ms = days.saturating_mul(86_400_000);
    }
    if let Some(seconds) = std::env::var("RELAY_PURGE_INTERVAL_SECONDS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
    {
        config.retention.purge_interval_seconds = seconds;
    }

    config
}
