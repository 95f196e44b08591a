//! `sandpool serve`: run a local manager behind the HTTP server.

use anyhow::{Context, Result};
use colored::Colorize;
use std::sync::Arc;
use tracing::{info, warn};

use sandpool::config::Config;
use sandpool::manager::LocalManager;
use sandpool::{server, SandboxManagerApi};

/// Address to listen on: the flag, then `server.bind`.
pub fn resolve_bind(config: &Config, bind: Option<String>) -> String {
    bind.unwrap_or_else(|| config.server.bind.clone())
}

pub async fn run(mut config: Config, bind: Option<String>) -> Result<()> {
    if config.manager.base_url.take().is_some() {
        warn!("Ignoring manager.base_url: serve always manages containers locally");
    }
    let bind = resolve_bind(&config, bind);
    let token = config.manager.bearer_token.clone();
    if token.is_none() {
        warn!("No bearer token configured; the manager API is unauthenticated");
    }

    let manager: Arc<dyn SandboxManagerApi> = Arc::new(
        LocalManager::from_config(&config)
            .await
            .context("Failed to start local manager")?,
    );

    println!(
        "{} Serving {} sandboxes on {}",
        "▶".green(),
        config.manager.default_type.to_string().cyan(),
        bind.cyan()
    );

    let result = server::serve(&bind, manager.clone(), token, shutdown_signal()).await;

    info!("Releasing all sandboxes before exit");
    manager.cleanup().await;
    result.context("Manager server failed")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
