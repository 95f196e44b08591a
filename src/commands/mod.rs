//! CLI command implementations.
//!
//! Parsing and formatting are pure functions; manager calls and printing
//! happen only at the top of each command.

pub mod sandbox;
pub mod serve;
pub mod session;
pub mod tools;
pub mod types;

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;

use sandpool::{build_manager, Config, SandboxManagerApi};

/// Loads the config file and applies command-line overrides.
pub fn load_config(
    path: Option<&Path>,
    base_url: Option<String>,
    token: Option<String>,
) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load_from(path)?,
        None => {
            let cwd = std::env::current_dir().context("Failed to get current directory")?;
            Config::load(&cwd)?
        }
    };

    apply_overrides(&mut config, base_url, token);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut Config, base_url: Option<String>, token: Option<String>) {
    if let Some(base_url) = base_url {
        config.manager.base_url = Some(base_url);
    }
    if let Some(token) = token {
        config.manager.bearer_token = Some(token);
    }
}

/// Refuses local mode without shared stores: a one-shot process would
/// forget every container it created.
pub fn ensure_persistent(config: &Config) -> Result<()> {
    if !config.is_remote() && config.redis.is_none() {
        bail!(
            "Local mode keeps no state between invocations without [redis]. \
             Run `sandpool serve` and pass --base-url, or configure [redis]."
        );
    }
    Ok(())
}

/// Manager for one-shot commands.
pub async fn manager(config: &Config) -> Result<Arc<dyn SandboxManagerApi>> {
    ensure_persistent(config)?;
    Ok(build_manager(config).await?)
}
