//! Session commands: connect and release-session.

use anyhow::{bail, Result};
use colored::Colorize;

use sandpool::config::Config;
use sandpool::SandboxType;

pub async fn connect(
    config: &Config,
    session_id: &str,
    user_id: &str,
    sandbox_types: &[String],
) -> Result<()> {
    let sandbox_types: Vec<SandboxType> = sandbox_types.iter().map(SandboxType::new).collect();
    let manager = super::manager(config).await?;

    let names = manager.connect(session_id, user_id, &sandbox_types).await;
    if names.is_empty() {
        bail!("No sandbox could be bound to {session_id}:{user_id}");
    }
    for name in names {
        println!("{name}");
    }
    Ok(())
}

pub async fn release(config: &Config, session_id: &str, user_id: &str) -> Result<()> {
    let manager = super::manager(config).await?;
    if !manager.release_session(session_id, user_id).await {
        bail!("Some sandboxes of {session_id}:{user_id} could not be released");
    }
    println!(
        "{} Released session {}",
        "✓".green(),
        format!("{session_id}:{user_id}").cyan()
    );
    Ok(())
}
