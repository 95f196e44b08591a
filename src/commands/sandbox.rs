//! Single-sandbox commands: create, release, start, stop, info, status,
//! logs and cleanup.

use anyhow::{bail, Result};
use colored::Colorize;
use std::collections::BTreeMap;
use std::fmt::Write;

use sandpool::config::Config;
use sandpool::manager::rpc::CreateRequest;
use sandpool::manager::LocalManager;
use sandpool::{ContainerModel, ContainerStatus, SandboxType};

/// Arguments of `sandpool create`.
pub struct CreateOptions {
    /// Sandbox type tag.
    pub sandbox_type: Option<String>,
    /// Raw `--env` values.
    pub env: Vec<String>,
    /// Prefer the warm pool.
    pub pool: bool,
    /// Host workspace directory.
    pub mount_dir: Option<String>,
    /// Storage location.
    pub storage_path: Option<String>,
}

/// Parses `KEY=VALUE` pairs. A bare `KEY` is looked up with `lookup`; a
/// missing value stays `None` so the manager can reject it.
pub fn parse_env<L>(pairs: &[String], lookup: L) -> Result<BTreeMap<String, Option<String>>>
where
    L: Fn(&str) -> Option<String>,
{
    let mut env = BTreeMap::new();
    for pair in pairs {
        let (key, value) = match pair.split_once('=') {
            Some((key, value)) => (key.trim(), Some(value.to_string())),
            None => (pair.trim(), lookup(pair.trim())),
        };
        if key.is_empty() {
            bail!("Invalid --env value '{pair}': expected KEY=VALUE");
        }
        env.insert(key.to_string(), value);
    }
    Ok(env)
}

/// Formats a container record for display.
pub fn format_info(model: &ContainerModel) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{}", "━".repeat(50).dimmed());
    let _ = writeln!(out, "{}", format!("   📦 {}", model.container_name).yellow().bold());
    let _ = writeln!(out, "{}", "━".repeat(50).dimmed());
    let _ = writeln!(out, "  Session:    {}", model.session_id.cyan());
    let _ = writeln!(out, "  Container:  {}", model.container_id.cyan());
    let _ = writeln!(out, "  Image:      {}", model.version.cyan());
    let _ = writeln!(out, "  Base URL:   {}", model.base_url.cyan());
    let _ = writeln!(out, "  Browser:    {}", model.browser_url.cyan());
    let _ = writeln!(
        out,
        "  Ports:      {}",
        model
            .ports
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(", ")
            .cyan()
    );
    let _ = writeln!(
        out,
        "  Workspace:  {}",
        model.mount_dir.as_deref().unwrap_or("none").cyan()
    );
    let _ = writeln!(
        out,
        "  Storage:    {}",
        model.storage_path.as_deref().unwrap_or("none").cyan()
    );
    let _ = writeln!(
        out,
        "  Created:    {}",
        model
            .created_at
            .format("%Y-%m-%d %H:%M:%S UTC")
            .to_string()
            .cyan()
    );
    let _ = write!(out, "{}", "━".repeat(50).dimmed());
    out
}

/// Colors a status for display.
pub fn format_status(status: &ContainerStatus) -> String {
    let text = status.to_string();
    match status {
        ContainerStatus::Running => text.green().bold().to_string(),
        ContainerStatus::Created | ContainerStatus::Pending => text.yellow().to_string(),
        ContainerStatus::Exited | ContainerStatus::Failed => text.red().to_string(),
        ContainerStatus::Other(_) => text.dimmed().to_string(),
    }
}

pub async fn create(config: &Config, options: CreateOptions) -> Result<()> {
    let sandbox_type = options.sandbox_type.map(SandboxType::new);
    let environment = parse_env(&options.env, |key| std::env::var(key).ok())?;
    let manager = super::manager(config).await?;

    let created = if options.pool {
        if !environment.is_empty() || options.mount_dir.is_some() || options.storage_path.is_some()
        {
            bail!("--pool cannot be combined with --env, --mount-dir or --storage-path");
        }
        manager.create_from_pool(sandbox_type).await
    } else {
        let request = CreateRequest {
            sandbox_type,
            mount_dir: options.mount_dir,
            storage_path: options.storage_path,
            environment: (!environment.is_empty()).then_some(environment),
        };
        manager.create(request).await?
    };

    match created {
        Some(name) => {
            println!("{name}");
            Ok(())
        }
        None => bail!("Sandbox could not be created (see logs)"),
    }
}

pub async fn release(config: &Config, id: &str) -> Result<()> {
    let manager = super::manager(config).await?;
    if !manager.release(id).await {
        bail!("Failed to release {id}");
    }
    println!("{} Released {}", "✓".green(), id.cyan());
    Ok(())
}

pub async fn start(config: &Config, id: &str) -> Result<()> {
    let manager = super::manager(config).await?;
    if !manager.start(id).await {
        bail!("Failed to start {id}");
    }
    println!("{} Started {}", "✓".green(), id.cyan());
    Ok(())
}

pub async fn stop(config: &Config, id: &str) -> Result<()> {
    let manager = super::manager(config).await?;
    if !manager.stop(id).await {
        bail!("Failed to stop {id}");
    }
    println!("{} Stopped {}", "✓".green(), id.cyan());
    Ok(())
}

pub async fn info(config: &Config, id: &str) -> Result<()> {
    let manager = super::manager(config).await?;
    match manager.get_info(id).await {
        Some(model) => {
            println!("{}", format_info(&model));
            Ok(())
        }
        None => bail!("Sandbox not found: {id}"),
    }
}

pub async fn status(config: &Config, id: &str) -> Result<()> {
    let manager = super::manager(config).await?;
    match manager.get_status(id).await {
        Some(status) => {
            println!("{}", format_status(&status));
            Ok(())
        }
        None => bail!("Sandbox not found: {id}"),
    }
}

pub async fn logs(config: &Config, id: &str, tail: Option<usize>) -> Result<()> {
    if config.is_remote() {
        bail!("Logs are only available when managing containers locally");
    }
    super::ensure_persistent(config)?;

    let manager = LocalManager::from_config(config).await?;
    match manager.get_logs(id, tail).await {
        Some(logs) => {
            print!("{logs}");
            Ok(())
        }
        None => bail!("No logs for {id}"),
    }
}

pub async fn cleanup(config: &Config) -> Result<()> {
    let manager = super::manager(config).await?;
    manager.cleanup().await;
    println!("{} All sandboxes released", "✓".green());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_parse_env_pairs() {
        let env = parse_env(
            &["A=1".to_string(), "B=x=y".to_string(), "EMPTY=".to_string()],
            no_env,
        )
        .unwrap();
        assert_eq!(env["A"].as_deref(), Some("1"));
        assert_eq!(env["B"].as_deref(), Some("x=y"));
        assert_eq!(env["EMPTY"].as_deref(), Some(""));
    }

    #[test]
    fn test_parse_env_pass_through() {
        let lookup = |key: &str| (key == "HOME_DIR").then(|| "/home/me".to_string());
        let env = parse_env(&["HOME_DIR".to_string(), "MISSING".to_string()], lookup).unwrap();
        assert_eq!(env["HOME_DIR"].as_deref(), Some("/home/me"));
        assert_eq!(env["MISSING"], None);
    }

    #[test]
    fn test_parse_env_rejects_empty_key() {
        assert!(parse_env(&["=value".to_string()], no_env).is_err());
        assert!(parse_env(&[String::new()], no_env).is_err());
    }

    #[test]
    fn test_format_info() {
        let model = ContainerModel {
            session_id: "abc".to_string(),
            container_id: "c1".to_string(),
            container_name: "sandpool_container_abc".to_string(),
            base_url: "http://localhost:40000".to_string(),
            browser_url: "http://localhost:40000/browser/tok".to_string(),
            front_browser_ws: String::new(),
            client_browser_ws: String::new(),
            artifacts_sio: String::new(),
            ports: vec![40000],
            mount_dir: None,
            storage_path: Some("/data/abc".to_string()),
            runtime_token: "tok".to_string(),
            version: "sandpool/runtime-base:latest".to_string(),
            created_at: Utc::now(),
        };
        let out = format_info(&model);
        assert!(out.contains("sandpool_container_abc"));
        assert!(out.contains("40000"));
        assert!(out.contains("none"));
        assert!(out.contains("/data/abc"));
    }

    #[test]
    fn test_format_status() {
        assert!(format_status(&ContainerStatus::Running).contains("running"));
        assert!(format_status(&ContainerStatus::Other("paused".to_string())).contains("paused"));
    }
}
