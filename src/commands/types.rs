//! `sandpool types`: list the registered sandbox types.

use anyhow::Result;
use colored::Colorize;
use std::fmt::Write;

use sandpool::config::Config;
use sandpool::registry::RegisteredSandbox;
use sandpool::SandboxRegistry;

/// Formats registry entries as a table.
pub fn format_types(entries: &[RegisteredSandbox], default_type: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<12} {:<20} {:<40} {}",
        "TYPE".bold(),
        "CLASS".bold(),
        "IMAGE".bold(),
        "DESCRIPTION".bold()
    );
    for entry in entries {
        let tag = entry.config.sandbox_type.as_str();
        let marker = if tag == default_type { "*" } else { " " };
        let _ = writeln!(
            out,
            "{:<12} {:<20} {:<40} {}",
            format!("{tag}{marker}").cyan(),
            entry.class_name,
            entry.config.image_name,
            entry.config.description.dimmed()
        );
    }
    out
}

pub fn run(config: &Config) -> Result<()> {
    let registry = SandboxRegistry::with_builtins(&config.manager.image_tag)?;
    print!(
        "{}",
        format_types(&registry.entries(), config.manager.default_type.as_str())
    );
    Ok(())
}
