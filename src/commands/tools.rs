//! Tool commands: call-tool and list-tools.

use anyhow::{bail, Context, Result};
use serde_json::Value;

use sandpool::config::Config;
use sandpool::manager::rpc::is_error;

/// Parses `--args`, which must be a JSON object.
pub fn parse_arguments(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw).context("--args is not valid JSON")?;
    if !value.is_object() {
        bail!("--args must be a JSON object, got {value}");
    }
    Ok(value)
}

fn print_result(result: &Value) -> Result<()> {
    if is_error(result) {
        bail!("{}", result.as_str().unwrap_or_default());
    }
    println!("{}", serde_json::to_string_pretty(result)?);
    Ok(())
}

pub async fn call(config: &Config, id: &str, tool: &str, raw_args: &str) -> Result<()> {
    let arguments = parse_arguments(raw_args)?;
    let manager = super::manager(config).await?;
    print_result(&manager.call_tool(id, tool, arguments).await)
}

pub async fn list(config: &Config, id: &str, tool_type: Option<&str>) -> Result<()> {
    let manager = super::manager(config).await?;
    print_result(&manager.list_tools(id, tool_type).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_arguments() {
        assert_eq!(
            parse_arguments(r#"{"command": "ls"}"#).unwrap(),
            json!({"command": "ls"})
        );
        assert!(parse_arguments("[1, 2]").is_err());
        assert!(parse_arguments("{not json").is_err());
    }

    #[test]
    fn test_error_payload_fails_command() {
        assert!(print_result(&json!("Error: boom")).is_err());
        assert!(print_result(&json!({"ok": true})).is_ok());
    }
}
