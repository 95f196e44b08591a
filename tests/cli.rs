//! Integration tests for the sandpool CLI.
//!
//! These run the actual binary and check output and exit codes. Nothing
//! here needs Docker or Redis: commands either stay offline or talk to a
//! manager URL nobody listens on.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

// -----------------------------------------------------------------------------
// Test helpers
// -----------------------------------------------------------------------------

/// Address with no listener, so remote calls fail fast.
const DEAD_MANAGER: &str = "http://127.0.0.1:9";

/// Creates a Command for the sandpool binary with a clean environment.
#[allow(deprecated)]
fn sandpool() -> Command {
    let mut cmd = Command::cargo_bin("sandpool").expect("failed to find sandpool binary");
    cmd.env_remove("SANDPOOL_BASE_URL")
        .env_remove("SANDPOOL_TOKEN")
        .env_remove("RUST_LOG");
    cmd
}

/// Creates a Command for sandpool running in a specific directory.
fn sandpool_in(dir: &TempDir) -> Command {
    let mut cmd = sandpool();
    cmd.current_dir(dir.path());
    cmd
}

// -----------------------------------------------------------------------------
// Help and version tests
// -----------------------------------------------------------------------------

#[test]
fn test_help_shows_all_commands() {
    sandpool()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("create"))
        .stdout(predicate::str::contains("release"))
        .stdout(predicate::str::contains("connect"))
        .stdout(predicate::str::contains("release-session"))
        .stdout(predicate::str::contains("call-tool"))
        .stdout(predicate::str::contains("list-tools"))
        .stdout(predicate::str::contains("cleanup"))
        .stdout(predicate::str::contains("types"));
}

#[test]
fn test_version_shows_version() {
    sandpool()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sandpool"));
}

#[test]
fn test_create_help_shows_options() {
    sandpool()
        .args(["create", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--type"))
        .stdout(predicate::str::contains("--env"))
        .stdout(predicate::str::contains("--pool"))
        .stdout(predicate::str::contains("--storage-path"));
}

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

#[test]
fn test_types_lists_builtins() {
    let dir = TempDir::new().unwrap();
    sandpool_in(&dir)
        .arg("types")
        .assert()
        .success()
        .stdout(predicate::str::contains("base*"))
        .stdout(predicate::str::contains("browser"))
        .stdout(predicate::str::contains("filesystem"))
        .stdout(predicate::str::contains("gui"))
        .stdout(predicate::str::contains("training"))
        .stdout(predicate::str::contains("sandpool/runtime-base:latest"));
}

#[test]
fn test_types_uses_config_file() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("sandpool.toml"),
        r#"
[manager]
default_type = "gui"
image_tag = "v9"
"#,
    )
    .unwrap();

    sandpool_in(&dir)
        .arg("types")
        .assert()
        .success()
        .stdout(predicate::str::contains("gui*"))
        .stdout(predicate::str::contains("sandpool/runtime-training:v9"));
}

#[test]
fn test_explicit_config_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("custom.toml");
    fs::write(&path, "[manager]\nimage_tag = \"nightly\"\n").unwrap();

    sandpool()
        .arg("--config")
        .arg(&path)
        .arg("types")
        .assert()
        .success()
        .stdout(predicate::str::contains("sandpool/runtime-base:nightly"));
}

// -----------------------------------------------------------------------------
// Config errors
// -----------------------------------------------------------------------------

#[test]
fn test_malformed_config_fails() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("sandpool.toml"), "[manager\npool_size =").unwrap();

    sandpool_in(&dir)
        .arg("types")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse config file"));
}

#[test]
fn test_shared_prefix_is_rejected() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("sandpool.toml"),
        r#"
[manager]
container_prefix = "same_"
session_prefix = "same_"
"#,
    )
    .unwrap();

    sandpool_in(&dir)
        .arg("types")
        .assert()
        .failure()
        .stderr(predicate::str::contains("must differ"));
}

#[test]
fn test_invalid_base_url_is_rejected() {
    let dir = TempDir::new().unwrap();
    sandpool_in(&dir)
        .args(["--base-url", "ftp://manager", "info", "abc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("http(s) URL"));
}

// -----------------------------------------------------------------------------
// Manager commands
// -----------------------------------------------------------------------------

#[test]
fn test_local_mode_without_redis_is_refused() {
    let dir = TempDir::new().unwrap();
    sandpool_in(&dir)
        .arg("create")
        .assert()
        .failure()
        .stderr(predicate::str::contains("keeps no state"));
}

#[test]
fn test_info_against_unreachable_manager() {
    let dir = TempDir::new().unwrap();
    sandpool_in(&dir)
        .args(["--base-url", DEAD_MANAGER, "info", "abc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Sandbox not found: abc"));
}

#[test]
fn test_base_url_from_environment() {
    let dir = TempDir::new().unwrap();
    sandpool_in(&dir)
        .env("SANDPOOL_BASE_URL", DEAD_MANAGER)
        .args(["release", "abc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to release abc"));
}

#[test]
fn test_create_rejects_bad_env() {
    let dir = TempDir::new().unwrap();
    sandpool_in(&dir)
        .args(["--base-url", DEAD_MANAGER, "create", "--env", "=oops"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid --env"));
}

#[test]
fn test_create_pool_rejects_env() {
    let dir = TempDir::new().unwrap();
    sandpool_in(&dir)
        .args(["--base-url", DEAD_MANAGER, "create", "--pool", "--env", "A=1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--pool cannot be combined"));
}

#[test]
fn test_call_tool_rejects_non_object_args() {
    let dir = TempDir::new().unwrap();
    sandpool_in(&dir)
        .args([
            "--base-url",
            DEAD_MANAGER,
            "call-tool",
            "abc",
            "run_shell_command",
            "--args",
            "[1, 2]",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("must be a JSON object"));
}

#[test]
fn test_call_tool_against_unreachable_manager() {
    let dir = TempDir::new().unwrap();
    sandpool_in(&dir)
        .args([
            "--base-url",
            DEAD_MANAGER,
            "call-tool",
            "abc",
            "run_shell_command",
            "--args",
            r#"{"command": "ls"}"#,
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error: "));
}

#[test]
fn test_logs_require_local_mode() {
    let dir = TempDir::new().unwrap();
    sandpool_in(&dir)
        .args(["--base-url", DEAD_MANAGER, "logs", "abc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("only available"));
}

// -----------------------------------------------------------------------------
// Error handling
// -----------------------------------------------------------------------------

#[test]
fn test_unknown_command_suggests_help() {
    sandpool()
        .arg("teleport")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}
