//! Integration tests for the todo-mcp CLI

use assert_cmd::cargo;
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a Command for the todo-mcp binary
fn todo_mcp() -> Command {
    let mut cmd = Command::new(cargo::cargo_bin!("todo-mcp"));
    for var in [
        "TODO_MCP_WORKING_DIR",
        "TODO_MCP_TEMPLATE_DIR",
        "TODO_MCP_AUTO_ARCHIVE",
        "TODO_MCP_LOG_LEVEL",
        "TODO_MCP_CONFIG",
        "TODO_MCP_LOG_JSON",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn test_help() {
    todo_mcp()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("markdown todos"))
        .stdout(predicate::str::contains("--working-dir"));
}

#[test]
fn test_version() {
    todo_mcp()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_tools_lists_catalogue() {
    let temp = TempDir::new().unwrap();
    todo_mcp()
        .arg("--working-dir")
        .arg(temp.path())
        .arg("tools")
        .assert()
        .success()
        .stdout(predicate::str::contains("todo_create_multi"))
        .stdout(predicate::str::contains("todo_reorder_sections"));
}

#[test]
fn test_config_reflects_overrides() {
    let temp = TempDir::new().unwrap();
    todo_mcp()
        .arg("--working-dir")
        .arg(temp.path())
        .args(["--auto-archive", "false"])
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("auto_archive = false"))
        .stdout(predicate::str::contains("max_attempts = 3"));
}

#[test]
fn test_config_file_is_loaded() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join(".claude")).unwrap();
    std::fs::write(
        temp.path().join(".claude/todo-mcp.toml"),
        "request_timeout_secs = 12\n\n[factory]\nidle_threshold_secs = 60\n",
    )
    .unwrap();

    todo_mcp()
        .arg("--working-dir")
        .arg(temp.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("request_timeout_secs = 12"))
        .stdout(predicate::str::contains("idle_threshold_secs = 60"));
}

#[test]
fn test_missing_working_dir_fails() {
    todo_mcp()
        .arg("--working-dir")
        .arg("/definitely/not/a/real/dir")
        .arg("serve")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_stdio_round_trip() {
    let temp = TempDir::new().unwrap();
    let input = [
        r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
        r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
        r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"todo_create","arguments":{"task":"Wire up CI"}}}"#,
    ]
    .join("\n");

    todo_mcp()
        .arg("--working-dir")
        .arg(temp.path())
        .write_stdin(format!("{input}\n"))
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""protocolVersion":"2025-03-26""#))
        .stdout(predicate::str::contains("todo_search"))
        .stdout(predicate::str::contains(r#""isError":false"#));

    assert!(temp.path().join(".claude/todos/wire-up-ci.md").is_file());
    assert!(temp.path().join(".claude/index").is_dir());
}
