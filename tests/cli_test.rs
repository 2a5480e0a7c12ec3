//! Tests for the offline subcommands and client-side argument checks

use assert_cmd::prelude::*;
use predicates::prelude::*;
use serde_json::Value;
use std::process::Command;

#[test]
fn test_tools_prints_catalog() {
    let output = Command::cargo_bin("compute-mcp")
        .unwrap()
        .arg("tools")
        .output()
        .unwrap();
    assert!(output.status.success());

    let catalog: Value = serde_json::from_slice(&output.stdout).unwrap();
    let tools = catalog.as_array().unwrap();
    assert_eq!(tools.len(), 15);
    assert!(tools.iter().all(|tool| tool["inputSchema"].is_object()));
}

#[test]
fn test_functions_lists_builtins() {
    Command::cargo_bin("compute-mcp")
        .unwrap()
        .arg("functions")
        .assert()
        .success()
        .stdout(predicate::str::contains("count_words"))
        .stdout(predicate::str::contains("reduce_sum"));
}

#[test]
fn test_call_rejects_non_object_arguments() {
    Command::cargo_bin("compute-mcp")
        .unwrap()
        .args(["call", "list_futures", "--args", "[1, 2]"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("must be a JSON object"));
}

#[test]
fn test_call_reports_unreachable_server() {
    Command::cargo_bin("compute-mcp")
        .unwrap()
        .args(["call", "list_futures", "--url", "http://127.0.0.1:9/mcp"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Cannot reach"));
}
