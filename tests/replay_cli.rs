use std::fs;
use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use serde_json::Value;
use tempfile::tempdir;

fn binary() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_layout-runtime"));
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn replay_prints_one_json_line_per_event() -> Result<()> {
    let dir = tempdir()?;
    let config = dir.path().join("config.yaml");
    fs::write(&config, "field_process_delay_ms: 0\n")?;

    let assert = binary()
        .args(["replay", "demos/onboarding.yaml", "--config"])
        .arg(&config)
        .args(["--log-level", "error"])
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone())?;
    let lines: Vec<Value> = stdout
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;

    let types: Vec<&str> = lines
        .iter()
        .filter_map(|line| line["event"]["type"].as_str())
        .collect();
    assert_eq!(
        types,
        vec![
            "page_view",
            "page_swipe",
            "page_view",
            "form_display",
            "form_result",
            "gesture",
            "page_view",
            "pager_completed",
            "button_tap",
            "pager_summary",
            "dismiss",
        ]
    );

    let form_result = &lines[4]["event"]["data"]["forms"]["signup"];
    assert_eq!(form_result["children"]["email"]["value"], "jane@example.com");
    assert_eq!(form_result["children"]["subscribe"]["value"], true);

    let dismiss = &lines[10]["event"]["data"];
    assert_eq!(dismiss["reason"], "button_tapped");
    assert_eq!(dismiss["display_time"], "9.50");

    let last = lines.last().expect("dismissal line");
    assert_eq!(last["dismissed"]["cancel"], false);
    Ok(())
}

#[test]
fn missing_scenario_fails() {
    binary()
        .args(["replay", "does-not-exist.yaml"])
        .assert()
        .failure();
}

#[test]
fn loaded_configuration_is_logged() -> Result<()> {
    let dir = tempdir()?;
    let config = dir.path().join("config.yaml");
    fs::write(&config, "field_process_delay_ms: 0\nmin_validation_time_ms: 0\n")?;

    let assert = binary()
        .args(["replay", "demos/onboarding.yaml", "--config"])
        .arg(&config)
        .args(["--log-level", "info"])
        .assert()
        .success();

    let stderr = String::from_utf8(assert.get_output().stderr.clone())?;
    assert!(stderr.contains("configuration loaded"), "stderr: {stderr}");
    assert!(stderr.contains("config.yaml"), "stderr: {stderr}");
    Ok(())
}
