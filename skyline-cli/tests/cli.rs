//! Command-line tests for the skyline binary

use std::process::Command;

fn skyline() -> Command {
    Command::new(env!("CARGO_BIN_EXE_skyline"))
}

/// Test that skyline --help lists the subcommands
#[test]
fn skyline_help_works() {
    let output = skyline()
        .arg("--help")
        .output()
        .expect("Failed to run skyline --help");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Alert event log"));
    assert!(stdout.contains("serve"));
    assert!(stdout.contains("config"));
}

/// Test that skyline config show prints the project overrides
#[test]
fn skyline_config_show_uses_project_config() {
    let temp_dir = tempfile::tempdir().unwrap();
    std::fs::write(
        temp_dir.path().join("config.toml"),
        "[server]\nport = 9321\n\n[clusters]\neviction = { capacity = 25 }\n",
    )
    .unwrap();

    let output = skyline()
        .args(["config", "show"])
        .env("SKYLINE_PROJECT_CONFIG_DIR", temp_dir.path())
        .output()
        .expect("Failed to run skyline config show");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[server]"));
    assert!(stdout.contains("port = 9321"));
    assert!(stdout.contains("capacity = 25"));
}

/// Test that serve rejects conflicting storage flags
#[test]
fn skyline_serve_rejects_memory_with_data_dir() {
    let output = skyline()
        .args(["serve", "--memory", "--data-dir", "/tmp/skyline"])
        .output()
        .expect("Failed to run skyline serve");

    assert!(!output.status.success());
}
