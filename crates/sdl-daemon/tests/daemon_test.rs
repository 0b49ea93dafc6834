//! Integration tests for the `sdl-daemon` binary.
//!
//! Exercise argument parsing and the scripted demo scenario without
//! touching the invoking user's real configuration directories.
#![allow(clippy::unwrap_used)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

fn daemon_cmd(home: &std::path::Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("sdl-daemon");
    cmd.env("HOME", home).env("XDG_CONFIG_HOME", home).env("XDG_DATA_HOME", home);
    cmd
}

#[test]
fn help_lists_the_resumption_store_flag() {
    let home = tempfile::tempdir().unwrap();
    let output = daemon_cmd(home.path()).arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(predicate::str::contains("resumption-store").eval(&stdout));
}

#[test]
fn demo_scenario_runs_to_completion() {
    let home = tempfile::tempdir().unwrap();
    let store = home.path().join("resumption.json");
    let output = daemon_cmd(home.path())
        .arg("--resumption-store")
        .arg(&store)
        .arg("-v")
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let combined = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(combined.contains("demo application registered"));
    assert!(combined.contains("resumption requested for demo application"));
}
