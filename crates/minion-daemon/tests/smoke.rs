//! Smoke tests for the `minion` binary.
//!
//! Exercises the CLI against temporary roots without starting an MCP
//! session.

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn minion() -> Command {
    Command::new(env!("CARGO_BIN_EXE_minion"))
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// A temp dir holding a root, a prebuilt mock service and a config using it.
#[cfg(unix)]
fn workspace() -> TempDir {
    use std::os::unix::fs::PermissionsExt;

    let tmp = TempDir::new().unwrap();
    let sources = tmp.path().join("sources");
    std::fs::create_dir_all(&sources).unwrap();
    let mock = sources.join("mock");
    std::fs::write(
        &mock,
        "#!/bin/sh\ncase \"$1\" in\n  install) echo installed ;;\n  status) echo 'status: running' ;;\n  stats) echo '{\"uptime\": 42}' ;;\nesac\n",
    )
    .unwrap();
    std::fs::set_permissions(&mock, std::fs::Permissions::from_mode(0o755)).unwrap();

    std::fs::write(
        tmp.path().join("minion.toml"),
        format!(
            "root = {:?}\n\n[build]\nprebuilt_dir = {:?}\n",
            tmp.path().join("root"),
            sources
        ),
    )
    .unwrap();
    tmp
}

fn run_in(dir: &Path, args: &[&str]) -> Output {
    minion()
        .args(args)
        .current_dir(dir)
        .env("HOME", dir)
        .env("MINION_LOG", "warn")
        .output()
        .expect("failed to execute minion")
}

// ── Help / basic CLI ──────────────────────────────────────────────────────────

#[test]
fn binary_responds_to_help() {
    let output = minion().arg("--help").output().expect("failed to execute minion");
    assert!(output.status.success(), "minion --help should exit 0");
    let text = stdout(&output);
    assert!(text.contains("supervisor"));
    assert!(text.contains("serve"), "help output should list serve subcommand");
    assert!(text.contains("list"), "help output should list list subcommand");
    assert!(text.contains("call"), "help output should list call subcommand");
}

#[test]
fn unknown_subcommand_exits_nonzero() {
    let output = minion()
        .arg("nonexistent-subcommand")
        .output()
        .expect("failed to execute minion");
    assert!(!output.status.success(), "unknown subcommand should exit non-zero");
}

// ── Config ────────────────────────────────────────────────────────────────────

#[test]
fn malformed_config_fails_cleanly() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("broken.toml");
    std::fs::write(&config, "root = [").unwrap();

    let output = run_in(tmp.path(), &["--config", config.to_str().unwrap(), "list"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("config"), "stderr: {}", stderr(&output));
}

// ── list / call ───────────────────────────────────────────────────────────────

#[test]
fn list_on_empty_root_prints_empty_map() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("root");
    let output = run_in(tmp.path(), &["--root", root.to_str().unwrap(), "list"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "{}");
}

#[cfg(unix)]
#[test]
fn call_drives_a_full_lifecycle() {
    let tmp = workspace();
    let dir = tmp.path();

    let output = run_in(
        dir,
        &["call", "Service.Install", r#"{"id":"echo","sourceLocator":"mock","params":{"mode":"fast"}}"#],
    );
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output), "installed\n");

    let listed: serde_json::Value = serde_json::from_str(&stdout(&run_in(dir, &["list"]))).unwrap();
    assert_eq!(listed["echo"]["params"]["mode"], "fast");

    let output = run_in(dir, &["call", "Service.Status", r#""echo""#]);
    assert_eq!(stdout(&output), "status: running\n");

    let output = run_in(dir, &["call", "Service.Stats", r#"{"id":"echo"}"#]);
    let stats: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(stats["uptime"], 42);

    let output = run_in(dir, &["call", "Service.Remove", r#""echo""#]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&run_in(dir, &["list"])).trim(), "{}");
}

#[cfg(unix)]
#[test]
fn call_reports_structured_errors() {
    let tmp = workspace();

    let output = run_in(tmp.path(), &["call", "Service.Status", r#""ghost""#]);
    assert!(!output.status.success());
    let error: serde_json::Value = serde_json::from_str(stdout(&output).trim()).unwrap();
    assert_eq!(error["kind"], "not_found");

    let output = run_in(tmp.path(), &["call", "Service.Upgrade"]);
    assert!(!output.status.success());
    assert!(stdout(&output).contains("unknown_method"));
}
