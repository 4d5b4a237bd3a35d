//! Drives the reference `echo-service` binary the way the supervisor does.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use tempfile::TempDir;

fn invoke(service_path: &Path, command: &str, stdin: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_echo-service"))
        .arg(command)
        .current_dir(service_path)
        .env_clear()
        .env("SERVICE_ID", "echo")
        .env("SERVICE_URL", "example/echo-service")
        .env("SERVICE_PATH", service_path)
        .env("MINION_ROOT", service_path)
        .env("CONFIG_PATH", service_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn echo-service");
    // A child that exits without reading stdin closes the pipe first.
    if let Err(e) = child.stdin.take().unwrap().write_all(stdin.as_bytes()) {
        assert_eq!(e.kind(), std::io::ErrorKind::BrokenPipe, "failed to write stdin: {e}");
    }
    child.wait_with_output().unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn lifecycle_round_trip() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();

    assert!(invoke(dir, "install", r#"{"mode": "fast"}"#).status.success());
    assert_eq!(stdout(&invoke(dir, "status", "{}")), "status: stopped\n");

    assert!(invoke(dir, "start", "{}").status.success());
    assert_eq!(stdout(&invoke(dir, "status", "{}")), "status: running\n");

    let stats: serde_json::Value = serde_json::from_str(&stdout(&invoke(dir, "stats", "{}"))).unwrap();
    assert_eq!(stats["mode"], "fast");
    assert_eq!(stats["running"], true);
    assert_eq!(stats["starts"], 1);

    assert!(invoke(dir, "stop", "{}").status.success());
    assert!(invoke(dir, "remove", "{}").status.success());
    assert!(!dir.join("echo-state.json").exists());
}

#[test]
fn unknown_command_fails_with_message() {
    let tmp = TempDir::new().unwrap();
    let output = invoke(tmp.path(), "restart", "{}");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).starts_with("error: "));
}

#[test]
fn missing_environment_fails() {
    let output = Command::new(env!("CARGO_BIN_EXE_echo-service"))
        .arg("status")
        .env_clear()
        .output()
        .unwrap();
    assert!(!output.status.success());
}
