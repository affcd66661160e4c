//! Integration tests for the `spindle` binary.

use std::process::Command;

fn spindle() -> Command {
    Command::new(env!("CARGO_BIN_EXE_spindle"))
}

// ────────────────────────────────────────────────────────────────────────────
// config
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_config_prints_default_toml() {
    let output = spindle().arg("config").output().expect("spawn spindle");
    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).unwrap();
    assert!(text.contains("name = \"reactor\""));
    assert!(text.contains("[level1]"));
    assert!(text.contains("tick_ms = 10"));
}

#[test]
fn test_config_check_accepts_valid_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reactor.toml");
    std::fs::write(&path, "name = \"edge\"\n\n[level1]\ntick_ms = 5\nslots = 128\n").unwrap();

    let output = spindle()
        .args(["config", "--check"])
        .arg(&path)
        .output()
        .expect("spawn spindle");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("ok"));
}

#[test]
fn test_config_check_rejects_misaligned_ticks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[level1]\ntick_ms = 10\nslots = 64\n\n[level2]\ntick_ms = 255\nslots = 64\n").unwrap();

    let output = spindle()
        .args(["config", "--check"])
        .arg(&path)
        .output()
        .expect("spawn spindle");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("not evenly divisible"));
}

// ────────────────────────────────────────────────────────────────────────────
// run
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_run_prints_report() {
    let output = spindle()
        .args(["run", "--tasks", "50", "--duration-ms", "300", "--interval-ms", "20"])
        .output()
        .expect("spawn spindle");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let text = String::from_utf8(output.stdout).unwrap();
    assert!(text.contains("Reactor             reactor-0"));
    assert!(text.contains("Size                50"));
    assert!(text.contains("Polls"));
}

#[test]
fn test_run_json_covers_every_reactor() {
    let output = spindle()
        .args(["run", "--reactors", "2", "--tasks", "10", "--duration-ms", "200", "--json"])
        .output()
        .expect("spawn spindle");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let reactors = stats.as_array().unwrap();
    assert_eq!(reactors.len(), 2);
    assert_eq!(reactors[0]["name"], "reactor-0");
    assert_eq!(reactors[1]["size"], 10);
    assert!(reactors[0]["wake_lists"]["count"].as_u64().unwrap() > 0);
}

#[test]
fn test_run_missing_config_fails() {
    let output = spindle()
        .args(["run", "--config", "/nonexistent/spindle.toml", "--duration-ms", "10"])
        .output()
        .expect("spawn spindle");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to load"));
}
