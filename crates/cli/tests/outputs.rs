use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn write_temp_file(prefix: &str, contents: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    dir.push("faultline-tests");
    let _ = std::fs::create_dir_all(&dir);

    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let path = dir.join(format!("{}-{}.yaml", prefix, nonce));
    std::fs::write(&path, contents).expect("Failed to write temp file");
    path
}

#[test]
fn test_headless_run_writes_snapshot() {
    let config = write_temp_file(
        "config-headless",
        r#"
schema_version: "1.0"
target:
  memory: "4KiB"
  load_base: 0x8000
"#,
    );

    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let snapshot_path = std::env::temp_dir().join(format!("faultline-snapshot-{}.json", nonce));
    let _ = std::fs::remove_file(&snapshot_path);

    let output = Command::new(env!("CARGO_BIN_EXE_faultline"))
        .args([
            "--config",
            config.to_str().unwrap(),
            "--no-listen",
            "--snapshot",
            snapshot_path.to_str().unwrap(),
        ])
        .output()
        .expect("Failed to execute faultline");

    assert!(output.status.success());
    assert!(snapshot_path.exists());

    let snapshot_content = std::fs::read_to_string(&snapshot_path).unwrap();
    let snapshot: serde_json::Value = serde_json::from_str(&snapshot_content).unwrap();
    assert_eq!(snapshot["type"], "faultline_target");
    assert_eq!(snapshot["stop_reason"], "halted");
    assert_eq!(snapshot["breakpoint_faults"], 1);

    let regs = snapshot["regs"].as_array().unwrap();
    assert_eq!(regs.len(), 17);
    // the demo loop counts r1 down to zero
    assert_eq!(regs[1], 0);

    let _ = std::fs::remove_file(&snapshot_path);
}

#[test]
fn test_budget_stop_reason_in_snapshot() {
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let snapshot_path = std::env::temp_dir().join(format!("faultline-budget-{}.json", nonce));

    let output = Command::new(env!("CARGO_BIN_EXE_faultline"))
        .args([
            "--no-listen",
            "--max-steps",
            "2",
            "--snapshot",
            snapshot_path.to_str().unwrap(),
        ])
        .output()
        .expect("Failed to execute faultline");

    assert!(output.status.success());
    let snapshot: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&snapshot_path).unwrap()).unwrap();
    assert_eq!(snapshot["stop_reason"], "budget_exhausted");

    let _ = std::fs::remove_file(&snapshot_path);
}

#[test]
fn test_profile_counts_every_loop_trip() {
    let output = Command::new(env!("CARGO_BIN_EXE_faultline"))
        .args(["--no-listen", "--profile"])
        .output()
        .expect("Failed to execute faultline");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Execution profile"));
    // the store in the demo loop body retires three times
    assert!(stdout.contains("0x00008008: 3"));
}

#[test]
fn test_missing_config_is_an_error() {
    let output = Command::new(env!("CARGO_BIN_EXE_faultline"))
        .args(["--config", "/nonexistent/faultline.yaml", "--no-listen"])
        .output()
        .expect("Failed to execute faultline");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to open target config"));
}

#[test]
fn test_load_base_at_end_of_address_space_is_an_error() {
    let config = write_temp_file(
        "config-high-base",
        r#"
schema_version: "1.0"
target:
  memory: "4KiB"
  load_base: 0xFFFFFFF0
"#,
    );

    let output = Command::new(env!("CARGO_BIN_EXE_faultline"))
        .args(["--config", config.to_str().unwrap(), "--no-listen"])
        .output()
        .expect("Failed to execute faultline");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("address space"));
}

#[test]
fn test_invalid_config_is_an_error() {
    let config = write_temp_file(
        "config-bad-version",
        r#"
schema_version: "9.9"
target:
  memory: "4KiB"
  load_base: 0x8000
"#,
    );

    let output = Command::new(env!("CARGO_BIN_EXE_faultline"))
        .args(["--config", config.to_str().unwrap(), "--no-listen"])
        .output()
        .expect("Failed to execute faultline");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("schema_version"));
}
