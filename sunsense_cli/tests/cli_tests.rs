//! Integration tests for the sunsense binary.
//!
//! Each test runs against its own data directory and an empty config home
//! so nothing leaks in from the machine running the suite.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::thread;
use tempfile::TempDir;

fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

fn cli(temp_dir: &TempDir) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("sunsense"));
    cmd.env("XDG_CONFIG_HOME", temp_dir.path().join("config"))
        .env("RUST_LOG", "warn")
        .arg("--data-dir")
        .arg(temp_dir.path().join("data"));
    cmd
}

fn sign_in(temp_dir: &TempDir) {
    cli(temp_dir)
        .args(["profile", "set", "--user", "alice", "--skin-type", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Signed in as alice"));
}

fn write_replay(dir: &Path, lines: &[&str]) -> std::path::PathBuf {
    let path = dir.join("replay.jsonl");
    fs::write(&path, lines.join("\n")).expect("Failed to write replay file");
    path
}

const OUTSIDE_START: &str = r#"{"mode":"outside","confidence":0.9,"latitude":51.5,"longitude":0.0,"timestamp":"2024-06-21T12:00:00Z"}"#;
const OUTSIDE_LATER: &str = r#"{"mode":"outside","confidence":0.9,"latitude":51.5,"longitude":0.0,"timestamp":"2024-06-21T12:02:00Z"}"#;
const INSIDE: &str = r#"{"mode":"inside","confidence":0.95,"latitude":51.5,"longitude":0.0,"timestamp":"2024-06-21T12:03:00Z"}"#;

#[test]
fn test_cli_help() {
    let temp_dir = setup_test_dir();
    cli(&temp_dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("UV exposure and vitamin D tracking"));
}

#[test]
fn test_profile_set_and_show() {
    let temp_dir = setup_test_dir();
    sign_in(&temp_dir);

    let output = cli(&temp_dir)
        .args(["profile", "show"])
        .output()
        .expect("Failed to run profile show");
    assert!(output.status.success());

    let profile: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("profile show should print JSON");
    assert_eq!(profile["user_id"], "alice");
    assert_eq!(profile["skin_type"], 2);
}

#[test]
fn test_invalid_skin_type_rejected() {
    let temp_dir = setup_test_dir();
    cli(&temp_dir)
        .args(["profile", "set", "--user", "bob", "--skin-type", "9"])
        .assert()
        .failure();
}

#[test]
fn test_status_without_profile_fails() {
    let temp_dir = setup_test_dir();
    cli(&temp_dir)
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("NoActiveUser"));
}

#[test]
fn test_replay_tracks_outdoor_session() {
    let temp_dir = setup_test_dir();
    sign_in(&temp_dir);
    let replay = write_replay(temp_dir.path(), &[OUTSIDE_START, OUTSIDE_LATER, INSIDE]);

    cli(&temp_dir)
        .arg("replay")
        .arg(&replay)
        .args(["--uv", "6", "--auto-tick"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""event":"session_started""#))
        .stdout(predicate::str::contains(r#""event":"exposure_updated""#))
        .stdout(predicate::str::contains(r#""event":"session_ended""#))
        .stdout(predicate::str::contains("Final state: inside"));

    let store = fs::read_to_string(temp_dir.path().join("data").join("store.json"))
        .expect("store should exist after replay");
    let doc: serde_json::Value = serde_json::from_str(&store).unwrap();
    let sessions = doc["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0]["end_time"].is_string());
    assert!(sessions[0]["session_sed"].as_f64().unwrap() >= 0.18 - 1e-9);

    cli(&temp_dir)
        .args(["status", "--at", "2024-06-21T13:00:00Z"])
        .assert()
        .success()
        .stdout(predicate::str::contains("12:00 - 12:03"))
        .stdout(predicate::str::contains("Vitamin D:"));
}

#[test]
fn test_replay_low_confidence_never_starts_session() {
    let temp_dir = setup_test_dir();
    sign_in(&temp_dir);
    let weak = r#"{"mode":"outside","confidence":0.7,"latitude":51.5,"longitude":0.0,"timestamp":"2024-06-21T12:00:00Z"}"#;
    let replay = write_replay(temp_dir.path(), &[weak]);

    cli(&temp_dir)
        .arg("replay")
        .arg(&replay)
        .args(["--uv", "6"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cold_start_rejected"))
        .stdout(predicate::str::contains("session_started").not());
}

#[test]
fn test_replay_commands_and_sunscreen() {
    let temp_dir = setup_test_dir();
    sign_in(&temp_dir);
    let sunscreen = r#"{"kind":"sunscreen","at":"2024-06-21T12:01:00Z"}"#;
    let replay = write_replay(temp_dir.path(), &[OUTSIDE_START, sunscreen]);

    cli(&temp_dir)
        .arg("replay")
        .arg(&replay)
        .args(["--uv", "6"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""reason":"sunscreen""#));

    assert!(temp_dir.path().join("data").join("sunscreen.json").exists());
}

#[test]
fn test_replay_rejects_malformed_line() {
    let temp_dir = setup_test_dir();
    sign_in(&temp_dir);
    let replay = write_replay(temp_dir.path(), &[OUTSIDE_START, "{not json"]);

    cli(&temp_dir)
        .arg("replay")
        .arg(&replay)
        .assert()
        .failure()
        .stderr(predicate::str::contains("line 2"));
}

#[test]
fn test_sunscreen_apply_and_clear() {
    let temp_dir = setup_test_dir();
    sign_in(&temp_dir);

    cli(&temp_dir)
        .args(["sunscreen", "--at", "2024-06-21T10:00:00Z"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Protected until 2024-06-21T12:00:00"));

    cli(&temp_dir)
        .args(["status", "--at", "2024-06-21T11:00:00Z"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Sunscreen active until 12:00"));

    cli(&temp_dir)
        .args(["sunscreen", "--clear", "--at", "2024-06-21T11:00:00Z"])
        .assert()
        .success();

    cli(&temp_dir)
        .args(["status", "--at", "2024-06-21T11:05:00Z"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Sunscreen active").not());
}

#[test]
fn test_maintenance_creates_vitamin_d_record() {
    let temp_dir = setup_test_dir();
    sign_in(&temp_dir);

    let output = cli(&temp_dir)
        .args(["maintenance", "--at", "2024-06-21T00:05:00Z"])
        .output()
        .expect("Failed to run maintenance");
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["date"], "2024-06-21");
    assert_eq!(report["vitamin_d"]["total_iu"], 0.0);
    assert!(report["closed_session"].is_null());
}

#[test]
fn test_forecast_peaks_near_noon() {
    let temp_dir = setup_test_dir();
    cli(&temp_dir)
        .args(["forecast", "--lat", "0", "--lon", "0", "--date", "2024-03-20"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Peak: UV"))
        .stdout(predicate::str::contains("at 12:00 UTC"));
}

#[test]
fn test_forecast_rejects_bad_latitude() {
    let temp_dir = setup_test_dir();
    cli(&temp_dir)
        .args(["forecast", "--lat", "123", "--lon", "0"])
        .assert()
        .failure();
}

#[test]
fn test_export_writes_csv() {
    let temp_dir = setup_test_dir();
    sign_in(&temp_dir);
    let replay = write_replay(temp_dir.path(), &[OUTSIDE_START, OUTSIDE_LATER, INSIDE]);
    cli(&temp_dir)
        .arg("replay")
        .arg(&replay)
        .args(["--uv", "6", "--auto-tick"])
        .assert()
        .success();

    let csv_path = temp_dir.path().join("export").join("sessions.csv");
    cli(&temp_dir)
        .arg("export")
        .arg(&csv_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported 1 sessions"));

    let csv = fs::read_to_string(&csv_path).unwrap();
    let mut lines = csv.lines();
    assert!(lines.next().unwrap().starts_with("id,date,start_time"));
    assert!(lines.next().unwrap().contains("2024-06-21"));
    assert!(lines.next().is_none());
}

#[test]
fn test_concurrent_writers_keep_store_readable() {
    let temp_dir = setup_test_dir();
    sign_in(&temp_dir);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let mut cmd = cli(&temp_dir);
            cmd.args(["profile", "set", "--user", &format!("user{}", i)]);
            thread::spawn(move || cmd.assert().success())
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread panicked");
    }

    let store = fs::read_to_string(temp_dir.path().join("data").join("store.json")).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&store).expect("store must stay valid JSON");
    assert_eq!(doc["profiles"].as_object().unwrap().len(), 5);
}
