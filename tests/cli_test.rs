// ABOUTME: Tests for the mysql-syncer binary's argument and config handling
// ABOUTME: Only exercises paths that fail before any database connection

use std::fs;
use std::process::Command;
use tempfile::tempdir;

fn bin() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_mysql-syncer"));
    command.env_remove("SYNCER_CONFIG").env_remove("RUST_LOG");
    command
}

const VALID_CONNECTIONS: &str = r#"
[master]
host = "127.0.0.1"
user = "root"
password = "secret"
database = "app"

[slave]
host = "127.0.0.1"
user = "root"
password = "secret"
database = "app_copy"

[sync]
host = "127.0.0.1"
user = "root"
password = "secret"
database = "syncer"
"#;

#[test]
fn test_help_lists_commands() {
    let output = bin().arg("--help").output().expect("Failed to execute command");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("sync"));
    assert!(stdout.contains("validate"));
    assert!(stdout.contains("bench"));
}

#[test]
fn test_missing_config_file_fails() {
    let temp_dir = tempdir().unwrap();
    let missing = temp_dir.path().join("nope.toml");

    let output = bin()
        .arg("validate")
        .arg("--config")
        .arg(&missing)
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_zero_chunk_size_is_rejected() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("syncer.toml");
    fs::write(
        &config_path,
        format!("chunk_size = 0\n{}", VALID_CONNECTIONS),
    )
    .unwrap();

    let output = bin()
        .arg("sync")
        .arg("--config")
        .arg(&config_path)
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("chunk_size must be greater than 0"));
}

#[test]
fn test_chunk_size_override_is_validated() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("syncer.toml");
    fs::write(&config_path, VALID_CONNECTIONS).unwrap();

    let output = bin()
        .arg("validate")
        .arg("--config")
        .arg(&config_path)
        .arg("--chunk-size")
        .arg("0")
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("chunk_size must be greater than 0"));
}

#[test]
fn test_same_master_and_slave_is_rejected() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("syncer.toml");
    fs::write(
        &config_path,
        VALID_CONNECTIONS.replace("\"app_copy\"", "\"app\""),
    )
    .unwrap();

    let output = bin()
        .arg("sync")
        .arg("--config")
        .arg(&config_path)
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("point to the same database"));
}

#[test]
fn test_invalid_ignore_pattern_is_rejected() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("syncer.toml");
    fs::write(
        &config_path,
        format!("ignore_tables = [\"(unclosed\"]\n{}", VALID_CONNECTIONS),
    )
    .unwrap();

    let output = bin()
        .arg("validate")
        .arg("--config")
        .arg(&config_path)
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid ignore_tables pattern"));
}

#[test]
fn test_config_path_from_environment() {
    let temp_dir = tempdir().unwrap();
    let missing = temp_dir.path().join("from-env.toml");

    let output = bin()
        .arg("validate")
        .env("SYNCER_CONFIG", &missing)
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("from-env.toml"));
}
