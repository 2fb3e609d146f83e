// domain-sweep/tests/cli_integration.rs

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Command isolated from the user's config files and environment.
fn sweep_cmd(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("domain-sweep").unwrap();
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join(".config"))
        .env_remove("DS_CONFIG")
        .env_remove("DS_RPS")
        .env_remove("DS_CONCURRENCY")
        .env_remove("DS_MAX_CONCURRENCY")
        .env_remove("DS_TIMEOUT")
        .env_remove("DS_MAX_RETRIES")
        .env_remove("DS_OUTPUT_DIR")
        .env_remove("RUST_LOG");
    cmd
}

/// Write `part_<NNNN>.txt` into `dir`.
fn write_shard(dir: &TempDir, shard: u32, lines: &[&str]) {
    let path = dir.path().join(format!("part_{:04}.txt", shard));
    fs::write(path, lines.join("\n")).expect("Failed to write shard file");
}

#[test]
fn test_help_shows_flags() {
    let home = TempDir::new().unwrap();
    sweep_cmd(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--shard"))
        .stdout(predicate::str::contains("--rps"))
        .stdout(predicate::str::contains("--max-retries"));
}

#[test]
fn test_missing_shard_prints_usage() {
    let home = TempDir::new().unwrap();
    sweep_cmd(&home)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("--shard"))
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_shard_and_file_conflict() {
    let home = TempDir::new().unwrap();
    sweep_cmd(&home)
        .args(["--shard", "1", "--file", "list.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Cannot specify both"));
}

#[test]
fn test_dry_run_normalizes_shard() {
    let home = TempDir::new().unwrap();
    write_shard(
        &home,
        7,
        &["alpha.example", "", "# comment", "https://beta.example", "  gamma.example  "],
    );

    sweep_cmd(&home)
        .args(["--shard", "7", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("https://alpha.example"))
        .stdout(predicate::str::contains("https://beta.example"))
        .stdout(predicate::str::contains("https://gamma.example"))
        .stdout(predicate::str::contains("3 identifiers would be probed"))
        .stdout(predicate::str::contains("comment").not());
}

#[test]
fn test_legacy_xx_flag_and_input_dir() {
    let home = TempDir::new().unwrap();
    let shards = TempDir::new().unwrap();
    write_shard(&shards, 12, &["one.example"]);

    sweep_cmd(&home)
        .args(["-xx", "12", "--dry-run", "--json", "--input-dir"])
        .arg(shards.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"https://one.example\""));
}

#[test]
fn test_missing_shard_file_fails() {
    let home = TempDir::new().unwrap();
    sweep_cmd(&home)
        .args(["--shard", "99"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("part_0099.txt"));
}

#[test]
fn test_non_numeric_shard_fails() {
    let home = TempDir::new().unwrap();
    sweep_cmd(&home)
        .args(["--shard", "abc"])
        .assert()
        .failure();
}

#[test]
fn test_empty_shard_finishes_without_probe_config() {
    let home = TempDir::new().unwrap();
    write_shard(&home, 3, &["", "# nothing here"]);

    sweep_cmd(&home)
        .args(["--shard", "3", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"passes\": 0"))
        .stdout(predicate::str::contains("\"cancelled\": false"));
}

#[test]
fn test_missing_probe_endpoint_fails() {
    let home = TempDir::new().unwrap();
    write_shard(&home, 1, &["a.example"]);

    sweep_cmd(&home)
        .args(["--shard", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("probe endpoint"));
}

#[test]
fn test_invalid_config_file_fails() {
    let home = TempDir::new().unwrap();
    write_shard(&home, 1, &["a.example"]);
    let config = home.path().join("bad.toml");
    fs::write(&config, "[engine]\nrequests_per_second = -1.0\n").unwrap();

    sweep_cmd(&home)
        .args(["--shard", "1", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("bad.toml"));
}

#[test]
fn test_inconsistent_concurrency_flags_fail() {
    let home = TempDir::new().unwrap();
    write_shard(&home, 1, &["a.example"]);

    sweep_cmd(&home)
        .args(["--shard", "1", "--concurrency", "80", "--max-concurrency", "10"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("concurrency"));
}
