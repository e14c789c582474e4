//! End-to-end CLI tests.

use assert_cmd::Command;
use predicates::prelude::*;

fn reroll() -> Command {
    let mut cmd = Command::cargo_bin("reroll").unwrap();
    // Keep the host CI's own variables from leaking into assertions.
    cmd.env_remove("CI")
        .env_remove("REROLL_CI")
        .env_remove("REROLL_AGENT_COUNT")
        .env_remove("REROLL_AGENT_INDEX")
        .env_remove("REROLL_MIRRORS");
    cmd
}

fn write_config(dir: &std::path::Path, run_command: &str) -> std::path::PathBuf {
    let path = dir.join("reroll.toml");
    std::fs::write(
        &path,
        format!(
            r#"
[executor]
type = "process"
run_command = "{}"

[report]
output_dir = "test-results"
"#,
            run_command
        ),
    )
    .unwrap();
    path
}

#[test]
fn test_init_creates_config() {
    let dir = tempfile::tempdir().unwrap();

    reroll()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created reroll.toml"));

    assert!(dir.path().join("reroll.toml").exists());
}

#[test]
fn test_validate_reports_settings() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "true");

    reroll()
        .arg("--config")
        .arg(&config)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid!"))
        .stdout(predicate::str::contains("Max failures: 10"));
}

#[test]
fn test_env_prints_resolved_topology() {
    reroll()
        .args(["env"])
        .env("REROLL_CI", "1")
        .env("REROLL_AGENT_COUNT", "4")
        .env("REROLL_AGENT_INDEX", "2")
        .env("REROLL_MIRRORS", "central:https://cache.example.com/m2")
        .assert()
        .success()
        .stdout(predicate::str::contains("Agent count: 4"))
        .stdout(predicate::str::contains(
            "mirror.central.url=https://cache.example.com/m2",
        ));
}

#[test]
fn test_env_rejects_malformed_agent_count() {
    reroll()
        .args(["env"])
        .env("REROLL_AGENT_COUNT", "many")
        .assert()
        .failure()
        .stderr(predicate::str::contains("positive integer"));
}

#[test]
fn test_run_passing_units_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "exit {unit}");

    reroll()
        .current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["run", "0"])
        .assert()
        .success();

    assert!(dir.path().join("test-results").join("junit.xml").exists());
}

#[test]
fn test_run_failing_unit_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "exit {unit}");

    reroll()
        .current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["run", "0", "1"])
        .env("REROLL_CI", "0")
        .assert()
        .code(1);
}

#[test]
fn test_run_recovers_flaky_unit_on_ci() {
    let dir = tempfile::tempdir().unwrap();
    // Fails the first time, passes once its marker file exists.
    let config = write_config(
        dir.path(),
        "test -f {unit}.marker || (touch {unit}.marker; exit 1)",
    );

    reroll()
        .current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["run", "flaky"])
        .env("REROLL_CI", "1")
        .assert()
        .code(34); // green, but only after a retry
}

#[test]
fn test_run_without_units_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "true");

    reroll()
        .arg("--config")
        .arg(&config)
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no test units specified"));
}
