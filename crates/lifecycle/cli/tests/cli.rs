use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn lifecycle(state_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("lifecycle").unwrap();
    cmd.current_dir(state_dir)
        .env("LIFECYCLE__SETTLE_DELAY_SECS", "0")
        .env("NO_COLOR", "1")
        .env_remove("LIFECYCLE_ENVIRONMENT_NAME")
        .env_remove("LIFECYCLE_LOCATION")
        .env_remove("LIFECYCLE_STATE_FILE")
        .env_remove("LIFECYCLE_CONFIG");
    cmd
}

fn json_stdout(cmd: &mut Command) -> serde_json::Value {
    let output = cmd.output().unwrap();
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn plan_prints_resolved_names() {
    let dir = tempfile::tempdir().unwrap();
    lifecycle(dir.path())
        .args(["plan", "-e", "dev", "-l", "eastus", "--resource-token", "tok123"])
        .assert()
        .success()
        .stdout(predicate::str::contains("resource_group/rg-dev"))
        .stdout(predicate::str::contains("storage_account/rg-dev/sttok123"));
}

#[test]
fn missing_location_is_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    lifecycle(dir.path())
        .args(["deploy", "-e", "dev", "--force"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("location is required"));
}

#[test]
fn invalid_threshold_is_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    lifecycle(dir.path())
        .args(["validate", "-e", "dev", "-l", "eastus", "--threshold", "2"])
        .assert()
        .code(3);
}

#[test]
fn declined_confirmation_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    lifecycle(dir.path())
        .args(["deploy", "-e", "dev", "-l", "eastus"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Aborted"));
    assert!(!dir.path().join(".lifecycle").join("state.json").exists());
}

#[test]
fn what_if_never_writes_state() {
    let dir = tempfile::tempdir().unwrap();
    let report = json_stdout(lifecycle(dir.path()).args([
        "deploy", "-e", "dev", "-l", "eastus", "--what-if", "-o", "json",
    ]));

    assert_eq!(report["what_if"], true);
    assert_eq!(report["validation"]["recommendation"], "retry_recommended");
    assert!(!dir.path().join(".lifecycle").join("state.json").exists());
}

#[test]
fn deploy_is_idempotent_and_remove_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let report_path = dir.path().join("out").join("deploy.json");

    lifecycle(dir.path())
        .args(["deploy", "-e", "dev", "-l", "eastus", "--force", "--report"])
        .arg(&report_path)
        .assert()
        .code(0)
        .stdout(predicate::str::contains("Environment is ready."));
    assert!(report_path.exists());
    assert!(dir.path().join(".lifecycle").join("dev.parameters.json").exists());

    let again = json_stdout(lifecycle(dir.path()).args([
        "deploy", "-e", "dev", "-l", "eastus", "--force", "-o", "json",
    ]));
    let outcomes: Vec<&serde_json::Value> = again["phases"]
        .as_array()
        .unwrap()
        .iter()
        .flat_map(|p| p["results"].as_array().unwrap().iter())
        .map(|r| &r["outcome"])
        .collect();
    assert!(!outcomes.is_empty());
    assert!(outcomes
        .iter()
        .all(|o| o["outcome"] == "skipped" && o["reason"] == "already_satisfied"));

    // location and token come from the environment record
    lifecycle(dir.path())
        .args(["remove", "-e", "dev", "--force"])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("fully removed"));

    let state: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join(".lifecycle").join("state.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(state["resources"], serde_json::json!({}));

    lifecycle(dir.path())
        .args(["validate", "-e", "dev"])
        .assert()
        .code(2);
}

#[test]
fn parameters_file_supplies_location() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("main.parameters.json"),
        r#"{"parameters": {"environmentName": {"value": "qa"}, "location": {"value": "westus2"}}}"#,
    )
    .unwrap();

    let plan = json_stdout(lifecycle(dir.path()).args([
        "plan",
        "--use-parameters-file",
        "-o",
        "json",
    ]));
    assert_eq!(plan["metadata"]["environment_name"], "qa");
    assert_eq!(plan["metadata"]["location"], "westus2");
    assert_eq!(plan["metadata"]["resource_group"], "rg-qa");
}

#[test]
fn configured_poll_timeout_reaches_plan_contracts() {
    let dir = tempfile::tempdir().unwrap();
    let plan = json_stdout(
        lifecycle(dir.path())
            .env("LIFECYCLE__POLL__TIMEOUT_SECS", "90")
            .args(["plan", "-e", "dev", "-l", "eastus", "-o", "json"]),
    );
    let contract = &plan["phases"][0]["operations"][0]["async_contract"];
    assert_eq!(contract["timeout"]["secs"], 90);
}
