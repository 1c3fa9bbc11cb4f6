use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use httpmock::prelude::*;
use predicates::prelude::*;
use std::process::Command;

fn cargo_bin() -> Command {
    Command::cargo_bin("curlpit-runner").expect("binary exists")
}

fn collection_json(url: &str, expected_status: u16) -> String {
    serde_json::json!({
        "name": "smoke",
        "requests": [{
            "name": "ping",
            "method": "GET",
            "url": url,
            "headers": [{"name": "X-Env", "value": "{{stage}}"}],
            "postResponseScript": format!(
                "test(\"status\", || expect(response.code).toBe({expected_status}));"
            )
        }]
    })
    .to_string()
}

#[test]
fn displays_help() {
    let mut cmd = cargo_bin();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("pre-request and post-response scripts"))
        .stdout(predicate::str::contains("--stop-on-failure"));
}

#[test]
fn displays_version() {
    let mut cmd = cargo_bin();
    cmd.arg("--version");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn errors_when_collection_missing() {
    let mut cmd = cargo_bin();
    cmd.arg("missing.json");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("missing.json"));
}

#[test]
fn runs_collection_and_writes_report() {
    let temp = assert_fs::TempDir::new().unwrap();
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/ping").header("x-env", "staging");
        then.status(200).body("{\"ok\":true}");
    });

    temp.child("smoke.json")
        .write_str(&collection_json(&server.url("/ping"), 200))
        .unwrap();
    temp.child("staging.env").write_str("stage=staging\n").unwrap();

    let mut cmd = cargo_bin();
    cmd.current_dir(temp.path());
    cmd.arg("smoke.json")
        .arg("--env")
        .arg("staging.env")
        .arg("--report-dir")
        .arg("reports");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Run passed"))
        .stdout(predicate::str::contains("Report:"));

    mock.assert();
    let reports: Vec<_> = std::fs::read_dir(temp.path().join("reports"))
        .unwrap()
        .collect();
    assert_eq!(reports.len(), 1);
}

#[test]
fn failing_assertions_exit_non_zero() {
    let temp = assert_fs::TempDir::new().unwrap();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/ping");
        then.status(503);
    });

    temp.child("smoke.json")
        .write_str(&collection_json(&server.url("/ping"), 200))
        .unwrap();

    let mut cmd = cargo_bin();
    cmd.current_dir(temp.path());
    cmd.arg("smoke.json");
    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("Run failed"))
        .stdout(predicate::str::contains("Expected 503 to be 200"));
}

#[test]
fn rejects_invalid_delay() {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child("smoke.json")
        .write_str(&collection_json("http://127.0.0.1:9/ping", 200))
        .unwrap();

    let mut cmd = cargo_bin();
    cmd.current_dir(temp.path());
    cmd.arg("smoke.json").arg("--delay").arg("10001");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("delayMs must be between 0 and 10000"));
}
