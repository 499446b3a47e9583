//! CLI contract tests.

use assert_cmd::Command;

/// Binary with config pinned to a path that does not exist, so defaults apply.
fn docguard(tmp: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("docguard").expect("binary builds");
    cmd.env("DOCGUARD_CONFIG_PATH", tmp.path().join("absent.toml"))
        .env_remove("DOCGUARD_AUDIT_LOG")
        .env_remove("DOCGUARD_OTP_ISSUER")
        .env_remove("DOCGUARD_MAX_ATTEMPTS")
        .env_remove("DOCGUARD_CHALLENGE_TTL_SECS")
        .env_remove("RUST_LOG");
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.output().expect("runs");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn evaluate_prints_decision_json() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let out = stdout_of(docguard(&tmp).args([
        "evaluate", "--role", "admin", "--level", "secret", "--action", "view",
    ]));
    let decision: serde_json::Value = serde_json::from_str(&out).expect("json");
    assert_eq!(decision["permitted"], true);
    assert_eq!(decision["otp_required"], true);
}

#[test]
fn evaluate_accepts_legacy_names() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let out = stdout_of(docguard(&tmp).args([
        "evaluate",
        "--role",
        "usuario",
        "--level",
        "confidencial",
        "--action",
        "ver",
        "--owner",
    ]));
    let decision: serde_json::Value = serde_json::from_str(&out).expect("json");
    assert_eq!(decision["permitted"], true);
    assert_eq!(decision["otp_required"], false);
}

#[test]
fn evaluate_rejects_unknown_role() {
    let tmp = tempfile::tempdir().expect("tempdir");
    docguard(&tmp)
        .args(["evaluate", "--role", "root", "--level", "public", "--action", "view"])
        .assert()
        .failure();
}

#[test]
fn matrix_json_has_every_row() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let out = stdout_of(docguard(&tmp).args(["matrix", "--json"]));
    assert_eq!(out.lines().count(), 72);
    for line in out.lines() {
        serde_json::from_str::<serde_json::Value>(line).expect("each line is JSON");
    }
}

#[test]
fn can_create_secret_requires_supervisor() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let denied =
        stdout_of(docguard(&tmp).args(["can-create", "--role", "user", "--level", "secret"]));
    assert!(denied.starts_with("deny"));
    let allowed = stdout_of(docguard(&tmp).args([
        "can-create",
        "--role",
        "supervisor",
        "--level",
        "secret",
    ]));
    assert!(allowed.starts_with("allow"));
}

#[test]
fn code_prints_six_digits() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let secret = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";
    let out = stdout_of(docguard(&tmp).args(["code", "--secret", secret]));
    let code = out.trim();
    assert_eq!(code.len(), 6);
    assert!(code.bytes().all(|b| b.is_ascii_digit()));
}

#[test]
fn code_rejects_bad_secret() {
    let tmp = tempfile::tempdir().expect("tempdir");
    docguard(&tmp)
        .args(["code", "--secret", "not*base32"])
        .assert()
        .failure();
}

#[test]
fn audit_file_receives_evaluations() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let audit = tmp.path().join("audit").join("events.jsonl");
    let config = tmp.path().join("config.toml");
    std::fs::write(
        &config,
        format!("[audit]\npath = {:?}\n", audit.display().to_string()),
    )
    .expect("write config");

    stdout_of(docguard(&tmp).args([
        "--config",
        config.to_str().expect("utf-8 path"),
        "evaluate",
        "--role",
        "user",
        "--level",
        "public",
        "--action",
        "delete",
    ]));

    let contents = std::fs::read_to_string(&audit).expect("audit written");
    let event: serde_json::Value = serde_json::from_str(contents.trim()).expect("json line");
    assert_eq!(event["action"], "delete");
    assert_eq!(event["decision"]["permitted"], false);
}

#[test]
fn check_config_reports_invalid_values() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = tmp.path().join("config.toml");
    std::fs::write(&config, "[otp]\nmax_attempts = 0\n").expect("write config");
    docguard(&tmp)
        .args(["--config", config.to_str().expect("utf-8 path"), "check-config"])
        .assert()
        .failure();

    let out = stdout_of(docguard(&tmp).arg("check-config"));
    assert!(out.contains("config ok"));
}

#[test]
fn explicit_missing_config_is_an_error() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let missing = tmp.path().join("nope.toml");
    docguard(&tmp)
        .args(["--config", missing.to_str().expect("utf-8 path"), "matrix"])
        .assert()
        .failure();
}
