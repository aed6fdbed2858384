use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;

struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn config_path(&self) -> PathBuf {
        self.path().join("config.toml")
    }

    fn write_config(&self, trusted_keys: &[&str]) {
        let keys: Vec<String> = trusted_keys.iter().map(|k| format!("\"{k}\"")).collect();
        std::fs::write(
            self.config_path(),
            format!(
                "trusted_keys = [{}]\n\n[orchestrator]\nmax_send_attempts = 1\n",
                keys.join(", ")
            ),
        )
        .unwrap();
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("canonic-mail").unwrap();
        cmd.arg("--config")
            .arg(self.config_path())
            .arg("--data-dir")
            .arg(self.path().join("data"))
            .env("CANONIC_MAIL_TOKEN", "test-token")
            .env_remove("RUST_LOG");
        cmd
    }

    fn outbox_files(&self) -> usize {
        match std::fs::read_dir(self.path().join("data").join("outbox")) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

#[test]
fn help_lists_commands() {
    Command::cargo_bin("canonic-mail")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("submit"))
        .stdout(predicate::str::contains("ledger"))
        .stdout(predicate::str::contains("reconcile"));
}

#[test]
fn submit_sends_logs_and_verifies() {
    let ws = Workspace::new();
    ws.write_config(&[]);

    ws.cmd()
        .args(["submit", "--to", "bob@example.com", "--subject", "Hi", "--body", "Hello"])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("SENT"));
    assert_eq!(ws.outbox_files(), 1);

    let listed = ws
        .cmd()
        .args(["--output", "json", "ledger", "list"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let entries: serde_json::Value = serde_json::from_slice(&listed).unwrap();
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["outcome"], "pending");
    assert_eq!(entries[1]["outcome"], "sent");
    assert_eq!(entries[1]["supersedes"], 1);

    ws.cmd()
        .args(["ledger", "verify"])
        .assert()
        .success()
        .stdout(predicate::str::contains("intact: 2 entries"));

    let fingerprint = entries[1]["fingerprint"].as_str().unwrap().to_string();
    ws.cmd()
        .args(["ledger", "show", &fingerprint])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"sent\""));
}

#[test]
fn missing_token_fails_the_send() {
    let ws = Workspace::new();
    ws.write_config(&[]);

    ws.cmd()
        .env_remove("CANONIC_MAIL_TOKEN")
        .args(["submit", "--to", "bob@example.com", "--subject", "Note", "--body", "x"])
        .assert()
        .code(3)
        .stdout(predicate::str::contains("SEND FAILED"));
    assert_eq!(ws.outbox_files(), 0);
}

#[test]
fn signed_allowlist_blocks_foreign_domain() {
    let ws = Workspace::new();
    ws.write_config(&[]);
    let key = ws.path().join("signing.key");

    let keygen = ws
        .cmd()
        .args(["keygen", "--out"])
        .arg(&key)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8(keygen).unwrap();
    let verifying = stdout.lines().last().unwrap().trim().to_string();
    assert_eq!(verifying.len(), 64);
    ws.write_config(&[&verifying]);

    let payload = ws.path().join("allowlist.json");
    std::fs::write(&payload, r#"{"domains":["example.com"]}"#).unwrap();
    ws.cmd()
        .args(["bundle", "sign", "--id", "recipient.allowlist", "--version", "1.0.0", "--key"])
        .arg(&key)
        .arg("--payload")
        .arg(&payload)
        .assert()
        .success();

    ws.cmd()
        .arg("validators")
        .assert()
        .success()
        .stdout(predicate::str::contains("recipient.allowlist"));

    ws.cmd()
        .args(["submit", "--to", "eve@elsewhere.net", "--subject", "Note", "--body", "psst"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("domain not permitted: elsewhere.net"));
    assert_eq!(ws.outbox_files(), 0);

    ws.cmd()
        .args(["submit", "--to", "bob@example.com", "--subject", "Note", "--body", "hello"])
        .assert()
        .code(0);
}

#[test]
fn untrusted_bundle_is_reported_and_skipped() {
    let ws = Workspace::new();
    ws.write_config(&[]);
    let key = ws.path().join("signing.key");
    ws.cmd().args(["keygen", "--out"]).arg(&key).assert().success();

    let payload = ws.path().join("allowlist.json");
    std::fs::write(&payload, r#"{"domains":["example.com"]}"#).unwrap();
    ws.cmd()
        .args(["bundle", "sign", "--id", "recipient.allowlist", "--version", "1.0.0", "--key"])
        .arg(&key)
        .arg("--payload")
        .arg(&payload)
        .assert()
        .success();

    // The signer was never added to trusted_keys.
    ws.cmd()
        .args(["submit", "--to", "eve@elsewhere.net", "--subject", "Note", "--body", "psst"])
        .assert()
        .code(0)
        .stderr(predicate::str::contains("rejected"));
}

#[test]
fn show_unknown_fingerprint_fails() {
    let ws = Workspace::new();
    ws.write_config(&[]);

    ws.cmd()
        .args(["ledger", "show", &"ab".repeat(32)])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not found"));
}

#[test]
fn reconcile_on_clean_state_agrees() {
    let ws = Workspace::new();
    ws.write_config(&[]);

    ws.cmd()
        .arg("reconcile")
        .assert()
        .success()
        .stdout(predicate::str::contains("agree"));
}

#[test]
fn submit_without_subject_or_template_is_refused() {
    let ws = Workspace::new();
    ws.write_config(&[]);

    ws.cmd()
        .args(["submit", "--to", "bob@example.com", "--body", "hello"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains(
            "provide a template or both a subject and a body",
        ));
    assert_eq!(ws.outbox_files(), 0);
}
