use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn bin() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("scryptenc"));
    cmd.env_remove("SCRYPTENC_MAXMEM")
        .env_remove("SCRYPTENC_MAXMEMFRAC")
        .env_remove("SCRYPTENC_MAXTIME")
        .env_remove("SCRYPTENC_LOG");
    cmd
}

/// Cheap limits for commands that pick new parameters.
const LIMITS: [&str; 4] = ["--maxtime", "0.05", "--maxmem", "16777216"];

fn encrypt_file(dir: &Path, plaintext: &[u8]) -> std::path::PathBuf {
    let input = dir.join("plain.txt");
    let output = dir.join("plain.txt.enc");
    fs::write(&input, plaintext).unwrap();

    bin()
        .env("SCRYPTENC_PASSWORD", "pw")
        .args(LIMITS)
        .arg("enc")
        .arg(&input)
        .arg(&output)
        .assert()
        .success();

    output
}

#[test]
fn enc_and_dec_roundtrip() {
    let dir = tempdir().unwrap();
    let encrypted = encrypt_file(dir.path(), b"top secret");
    let decrypted = dir.path().join("plain.out");

    let container = fs::read(&encrypted).unwrap();
    assert_eq!(&container[..6], b"scrypt");
    assert_eq!(container.len(), 96 + 10 + 32);

    bin()
        .env("SCRYPTENC_PASSWORD", "pw")
        .arg("dec")
        .arg(&encrypted)
        .arg(&decrypted)
        .assert()
        .success();

    assert_eq!(fs::read(&decrypted).unwrap(), b"top secret");
}

#[test]
fn stdin_to_stdout_roundtrip() {
    let encrypted = bin()
        .env("SCRYPTENC_PASSWORD", "pw")
        .args(LIMITS)
        .arg("enc")
        .write_stdin("piped data")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    bin()
        .env("SCRYPTENC_PASSWORD", "pw")
        .arg("dec")
        .write_stdin(encrypted)
        .assert()
        .success()
        .stdout(predicate::eq(&b"piped data"[..]));
}

#[test]
fn wrong_password_fails_and_writes_nothing() {
    let dir = tempdir().unwrap();
    let encrypted = encrypt_file(dir.path(), b"top secret");
    let decrypted = dir.path().join("plain.out");

    bin()
        .env("SCRYPTENC_PASSWORD", "wrong")
        .arg("dec")
        .arg(&encrypted)
        .arg(&decrypted)
        .assert()
        .code(11)
        .stderr(predicate::str::contains("password is incorrect"));

    assert!(!decrypted.exists());
}

#[test]
fn tampered_file_fails_and_writes_nothing() {
    let dir = tempdir().unwrap();
    let encrypted = encrypt_file(dir.path(), b"top secret");
    let decrypted = dir.path().join("plain.out");

    let mut data = fs::read(&encrypted).unwrap();
    data[100] ^= 1;
    fs::write(&encrypted, &data).unwrap();

    bin()
        .env("SCRYPTENC_PASSWORD", "pw")
        .arg("dec")
        .arg(&encrypted)
        .arg(&decrypted)
        .assert()
        .code(7)
        .stderr(predicate::str::contains("tampered"));

    assert!(!decrypted.exists());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
}

#[test]
fn non_scrypt_input_is_rejected() {
    bin()
        .env("SCRYPTENC_PASSWORD", "pw")
        .arg("dec")
        .write_stdin(vec![0u8; 200])
        .assert()
        .code(7)
        .stderr(predicate::str::contains("not valid scrypt-encrypted data"));
}

#[test]
fn record_and_verify() {
    let dir = tempdir().unwrap();
    let record = dir.path().join("password.rec");

    bin()
        .env("SCRYPTENC_PASSWORD", "hunter2")
        .args(LIMITS)
        .arg("record")
        .arg(&record)
        .assert()
        .success();

    assert_eq!(fs::read(&record).unwrap().len(), 96);

    bin()
        .env("SCRYPTENC_PASSWORD", "hunter2")
        .arg("verify")
        .arg(&record)
        .assert()
        .success()
        .stdout(predicate::str::contains("password ok"));

    bin()
        .env("SCRYPTENC_PASSWORD", "hunter3")
        .arg("verify")
        .arg(&record)
        .assert()
        .code(11)
        .stderr(predicate::str::contains("password is incorrect"));
}

#[test]
fn password_from_stdin_when_stdin_is_free() {
    let dir = tempdir().unwrap();
    let record = dir.path().join("password.rec");

    bin()
        .env_remove("SCRYPTENC_PASSWORD")
        .args(LIMITS)
        .arg("record")
        .arg(&record)
        .write_stdin("hunter2\nhunter2\n")
        .assert()
        .success();

    bin()
        .env_remove("SCRYPTENC_PASSWORD")
        .arg("verify")
        .arg(&record)
        .write_stdin("hunter2\n")
        .assert()
        .success();
}

#[test]
fn mismatched_new_passwords_fail() {
    let dir = tempdir().unwrap();
    let record = dir.path().join("password.rec");

    bin()
        .env_remove("SCRYPTENC_PASSWORD")
        .args(LIMITS)
        .arg("record")
        .arg(&record)
        .write_stdin("hunter2\nhunter3\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("passwords mismatch"));

    assert!(!record.exists());
}

#[test]
fn info_shows_stored_parameters() {
    let dir = tempdir().unwrap();
    let encrypted = encrypt_file(dir.path(), b"data");

    bin()
        .arg("info")
        .arg(&encrypted)
        .assert()
        .success()
        .stdout(predicate::str::contains("r = 8;"))
        .stdout(predicate::str::contains("salt: "));

    let output = bin()
        .arg("info")
        .arg("--json")
        .arg(&encrypted)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let report: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(report["r"], 8);
    assert_eq!(report["salt"].as_str().unwrap().len(), 64);
}

#[test]
fn info_rejects_short_file() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("short");
    fs::write(&file, b"scrypt\0").unwrap();

    bin()
        .arg("info")
        .arg(&file)
        .assert()
        .code(7)
        .stderr(predicate::str::contains("truncated"));
}

#[test]
fn params_json_respects_limits() {
    let output = bin()
        .args(LIMITS)
        .args(["params", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let params: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(params["r"], 8);
    assert!(params["memory_required"].as_u64().unwrap() <= 16 * 1024 * 1024);
    assert!(params["p"].as_u64().unwrap() >= 1);
}
