use assert_cmd::Command;
use rampart::schema::{RoleType, Root, Signed};
use ring::rand::SystemRandom;
use ring::signature::Ed25519KeyPair;
use std::path::Path;
use tempfile::TempDir;

fn write_test_key(dir: &Path, name: &str) -> String {
    let rng = SystemRandom::new();
    let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
    let pem = pem::encode(&pem::Pem::new("PRIVATE KEY", pkcs8.as_ref().to_vec()));
    let path = dir.join(format!("{name}.pem"));
    std::fs::write(&path, pem.as_bytes()).unwrap();
    path.to_str().unwrap().to_owned()
}

fn ramptool() -> Command {
    Command::cargo_bin("ramptool").unwrap()
}

// Build a root from scratch, authorize a key for every role, and sign it
#[test]
fn create_and_sign_root() {
    let outdir = TempDir::new().unwrap();
    let key = write_test_key(outdir.path(), "signing");
    let root = outdir.path().join("root.json");
    let root = root.to_str().unwrap();

    ramptool().args(["root", "init", root]).assert().success();
    ramptool()
        .args(["root", "expire", root, "in 52 weeks"])
        .assert()
        .success();
    for role in ["root", "snapshot", "targets", "timestamp"] {
        ramptool()
            .args(["root", "set-threshold", root, role, "1"])
            .assert()
            .success();
        ramptool()
            .args(["root", "add-key", root, &key, "-r", role])
            .assert()
            .success();
    }
    ramptool()
        .args(["root", "sign", root, "-k", &key])
        .assert()
        .success();

    // the written root must verify against its own key list
    let signed: Signed<Root> = serde_json::from_slice(&std::fs::read(root).unwrap()).unwrap();
    assert_eq!(signed.signatures.len(), 1);
    signed.signed.verify_role(&signed).unwrap();
}

// The same key added to a role twice is only listed once
#[test]
fn add_key_is_idempotent() {
    let outdir = TempDir::new().unwrap();
    let key = write_test_key(outdir.path(), "signing");
    let root = outdir.path().join("root.json");
    let root = root.to_str().unwrap();

    ramptool().args(["root", "init", root]).assert().success();
    for _ in 0..2 {
        ramptool()
            .args(["root", "add-key", root, &key, "-r", "root"])
            .assert()
            .success();
    }

    let signed: Signed<Root> = serde_json::from_slice(&std::fs::read(root).unwrap()).unwrap();
    assert_eq!(signed.signed.keys.len(), 1);
    assert_eq!(signed.signed.roles[&RoleType::Root].keyids.len(), 1);
}

// A fresh root's placeholder thresholds cannot be met, so signing must fail
// unless the caller explicitly ignores thresholds
#[test]
fn sign_refuses_unmet_threshold() {
    let outdir = TempDir::new().unwrap();
    let key = write_test_key(outdir.path(), "signing");
    let root = outdir.path().join("root.json");
    let root = root.to_str().unwrap();

    ramptool().args(["root", "init", root]).assert().success();
    ramptool()
        .args(["root", "add-key", root, &key, "-r", "root"])
        .assert()
        .success();

    ramptool()
        .args(["root", "sign", root, "-k", &key])
        .assert()
        .failure();
    ramptool()
        .args(["root", "sign", root, "-k", &key, "--ignore-threshold"])
        .assert()
        .success();
}
