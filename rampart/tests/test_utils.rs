//! Utilities for tests. Not every test module uses every function, so we
//! suppress unused warnings.

use rampart::editor::RepositoryEditor;
use rampart::key_source::{KeySource, LocalKeySource};
use rampart::schema::decoded::{Decoded, Hex};
use rampart::schema::key::Key;
use rampart::schema::{RoleKeys, RoleType, Root, Signature, Signed};
use rampart::sign::Sign;
use ring::rand::SystemRandom;
use ring::signature::Ed25519KeyPair;
use std::collections::HashMap;
use std::num::NonZeroU64;
use std::path::Path;
use url::Url;

/// Converts a filepath into a URI formatted string
#[allow(unused)]
pub fn dir_url<P: AsRef<Path>>(path: P) -> Url {
    Url::from_directory_path(path).unwrap()
}

/// A freshly generated ed25519 signing key written to a PEM file, usable both
/// as a `KeySource` for the editor and directly for signing roots.
#[allow(unused)]
pub struct TestKey {
    pub source: LocalKeySource,
    pub key: Key,
    pub keyid: Decoded<Hex>,
}

#[allow(unused)]
impl TestKey {
    pub fn generate(dir: &Path, name: &str) -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        let pem = pem::encode(&pem::Pem::new("PRIVATE KEY", pkcs8.as_ref().to_vec()));
        let path = dir.join(format!("{name}.pem"));
        std::fs::write(&path, pem.as_bytes()).unwrap();

        let source = LocalKeySource { path };
        let key = source.as_sign().unwrap().public_key();
        let keyid = key.key_id().unwrap();
        TestKey { source, key, keyid }
    }

    pub fn sources(keys: &[&TestKey]) -> Vec<Box<dyn KeySource>> {
        keys.iter()
            .map(|k| Box::new(k.source.clone()) as Box<dyn KeySource>)
            .collect()
    }
}

/// Builds a root that lists `keys` for all four roles at threshold 1.
#[allow(unused)]
pub fn build_root(keys: &[&TestKey], version: u64, consistent_snapshot: bool) -> Root {
    let mut root = Root {
        spec_version: "1.0.0".to_string(),
        consistent_snapshot,
        version: NonZeroU64::new(version).unwrap(),
        expires: chrono::Utc::now() + chrono::Duration::days(30),
        keys: HashMap::new(),
        roles: HashMap::new(),
        _extra: HashMap::new(),
    };
    for key in keys {
        root.keys.insert(key.keyid.clone(), key.key.clone());
    }
    let keyids: Vec<_> = keys.iter().map(|k| k.keyid.clone()).collect();
    for role in [
        RoleType::Root,
        RoleType::Timestamp,
        RoleType::Snapshot,
        RoleType::Targets,
    ] {
        root.roles.insert(
            role,
            RoleKeys {
                keyids: keyids.clone(),
                threshold: NonZeroU64::new(1).unwrap(),
                _extra: HashMap::new(),
            },
        );
    }
    root
}

/// Signs a root payload with the given keys and returns its serialized
/// bytes, trailing newline included, exactly as they should land on disk.
#[allow(unused)]
pub fn sign_root(root: &Root, signers: &[&TestKey]) -> Vec<u8> {
    use rampart::schema::Role;
    let data = root.canonical_form().unwrap();
    let rng = SystemRandom::new();
    let signatures = signers
        .iter()
        .map(|key| {
            let key_pair = key.source.as_sign().unwrap();
            Signature {
                keyid: key.keyid.clone(),
                sig: key_pair.sign(&data, &rng).unwrap().into(),
            }
        })
        .collect();
    let signed = Signed {
        signed: root.clone(),
        signatures,
    };
    let mut buffer = serde_json::to_vec_pretty(&signed).unwrap();
    buffer.push(b'\n');
    buffer
}

/// Writes a signed root into a repository directory under its versioned
/// filename and returns the bytes.
#[allow(unused)]
pub fn write_root(repo_dir: &Path, root: &Root, signers: &[&TestKey]) -> Vec<u8> {
    let buffer = sign_root(root, signers);
    std::fs::write(
        repo_dir.join(format!("{}.root.json", root.version)),
        &buffer,
    )
    .unwrap();
    buffer
}

/// Authors a complete repository in `repo_dir`: metadata for the given root
/// plus the given targets, all at the same version with far-future
/// expirations. Returns the pinned root bytes.
#[allow(unused)]
pub fn author_repo(
    repo_dir: &Path,
    keys: &[&TestKey],
    version: u64,
    targets: &[(&str, &[u8])],
) -> Vec<u8> {
    author_repo_expiring(
        repo_dir,
        keys,
        version,
        targets,
        chrono::Utc::now() + chrono::Duration::days(14),
    )
}

/// Like `author_repo`, with a caller-chosen expiration for the non-root roles.
#[allow(unused)]
pub fn author_repo_expiring(
    repo_dir: &Path,
    keys: &[&TestKey],
    version: u64,
    targets: &[(&str, &[u8])],
    expires: chrono::DateTime<chrono::Utc>,
) -> Vec<u8> {
    author_repo_with_versions(repo_dir, keys, version, version, version, targets, expires)
}

/// Like `author_repo_expiring`, with a separate version per role.
#[allow(unused)]
pub fn author_repo_with_versions(
    repo_dir: &Path,
    keys: &[&TestKey],
    targets_version: u64,
    snapshot_version: u64,
    timestamp_version: u64,
    targets: &[(&str, &[u8])],
    expires: chrono::DateTime<chrono::Utc>,
) -> Vec<u8> {
    std::fs::create_dir_all(repo_dir).unwrap();
    let root = build_root(keys, 1, false);
    let root_bytes = write_root(repo_dir, &root, keys);

    let input_dir = repo_dir.join("input");
    std::fs::create_dir_all(&input_dir).unwrap();
    let mut editor = RepositoryEditor::new(repo_dir.join("1.root.json")).unwrap();
    editor
        .targets_version(NonZeroU64::new(targets_version).unwrap())
        .targets_expires(expires)
        .snapshot_version(NonZeroU64::new(snapshot_version).unwrap())
        .snapshot_expires(expires)
        .timestamp_version(NonZeroU64::new(timestamp_version).unwrap())
        .timestamp_expires(expires);
    for (name, content) in targets {
        let path = input_dir.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        editor.add_target_path(&path).unwrap();
    }

    let signed = editor.sign(&TestKey::sources(keys)).unwrap();
    signed.write(repo_dir).unwrap();
    signed
        .copy_targets(
            &input_dir,
            repo_dir,
            rampart::editor::signed::PathExists::Replace,
        )
        .unwrap();
    root_bytes
}
