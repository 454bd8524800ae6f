mod test_utils;

use rampart::{Error, FilesystemTransport, Limits, Mirror, RepositoryLoader};
use tempfile::TempDir;
use test_utils::{author_repo, build_root, dir_url, write_root, TestKey};

#[tokio::test]
async fn client_follows_root_rotation_chain() {
    let tmp = TempDir::new().unwrap();
    let key_dir = TempDir::new().unwrap();
    let old_key = TestKey::generate(key_dir.path(), "old");
    let new_key = TestKey::generate(key_dir.path(), "new");
    let repo_dir = tmp.path().join("repo");

    // the repo's current metadata is signed with the new key only
    author_repo(&repo_dir, &[&new_key], 1, &[("file.txt", b"contents")]);

    // overwrite the chain: v1 trusts the old key, v2 hands off to the new
    // key and is signed by both
    let root_v1 = build_root(&[&old_key], 1, false);
    let pinned = write_root(&repo_dir, &root_v1, &[&old_key]);
    let mut root_v2 = build_root(&[&new_key], 2, false);
    root_v2.keys.insert(old_key.keyid.clone(), old_key.key.clone());
    write_root(&repo_dir, &root_v2, &[&old_key, &new_key]);

    let repo = RepositoryLoader::new(
        pinned,
        vec![Mirror::new(dir_url(&repo_dir), dir_url(&repo_dir))],
    )
    .transport(FilesystemTransport)
    .load()
    .await
    .unwrap();

    assert_eq!(repo.root().signed.version.get(), 2);
}

#[tokio::test]
async fn skipped_root_version_ends_the_chain() {
    let tmp = TempDir::new().unwrap();
    let key_dir = TempDir::new().unwrap();
    let key = TestKey::generate(key_dir.path(), "root");
    let repo_dir = tmp.path().join("repo");

    let pinned = author_repo(&repo_dir, &[&key], 1, &[("file.txt", b"contents")]);

    // a version 3 root with no version 2 in between cannot prove custody;
    // the chain walk stops at the missing version and version 3 is ignored
    let root_v3 = build_root(&[&key], 3, false);
    write_root(&repo_dir, &root_v3, &[&key]);

    let repo = RepositoryLoader::new(
        pinned,
        vec![Mirror::new(dir_url(&repo_dir), dir_url(&repo_dir))],
    )
    .transport(FilesystemTransport)
    .load()
    .await
    .unwrap();

    assert_eq!(repo.root().signed.version.get(), 1);
}

#[tokio::test]
async fn rotation_chain_longer_than_the_limit_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let key_dir = TempDir::new().unwrap();
    let key = TestKey::generate(key_dir.path(), "root");
    let repo_dir = tmp.path().join("repo");

    let pinned = author_repo(&repo_dir, &[&key], 1, &[("file.txt", b"contents")]);

    // an unbroken chain of five rotations; the limit below allows two
    for version in 2..=5u64 {
        let root = build_root(&[&key], version, false);
        write_root(&repo_dir, &root, &[&key]);
    }

    let result = RepositoryLoader::new(
        pinned,
        vec![Mirror::new(dir_url(&repo_dir), dir_url(&repo_dir))],
    )
    .transport(FilesystemTransport)
    .limits(Limits {
        max_root_updates: 2,
        ..Limits::default()
    })
    .load()
    .await;

    assert!(matches!(
        result.unwrap_err(),
        Error::ExcessiveRootRotation { max: 2, .. }
    ));
}

#[tokio::test]
async fn rotation_requires_old_keys() {
    let tmp = TempDir::new().unwrap();
    let key_dir = TempDir::new().unwrap();
    let old_key = TestKey::generate(key_dir.path(), "old");
    let attacker = TestKey::generate(key_dir.path(), "attacker");
    let repo_dir = tmp.path().join("repo");

    let pinned = author_repo(&repo_dir, &[&old_key], 1, &[("file.txt", b"contents")]);

    // v2 signed only by a key the trusted root never authorized
    let root_v2 = build_root(&[&attacker], 2, false);
    write_root(&repo_dir, &root_v2, &[&attacker]);

    let result = RepositoryLoader::new(
        pinned,
        vec![Mirror::new(dir_url(&repo_dir), dir_url(&repo_dir))],
    )
    .transport(FilesystemTransport)
    .load()
    .await;

    assert!(matches!(
        result.unwrap_err(),
        Error::VerifyMetadata { .. }
    ));
}
