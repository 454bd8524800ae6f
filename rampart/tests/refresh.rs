mod test_utils;

use rampart::{
    Error, ExpirationEnforcement, FilesystemTransport, Mirror, RepositoryLoader,
};
use std::path::Path;
use tempfile::TempDir;
use test_utils::{author_repo, author_repo_expiring, author_repo_with_versions, dir_url, TestKey};

fn loader(repo_dir: &Path, root_bytes: Vec<u8>) -> RepositoryLoader {
    RepositoryLoader::new(
        root_bytes,
        vec![Mirror::new(dir_url(repo_dir), dir_url(repo_dir))],
    )
    .transport(FilesystemTransport)
}

#[tokio::test]
async fn rollback_to_older_timestamp_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let key_dir = TempDir::new().unwrap();
    let key = TestKey::generate(key_dir.path(), "root");
    let datastore = tmp.path().join("datastore");

    // the client first sees version 5, then a mirror replays version 3
    let repo_new = tmp.path().join("repo-new");
    let root_bytes = author_repo(&repo_new, &[&key], 5, &[("file.txt", b"v5")]);
    loader(&repo_new, root_bytes.clone())
        .datastore(&datastore)
        .load()
        .await
        .unwrap();

    let repo_old = tmp.path().join("repo-old");
    let root_bytes = author_repo(&repo_old, &[&key], 3, &[("file.txt", b"v3")]);
    let result = loader(&repo_old, root_bytes)
        .datastore(&datastore)
        .load()
        .await;

    assert!(matches!(
        result.unwrap_err(),
        Error::OlderMetadata {
            current_version: 5,
            new_version: 3,
            ..
        }
    ));
}

#[tokio::test]
async fn newer_snapshot_pinning_older_targets_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let key_dir = TempDir::new().unwrap();
    let key = TestKey::generate(key_dir.path(), "root");
    let datastore = tmp.path().join("datastore");

    // the trusted snapshot pins targets.json at version 5
    let repo_a = tmp.path().join("repo-a");
    let root_bytes = author_repo(&repo_a, &[&key], 5, &[("file.txt", b"v5")]);
    loader(&repo_a, root_bytes)
        .datastore(&datastore)
        .load()
        .await
        .unwrap();

    // a correctly signed snapshot at a higher version pins targets.json at
    // version 3; mixing a new snapshot with old targets is still a rollback
    let repo_b = tmp.path().join("repo-b");
    let root_bytes = author_repo_with_versions(
        &repo_b,
        &[&key],
        3,
        6,
        6,
        &[("file.txt", b"v3")],
        chrono::Utc::now() + chrono::Duration::days(14),
    );
    let result = loader(&repo_b, root_bytes)
        .datastore(&datastore)
        .load()
        .await;

    assert!(matches!(
        result.unwrap_err(),
        Error::MetaVersionRollback {
            current_version: 5,
            new_version: 3,
            ..
        }
    ));
}

#[tokio::test]
async fn oversized_snapshot_is_cut_at_its_pinned_length() {
    let tmp = TempDir::new().unwrap();
    let key_dir = TempDir::new().unwrap();
    let key = TestKey::generate(key_dir.path(), "root");
    let repo_dir = tmp.path().join("repo");

    let root_bytes = author_repo(&repo_dir, &[&key], 1, &[("file.txt", b"contents")]);

    // pad the snapshot past the length the timestamp pins for it; the
    // download is cut off at the pinned length instead of being read whole
    let snapshot_path = repo_dir.join("snapshot.json");
    let mut snapshot = std::fs::read(&snapshot_path).unwrap();
    snapshot.extend_from_slice(b"padding");
    std::fs::write(&snapshot_path, snapshot).unwrap();

    let result = loader(&repo_dir, root_bytes).load().await;
    assert!(matches!(
        result.unwrap_err(),
        Error::NoWorkingMirrors { .. }
    ));
}

#[tokio::test]
async fn failed_refresh_keeps_previous_trusted_state() {
    let tmp = TempDir::new().unwrap();
    let key_dir = TempDir::new().unwrap();
    let key = TestKey::generate(key_dir.path(), "root");
    let datastore = tmp.path().join("datastore");

    let repo_dir = tmp.path().join("repo");
    let root_bytes = author_repo(&repo_dir, &[&key], 2, &[("file.txt", b"contents")]);
    loader(&repo_dir, root_bytes.clone())
        .datastore(&datastore)
        .load()
        .await
        .unwrap();
    let trusted_timestamp = std::fs::read(datastore.join("timestamp.json")).unwrap();

    // tamper with the snapshot on the mirror; the timestamp pins its hash
    let snapshot_path = repo_dir.join("snapshot.json");
    let mut snapshot = std::fs::read(&snapshot_path).unwrap();
    let mid = snapshot.len() / 2;
    snapshot[mid] ^= 0x20;
    std::fs::write(&snapshot_path, snapshot).unwrap();

    let result = loader(&repo_dir, root_bytes)
        .datastore(&datastore)
        .load()
        .await;
    assert!(matches!(result.unwrap_err(), Error::HashMismatch { .. }));

    // nothing was committed; the datastore still holds the trusted set
    assert_eq!(
        std::fs::read(datastore.join("timestamp.json")).unwrap(),
        trusted_timestamp
    );
}

#[tokio::test]
async fn expired_metadata_is_rejected_unless_unsafe() {
    let tmp = TempDir::new().unwrap();
    let key_dir = TempDir::new().unwrap();
    let key = TestKey::generate(key_dir.path(), "root");
    let repo_dir = tmp.path().join("repo");

    let root_bytes = author_repo_expiring(
        &repo_dir,
        &[&key],
        1,
        &[("file.txt", b"contents")],
        chrono::Utc::now() - chrono::Duration::days(1),
    );

    let result = loader(&repo_dir, root_bytes.clone()).load().await;
    assert!(matches!(result.unwrap_err(), Error::ExpiredMetadata { .. }));

    // disaster recovery mode loads anyway
    let repo = loader(&repo_dir, root_bytes)
        .expiration_enforcement(ExpirationEnforcement::Unsafe)
        .load()
        .await
        .unwrap();
    assert_eq!(repo.timestamp().signed.version.get(), 1);
}

#[tokio::test]
async fn mirror_failover_serves_from_second_mirror() {
    let tmp = TempDir::new().unwrap();
    let key_dir = TempDir::new().unwrap();
    let key = TestKey::generate(key_dir.path(), "root");

    let repo_dir = tmp.path().join("repo");
    let root_bytes = author_repo(&repo_dir, &[&key], 1, &[("file.txt", b"contents")]);
    let empty_dir = tmp.path().join("empty");
    std::fs::create_dir_all(&empty_dir).unwrap();

    // the first mirror has nothing; the refresh succeeds off the second
    let repo = RepositoryLoader::new(
        root_bytes,
        vec![
            Mirror::new(dir_url(&empty_dir), dir_url(&empty_dir)),
            Mirror::new(dir_url(&repo_dir), dir_url(&repo_dir)),
        ],
    )
    .transport(FilesystemTransport)
    .load()
    .await
    .unwrap();
    assert_eq!(repo.timestamp().signed.version.get(), 1);
}

#[tokio::test]
async fn no_working_mirror_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let key_dir = TempDir::new().unwrap();
    let key = TestKey::generate(key_dir.path(), "root");

    let repo_dir = tmp.path().join("repo");
    let root_bytes = author_repo(&repo_dir, &[&key], 1, &[("file.txt", b"contents")]);
    let empty_dir = tmp.path().join("empty");
    std::fs::create_dir_all(&empty_dir).unwrap();

    let result = RepositoryLoader::new(
        root_bytes,
        vec![Mirror::new(dir_url(&empty_dir), dir_url(&empty_dir))],
    )
    .transport(FilesystemTransport)
    .load()
    .await;

    // every mirror reports timestamp.json absent
    assert!(matches!(
        result.unwrap_err(),
        Error::MetadataNotFound { .. }
    ));
}
