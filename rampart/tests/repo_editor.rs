mod test_utils;

use futures::TryStreamExt;
use rampart::{
    FilesystemTransport, Mirror, Repository, RepositoryLoader, TargetName, TargetStatus,
};
use tempfile::TempDir;
use test_utils::{author_repo, dir_url, TestKey};

async fn load_repo(repo_dir: &std::path::Path, root_bytes: Vec<u8>) -> Repository {
    RepositoryLoader::new(
        root_bytes,
        vec![Mirror::new(dir_url(repo_dir), dir_url(repo_dir))],
    )
    .transport(FilesystemTransport)
    .load()
    .await
    .unwrap()
}

#[tokio::test]
async fn created_repository_loads_and_serves_targets() {
    let tmp = TempDir::new().unwrap();
    let key_dir = TempDir::new().unwrap();
    let key = TestKey::generate(key_dir.path(), "root");
    let repo_dir = tmp.path().join("repo");

    let root_bytes = author_repo(
        &repo_dir,
        &[&key],
        1,
        &[("greeting.txt", b"hello"), ("data.bin", b"\x00\x01\x02")],
    );
    let repo = load_repo(&repo_dir, root_bytes).await;

    let mut names: Vec<_> = repo.target_names().collect();
    names.sort_unstable();
    assert_eq!(names, vec!["data.bin", "greeting.txt"]);

    let stream = repo
        .read_target(&TargetName::new("greeting.txt").unwrap())
        .await
        .unwrap()
        .unwrap();
    let bytes: Vec<u8> = stream
        .try_fold(Vec::new(), |mut acc, chunk| async move {
            acc.extend_from_slice(&chunk);
            Ok(acc)
        })
        .await
        .unwrap();
    assert_eq!(bytes, b"hello");

    assert!(repo
        .read_target(&TargetName::new("no-such-target").unwrap())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn sync_downloads_then_reports_up_to_date() {
    let tmp = TempDir::new().unwrap();
    let key_dir = TempDir::new().unwrap();
    let key = TestKey::generate(key_dir.path(), "root");
    let repo_dir = tmp.path().join("repo");
    let outdir = tmp.path().join("out");

    let root_bytes = author_repo(
        &repo_dir,
        &[&key],
        1,
        &[("a.txt", b"aaa"), ("b.txt", b"bbb")],
    );
    let repo = load_repo(&repo_dir, root_bytes.clone()).await;

    let outcomes = repo.sync_targets(&outdir, 4).await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes
        .iter()
        .all(|o| matches!(o.status, TargetStatus::Updated)));
    assert_eq!(std::fs::read(outdir.join("a.txt")).unwrap(), b"aaa");
    assert_eq!(std::fs::read(outdir.join("b.txt")).unwrap(), b"bbb");

    // a second sync against unchanged metadata touches nothing
    let outcomes = repo.sync_targets(&outdir, 4).await.unwrap();
    assert!(outcomes
        .iter()
        .all(|o| matches!(o.status, TargetStatus::UpToDate)));
}

#[tokio::test]
async fn sync_prunes_targets_removed_from_metadata() {
    let tmp = TempDir::new().unwrap();
    let key_dir = TempDir::new().unwrap();
    let key = TestKey::generate(key_dir.path(), "root");
    let outdir = tmp.path().join("out");

    // first publish lists extra.txt, second publish drops it
    let repo_v1 = tmp.path().join("repo-v1");
    let root_bytes = author_repo(
        &repo_v1,
        &[&key],
        1,
        &[("keep.txt", b"keep"), ("extra.txt", b"extra")],
    );
    let repo = load_repo(&repo_v1, root_bytes.clone()).await;
    repo.sync_targets(&outdir, 4).await.unwrap();
    assert!(outdir.join("extra.txt").is_file());

    let repo_v2 = tmp.path().join("repo-v2");
    let root_bytes = author_repo(&repo_v2, &[&key], 2, &[("keep.txt", b"keep")]);
    let repo = load_repo(&repo_v2, root_bytes).await;
    let outcomes = repo.sync_targets(&outdir, 4).await.unwrap();

    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0].status, TargetStatus::UpToDate));
    assert!(outdir.join("keep.txt").is_file());
    assert!(!outdir.join("extra.txt").exists());
}

#[tokio::test]
async fn one_failed_target_does_not_stop_the_batch() {
    let tmp = TempDir::new().unwrap();
    let key_dir = TempDir::new().unwrap();
    let key = TestKey::generate(key_dir.path(), "root");
    let repo_dir = tmp.path().join("repo");
    let outdir = tmp.path().join("out");

    let root_bytes = author_repo(
        &repo_dir,
        &[&key],
        1,
        &[("good.txt", b"good"), ("bad.txt", b"bad!")],
    );
    // corrupt one target on the mirror after signing
    std::fs::write(repo_dir.join("bad.txt"), b"BAD!").unwrap();

    let repo = load_repo(&repo_dir, root_bytes).await;
    let outcomes = repo.sync_targets(&outdir, 4).await.unwrap();

    let good = outcomes.iter().find(|o| o.name.raw() == "good.txt").unwrap();
    let bad = outcomes.iter().find(|o| o.name.raw() == "bad.txt").unwrap();
    assert!(matches!(good.status, TargetStatus::Updated));
    assert!(matches!(
        bad.status,
        TargetStatus::Failed(rampart::Error::HashMismatch { .. })
    ));
    assert!(outdir.join("good.txt").is_file());
    // the corrupted target never reached its final path
    assert!(!outdir.join("bad.txt").exists());
}

#[tokio::test]
async fn target_grown_past_its_signed_length_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let key_dir = TempDir::new().unwrap();
    let key = TestKey::generate(key_dir.path(), "root");
    let repo_dir = tmp.path().join("repo");
    let outdir = tmp.path().join("out");

    let root_bytes = author_repo(&repo_dir, &[&key], 1, &[("grow.txt", b"1234")]);
    // replace the target on the mirror with something longer than the
    // metadata signed; the download is cut off at the signed length
    std::fs::write(repo_dir.join("grow.txt"), b"12345678").unwrap();

    let repo = load_repo(&repo_dir, root_bytes).await;
    let outcomes = repo.sync_targets(&outdir, 4).await.unwrap();

    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0].status, TargetStatus::Failed(_)));
    assert!(!outdir.join("grow.txt").exists());
    // no partial download lingers in the output directory
    let leftovers: Vec<_> = std::fs::read_dir(&outdir)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .filter(|n| n != "inventory.json")
        .collect();
    assert!(leftovers.is_empty(), "unexpected files: {leftovers:?}");
}
