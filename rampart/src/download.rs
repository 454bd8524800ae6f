//! Downloading targets and keeping an output directory in sync with the
//! trusted targets metadata.

use crate::error::{self, Error, Result};
use crate::io::{max_size_adapter, DigestAdapter};
use crate::schema::Target;
use crate::transport::{TransportErrorKind, TransportStream};
use crate::{Prefix, Repository, TargetName};
use bytes::Bytes;
use futures::stream::StreamExt;
use futures_core::stream::BoxStream;
use log::{debug, info, warn};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use ring::digest::{Context, SHA256};
use serde::{Deserialize, Serialize};
use snafu::{futures::TryStreamExt as SnafuTryStreamExt, OptionExt, ResultExt};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use url::Url;

/// The filename under which a synced output directory records what it holds.
const INVENTORY_FILE: &str = "inventory.json";

/// Characters that cannot pass through a URL path component unencoded. `/` is
/// deliberately absent so that target names keep their directory structure on
/// the mirror.
const UNSAFE_IN_PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'}');

fn encode_filename(name: &str) -> String {
    utf8_percent_encode(name, UNSAFE_IN_PATH).to_string()
}

/// Records the targets previously written to an output directory, so a later
/// sync can skip up-to-date files and prune files the repository no longer
/// lists. Files the inventory has never heard of are left alone.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct Inventory {
    pub(crate) targets: HashMap<String, InventoryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct InventoryEntry {
    pub(crate) length: u64,
    pub(crate) sha256: String,
    pub(crate) filename: String,
}

impl Inventory {
    fn load(outdir: &Path) -> Result<Self> {
        let path = outdir.join(INVENTORY_FILE);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).unwrap_or_default()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err).context(error::FileOpenSnafu { path }),
        }
    }

    fn save(&self, outdir: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self).context(error::JsonSerializationSnafu {
            what: "target inventory",
        })?;
        atomic_write(outdir, &outdir.join(INVENTORY_FILE), &bytes)
    }
}

/// The per-target result of a sync. A failed target never aborts the batch;
/// callers decide what an incomplete sync means for them.
#[derive(Debug)]
pub struct TargetOutcome {
    /// The name of the target this outcome describes.
    pub name: TargetName,
    /// What happened to it.
    pub status: TargetStatus,
}

/// What happened to a single target during a sync.
#[derive(Debug)]
pub enum TargetStatus {
    /// The target was downloaded, verified, and written.
    Updated,
    /// The local copy already matched the metadata; nothing was fetched.
    UpToDate,
    /// The target could not be downloaded or failed verification.
    Failed(Error),
}

impl Repository {
    /// Prepends the target digest to the name if using consistent snapshots. Returns both the
    /// digest and the filename.
    pub(crate) fn target_digest_and_filename(
        &self,
        target: &Target,
        name: &TargetName,
    ) -> (Vec<u8>, String) {
        let sha256 = target.hashes.sha256.to_vec();
        if self.consistent_snapshot {
            let filename = format!("{}.{}", hex::encode(&sha256), name.resolved());
            (sha256, filename)
        } else {
            (sha256, name.resolved().to_owned())
        }
    }

    /// Fetches a target from the first mirror that can serve it. The stream
    /// is capped at the target's signed length and digest-checked on
    /// completion.
    pub(crate) async fn fetch_target(
        &self,
        target: &Target,
        digest: &[u8],
        filename: &str,
    ) -> Result<BoxStream<'static, Result<Bytes>>> {
        let (url, stream) = self.fetch_target_stream(target, filename).await?;
        let stream = DigestAdapter::sha256(stream, digest, url);
        Ok(stream.context(error::TransportSnafu).boxed())
    }

    /// Opens a length-capped stream for a target from the first mirror that
    /// answers. A longer stream is cut off by the cap and caught by the
    /// caller's length check.
    async fn fetch_target_stream(
        &self,
        target: &Target,
        filename: &str,
    ) -> Result<(Url, TransportStream)> {
        let mut errors = Vec::new();
        for mirror in &self.mirrors {
            let url = mirror
                .targets_base_url
                .join(&encode_filename(filename))
                .with_context(|_| error::JoinUrlSnafu {
                    path: filename,
                    url: mirror.targets_base_url.clone(),
                })?;
            let attempt = tokio::time::timeout(
                self.fetch_timeout,
                self.transport.fetch(url.clone()),
            )
            .await;
            match attempt {
                Ok(Ok(stream)) => {
                    let stream = max_size_adapter(stream, url.clone(), target.length, "target");
                    return Ok((url, stream));
                }
                Ok(Err(e)) => {
                    warn!("mirror {} failed for '{filename}': {e}", mirror.targets_base_url);
                    errors.push(e);
                }
                Err(_elapsed) => {
                    warn!(
                        "mirror {} timed out fetching '{filename}'",
                        mirror.targets_base_url
                    );
                    errors.push(crate::TransportError::new(
                        TransportErrorKind::Timeout,
                        &url,
                        format!("fetch did not complete within {:?}", self.fetch_timeout),
                    ));
                }
            }
        }
        error::NoWorkingMirrorsSnafu {
            file: filename,
            errors,
        }
        .fail()
    }

    /// Fetches a target by name, returning a digest-checked stream of its
    /// bytes, or `None` if the targets metadata does not list it.
    pub async fn read_target(
        &self,
        name: &TargetName,
    ) -> Result<Option<BoxStream<'static, Result<Bytes>>>> {
        let Some(target) = self.targets.signed.targets.get(name.raw()) else {
            return Ok(None);
        };
        let (digest, filename) = self.target_digest_and_filename(target, name);
        Ok(Some(self.fetch_target(target, &digest, &filename).await?))
    }

    /// Downloads a single target into `outdir`, verifying its exact length
    /// and hash before the file becomes visible at its final path.
    ///
    /// A verification failure is final; the mirrors already answered, and
    /// content that does not match the signed metadata is not something
    /// another mirror is trusted to fix.
    pub async fn save_target<P>(&self, name: &TargetName, outdir: P, prefix: Prefix) -> Result<()>
    where
        P: AsRef<Path>,
    {
        let outdir = outdir.as_ref();
        let target = self
            .targets
            .signed
            .targets
            .get(name.raw())
            .with_context(|| error::TargetNotFoundSnafu { name: name.clone() })?;
        let (expected_digest, filename) = self.target_digest_and_filename(target, name);
        let out_name = match prefix {
            Prefix::Digest => filename.clone(),
            Prefix::None => name.resolved().to_owned(),
        };
        let path = outdir.join(out_name);

        // the body streams straight into a temporary file with a running
        // digest, so a large target never sits in memory; nothing appears at
        // the final path until every check has passed. A mirror that fails
        // mid-download forfeits its partial file and the next one starts over.
        std::fs::create_dir_all(outdir).context(error::DirCreateSnafu { path: outdir })?;
        let mut errors = Vec::new();
        let mut saved = None;
        'mirrors: for mirror in &self.mirrors {
            let url = mirror
                .targets_base_url
                .join(&encode_filename(&filename))
                .with_context(|_| error::JoinUrlSnafu {
                    path: filename.clone(),
                    url: mirror.targets_base_url.clone(),
                })?;
            let opened =
                tokio::time::timeout(self.fetch_timeout, self.transport.fetch(url.clone())).await;
            let stream = match opened {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    warn!("mirror {} failed for '{filename}': {e}", mirror.targets_base_url);
                    errors.push(e);
                    continue;
                }
                Err(_elapsed) => {
                    errors.push(crate::TransportError::new(
                        TransportErrorKind::Timeout,
                        &url,
                        format!("fetch did not complete within {:?}", self.fetch_timeout),
                    ));
                    continue;
                }
            };
            let mut stream = max_size_adapter(stream, url, target.length, "target");
            let mut file = NamedTempFile::new_in(outdir)
                .context(error::TempFileCreateSnafu { path: outdir })?;
            let mut digest = Context::new(&SHA256);
            let mut size: u64 = 0;
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        digest.update(&bytes);
                        size = size.saturating_add(bytes.len() as u64);
                        file.write_all(&bytes)
                            .context(error::FileWriteSnafu { path: &path })?;
                    }
                    Err(e) => {
                        warn!(
                            "mirror {} failed mid-download of '{filename}': {e}",
                            mirror.targets_base_url
                        );
                        errors.push(e);
                        continue 'mirrors;
                    }
                }
            }
            saved = Some((file, digest.finish(), size));
            break;
        }
        let Some((file, calculated, size)) = saved else {
            return error::NoWorkingMirrorsSnafu {
                file: filename,
                errors,
            }
            .fail();
        };

        snafu::ensure!(
            size == target.length,
            error::SizeMismatchSnafu {
                context: name.raw(),
                size,
                expected: target.length,
            }
        );
        snafu::ensure!(
            calculated.as_ref() == expected_digest.as_slice(),
            error::HashMismatchSnafu {
                context: name.raw(),
                calculated: hex::encode(calculated),
                expected: hex::encode(&expected_digest),
            }
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context(error::DirCreateSnafu { path: parent })?;
        }
        file.persist(&path)
            .context(error::TempFilePersistSnafu { path })?;
        Ok(())
    }

    /// The names of targets whose local copies in `outdir` are missing or no
    /// longer match the trusted metadata, sorted by name.
    pub fn diff<P: AsRef<Path>>(&self, outdir: P) -> Result<Vec<TargetName>> {
        let outdir = outdir.as_ref();
        let inventory = Inventory::load(outdir)?;
        let mut changed = Vec::new();
        for (raw_name, target) in &self.targets.signed.targets {
            let name = TargetName::new(raw_name)?;
            if target_is_current(&inventory, outdir, raw_name, target) {
                continue;
            }
            changed.push(name);
        }
        changed.sort_by(|a, b| a.raw().cmp(b.raw()));
        Ok(changed)
    }

    /// Brings `outdir` in sync with the trusted targets metadata.
    ///
    /// Up-to-date targets are skipped, changed and new targets are downloaded
    /// with at most `concurrency` fetches in flight, and files recorded in a
    /// previous sync but absent from the current metadata are removed. Every
    /// listed target gets an outcome; one failed download does not stop the
    /// rest.
    pub async fn sync_targets<P>(&self, outdir: P, concurrency: usize) -> Result<Vec<TargetOutcome>>
    where
        P: AsRef<Path>,
    {
        let outdir = outdir.as_ref();
        std::fs::create_dir_all(outdir).context(error::DirCreateSnafu { path: outdir })?;
        let mut inventory = Inventory::load(outdir)?;
        let prefix = if self.consistent_snapshot {
            Prefix::Digest
        } else {
            Prefix::None
        };

        let mut outcomes = Vec::new();
        let mut pending = Vec::new();
        for (raw_name, target) in &self.targets.signed.targets {
            let name = TargetName::new(raw_name)?;
            if target_is_current(&inventory, outdir, raw_name, target) {
                debug!("'{raw_name}' is up to date");
                outcomes.push(TargetOutcome {
                    name,
                    status: TargetStatus::UpToDate,
                });
            } else {
                pending.push((name, target));
            }
        }

        let mut downloads = futures::stream::iter(pending.into_iter().map(|(name, target)| {
            let outdir = outdir.to_path_buf();
            async move {
                let result = self.save_target(&name, &outdir, prefix).await;
                (name, target, result)
            }
        }))
        .buffer_unordered(concurrency.max(1));

        while let Some((name, target, result)) = downloads.next().await {
            match result {
                Ok(()) => {
                    info!("downloaded '{}'", name.raw());
                    let (digest, filename) = self.target_digest_and_filename(target, &name);
                    let filename = match prefix {
                        Prefix::Digest => filename,
                        Prefix::None => name.resolved().to_owned(),
                    };
                    inventory.targets.insert(
                        name.raw().to_owned(),
                        InventoryEntry {
                            length: target.length,
                            sha256: hex::encode(digest),
                            filename,
                        },
                    );
                    outcomes.push(TargetOutcome {
                        name,
                        status: TargetStatus::Updated,
                    });
                }
                Err(e) => {
                    warn!("failed to sync '{}': {e}", name.raw());
                    outcomes.push(TargetOutcome {
                        name,
                        status: TargetStatus::Failed(e),
                    });
                }
            }
        }
        drop(downloads);

        let removed = self.prune_obsolete(outdir, &mut inventory)?;
        for name in removed {
            info!("pruned '{name}', no longer listed");
        }
        inventory.save(outdir)?;

        outcomes.sort_by(|a, b| a.name.raw().cmp(b.name.raw()));
        Ok(outcomes)
    }

    /// Removes files the inventory tracks but the current metadata no longer
    /// lists. Returns the pruned target names.
    fn prune_obsolete(&self, outdir: &Path, inventory: &mut Inventory) -> Result<Vec<String>> {
        let obsolete: Vec<String> = inventory
            .targets
            .keys()
            .filter(|name| !self.targets.signed.targets.contains_key(*name))
            .cloned()
            .collect();
        let mut removed = Vec::new();
        for name in obsolete {
            if let Some(entry) = inventory.targets.remove(&name) {
                let path = outdir.join(&entry.filename);
                match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => return Err(err).context(error::FileRemoveSnafu { path }),
                }
                removed.push(name);
            }
        }
        removed.sort();
        Ok(removed)
    }
}

/// True when the inventory records this target with the same length and hash
/// and the recorded file is still on disk.
fn target_is_current(
    inventory: &Inventory,
    outdir: &Path,
    raw_name: &str,
    target: &Target,
) -> bool {
    inventory.targets.get(raw_name).is_some_and(|entry| {
        entry.length == target.length
            && entry.sha256 == hex::encode(&target.hashes.sha256)
            && outdir.join(&entry.filename).is_file()
    })
}

/// Writes `bytes` to `path` through a temporary file in the same directory,
/// so a crash never leaves a partial file at the final path.
fn atomic_write(dir: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context(error::DirCreateSnafu { path: parent })?;
    }
    let mut file = NamedTempFile::new_in(dir).context(error::TempFileCreateSnafu { path: dir })?;
    file.write_all(bytes)
        .context(error::FileWriteSnafu { path })?;
    file.persist(path)
        .context(error::TempFilePersistSnafu { path })?;
    Ok(())
}
