//! Provides the `SignedRepository` object which represents the output of `RepositoryEditor` after
//! signing, ready to be written to disk.

use crate::editor::keys::get_root_keys;
use crate::error::{self, Result};
use crate::key_source::KeySource;
use crate::schema::{Role, Root, Signature, Signed, Snapshot, Target, Targets, Timestamp};
use ring::digest::{digest, SHA256, SHA256_OUTPUT_LEN};
use ring::rand::SecureRandom;
use serde::Deserialize;
use serde_plain::forward_from_str_to_serde;
use snafu::{ensure, OptionExt, ResultExt};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

/// A signed role, including its serialized form (`buffer`) which is meant to
/// be written to file. The `sha256` and `length` are calculated from this
/// buffer and included in metadata for other roles, which makes it
/// imperative that this buffer is what is written to disk.
///
/// Convenience methods are provided on `SignedRepository` to ensure that
/// each role's buffer is written correctly.
#[derive(Debug, Clone)]
pub struct SignedRole<T> {
    pub(crate) signed: Signed<T>,
    pub(crate) buffer: Vec<u8>,
    pub(crate) sha256: [u8; SHA256_OUTPUT_LEN],
    pub(crate) length: u64,
}

impl<T> SignedRole<T>
where
    T: Role,
{
    /// Signs a role payload with every provided key that the root authorizes
    /// for it. At least one of the provided keys must be authorized; whether
    /// the result meets the role's threshold is checked by clients, since a
    /// repository may be signed incrementally by separate key holders.
    pub fn new(
        role: T,
        root: &Root,
        keys: &[Box<dyn KeySource>],
        rng: &dyn SecureRandom,
    ) -> Result<Self> {
        let root_keys = get_root_keys(root, keys)?;

        let role_keys = root
            .roles
            .get(&T::TYPE)
            .context(error::NoRoleKeysSnafu { role: T::TYPE })?;
        let signing_keys: Vec<_> = root_keys
            .iter()
            .filter(|(keyid, _)| role_keys.keyids.contains(*keyid))
            .collect();
        ensure!(
            !signing_keys.is_empty(),
            error::SigningKeysNotFoundSnafu { role: T::TYPE }
        );

        let mut role = Signed {
            signed: role,
            signatures: Vec::new(),
        };
        let data = role
            .signed
            .canonical_form()
            .context(error::VerifyMetadataSnafu { role: T::TYPE })?;
        for (signing_key_id, signing_key) in signing_keys {
            let sig = signing_key.sign(&data, rng)?;
            role.signatures.push(Signature {
                keyid: signing_key_id.clone(),
                sig: sig.into(),
            });
        }

        SignedRole::from_signed(role)
    }

    /// Creates a `SignedRole<T>` from an already-signed role, serializing it
    /// and capturing the exact bytes other roles will pin by length and hash.
    pub fn from_signed(role: Signed<T>) -> Result<SignedRole<T>> {
        let mut buffer =
            serde_json::to_vec_pretty(&role).context(error::SerializeRoleSnafu { role: T::TYPE })?;
        buffer.push(b'\n');
        let length = buffer.len() as u64;

        let mut sha256 = [0; SHA256_OUTPUT_LEN];
        sha256.copy_from_slice(digest(&SHA256, &buffer).as_ref());

        Ok(SignedRole {
            signed: role,
            buffer,
            sha256,
            length,
        })
    }

    /// Appends signatures over this role's payload from every provided key
    /// the root authorizes, keeping the signatures already present. Used when
    /// separate key holders countersign the same metadata.
    pub fn add_signatures(
        self,
        root: &Root,
        keys: &[Box<dyn KeySource>],
        rng: &dyn SecureRandom,
    ) -> Result<Self> {
        let root_keys = get_root_keys(root, keys)?;
        let role_keys = root
            .roles
            .get(&T::TYPE)
            .context(error::NoRoleKeysSnafu { role: T::TYPE })?;

        let mut role = self.signed;
        let data = role
            .signed
            .canonical_form()
            .context(error::VerifyMetadataSnafu { role: T::TYPE })?;
        let mut added = 0;
        for (keyid, signing_key) in &root_keys {
            if !role_keys.keyids.contains(keyid) {
                continue;
            }
            // replace any earlier signature from the same key
            role.signatures.retain(|sig| &sig.keyid != keyid);
            let sig = signing_key.sign(&data, rng)?;
            role.signatures.push(Signature {
                keyid: keyid.clone(),
                sig: sig.into(),
            });
            added += 1;
        }
        ensure!(added > 0, error::SigningKeysNotFoundSnafu { role: T::TYPE });

        SignedRole::from_signed(role)
    }

    /// Provides access to the internal signed metadata object.
    pub fn signed(&self) -> &Signed<T> {
        &self.signed
    }

    /// Provides access to the internal buffer containing the serialized form of the signed role.
    /// This buffer should be used anywhere this role is written to file.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Provides the sha256 digest of the signed role.
    pub fn sha256(&self) -> &[u8] {
        &self.sha256
    }

    /// Provides the length in bytes of the serialized representation of the signed role.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Write the current role's buffer to the given directory with the
    /// appropriate file name, through a temporary file so a crash never
    /// leaves a truncated metadata file behind.
    pub fn write<P>(&self, outdir: P, consistent_snapshot: bool) -> Result<()>
    where
        P: AsRef<Path>,
    {
        let outdir = outdir.as_ref();
        fs::create_dir_all(outdir).context(error::DirCreateSnafu { path: outdir })?;

        let path = outdir.join(self.signed.signed.filename(consistent_snapshot));
        let mut file =
            NamedTempFile::new_in(outdir).context(error::TempFileCreateSnafu { path: outdir })?;
        file.write_all(&self.buffer)
            .context(error::FileWriteSnafu { path: &path })?;
        file.persist(&path)
            .context(error::TempFilePersistSnafu { path })?;
        Ok(())
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// A complete set of signed repository metadata.
///
/// Note: without the target files, the repository cannot be used. It is up
/// to the user to ensure all the target files referenced by the metadata are
/// available. There are convenience methods to help with this.
#[derive(Debug)]
pub struct SignedRepository {
    pub(crate) root: SignedRole<Root>,
    pub(crate) targets: SignedRole<Targets>,
    pub(crate) snapshot: SignedRole<Snapshot>,
    pub(crate) timestamp: SignedRole<Timestamp>,
}

impl SignedRepository {
    /// Writes the metadata to the given directory. If consistent snapshots
    /// are used, the appropriate files are prefixed with their version.
    pub fn write<P>(&self, outdir: P) -> Result<()>
    where
        P: AsRef<Path>,
    {
        let consistent_snapshot = self.root.signed.signed.consistent_snapshot;
        self.root.write(&outdir, consistent_snapshot)?;
        self.targets.write(&outdir, consistent_snapshot)?;
        self.snapshot.write(&outdir, consistent_snapshot)?;
        self.timestamp.write(&outdir, consistent_snapshot)
    }

    /// The signed root role.
    pub fn root(&self) -> &SignedRole<Root> {
        &self.root
    }

    /// The signed targets role.
    pub fn targets(&self) -> &SignedRole<Targets> {
        &self.targets
    }

    /// Crawls a given directory and copies any targets found to the given
    /// "out" directory. If consistent snapshots are used, the target files
    /// are prefixed with their `sha256`.
    ///
    /// For each file found in the `indir`, the method gets the filename and
    /// if the filename exists in `Targets`, the file's sha256 is compared
    /// against the data in `Targets`. If this data does not match, the
    /// method will fail.
    pub fn copy_targets<P1, P2>(
        &self,
        indir: P1,
        outdir: P2,
        replace_behavior: PathExists,
    ) -> Result<()>
    where
        P1: AsRef<Path>,
        P2: AsRef<Path>,
    {
        self.walk_targets(
            indir.as_ref(),
            outdir.as_ref(),
            replace_behavior,
            TargetsWalkAction::Copy,
        )
    }

    /// Crawls a given directory and hard-links any targets found into the
    /// given "out" directory. Identical to [`Self::copy_targets`] except
    /// that it creates links instead of copying, saving space when the
    /// input files are on the same filesystem.
    pub fn link_targets<P1, P2>(
        &self,
        indir: P1,
        outdir: P2,
        replace_behavior: PathExists,
    ) -> Result<()>
    where
        P1: AsRef<Path>,
        P2: AsRef<Path>,
    {
        self.walk_targets(
            indir.as_ref(),
            outdir.as_ref(),
            replace_behavior,
            TargetsWalkAction::Link,
        )
    }

    fn walk_targets(
        &self,
        indir: &Path,
        outdir: &Path,
        replace_behavior: PathExists,
        action: TargetsWalkAction,
    ) -> Result<()> {
        let targets = &self.targets.signed.signed;
        let consistent_snapshot = self.root.signed.signed.consistent_snapshot;
        fs::create_dir_all(outdir).context(error::DirCreateSnafu { path: outdir })?;

        let walker = WalkDir::new(indir).follow_links(true);
        for entry in walker {
            let entry = entry.context(error::WalkDirSnafu { directory: indir })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(file_name) = entry.path().file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            // files that aren't listed targets are not ours to manage
            let Some(repo_target) = targets.targets.get(file_name) else {
                continue;
            };
            place_target(
                entry.path(),
                outdir,
                replace_behavior,
                action,
                file_name,
                repo_target,
                consistent_snapshot,
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum TargetsWalkAction {
    Copy,
    Link,
}

/// `PathExists` allows the user of our copy functions to specify what happens when the target
/// is being written to a shared targets directory and the file already exists from another repo.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
pub enum PathExists {
    /// Leave the existing file.
    Skip,
    /// Remove and replace the file; you might want this to update file metadata, for example.
    Replace,
    /// Stop writing targets and return an error.
    Fail,
}
forward_from_str_to_serde!(PathExists);

/// Places a single target into the repository's targets directory, verifying
/// that the file on disk matches the hash recorded in the signed metadata.
/// (We're dealing with a signed repo, so it's too late to add targets.)
fn place_target(
    input: &Path,
    outdir: &Path,
    replace_behavior: PathExists,
    action: TargetsWalkAction,
    file_name: &str,
    repo_target: &Target,
    consistent_snapshot: bool,
) -> Result<()> {
    let target_from_path =
        Target::from_path(input).context(error::TargetFromPathSnafu { path: input })?;
    ensure!(
        target_from_path.hashes.sha256 == repo_target.hashes.sha256,
        error::HashMismatchSnafu {
            context: file_name,
            calculated: hex::encode(&target_from_path.hashes.sha256),
            expected: hex::encode(&repo_target.hashes.sha256),
        }
    );

    let dest: PathBuf = if consistent_snapshot {
        outdir.join(format!(
            "{}.{file_name}",
            hex::encode(&repo_target.hashes.sha256)
        ))
    } else {
        outdir.join(file_name)
    };

    if dest.exists() {
        match replace_behavior {
            PathExists::Skip => return Ok(()),
            PathExists::Fail => return error::FileExistsSnafu { path: dest }.fail(),
            PathExists::Replace => {
                fs::remove_file(&dest).context(error::FileRemoveSnafu { path: &dest })?;
            }
        }
    }
    match action {
        TargetsWalkAction::Copy => {
            fs::copy(input, &dest).context(error::FileCopySnafu {
                src: input,
                dst: &dest,
            })?;
        }
        TargetsWalkAction::Link => {
            fs::hard_link(input, &dest).context(error::FileCopySnafu {
                src: input,
                dst: &dest,
            })?;
        }
    }
    Ok(())
}
