#![allow(clippy::used_underscore_binding)]

//! Provides a `RepositoryEditor` object for building and editing signed repositories.

mod keys;
pub mod signed;

use crate::editor::signed::{SignedRepository, SignedRole};
use crate::error::{self, Result};
use crate::key_source::KeySource;
use crate::schema::{
    Hashes, Role, Root, Signed, Snapshot, SnapshotMeta, Target, Targets, Timestamp, TimestampMeta,
};
use crate::Repository;
use chrono::{DateTime, Utc};
use ring::digest::{SHA256, SHA256_OUTPUT_LEN};
use ring::rand::SystemRandom;
use serde_json::Value;
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::HashMap;
use std::num::NonZeroU64;
use std::path::Path;

/// The metadata format version this library writes.
pub const SPEC_VERSION: &str = "1.0.0";

/// `RepositoryEditor` contains the various bits of data needed to construct
/// or edit a signed repository.
///
/// A new repository may be started using the `new()` method.
///
/// An existing [`Repository`] may be loaded and edited using the
/// `from_repo()` method. When a repo is loaded in this way, versions and
/// expirations are discarded. It is good practice to update these whenever
/// a repo is changed.
///
/// Targets, versions, and expirations may be added to their respective roles
/// via the provided "setter" methods. The final step in the process is the
/// `sign()` method, which takes a given set of signing keys, builds each of
/// the roles using the data provided, and signs the roles. This results in a
/// `SignedRepository` which can be used to write the repo to disk.
#[derive(Debug)]
pub struct RepositoryEditor {
    signed_root: SignedRole<Root>,

    targets: Targets,

    snapshot_version: Option<NonZeroU64>,
    snapshot_expires: Option<DateTime<Utc>>,
    snapshot_extra: Option<HashMap<String, Value>>,

    timestamp_version: Option<NonZeroU64>,
    timestamp_expires: Option<DateTime<Utc>>,
    timestamp_extra: Option<HashMap<String, Value>>,
}

impl RepositoryEditor {
    /// Create a new, bare `RepositoryEditor`
    pub fn new<P>(root_path: P) -> Result<RepositoryEditor>
    where
        P: AsRef<Path>,
    {
        // Read and parse the root.json. Without a good root, it doesn't
        // make sense to continue
        let root_path = root_path.as_ref();
        let root_buf = std::fs::read(root_path).context(error::FileReadSnafu { path: root_path })?;
        let root_buf_len = root_buf.len() as u64;
        let root = serde_json::from_slice::<Signed<Root>>(&root_buf)
            .context(error::ParseTrustedRootSnafu)?;
        let mut digest = [0; SHA256_OUTPUT_LEN];
        digest.copy_from_slice(ring::digest::digest(&SHA256, &root_buf).as_ref());

        let signed_root = SignedRole {
            signed: root,
            buffer: root_buf,
            sha256: digest,
            length: root_buf_len,
        };

        Ok(RepositoryEditor {
            signed_root,
            targets: Targets::new(
                SPEC_VERSION.to_string(),
                NonZeroU64::new(1).unwrap(),
                Utc::now(),
            ),
            snapshot_version: None,
            snapshot_expires: None,
            snapshot_extra: None,
            timestamp_version: None,
            timestamp_expires: None,
            timestamp_extra: None,
        })
    }

    /// Given a [`Repository`] and the path to a valid root.json, create a
    /// `RepositoryEditor`. This `RepositoryEditor` will include all of the targets
    /// and bits of _extra metadata from the roles included. It will not, however,
    /// include the versions or expirations and the user is expected to set them.
    pub fn from_repo<P>(root_path: P, repo: &Repository) -> Result<RepositoryEditor>
    where
        P: AsRef<Path>,
    {
        let mut editor = RepositoryEditor::new(root_path)?;
        editor.targets(repo.targets().signed.clone())?;
        editor.snapshot(repo.snapshot().signed.clone())?;
        editor.timestamp(repo.timestamp().signed.clone())?;

        Ok(editor)
    }

    /// Builds and signs each required role and returns a complete signed set
    /// of repository metadata.
    ///
    /// While `RepositoryEditor`s fields are all `Option`s, this step requires,
    /// at the very least, that the "version" and "expiration" field is set for
    /// each role; e.g. `snapshot_version`, `snapshot_expires`, etc.
    pub fn sign(self, keys: &[Box<dyn KeySource>]) -> Result<SignedRepository> {
        let rng = SystemRandom::new();
        let root = &self.signed_root.signed.signed;

        let signed_targets = SignedRole::new(self.targets.clone(), root, keys, &rng)?;
        let signed_snapshot = self
            .build_snapshot(&signed_targets)
            .and_then(|snapshot| SignedRole::new(snapshot, root, keys, &rng))?;
        let signed_timestamp = self
            .build_timestamp(&signed_snapshot)
            .and_then(|timestamp| SignedRole::new(timestamp, root, keys, &rng))?;

        Ok(SignedRepository {
            root: self.signed_root,
            targets: signed_targets,
            snapshot: signed_snapshot,
            timestamp: signed_timestamp,
        })
    }

    /// Add an existing `Targets` struct to the repository.
    pub fn targets(&mut self, targets: Targets) -> Result<&mut Self> {
        ensure!(
            targets.spec_version == SPEC_VERSION,
            error::SpecVersionSnafu {
                given: targets.spec_version,
                supported: SPEC_VERSION
            }
        );
        self.targets = targets;
        Ok(self)
    }

    /// Add an existing `Snapshot` to the repository. Only the `_extra` data
    /// is preserved
    pub fn snapshot(&mut self, snapshot: Snapshot) -> Result<&mut Self> {
        ensure!(
            snapshot.spec_version == SPEC_VERSION,
            error::SpecVersionSnafu {
                given: snapshot.spec_version,
                supported: SPEC_VERSION
            }
        );
        self.snapshot_version(snapshot.version);
        self.snapshot_expires(snapshot.expires);
        self.snapshot_extra = Some(snapshot._extra);
        Ok(self)
    }

    /// Add an existing `Timestamp` to the repository. Only the `_extra` data
    /// is preserved
    pub fn timestamp(&mut self, timestamp: Timestamp) -> Result<&mut Self> {
        ensure!(
            timestamp.spec_version == SPEC_VERSION,
            error::SpecVersionSnafu {
                given: timestamp.spec_version,
                supported: SPEC_VERSION
            }
        );
        self.timestamp_version(timestamp.version);
        self.timestamp_expires(timestamp.expires);
        self.timestamp_extra = Some(timestamp._extra);
        Ok(self)
    }

    /// Add a `Target` to the repository
    pub fn add_target(&mut self, name: &str, target: Target) -> &mut Self {
        self.targets.add_target(name, target);
        self
    }

    /// Remove a `Target` from the repository
    pub fn remove_target(&mut self, name: &str) -> &mut Self {
        self.targets.remove_target(name);
        self
    }

    /// Add a target to the repository using its path
    ///
    /// Note: This function builds a `Target` synchronously;
    /// no multithreading or parallelism is used. If you have a large number
    /// of targets to add, and require advanced performance, you may want to
    /// construct `Target`s directly in parallel and use `add_target()`.
    pub fn add_target_path<P>(&mut self, target_path: P) -> Result<&mut Self>
    where
        P: AsRef<Path>,
    {
        let (target_name, target) = RepositoryEditor::build_target(target_path)?;
        self.add_target(&target_name, target);
        Ok(self)
    }

    /// Add a list of target paths to the repository
    ///
    /// See the note on `add_target_path()` regarding performance.
    pub fn add_target_paths<P>(&mut self, targets: Vec<P>) -> Result<&mut Self>
    where
        P: AsRef<Path>,
    {
        for target in targets {
            let (target_name, target) = RepositoryEditor::build_target(target)?;
            self.add_target(&target_name, target);
        }
        Ok(self)
    }

    /// Builds a target struct for the given path
    pub fn build_target<P>(target_path: P) -> Result<(String, Target)>
    where
        P: AsRef<Path>,
    {
        let target_path = target_path.as_ref();

        // Build a Target from the path given. If it is not a file, this will fail
        let target = Target::from_path(target_path)
            .context(error::TargetFromPathSnafu { path: target_path })?;

        let target_name = target_path
            .file_name()
            .and_then(|name| name.to_str())
            .context(error::MissingSnafu {
                field: "target file name",
            })?
            .to_owned();

        Ok((target_name, target))
    }

    /// Remove all targets from this repo
    pub fn clear_targets(&mut self) -> &mut Self {
        self.targets.targets.clear();
        self
    }

    /// Set the `Snapshot` version
    pub fn snapshot_version(&mut self, snapshot_version: NonZeroU64) -> &mut Self {
        self.snapshot_version = Some(snapshot_version);
        self
    }

    /// Set the `Snapshot` expiration
    pub fn snapshot_expires(&mut self, snapshot_expires: DateTime<Utc>) -> &mut Self {
        self.snapshot_expires = Some(snapshot_expires);
        self
    }

    /// Set the `Targets` version
    pub fn targets_version(&mut self, targets_version: NonZeroU64) -> &mut Self {
        self.targets.version = targets_version;
        self
    }

    /// Set the `Targets` expiration
    pub fn targets_expires(&mut self, targets_expires: DateTime<Utc>) -> &mut Self {
        self.targets.expires = targets_expires;
        self
    }

    /// Set the `Timestamp` version
    pub fn timestamp_version(&mut self, timestamp_version: NonZeroU64) -> &mut Self {
        self.timestamp_version = Some(timestamp_version);
        self
    }

    /// Set the `Timestamp` expiration
    pub fn timestamp_expires(&mut self, timestamp_expires: DateTime<Utc>) -> &mut Self {
        self.timestamp_expires = Some(timestamp_expires);
        self
    }

    // =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

    /// Build the `Snapshot` struct
    fn build_snapshot(&self, signed_targets: &SignedRole<Targets>) -> Result<Snapshot> {
        let version = self.snapshot_version.context(error::MissingSnafu {
            field: "snapshot version",
        })?;
        let expires = self.snapshot_expires.context(error::MissingSnafu {
            field: "snapshot expiration",
        })?;

        let mut snapshot = Snapshot::new(SPEC_VERSION.to_string(), version, expires);
        snapshot._extra = self.snapshot_extra.clone().unwrap_or_default();

        // Snapshot pins the exact targets metadata clients must converge to
        snapshot
            .meta
            .insert("targets.json".to_owned(), Self::snapshot_meta(signed_targets));

        Ok(snapshot)
    }

    /// Build a `SnapshotMeta` struct from a given `SignedRole<T>`. This metadata
    /// includes the sha256 and length of the signed role.
    fn snapshot_meta<T>(role: &SignedRole<T>) -> SnapshotMeta
    where
        T: Role,
    {
        SnapshotMeta {
            hashes: Some(Hashes {
                sha256: role.sha256.to_vec().into(),
                _extra: HashMap::new(),
            }),
            length: Some(role.length),
            version: role.signed.signed.version(),
            _extra: HashMap::new(),
        }
    }

    /// Build the `Timestamp` struct
    fn build_timestamp(&self, signed_snapshot: &SignedRole<Snapshot>) -> Result<Timestamp> {
        let version = self.timestamp_version.context(error::MissingSnafu {
            field: "timestamp version",
        })?;
        let expires = self.timestamp_expires.context(error::MissingSnafu {
            field: "timestamp expiration",
        })?;

        let mut timestamp = Timestamp::new(SPEC_VERSION.to_string(), version, expires);
        timestamp
            .meta
            .insert("snapshot.json".to_owned(), Self::timestamp_meta(signed_snapshot));
        timestamp._extra = self.timestamp_extra.clone().unwrap_or_default();

        Ok(timestamp)
    }

    /// Build a `TimestampMeta` struct from a given `SignedRole<T>`. This metadata
    /// includes the sha256 and length of the signed role.
    fn timestamp_meta<T>(role: &SignedRole<T>) -> TimestampMeta
    where
        T: Role,
    {
        TimestampMeta {
            hashes: Hashes {
                sha256: role.sha256.to_vec().into(),
                _extra: HashMap::new(),
            },
            length: role.length,
            version: role.signed.signed.version(),
            _extra: HashMap::new(),
        }
    }

    /// Refreshes the timestamp and snapshot from an existing repository,
    /// bumping both versions and re-pinning the metadata they describe.
    /// Allows for expirations to be changed.
    pub fn update_snapshot(
        repo: &Repository,
        keys: &[Box<dyn KeySource>],
        timestamp_expiration: DateTime<Utc>,
        snapshot_expiration: DateTime<Utc>,
    ) -> Result<SignedRepository> {
        let rng = SystemRandom::new();
        let signed_targets = SignedRole::from_signed(repo.targets().clone())?;
        let signed_root = SignedRole::from_signed(repo.root().clone())?;

        let mut snapshot = repo.snapshot().signed.clone();
        snapshot.expires = snapshot_expiration;
        snapshot.version = snapshot
            .version
            .checked_add(1)
            .context(error::VersionOverflowSnafu {
                role: crate::schema::RoleType::Snapshot,
            })?;
        snapshot
            .meta
            .insert("targets.json".to_owned(), Self::snapshot_meta(&signed_targets));
        let signed_snapshot = SignedRole::new(snapshot, &signed_root.signed.signed, keys, &rng)?;

        let mut timestamp = repo.timestamp().signed.clone();
        timestamp.expires = timestamp_expiration;
        timestamp.version = timestamp
            .version
            .checked_add(1)
            .context(error::VersionOverflowSnafu {
                role: crate::schema::RoleType::Timestamp,
            })?;
        timestamp
            .meta
            .insert("snapshot.json".to_owned(), Self::timestamp_meta(&signed_snapshot));
        let signed_timestamp = SignedRole::new(timestamp, &signed_root.signed.signed, keys, &rng)?;

        Ok(SignedRepository {
            root: signed_root,
            targets: signed_targets,
            snapshot: signed_snapshot,
            timestamp: signed_timestamp,
        })
    }
}
