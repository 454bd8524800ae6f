//! A client library for secure software updates.
//!
//! Repositories publish four kinds of signed metadata: a root role that names
//! the keys and thresholds for every role, a timestamp role that points at
//! the current snapshot, a snapshot role that pins the version of every other
//! metadata file, and a targets role that lists downloadable files with their
//! exact lengths and hashes.
//!
//! A client starts from a pinned root it received out of band, walks the
//! chain of root rotations to the newest root the mirrors can prove custody
//! of, then refreshes timestamp, snapshot, and targets in that order,
//! rejecting stale versions, expired metadata, and content that does not
//! match its signed length or hash. Only a fully verified metadata set is
//! committed to the on-disk datastore, so an interrupted refresh leaves the
//! previous trusted state untouched.
//!
//! Use [`RepositoryLoader`] to refresh and obtain a [`Repository`], then
//! [`Repository::sync_targets`] or [`Repository::read_target`] to retrieve
//! target files. Use [`editor::RepositoryEditor`] to author and sign a
//! repository.

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]

mod datastore;
mod download;
pub mod editor;
pub mod error;
mod fetch;
#[cfg(feature = "http")]
mod http;
mod io;
pub mod key_source;
pub mod schema;
pub mod sign;
mod transport;
mod trust;

pub use crate::download::{TargetOutcome, TargetStatus};
pub use crate::error::{Error, Result};
#[cfg(feature = "http")]
pub use crate::http::HttpTransport;
pub use crate::transport::{
    DefaultTransport, FilesystemTransport, Transport, TransportError, TransportErrorKind,
    TransportStream,
};

use crate::datastore::Datastore;
use crate::fetch::fetch_mirrors;
use crate::schema::{Role, RoleType, Root, Signed, Snapshot, Targets, Timestamp};
use crate::trust::TrustStore;
use chrono::{DateTime, Utc};
use log::warn;
use ring::digest::{digest, SHA256};
use serde::de::DeserializeOwned;
use snafu::{ensure, OptionExt, ResultExt};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// A mirror serving repository metadata and target files.
///
/// The two base URLs are distinct because metadata and targets are commonly
/// hosted separately, for example signed metadata on an origin server and
/// large target files on a CDN.
#[derive(Debug, Clone)]
pub struct Mirror {
    /// The base URL for metadata files (`root.json` and friends).
    pub metadata_base_url: Url,
    /// The base URL for target files.
    pub targets_base_url: Url,
}

impl Mirror {
    /// Creates a `Mirror` from metadata and targets base URLs. A trailing
    /// slash is appended where missing so that joins treat the URL as a
    /// directory.
    pub fn new(metadata_base_url: Url, targets_base_url: Url) -> Self {
        Self {
            metadata_base_url: ensure_trailing_slash(metadata_base_url),
            targets_base_url: ensure_trailing_slash(targets_base_url),
        }
    }
}

fn ensure_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        url.set_path(&format!("{}/", url.path()));
    }
    url
}

/// Limits on the sizes of metadata the client is willing to download, and on
/// the length of the root rotation chain it is willing to walk. These bound
/// what a malicious or broken mirror can make the client consume.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// The maximum allowable size in bytes for a downloaded root.json file.
    pub max_root_size: u64,
    /// The maximum allowable size in bytes for a downloaded timestamp.json file.
    pub max_timestamp_size: u64,
    /// The maximum allowable size in bytes for a downloaded targets.json
    /// file, used when the snapshot metadata does not pin its length.
    pub max_targets_size: u64,
    /// The maximum number of root rotations to walk in a single refresh.
    pub max_root_updates: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_root_size: 1024 * 1024,
            max_timestamp_size: 1024 * 1024,
            max_targets_size: 10 * 1024 * 1024,
            max_root_updates: 1024,
        }
    }
}

/// Whether to fail a refresh when metadata has expired.
///
/// Refusing expired metadata is what defeats freeze attacks, so `Unsafe`
/// exists only for disaster recovery against a repository whose operators can
/// no longer re-sign, and for tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirationEnforcement {
    /// Expirations will be enforced. You MUST use this option to get
    /// protection against freeze attacks.
    Safe,
    /// Expirations will not be enforced.
    Unsafe,
}

/// Whether or not to prepend a filename with the target's digest when saving
/// targets to an output directory.
#[derive(Debug, Clone, Copy)]
pub enum Prefix {
    /// Do not prefix target filenames.
    None,
    /// Prefix target filenames with the target's sha256, as consistent
    /// snapshot repositories do.
    Digest,
}

/// The name of a target in the repository, validated against path traversal.
///
/// Target names are repository-relative paths; a name that is absolute, or
/// that contains `.` or `..` components, could escape the output directory
/// during a sync and is rejected outright.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetName {
    raw: String,
}

impl TargetName {
    /// Creates a `TargetName`, rejecting unsafe names.
    pub fn new<S: Into<String>>(raw: S) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            return error::TargetNameInvalidSnafu {
                name: raw,
                reason: "empty name",
            }
            .fail();
        }
        if raw.starts_with('/') {
            return error::TargetNameInvalidSnafu {
                name: raw,
                reason: "absolute path",
            }
            .fail();
        }
        for component in raw.split('/') {
            if component.is_empty() {
                return error::TargetNameInvalidSnafu {
                    name: raw.clone(),
                    reason: "empty path component",
                }
                .fail();
            }
            if component == "." || component == ".." {
                return error::TargetNameInvalidSnafu {
                    name: raw.clone(),
                    reason: "path traversal component",
                }
                .fail();
            }
        }
        Ok(Self { raw })
    }

    /// The name as it appears in the targets metadata.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The name resolved to a safe repository-relative path. Since unsafe
    /// names are rejected at construction, this is the raw name.
    pub fn resolved(&self) -> &str {
        &self.raw
    }
}

impl std::fmt::Display for TargetName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Builds and loads a [`Repository`].
#[derive(Debug, Clone)]
pub struct RepositoryLoader {
    root: Vec<u8>,
    mirrors: Vec<Mirror>,
    transport: Box<dyn Transport>,
    limits: Limits,
    datastore: Option<PathBuf>,
    expiration_enforcement: ExpirationEnforcement,
    fetch_timeout: Duration,
}

impl RepositoryLoader {
    /// Create a new `RepositoryLoader` from the bytes of a trusted,
    /// out-of-band obtained `root.json` and the mirrors to refresh from.
    /// Mirrors are tried in order; list the most trusted or closest first.
    pub fn new(root: impl Into<Vec<u8>>, mirrors: Vec<Mirror>) -> Self {
        Self {
            root: root.into(),
            mirrors,
            transport: Box::new(DefaultTransport::new()),
            limits: Limits::default(),
            datastore: None,
            expiration_enforcement: ExpirationEnforcement::Safe,
            fetch_timeout: Duration::from_secs(30),
        }
    }

    /// Set the transport used to fetch files. The default transport handles
    /// `file://` URLs, plus `http`/`https` when the `http` feature is enabled.
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Box::new(transport);
        self
    }

    /// Set the directory where trusted metadata is persisted between
    /// refreshes. Without one, a temporary directory is used and trust starts
    /// over from the pinned root each session.
    pub fn datastore<P: Into<PathBuf>>(mut self, datastore: P) -> Self {
        self.datastore = Some(datastore.into());
        self
    }

    /// Set download and rotation limits.
    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the expiration enforcement mode.
    ///
    /// **CAUTION**: `Unsafe` disables the freeze attack protection.
    pub fn expiration_enforcement(mut self, exp: ExpirationEnforcement) -> Self {
        self.expiration_enforcement = exp;
        self
    }

    /// Set the per-mirror timeout for a single metadata or target fetch.
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Refreshes metadata from the mirrors and returns a verified
    /// [`Repository`].
    pub async fn load(self) -> Result<Repository> {
        Repository::load(self).await
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// A repository whose metadata has been refreshed and verified.
///
/// All metadata it exposes has passed signature, version, expiration, and
/// integrity checks; target downloads are verified against that metadata
/// before anything reaches its final path.
#[derive(Debug, Clone)]
pub struct Repository {
    transport: Box<dyn Transport>,
    consistent_snapshot: bool,
    root: Signed<Root>,
    snapshot: Signed<Snapshot>,
    timestamp: Signed<Timestamp>,
    targets: Signed<Targets>,
    mirrors: Vec<Mirror>,
    fetch_timeout: Duration,
}

impl Repository {
    /// Load and verify repository metadata.
    async fn load(loader: RepositoryLoader) -> Result<Repository> {
        let RepositoryLoader {
            root,
            mirrors,
            transport,
            limits,
            datastore,
            expiration_enforcement,
            fetch_timeout,
        } = loader;

        if let Some(path) = &datastore {
            std::fs::create_dir_all(path).context(error::DatastoreCreateSnafu { path })?;
        }
        let datastore = Datastore::new(datastore)?;

        // sampling the clock is monotonic against the datastore, so a stepped
        // back clock cannot resurrect expired metadata
        let now = datastore.system_time().await?;

        // 1. establish trust from the pinned root, then fast-forward with the
        //    root cached from an earlier session, if any
        let pinned =
            serde_json::from_slice::<Signed<Root>>(&root).context(error::ParseTrustedRootSnafu)?;
        check_spec_version(&pinned.signed.spec_version)?;
        let mut trust = TrustStore::new(pinned)?;
        if let Some(cached) = datastore.bytes("root.json").await? {
            match serde_json::from_slice::<Signed<Root>>(&cached) {
                Ok(cached) => trust.try_adopt_cached(cached),
                Err(_) => {
                    // an unreadable cached root cannot be trusted, and keeping
                    // it would fail every later refresh the same way
                    datastore.remove("root.json").await?;
                }
            }
        }

        // 2. walk the rotation chain until a mirror reports the next version
        //    absent
        let mut updates = 0;
        loop {
            ensure!(
                updates < limits.max_root_updates,
                error::ExcessiveRootRotationSnafu {
                    max: limits.max_root_updates,
                    version: trust.root().signed.version.get(),
                }
            );
            let next_version = trust.root().signed.version.get() + 1;
            let file = format!("{next_version}.root.json");
            let bytes = match fetch_mirrors(
                transport.as_ref(),
                &mirrors,
                &file,
                limits.max_root_size,
                "max_root_size argument",
                fetch_timeout,
            )
            .await
            {
                Ok(bytes) => bytes,
                Err(Error::MetadataNotFound { .. }) => break,
                Err(e) => return Err(e),
            };
            let new_root = serde_json::from_slice::<Signed<Root>>(&bytes)
                .context(error::ParseMetadataSnafu {
                    role: RoleType::Root,
                })?;
            check_spec_version(&new_root.signed.spec_version)?;
            trust.rotate(new_root)?;
            updates += 1;
        }
        if expiration_enforcement == ExpirationEnforcement::Safe {
            trust.check_expiration(now)?;
        }
        let root = trust.root().clone();
        let consistent_snapshot = root.signed.consistent_snapshot;

        // 3. timestamp tells us which snapshot is current
        let timestamp_bytes = fetch_mirrors(
            transport.as_ref(),
            &mirrors,
            "timestamp.json",
            limits.max_timestamp_size,
            "max_timestamp_size argument",
            fetch_timeout,
        )
        .await?;
        let timestamp = parse_and_verify::<Timestamp>(&timestamp_bytes, &root.signed)?;
        let old_timestamp = stored_role::<Timestamp>(&datastore, "timestamp.json").await;
        if let Some(old) = &old_timestamp {
            check_rollback(RoleType::Timestamp, old.signed.version.get(), &timestamp)?;
        }
        check_expired(&timestamp.signed, now, expiration_enforcement)?;

        // 4. snapshot pins every other metadata file
        let snapshot_meta = timestamp
            .signed
            .meta
            .get("snapshot.json")
            .context(error::MetaMissingSnafu {
                role: RoleType::Timestamp,
                file: "snapshot.json",
            })?
            .clone();
        let snapshot_filename = if consistent_snapshot {
            format!("{}.snapshot.json", snapshot_meta.version)
        } else {
            "snapshot.json".to_owned()
        };
        let snapshot_bytes = fetch_mirrors(
            transport.as_ref(),
            &mirrors,
            &snapshot_filename,
            snapshot_meta.length,
            "snapshot.json length pinned by timestamp.json",
            fetch_timeout,
        )
        .await?;
        check_length("snapshot.json", &snapshot_bytes, Some(snapshot_meta.length))?;
        check_digest(
            "snapshot.json",
            &snapshot_bytes,
            Some(snapshot_meta.hashes.sha256.as_ref()),
        )?;
        let snapshot = parse_and_verify::<Snapshot>(&snapshot_bytes, &root.signed)?;
        ensure!(
            snapshot.signed.version == snapshot_meta.version,
            error::VersionMismatchSnafu {
                role: RoleType::Snapshot,
                fetched_version: snapshot.signed.version.get(),
                expected_version: snapshot_meta.version.get(),
            }
        );
        let old_snapshot = stored_role::<Snapshot>(&datastore, "snapshot.json").await;
        if let Some(old) = &old_snapshot {
            check_rollback(RoleType::Snapshot, old.signed.version.get(), &snapshot)?;
            // no file the old snapshot pinned may move backwards in the new
            // one; a mix of old and new metadata is how mix-and-match attacks
            // are assembled
            for (file, old_meta) in &old.signed.meta {
                if let Some(new_meta) = snapshot.signed.meta.get(file) {
                    ensure!(
                        new_meta.version >= old_meta.version,
                        error::MetaVersionRollbackSnafu {
                            file,
                            current_version: old_meta.version.get(),
                            new_version: new_meta.version.get(),
                        }
                    );
                }
            }
        }
        check_expired(&snapshot.signed, now, expiration_enforcement)?;

        // 5. targets, pinned by the snapshot
        let targets_meta = snapshot
            .signed
            .meta
            .get("targets.json")
            .context(error::MetaMissingSnafu {
                role: RoleType::Snapshot,
                file: "targets.json",
            })?
            .clone();
        if let Some(ts_pin) = timestamp.signed.meta.get("targets.json") {
            if ts_pin.version != targets_meta.version {
                // the snapshot is authoritative for targets pins
                warn!(
                    "timestamp and snapshot disagree on targets.json version ({} vs {})",
                    ts_pin.version, targets_meta.version
                );
            }
        }
        let targets_filename = if consistent_snapshot {
            format!("{}.targets.json", targets_meta.version)
        } else {
            "targets.json".to_owned()
        };
        let targets_bytes = fetch_mirrors(
            transport.as_ref(),
            &mirrors,
            &targets_filename,
            targets_meta.length.unwrap_or(limits.max_targets_size),
            "max_targets_size argument",
            fetch_timeout,
        )
        .await?;
        check_length("targets.json", &targets_bytes, targets_meta.length)?;
        check_digest(
            "targets.json",
            &targets_bytes,
            targets_meta.hashes.as_ref().map(|h| h.sha256.as_ref()),
        )?;
        let targets = parse_and_verify::<Targets>(&targets_bytes, &root.signed)?;
        ensure!(
            targets.signed.version == targets_meta.version,
            error::VersionMismatchSnafu {
                role: RoleType::Targets,
                fetched_version: targets.signed.version.get(),
                expected_version: targets_meta.version.get(),
            }
        );
        if let Some(old) = stored_role::<Targets>(&datastore, "targets.json").await {
            check_rollback(RoleType::Targets, old.signed.version.get(), &targets)?;
        }
        check_expired(&targets.signed, now, expiration_enforcement)?;

        // 6. everything verified; commit the whole set at once
        let root_bytes = serde_json::to_vec_pretty(&root).context(error::SerializeRoleSnafu {
            role: RoleType::Root,
        })?;
        datastore
            .commit(&[
                ("root.json", root_bytes),
                ("timestamp.json", timestamp_bytes),
                ("snapshot.json", snapshot_bytes),
                ("targets.json", targets_bytes),
            ])
            .await?;

        Ok(Repository {
            transport,
            consistent_snapshot,
            root,
            snapshot,
            timestamp,
            targets,
            mirrors,
            fetch_timeout,
        })
    }

    /// The trusted root metadata.
    pub fn root(&self) -> &Signed<Root> {
        &self.root
    }

    /// The trusted snapshot metadata.
    pub fn snapshot(&self) -> &Signed<Snapshot> {
        &self.snapshot
    }

    /// The trusted timestamp metadata.
    pub fn timestamp(&self) -> &Signed<Timestamp> {
        &self.timestamp
    }

    /// The trusted targets metadata.
    pub fn targets(&self) -> &Signed<Targets> {
        &self.targets
    }

    /// The names of all targets in the repository, in no particular order.
    pub fn target_names(&self) -> impl Iterator<Item = &str> {
        self.targets.signed.targets.keys().map(String::as_str)
    }

    /// Whether this repository uses consistent snapshot naming.
    pub fn consistent_snapshot(&self) -> bool {
        self.consistent_snapshot
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

fn check_spec_version(spec_version: &str) -> Result<()> {
    ensure!(
        spec_version.split('.').next() == Some("1"),
        error::SpecVersionSnafu {
            given: spec_version,
            supported: editor::SPEC_VERSION,
        }
    );
    Ok(())
}

/// Parse a signed role and verify its signatures against the trusted root.
fn parse_and_verify<T>(bytes: &[u8], root: &Root) -> Result<Signed<T>>
where
    T: Role + DeserializeOwned,
{
    let role = serde_json::from_slice::<Signed<T>>(bytes)
        .context(error::ParseMetadataSnafu { role: T::TYPE })?;
    root.verify_role(&role)
        .context(error::VerifyMetadataSnafu { role: T::TYPE })?;
    Ok(role)
}

/// Load a role from the datastore, ignoring a missing or unparseable file. A
/// corrupt datastore must not brick the client; the refresh simply proceeds
/// without rollback protection from that file.
async fn stored_role<T>(datastore: &Datastore, file: &str) -> Option<Signed<T>>
where
    T: DeserializeOwned,
{
    let bytes = datastore.bytes(file).await.ok()??;
    serde_json::from_slice(&bytes).ok()
}

/// Fetched metadata may repeat the trusted version but must never precede it.
fn check_rollback<T: Role>(role: RoleType, current_version: u64, new: &Signed<T>) -> Result<()> {
    ensure!(
        new.signed.version().get() >= current_version,
        error::OlderMetadataSnafu {
            role,
            current_version,
            new_version: new.signed.version().get(),
        }
    );
    Ok(())
}

fn check_expired<T: Role>(
    role: &T,
    now: DateTime<Utc>,
    enforcement: ExpirationEnforcement,
) -> Result<()> {
    if enforcement == ExpirationEnforcement::Safe {
        ensure!(
            role.expires() > now,
            error::ExpiredMetadataSnafu {
                role: T::TYPE,
                expires: role.expires(),
            }
        );
    }
    Ok(())
}

fn check_length(context: &str, bytes: &[u8], expected: Option<u64>) -> Result<()> {
    if let Some(expected) = expected {
        ensure!(
            bytes.len() as u64 == expected,
            error::SizeMismatchSnafu {
                context,
                size: bytes.len() as u64,
                expected,
            }
        );
    }
    Ok(())
}

fn check_digest(context: &str, bytes: &[u8], expected: Option<&[u8]>) -> Result<()> {
    if let Some(expected) = expected {
        let calculated = digest(&SHA256, bytes);
        ensure!(
            calculated.as_ref() == expected,
            error::HashMismatchSnafu {
                context,
                calculated: hex::encode(calculated),
                expected: hex::encode(expected),
            }
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_name_safety() {
        assert!(TargetName::new("app/v1.2.3/app.tar.gz").is_ok());
        assert!(TargetName::new("flat-file.txt").is_ok());
        assert!(TargetName::new("").is_err());
        assert!(TargetName::new("/etc/passwd").is_err());
        assert!(TargetName::new("../escape").is_err());
        assert!(TargetName::new("a/../../b").is_err());
        assert!(TargetName::new("a//b").is_err());
        assert!(TargetName::new("./a").is_err());
    }

    #[test]
    fn mirror_urls_end_in_slash() {
        let mirror = Mirror::new(
            Url::parse("https://example.com/metadata").unwrap(),
            Url::parse("https://example.com/targets/").unwrap(),
        );
        assert!(mirror.metadata_base_url.path().ends_with('/'));
        assert!(mirror.targets_base_url.path().ends_with('/'));
    }

    #[test]
    fn spec_version_gate() {
        assert!(check_spec_version("1.0.0").is_ok());
        assert!(check_spec_version("1.5.0").is_ok());
        assert!(check_spec_version("2.0.0").is_err());
    }
}
