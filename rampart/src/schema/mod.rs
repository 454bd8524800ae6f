#![allow(clippy::used_underscore_binding)]

//! The typed metadata model: the four top-level role payloads and the signed
//! envelope that wraps them.
//!
//! Deserialization preserves unknown fields (`_extra`) so that the canonical
//! JSON form of a parsed payload reproduces exactly what was signed;
//! verification always operates over that canonical form, never over a lossy
//! re-encoding.

mod de;
pub mod decoded;
mod error;
mod iter;
pub mod key;
mod spki;
mod verify;

use crate::schema::decoded::{Decoded, Hex};
pub use crate::schema::error::{Error, Result};
use crate::schema::iter::KeysIter;
use crate::schema::key::Key;
use crate::sign::Sign;
use chrono::{DateTime, Utc};
use olpc_cjson::CanonicalFormatter;
use ring::digest::{Context, SHA256};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_plain::{forward_display_to_serde, forward_from_str_to_serde};
use snafu::ResultExt;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::num::NonZeroU64;
use std::path::Path;

/// The type of metadata role.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RoleType {
    /// The root role names the keys and signature thresholds authorized for
    /// every other role, including itself.
    Root,
    /// The timestamp role is small and frequently re-signed; it names the
    /// current snapshot so a client can detect being served stale metadata.
    Timestamp,
    /// The snapshot role pins the version (and optionally length and hash) of
    /// every other metadata file, fixing the exact repository state a client
    /// converges to.
    Snapshot,
    /// The targets role lists the files a client may download, each with an
    /// exact length and content hash.
    Targets,
    /// A targets role whose authority was delegated by another targets role.
    /// Represented in the model; delegation resolution is not performed by
    /// the refresh engine.
    DelegatedTargets,
}

forward_display_to_serde!(RoleType);
forward_from_str_to_serde!(RoleType);

/// Common trait implemented by all role payloads.
pub trait Role: Serialize {
    /// The type of role this payload represents.
    const TYPE: RoleType;

    /// When this metadata expires and must no longer be trusted.
    fn expires(&self) -> DateTime<Utc>;

    /// The payload version. Clients must never replace metadata with a lower
    /// version than the one currently trusted.
    fn version(&self) -> NonZeroU64;

    /// The filename this role is stored under on a repository.
    fn filename(&self, consistent_snapshot: bool) -> String;

    /// The deterministic serialization of this payload, used when signing and
    /// verifying. [Canonical JSON](http://wiki.laptop.org/go/Canonical_JSON).
    fn canonical_form(&self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut data, CanonicalFormatter::new());
        self.serialize(&mut ser)
            .context(error::JsonSerializationSnafu { what: "role" })?;
        Ok(data)
    }
}

/// A signed metadata envelope.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Signed<T> {
    /// The role payload that is signed.
    pub signed: T,
    /// The signatures over the payload's canonical form.
    pub signatures: Vec<Signature>,
}

/// A signature and the ID of the key that made it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Signature {
    /// The key ID, which must be listed in root.json to count toward any
    /// threshold.
    pub keyid: Decoded<Hex>,
    /// The hex-encoded signature over the canonical form of the payload.
    pub sig: Decoded<Hex>,
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The root role payload. It is verified against the *previous* trusted
/// root's keys (chain of custody); only the very first root is trusted via an
/// out-of-band pinned copy.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "root")]
pub struct Root {
    /// The version of the metadata file format, as a semver string.
    pub spec_version: String,

    /// Whether the repository uses consistent snapshots: metadata filenames
    /// prefixed with their version, target filenames prefixed with their
    /// digest, so concurrent readers never observe a half-updated state.
    pub consistent_snapshot: bool,

    /// The payload version; rotation requires exactly this plus one.
    pub version: NonZeroU64,

    /// When this metadata expires. Expired intermediate roots are accepted
    /// during rotation; the final root in a chain must be fresh.
    pub expires: DateTime<Utc>,

    /// The public keys trusted by this root, by key ID. Key IDs are validated
    /// against the key material during deserialization.
    #[serde(deserialize_with = "de::deserialize_keys")]
    pub keys: HashMap<Decoded<Hex>, Key>,

    /// Each role's authorized key IDs and signature threshold.
    pub roles: HashMap<RoleType, RoleKeys>,

    /// Extra arguments found during deserialization, preserved for signature
    /// verification. Use an empty map when constructing this struct.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

/// The key IDs authorized for a role and the minimum number of distinct valid
/// signatures required to trust a payload for it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RoleKeys {
    /// The key IDs authorized for the role.
    pub keyids: Vec<Decoded<Hex>>,

    /// The threshold of distinct valid signatures required.
    pub threshold: NonZeroU64,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Root {
    /// An iterator over the keys authorized for a role.
    pub fn keys(&self, role: RoleType) -> impl Iterator<Item = &Key> {
        KeysIter {
            keyids_iter: match self.roles.get(&role) {
                Some(role_keys) => role_keys.keyids.iter(),
                None => [].iter(),
            },
            keys: &self.keys,
        }
    }

    /// Given a signing key, returns the corresponding key ID listed in this
    /// root, if any.
    pub fn key_id(&self, key_pair: &dyn Sign) -> Option<Decoded<Hex>> {
        let public = key_pair.public_key();
        self.keys
            .iter()
            .find(|(_, key)| **key == public)
            .map(|(key_id, _)| key_id.clone())
    }
}

impl Role for Root {
    const TYPE: RoleType = RoleType::Root;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }

    fn filename(&self, _consistent_snapshot: bool) -> String {
        // root is always versioned so the rotation chain stays fetchable
        format!("{}.root.json", self.version())
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The timestamp role payload. Its `meta` must describe `snapshot.json`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "timestamp")]
pub struct Timestamp {
    /// The version of the metadata file format, as a semver string.
    pub spec_version: String,

    /// The payload version.
    pub version: NonZeroU64,

    /// When this metadata expires. The timestamp's short lifetime bounds how
    /// long a freeze attack can go unnoticed.
    pub expires: DateTime<Utc>,

    /// Describes the current snapshot metadata file.
    pub meta: HashMap<String, TimestampMeta>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

/// Describes a metadata file within `timestamp.json`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TimestampMeta {
    /// The length in bytes of the described metadata file.
    pub length: u64,

    /// The hashes of the described metadata file.
    pub hashes: Hashes,

    /// The version of the described metadata file.
    pub version: NonZeroU64,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Timestamp {
    /// Creates a new `Timestamp` with an empty `meta` map.
    pub fn new(spec_version: String, version: NonZeroU64, expires: DateTime<Utc>) -> Self {
        Timestamp {
            spec_version,
            version,
            expires,
            meta: HashMap::new(),
            _extra: HashMap::new(),
        }
    }
}

impl Role for Timestamp {
    const TYPE: RoleType = RoleType::Timestamp;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }

    fn filename(&self, _consistent_snapshot: bool) -> String {
        // never versioned; it is the entry point a client polls for freshness
        "timestamp.json".to_string()
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The snapshot role payload.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "snapshot")]
pub struct Snapshot {
    /// The version of the metadata file format, as a semver string.
    pub spec_version: String,

    /// The payload version.
    pub version: NonZeroU64,

    /// When this metadata expires.
    pub expires: DateTime<Utc>,

    /// The expected version, and optionally length and hashes, of every other
    /// metadata file, keyed by filename (e.g. `targets.json`).
    pub meta: HashMap<String, SnapshotMeta>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

/// Describes a metadata file within `snapshot.json`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SnapshotMeta {
    /// The length in bytes of the described metadata file. Optional; without
    /// it the client falls back to its own download limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,

    /// The hashes of the described metadata file. Optional; without it the
    /// version alone identifies the file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashes: Option<Hashes>,

    /// The version of the described metadata file.
    pub version: NonZeroU64,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

/// A hash dictionary. Only sha256 is required; additional algorithms ride
/// along in `_extra`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Hashes {
    /// The SHA-256 digest of the described file.
    pub sha256: Decoded<Hex>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Snapshot {
    /// Creates a new `Snapshot` with an empty `meta` map.
    pub fn new(spec_version: String, version: NonZeroU64, expires: DateTime<Utc>) -> Self {
        Snapshot {
            spec_version,
            version,
            expires,
            meta: HashMap::new(),
            _extra: HashMap::new(),
        }
    }
}

impl Role for Snapshot {
    const TYPE: RoleType = RoleType::Snapshot;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }

    fn filename(&self, consistent_snapshot: bool) -> String {
        if consistent_snapshot {
            format!("{}.snapshot.json", self.version())
        } else {
            "snapshot.json".to_string()
        }
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The targets role payload.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "targets")]
pub struct Targets {
    /// The version of the metadata file format, as a semver string.
    pub spec_version: String,

    /// The payload version.
    pub version: NonZeroU64,

    /// When this metadata expires.
    pub expires: DateTime<Utc>,

    /// The target files trusted by this role, keyed by target path relative
    /// to a mirror's targets base URL.
    pub targets: HashMap<String, Target>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

/// Describes a target file: its exact length, content hashes, and optional
/// application-defined attributes.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Target {
    /// The exact length in bytes of the target file. Downloads are capped at
    /// this many bytes.
    pub length: u64,

    /// The content hashes of the target file; every recorded hash must match
    /// a downloaded copy.
    pub hashes: Hashes,

    /// Opaque application data describing the target (file modes, dependency
    /// hints, and so on). Not interpreted by the client.
    #[serde(default)]
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub custom: HashMap<String, Value>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Target {
    /// Builds a `Target` by hashing a file on disk.
    pub fn from_path<P>(path: P) -> Result<Target>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        if !path.is_file() {
            return error::TargetNotAFileSnafu { path }.fail();
        }

        let mut file = File::open(path).context(error::FileOpenSnafu { path })?;
        let mut digest = Context::new(&SHA256);
        let mut buf = [0; 8 * 1024];
        let mut length = 0;
        loop {
            match file.read(&mut buf).context(error::FileReadSnafu { path })? {
                0 => break,
                n => {
                    digest.update(&buf[..n]);
                    length += n as u64;
                }
            }
        }

        Ok(Target {
            length,
            hashes: Hashes {
                sha256: digest.finish().as_ref().to_vec().into(),
                _extra: HashMap::new(),
            },
            custom: HashMap::new(),
            _extra: HashMap::new(),
        })
    }
}

impl Targets {
    /// Creates a new `Targets` with no targets.
    pub fn new(spec_version: String, version: NonZeroU64, expires: DateTime<Utc>) -> Self {
        Targets {
            spec_version,
            version,
            expires,
            targets: HashMap::new(),
            _extra: HashMap::new(),
        }
    }

    /// Add a target.
    pub fn add_target(&mut self, name: &str, target: Target) {
        self.targets.insert(name.to_string(), target);
    }

    /// Remove a target, returning it if it was present.
    pub fn remove_target(&mut self, name: &str) -> Option<Target> {
        self.targets.remove(name)
    }
}

impl Role for Targets {
    const TYPE: RoleType = RoleType::Targets;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }

    fn filename(&self, consistent_snapshot: bool) -> String {
        if consistent_snapshot {
            format!("{}.targets.json", self.version())
        } else {
            "targets.json".to_string()
        }
    }
}
