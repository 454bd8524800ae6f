use crate::datetime::parse_datetime;
use crate::error::{self, Result};
use crate::source::parse_key_source;
use crate::{load_file, write_file};
use chrono::{DateTime, Timelike, Utc};
use clap::Parser;
use log::warn;
use maplit::hashmap;
use rampart::editor::signed::SignedRole;
use rampart::key_source::KeySource;
use rampart::schema::key::Key;
use rampart::schema::{RoleKeys, RoleType, Root, Signed};
use ring::rand::SystemRandom;
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::HashMap;
use std::io::Write;
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Debug, Parser)]
pub(crate) enum Command {
    /// Create a new root.json metadata file
    Init {
        /// Path to new root.json
        path: PathBuf,
        /// Initial metadata file version
        #[arg(long)]
        version: Option<NonZeroU64>,
    },
    /// Set the expiration time for root.json
    Expire {
        /// Path to root.json
        path: PathBuf,
        /// Expiration of root; can be in full RFC 3339 format, or something like 'in
        /// 7 days'
        #[arg(value_parser = parse_datetime)]
        time: DateTime<Utc>,
    },
    /// Set the signature count threshold for a role
    SetThreshold {
        /// Path to root.json
        path: PathBuf,
        /// The role to set
        role: RoleType,
        /// The new threshold
        threshold: NonZeroU64,
    },
    /// Set the version number for root.json
    SetVersion {
        /// Path to root.json
        path: PathBuf,
        /// Version number
        version: NonZeroU64,
    },
    /// Add a key to one or more roles
    AddKey {
        /// Path to root.json
        path: PathBuf,
        /// The new key
        #[arg(value_parser = parse_key_source)]
        key_source: Box<dyn KeySource>,
        /// The role to add the key to
        #[arg(short = 'r', long = "role")]
        roles: Vec<RoleType>,
    },
    /// Remove a key ID, either entirely or from a single role
    RemoveKey {
        /// Path to root.json
        path: PathBuf,
        /// The key ID to remove
        key_id: String,
        /// Role to remove the key ID from (if provided, the public key will still be listed in
        /// the file)
        role: Option<RoleType>,
    },
    /// Sign the given root.json
    Sign {
        /// Path to root.json
        path: PathBuf,
        /// Key source(s) to sign the file with
        #[arg(short = 'k', long = "key", value_parser = parse_key_source)]
        key_sources: Vec<Box<dyn KeySource>>,
        /// Optional - Path of older root.json that contains the key-id
        #[arg(short = 'c', long = "cross-sign")]
        cross_sign: Option<PathBuf>,
        /// Ignore the threshold when signing with fewer keys
        #[arg(short = 'i', long = "ignore-threshold")]
        ignore_threshold: bool,
    },
}

macro_rules! role_keys {
    ($threshold:expr) => {
        RoleKeys {
            keyids: Vec::new(),
            threshold: $threshold,
            _extra: HashMap::new(),
        }
    };

    () => {
        // absurdly high threshold value so that someone realizes they need to change this
        role_keys!(NonZeroU64::new(1507).unwrap())
    };
}

impl Command {
    pub(crate) fn run(self) -> Result<()> {
        match self {
            Command::Init { path, version } => Command::init(&path, version),
            Command::Expire { path, time } => Command::expire(&path, &time),
            Command::SetThreshold {
                path,
                role,
                threshold,
            } => Command::set_threshold(&path, role, threshold),
            Command::SetVersion { path, version } => Command::set_version(&path, version),
            Command::AddKey {
                path,
                roles,
                key_source,
            } => Command::add_key(&path, &roles, &key_source),
            Command::RemoveKey { path, key_id, role } => Command::remove_key(&path, &key_id, role),
            Command::Sign {
                path,
                key_sources,
                cross_sign,
                ignore_threshold,
            } => Command::sign(&path, &key_sources, cross_sign, ignore_threshold),
        }
    }

    fn init(path: &Path, version: Option<NonZeroU64>) -> Result<()> {
        write_file(
            path,
            &Signed {
                signed: Root {
                    spec_version: crate::SPEC_VERSION.to_owned(),
                    consistent_snapshot: true,
                    version: version.unwrap_or_else(|| NonZeroU64::new(1).unwrap()),
                    expires: round_time(Utc::now()),
                    keys: HashMap::new(),
                    roles: hashmap! {
                        RoleType::Root => role_keys!(),
                        RoleType::Snapshot => role_keys!(),
                        RoleType::Targets => role_keys!(),
                        RoleType::Timestamp => role_keys!(),
                    },
                    _extra: HashMap::new(),
                },
                signatures: Vec::new(),
            },
        )
    }

    fn expire(path: &Path, time: &DateTime<Utc>) -> Result<()> {
        let mut root: Signed<Root> = load_file(path)?;
        root.signed.expires = round_time(*time);
        clear_sigs(&mut root);
        write_file(path, &root)
    }

    fn set_threshold(path: &Path, role: RoleType, threshold: NonZeroU64) -> Result<()> {
        let mut root: Signed<Root> = load_file(path)?;
        root.signed
            .roles
            .entry(role)
            .and_modify(|rk| rk.threshold = threshold)
            .or_insert_with(|| role_keys!(threshold));
        clear_sigs(&mut root);
        write_file(path, &root)
    }

    fn set_version(path: &Path, version: NonZeroU64) -> Result<()> {
        let mut root: Signed<Root> = load_file(path)?;
        root.signed.version = version;
        clear_sigs(&mut root);
        write_file(path, &root)
    }

    #[allow(clippy::borrowed_box)]
    fn add_key(path: &Path, roles: &[RoleType], key_source: &Box<dyn KeySource>) -> Result<()> {
        let mut root: Signed<Root> = load_file(path)?;
        let key_pair = key_source
            .as_sign()
            .context(error::KeyPairFromKeySourceSnafu)?
            .public_key();
        let key_id = hex::encode(add_key(&mut root.signed, roles, key_pair)?);
        clear_sigs(&mut root);
        println!("{key_id}");
        write_file(path, &root)
    }

    fn remove_key(path: &Path, key_id: &str, role: Option<RoleType>) -> Result<()> {
        let mut root: Signed<Root> = load_file(path)?;
        if let Some(role) = role {
            if let Some(role_keys) = root.signed.roles.get_mut(&role) {
                role_keys.keyids.retain(|k| hex::encode(k) != key_id);
            }
        } else {
            for role_keys in root.signed.roles.values_mut() {
                role_keys.keyids.retain(|k| hex::encode(k) != key_id);
            }
            root.signed.keys.retain(|k, _| hex::encode(k) != key_id);
        }
        clear_sigs(&mut root);
        write_file(path, &root)
    }

    fn sign(
        path: &Path,
        key_sources: &[Box<dyn KeySource>],
        cross_sign: Option<PathBuf>,
        ignore_threshold: bool,
    ) -> Result<()> {
        let root: Signed<Root> = load_file(path)?;
        // The root whose key list authorizes the signatures. When cross-signing
        // for a rotation, that is the older root.
        let authority: Signed<Root> = match cross_sign {
            None => root.clone(),
            Some(cross_sign_root) => load_file(&cross_sign_root)?,
        };

        // Keep any signatures already present; separate key holders may sign
        // the same file in turn.
        let signed_root = SignedRole::from_signed(root)
            .context(error::SignRootSnafu { path })?
            .add_signatures(&authority.signed, key_sources, &SystemRandom::new())
            .context(error::SignRootSnafu { path })?;

        // Quick check that every role lists enough key IDs for its threshold.
        for (roletype, rolekeys) in &signed_root.signed().signed.roles {
            let threshold = rolekeys.threshold.get();
            let keyids = rolekeys.keyids.len();
            if threshold > keyids as u64 {
                // The referenced file could be a root.json used for cross
                // signing, which doesn't list the new keys yet.
                ensure!(
                    ignore_threshold,
                    error::UnstableRootSnafu {
                        role: *roletype,
                        threshold,
                        actual: keyids,
                    }
                );
                warn!(
                    "Loaded unstable root, role '{}' lists '{}' keys, expected '{}'",
                    *roletype, keyids, threshold
                );
            }
        }

        // Signature count check for the root role itself.
        let threshold = signed_root
            .signed()
            .signed
            .roles
            .get(&RoleType::Root)
            .map_or(0, |rk| rk.threshold.get());
        let signature_count = signed_root.signed().signatures.len();
        if threshold > signature_count as u64 {
            ensure!(
                ignore_threshold,
                error::SignatureRootSnafu {
                    threshold,
                    signature_count,
                }
            );
            warn!(
                "root.json requires at least {} signatures, this file carries {}",
                threshold, signature_count
            );
        }

        // Use `tempfile::NamedTempFile::persist` to perform an atomic file write.
        let parent = path.parent().context(error::PathParentSnafu { path })?;
        let mut writer =
            NamedTempFile::new_in(parent).context(error::FileTempCreateSnafu { path: parent })?;
        writer
            .write_all(signed_root.buffer())
            .context(error::FileWriteSnafu { path })?;
        writer
            .persist(path)
            .context(error::FilePersistSnafu { path })?;
        Ok(())
    }
}

fn round_time(time: DateTime<Utc>) -> DateTime<Utc> {
    // `Timelike::with_nanosecond` returns None only when passed a value >= 2_000_000_000
    time.with_nanosecond(0).unwrap()
}

/// Removes signatures from a role. Needed whenever the signed content changes.
fn clear_sigs<T>(role: &mut Signed<T>) {
    role.signatures.clear();
}

/// Adds a key to the root's key list if not already present, and adds its key
/// ID to each of the specified roles.
fn add_key(root: &mut Root, roles: &[RoleType], key: Key) -> Result<Vec<u8>> {
    let key_id = if let Some((key_id, _)) = root
        .keys
        .iter()
        .find(|(_, candidate_key)| key.eq(candidate_key))
    {
        key_id.clone()
    } else {
        // Key isn't present yet, so we need to add it
        let key_id = key.key_id().context(error::KeyIdSnafu)?;
        ensure!(
            !root.keys.contains_key(&key_id),
            error::KeyDuplicateSnafu {
                key_id: hex::encode(&key_id)
            }
        );
        root.keys.insert(key_id.clone(), key);
        key_id
    };

    for role in roles {
        let entry = root.roles.entry(*role).or_insert_with(|| role_keys!());
        if !entry.keyids.contains(&key_id) {
            entry.keyids.push(key_id.clone());
        }
    }

    Ok(key_id.to_vec())
}
