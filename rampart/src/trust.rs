//! Custody of the trusted root metadata.
//!
//! A client is born trusting exactly one thing: the pinned root its operator
//! gave it. Every other piece of metadata derives its authority from that
//! root through an unbroken chain of rotations, each new root version signed
//! by the keys of the root it replaces.

use crate::error::{self, Result};
use crate::schema::{Root, Signed};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use snafu::ResultExt;

/// Holds the currently trusted root and enforces the rules for replacing it.
#[derive(Debug, Clone)]
pub(crate) struct TrustStore {
    root: Signed<Root>,
}

impl TrustStore {
    /// Establishes initial trust from a pinned root, which must carry enough
    /// valid signatures from its own keys to meet its own threshold.
    ///
    /// Expiration is deliberately not checked here: an expired pinned root is
    /// still the right starting point for walking the rotation chain to a
    /// fresh one.
    pub(crate) fn new(pinned: Signed<Root>) -> Result<Self> {
        pinned
            .signed
            .verify_role(&pinned)
            .context(error::VerifyTrustedMetadataSnafu)?;
        Ok(Self { root: pinned })
    }

    /// The currently trusted root.
    pub(crate) fn root(&self) -> &Signed<Root> {
        &self.root
    }

    /// Tries to fast-forward trust to a root cached from an earlier session.
    ///
    /// The cached root must be a valid successor of the pinned root's
    /// lineage: verified by the currently trusted root's keys, self-verified,
    /// and not older than what we already trust. On any failure the current
    /// root is kept and the cached copy ignored; a bad cache is not fatal.
    pub(crate) fn try_adopt_cached(&mut self, cached: Signed<Root>) {
        if cached.signed.version < self.root.signed.version {
            debug!(
                "ignoring cached root version {}, already trusting {}",
                cached.signed.version, self.root.signed.version
            );
            return;
        }
        if let Err(e) = self
            .root
            .signed
            .verify_role(&cached)
            .and_then(|()| cached.signed.verify_role(&cached))
        {
            warn!("ignoring cached root: {e}");
            return;
        }
        self.root = cached;
    }

    /// Replaces the trusted root with the next version in the rotation chain.
    ///
    /// The new root must carry version exactly one greater than the current
    /// root, and must satisfy the signature thresholds of *both* the current
    /// root (proving custody) and itself (proving the new keys are usable).
    /// A lower version is a rollback attempt; a higher one means the chain
    /// skipped a version and custody cannot be proven.
    pub(crate) fn rotate(&mut self, new: Signed<Root>) -> Result<()> {
        let current_version = self.root.signed.version.get();
        let new_version = new.signed.version.get();
        let expected_version = current_version + 1;
        if new_version < expected_version {
            return error::OlderMetadataSnafu {
                role: crate::schema::RoleType::Root,
                current_version,
                new_version,
            }
            .fail();
        }
        if new_version > expected_version {
            return error::VersionMismatchSnafu {
                role: crate::schema::RoleType::Root,
                fetched_version: new_version,
                expected_version,
            }
            .fail();
        }

        self.root
            .signed
            .verify_role(&new)
            .context(error::VerifyMetadataSnafu {
                role: crate::schema::RoleType::Root,
            })?;
        new.signed
            .verify_role(&new)
            .context(error::VerifyMetadataSnafu {
                role: crate::schema::RoleType::Root,
            })?;

        debug!("rotated trusted root from version {current_version} to {new_version}");
        self.root = new;
        Ok(())
    }

    /// Checks that the trusted root has not expired as of `now`. Called once
    /// the rotation chain has been walked to its end.
    pub(crate) fn check_expiration(&self, now: DateTime<Utc>) -> Result<()> {
        if self.root.signed.expires <= now {
            return error::ExpiredMetadataSnafu {
                role: crate::schema::RoleType::Root,
                expires: self.root.signed.expires,
            }
            .fail();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::schema::decoded::{Decoded, Hex};
    use crate::schema::key::Key;
    use crate::schema::{Role, RoleKeys, RoleType, Signature};
    use crate::sign::{parse_keypair, ParsedKeyPair, Sign};
    use chrono::Duration;
    use ring::rand::SystemRandom;
    use ring::signature::Ed25519KeyPair;
    use std::collections::HashMap;
    use std::num::NonZeroU64;

    struct TestKey {
        pair: ParsedKeyPair,
        key: Key,
        keyid: Decoded<Hex>,
    }

    fn generate_key() -> TestKey {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        let pem = pem::encode(&pem::Pem::new("PRIVATE KEY", pkcs8.as_ref().to_vec()));
        let pair = parse_keypair(pem.as_bytes()).unwrap();
        let key = pair.public_key();
        let keyid = key.key_id().unwrap();
        TestKey { pair, key, keyid }
    }

    fn root_with_keys(version: u64, keys: &[&TestKey]) -> Root {
        let mut root = Root {
            spec_version: "1.0.0".to_string(),
            consistent_snapshot: true,
            version: NonZeroU64::new(version).unwrap(),
            expires: Utc::now() + Duration::days(7),
            keys: HashMap::new(),
            roles: HashMap::new(),
            _extra: HashMap::new(),
        };
        for key in keys {
            root.keys.insert(key.keyid.clone(), key.key.clone());
        }
        root.roles.insert(
            RoleType::Root,
            RoleKeys {
                keyids: keys.iter().map(|k| k.keyid.clone()).collect(),
                threshold: NonZeroU64::new(1).unwrap(),
                _extra: HashMap::new(),
            },
        );
        root
    }

    fn sign_with(root: Root, signers: &[&TestKey]) -> Signed<Root> {
        let data = root.canonical_form().unwrap();
        let rng = SystemRandom::new();
        let signatures = signers
            .iter()
            .map(|key| Signature {
                keyid: key.keyid.clone(),
                sig: key.pair.sign(&data, &rng).unwrap().into(),
            })
            .collect();
        Signed {
            signed: root,
            signatures,
        }
    }

    #[test]
    fn pinned_root_must_self_verify() {
        let key = generate_key();
        let stranger = generate_key();
        let root = root_with_keys(1, &[&key]);

        assert!(TrustStore::new(sign_with(root.clone(), &[&key])).is_ok());
        assert!(matches!(
            TrustStore::new(sign_with(root, &[&stranger])).unwrap_err(),
            Error::VerifyTrustedMetadata { .. }
        ));
    }

    #[test]
    fn rotation_to_new_keys() {
        let old_key = generate_key();
        let new_key = generate_key();
        let mut store = TrustStore::new(sign_with(root_with_keys(1, &[&old_key]), &[&old_key]))
            .unwrap();

        // v2 replaces the root key entirely; both old and new keys must sign
        let v2 = root_with_keys(2, &[&new_key]);
        store
            .rotate(sign_with(v2.clone(), &[&old_key, &new_key]))
            .unwrap();
        assert_eq!(store.root().signed.version.get(), 2);

        // missing the new key's signature means the new keys are unproven
        let mut store = TrustStore::new(sign_with(root_with_keys(1, &[&old_key]), &[&old_key]))
            .unwrap();
        assert!(store.rotate(sign_with(v2, &[&old_key])).is_err());
    }

    #[test]
    fn rotation_rejects_version_gap() {
        let key = generate_key();
        let mut store =
            TrustStore::new(sign_with(root_with_keys(1, &[&key]), &[&key])).unwrap();

        let v3 = sign_with(root_with_keys(3, &[&key]), &[&key]);
        assert!(matches!(
            store.rotate(v3).unwrap_err(),
            Error::VersionMismatch {
                fetched_version: 3,
                expected_version: 2,
                ..
            }
        ));
    }

    #[test]
    fn rotation_rejects_rollback() {
        let key = generate_key();
        let mut store =
            TrustStore::new(sign_with(root_with_keys(2, &[&key]), &[&key])).unwrap();

        let v1 = sign_with(root_with_keys(1, &[&key]), &[&key]);
        assert!(matches!(
            store.rotate(v1).unwrap_err(),
            Error::OlderMetadata {
                current_version: 2,
                new_version: 1,
                ..
            }
        ));
    }

    #[test]
    fn cached_root_adoption() {
        let key = generate_key();
        let stranger = generate_key();
        let mut store =
            TrustStore::new(sign_with(root_with_keys(1, &[&key]), &[&key])).unwrap();

        // a cached root signed by an unrelated key is ignored
        store.try_adopt_cached(sign_with(root_with_keys(5, &[&stranger]), &[&stranger]));
        assert_eq!(store.root().signed.version.get(), 1);

        // a cached successor signed by the trusted keys is adopted
        store.try_adopt_cached(sign_with(root_with_keys(2, &[&key]), &[&key]));
        assert_eq!(store.root().signed.version.get(), 2);
    }
}
