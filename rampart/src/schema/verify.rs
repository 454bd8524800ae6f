use crate::schema::decoded::{Decoded, Hex};
use crate::schema::error::{self, Result};
use crate::schema::key::Key;
use crate::schema::{Role, RoleKeys, RoleType, Root, Signature, Signed};
use std::collections::{HashMap, HashSet};

impl Root {
    /// Verifies that a signed role meets the threshold this root declares for
    /// it: at least `threshold` *distinct* authorized keys must have produced
    /// a valid signature over the payload's canonical form. Signatures from
    /// unauthorized keys are ignored; repeated signatures from one key count
    /// once.
    pub fn verify_role<T: Role>(&self, role: &Signed<T>) -> Result<()> {
        let role_keys = self
            .roles
            .get(&T::TYPE)
            .ok_or(error::Error::MissingRole { role: T::TYPE })?;
        let data = role.signed.canonical_form()?;
        verify_signatures(&data, &role.signatures, role_keys, &self.keys, T::TYPE)
    }
}

/// Count distinct authorized keys with a valid signature over `payload`. If
/// the count falls short and some authorized key presented a signature that
/// failed cryptographic verification, the failure is reported as a bad
/// signature rather than a mere shortfall.
pub(crate) fn verify_signatures(
    payload: &[u8],
    signatures: &[Signature],
    role_keys: &RoleKeys,
    keys: &HashMap<Decoded<Hex>, Key>,
    role: RoleType,
) -> Result<()> {
    let mut valid = HashSet::new();
    let mut bad_signature: Option<&Signature> = None;
    for signature in signatures {
        if !role_keys.keyids.contains(&signature.keyid) {
            continue;
        }
        if let Some(key) = keys.get(&signature.keyid) {
            if key.verify(payload, &signature.sig) {
                valid.insert(&signature.keyid);
            } else {
                bad_signature = Some(signature);
            }
        }
    }

    let threshold = role_keys.threshold.get();
    if (valid.len() as u64) < threshold {
        if let Some(signature) = bad_signature {
            return error::InvalidSignatureSnafu {
                role,
                keyid: hex::encode(&signature.keyid),
            }
            .fail();
        }
        return error::InsufficientSignaturesSnafu {
            role,
            threshold,
            valid: valid.len() as u64,
        }
        .fail();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::key::Key;
    use crate::schema::Error;
    use crate::sign::{parse_keypair, Sign};
    use chrono::{Duration, Utc};
    use ring::rand::SystemRandom;
    use ring::signature::Ed25519KeyPair;
    use std::collections::HashMap;
    use std::num::NonZeroU64;

    fn generate_key() -> (Box<dyn Sign>, Key, Decoded<Hex>) {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        let pem = pem::encode(&pem::Pem::new("PRIVATE KEY", pkcs8.as_ref().to_vec()));
        let key_pair = parse_keypair(pem.as_bytes()).unwrap();
        let key = key_pair.public_key();
        let key_id = key.key_id().unwrap();
        (Box::new(key_pair), key, key_id)
    }

    fn empty_root(version: u64) -> Root {
        Root {
            spec_version: "1.0.0".to_string(),
            consistent_snapshot: true,
            version: NonZeroU64::new(version).unwrap(),
            expires: Utc::now() + Duration::days(1),
            keys: HashMap::new(),
            roles: HashMap::new(),
            _extra: HashMap::new(),
        }
    }

    struct Fixture {
        root: Root,
        keys: Vec<Box<dyn Sign>>,
        keyids: Vec<Decoded<Hex>>,
    }

    /// A root whose root role lists `count` ed25519 keys at `threshold`.
    fn fixture(count: usize, threshold: u64) -> Fixture {
        let mut root = empty_root(1);
        let mut keys = Vec::new();
        let mut keyids = Vec::new();
        for _ in 0..count {
            let (key_pair, key, key_id) = generate_key();
            root.keys.insert(key_id.clone(), key);
            keyids.push(key_id);
            keys.push(key_pair);
        }
        root.roles.insert(
            RoleType::Root,
            RoleKeys {
                keyids: keyids.clone(),
                threshold: NonZeroU64::new(threshold).unwrap(),
                _extra: HashMap::new(),
            },
        );
        Fixture { root, keys, keyids }
    }

    fn sign_root(fixture: &Fixture, signers: &[usize]) -> Signed<Root> {
        let data = fixture.root.canonical_form().unwrap();
        let rng = SystemRandom::new();
        let signatures = signers
            .iter()
            .map(|&i| Signature {
                keyid: fixture.keyids[i].clone(),
                sig: fixture.keys[i].sign(&data, &rng).unwrap().into(),
            })
            .collect();
        Signed {
            signed: fixture.root.clone(),
            signatures,
        }
    }

    #[test]
    fn threshold_met() {
        let fixture = fixture(3, 2);
        let signed = sign_root(&fixture, &[0, 1]);
        fixture.root.verify_role(&signed).unwrap();
    }

    #[test]
    fn below_threshold() {
        let fixture = fixture(3, 2);
        let signed = sign_root(&fixture, &[0]);
        assert!(matches!(
            fixture.root.verify_role(&signed).unwrap_err(),
            Error::InsufficientSignatures {
                threshold: 2,
                valid: 1,
                ..
            }
        ));
    }

    #[test]
    fn duplicate_key_counts_once() {
        let fixture = fixture(3, 2);
        let signed = sign_root(&fixture, &[0, 0]);
        assert!(matches!(
            fixture.root.verify_role(&signed).unwrap_err(),
            Error::InsufficientSignatures { valid: 1, .. }
        ));
    }

    #[test]
    fn corrupt_signature() {
        let fixture = fixture(3, 2);
        let mut signed = sign_root(&fixture, &[0, 1]);
        let mut bytes: Vec<u8> = signed.signatures[1].sig.to_vec();
        bytes[0] ^= 0xff;
        signed.signatures[1].sig = bytes.into();
        assert!(matches!(
            fixture.root.verify_role(&signed).unwrap_err(),
            Error::InvalidSignature { .. }
        ));
    }

    #[test]
    fn unauthorized_key_ignored() {
        let fixture = fixture(2, 1);
        let (outsider, outsider_key, outsider_id) = generate_key();
        let mut signed = sign_root(&fixture, &[]);
        // an outsider key present in `keys` but not in the role's keyids
        let mut root = signed.signed.clone();
        root.keys.insert(outsider_id.clone(), outsider_key);
        let data = fixture.root.canonical_form().unwrap();
        let rng = SystemRandom::new();
        signed.signatures.push(Signature {
            keyid: outsider_id,
            sig: outsider.sign(&data, &rng).unwrap().into(),
        });
        assert!(matches!(
            root.verify_role(&signed).unwrap_err(),
            Error::InsufficientSignatures { valid: 0, .. }
        ));
    }
}
