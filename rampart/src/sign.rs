//! Provides the `Sign` trait for the key types that can sign metadata.

use crate::error::{self, Result};
use crate::schema::key::{Ed25519Key, Ed25519Scheme, Key, RsaKey, RsaScheme};
use ring::rand::SecureRandom;
use ring::signature::{Ed25519KeyPair, KeyPair, RsaKeyPair};
use snafu::ResultExt;
use std::collections::HashMap;

/// This trait must be implemented for each type of key with which you will
/// sign things.
pub trait Sign: Sync + Send {
    /// Returns the decoded public key along with its scheme and other metadata.
    fn public_key(&self) -> Key;

    /// Signs the supplied message.
    fn sign(&self, msg: &[u8], rng: &dyn SecureRandom) -> Result<Vec<u8>>;
}

/// Implements the Sign trait for Ed25519 keypairs.
impl Sign for Ed25519KeyPair {
    fn public_key(&self) -> Key {
        Key::Ed25519 {
            keyval: Ed25519Key {
                public: ring::signature::KeyPair::public_key(self)
                    .as_ref()
                    .to_vec()
                    .into(),
                _extra: HashMap::new(),
            },
            scheme: Ed25519Scheme::Ed25519,
            _extra: HashMap::new(),
        }
    }

    fn sign(&self, msg: &[u8], _rng: &dyn SecureRandom) -> Result<Vec<u8>> {
        Ok(self.sign(msg).as_ref().to_vec())
    }
}

/// Implements the Sign trait for RSA keypairs.
impl Sign for RsaKeyPair {
    fn public_key(&self) -> Key {
        Key::Rsa {
            keyval: RsaKey {
                public: KeyPair::public_key(self).as_ref().to_vec().into(),
                _extra: HashMap::new(),
            },
            scheme: RsaScheme::RsassaPssSha256,
            _extra: HashMap::new(),
        }
    }

    fn sign(&self, msg: &[u8], rng: &dyn SecureRandom) -> Result<Vec<u8>> {
        let mut signature = vec![0; self.public().modulus_len()];
        self.sign(&ring::signature::RSA_PSS_SHA256, rng, msg, &mut signature)
            .context(error::SignSnafu)?;
        Ok(signature)
    }
}

/// A signing key parsed from PEM, either Ed25519 or RSA.
pub enum ParsedKeyPair {
    /// An Ed25519 key pair.
    Ed25519(Ed25519KeyPair),
    /// An RSA key pair.
    Rsa(RsaKeyPair),
}

impl Sign for ParsedKeyPair {
    fn public_key(&self) -> Key {
        match self {
            ParsedKeyPair::Ed25519(key) => Sign::public_key(key),
            ParsedKeyPair::Rsa(key) => Sign::public_key(key),
        }
    }

    fn sign(&self, msg: &[u8], rng: &dyn SecureRandom) -> Result<Vec<u8>> {
        match self {
            ParsedKeyPair::Ed25519(key) => Sign::sign(key, msg, rng),
            ParsedKeyPair::Rsa(key) => Sign::sign(key, msg, rng),
        }
    }
}

/// Parses a supplied keypair and if it is recognized, returns an object that
/// implements the Sign trait.
///
/// Accepts PKCS#8 documents under a `PRIVATE KEY` PEM tag (Ed25519 or RSA)
/// and legacy PKCS#1 RSA keys under `RSA PRIVATE KEY`.
pub fn parse_keypair(key: &[u8]) -> Result<ParsedKeyPair> {
    let Ok(pem) = pem::parse(key) else {
        return error::KeyUnrecognizedSnafu.fail();
    };
    match pem.tag() {
        "PRIVATE KEY" => {
            if let Ok(ed25519) = Ed25519KeyPair::from_pkcs8(pem.contents()) {
                Ok(ParsedKeyPair::Ed25519(ed25519))
            } else if let Ok(ed25519) = Ed25519KeyPair::from_pkcs8_maybe_unchecked(pem.contents()) {
                Ok(ParsedKeyPair::Ed25519(ed25519))
            } else if let Ok(rsa) = RsaKeyPair::from_pkcs8(pem.contents()) {
                Ok(ParsedKeyPair::Rsa(rsa))
            } else {
                error::KeyUnrecognizedSnafu.fail()
            }
        }
        "RSA PRIVATE KEY" => Ok(ParsedKeyPair::Rsa(
            RsaKeyPair::from_der(pem.contents()).context(error::KeyRejectedSnafu)?,
        )),
        _ => error::KeyUnrecognizedSnafu.fail(),
    }
}

impl std::fmt::Debug for ParsedKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParsedKeyPair::Ed25519(_) => f.write_str("ParsedKeyPair::Ed25519"),
            ParsedKeyPair::Rsa(_) => f.write_str("ParsedKeyPair::Rsa"),
        }
    }
}
