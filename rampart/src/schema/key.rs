//! Public key serialization and verification.

use crate::schema::decoded::{Decoded, Hex, RsaPem};
use crate::schema::error::{self, Result};
use olpc_cjson::CanonicalFormatter;
use ring::digest::{digest, SHA256};
use ring::signature::{UnparsedPublicKey, VerificationAlgorithm};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::ResultExt;
use std::collections::HashMap;

/// A public key bound to a role by key ID.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "keytype")]
#[serde(rename_all = "lowercase")]
pub enum Key {
    /// An Ed25519 key, hex-encoded on the wire.
    Ed25519 {
        /// The Ed25519 key.
        keyval: Ed25519Key,
        /// Denotes the key's signature scheme.
        scheme: Ed25519Scheme,
        /// Extra arguments found during deserialization; preserved so that
        /// canonical bytes round-trip for signature verification.
        #[serde(flatten)]
        _extra: HashMap<String, Value>,
    },
    /// An RSA key, PEM-encoded (SubjectPublicKeyInfo) on the wire.
    Rsa {
        /// The RSA key.
        keyval: RsaKey,
        /// Denotes the key's signature scheme.
        scheme: RsaScheme,
        /// Extra arguments found during deserialization.
        #[serde(flatten)]
        _extra: HashMap<String, Value>,
    },
}

/// Ed25519 signature scheme.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum Ed25519Scheme {
    /// `ed25519`
    #[serde(rename = "ed25519")]
    Ed25519,
}

/// An Ed25519 public key value.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Ed25519Key {
    /// The public key, hex-encoded.
    pub public: Decoded<Hex>,
    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

/// RSA signature schemes.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum RsaScheme {
    /// `rsassa-pss-sha256`: RSASSA-PSS signing with SHA-256.
    #[serde(rename = "rsassa-pss-sha256")]
    RsassaPssSha256,
}

/// An RSA public key value.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RsaKey {
    /// The public key, stored as PKCS#1 DER, PEM-encoded on the wire.
    pub public: Decoded<RsaPem>,
    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Key {
    /// Verifies a signature over a message with this key. Returns `false` on
    /// any verification failure; the caller decides what a failed signature
    /// means for the envelope as a whole.
    pub fn verify(&self, msg: &[u8], signature: &[u8]) -> bool {
        let (alg, public): (&dyn VerificationAlgorithm, &[u8]) = match self {
            Key::Ed25519 {
                keyval,
                scheme: Ed25519Scheme::Ed25519,
                ..
            } => (&ring::signature::ED25519, keyval.public.as_ref()),
            Key::Rsa {
                keyval,
                scheme: RsaScheme::RsassaPssSha256,
                ..
            } => (
                &ring::signature::RSA_PSS_2048_8192_SHA256,
                keyval.public.as_ref(),
            ),
        };
        UnparsedPublicKey::new(alg, public).verify(msg, signature).is_ok()
    }

    /// Calculates the key ID for this key: the SHA-256 digest of the key's
    /// canonical JSON form.
    pub fn key_id(&self) -> Result<Decoded<Hex>> {
        let mut buf = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, CanonicalFormatter::new());
        self.serialize(&mut ser)
            .context(error::JsonSerializationSnafu { what: "key" })?;
        Ok(digest(&SHA256, &buf).as_ref().to_vec().into())
    }
}

#[cfg(test)]
mod tests {
    use super::Key;

    #[test]
    fn parse_ed25519_key() {
        let json = r#"{
            "keytype": "ed25519",
            "scheme": "ed25519",
            "keyval": {
                "public": "3ba219e69e6c1e284a86cbadd465a43aba47e11dd2b9b4e30b621de9566a5f43"
            }
        }"#;
        let key: Key = serde_json::from_str(json).unwrap();
        match &key {
            Key::Ed25519 { keyval, .. } => assert_eq!(keyval.public.as_ref().len(), 32),
            Key::Rsa { .. } => panic!("parsed as rsa"),
        }
        // the key id must be stable across parse/serialize round trips
        let reparsed: Key =
            serde_json::from_slice(&serde_json::to_vec(&key).unwrap()).unwrap();
        assert_eq!(
            key.key_id().unwrap(),
            reparsed.key_id().unwrap()
        );
    }

    #[test]
    fn unknown_keytype_rejected() {
        let json = r#"{"keytype": "dsa", "scheme": "dsa", "keyval": {"public": ""}}"#;
        assert!(serde_json::from_str::<Key>(json).is_err());
    }
}
