//! Provides the `Decoded<T>` wrapper, which carries a byte value alongside the
//! exact string it was decoded from. Signatures are computed over canonical
//! JSON that includes these strings, so re-serialization must reproduce them
//! byte for byte; round-tripping through a decode/encode pair is not
//! guaranteed to do that for every encoding (PEM line wrapping, hex case).

use crate::schema::error::{self, Result};
use crate::schema::spki;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use snafu::ResultExt;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::Deref;

/// A type that can decode a string into bytes.
pub trait Decode {
    /// Decode a string into bytes.
    fn decode(s: &str) -> Result<Vec<u8>>;
}

/// A type that can encode bytes into a string.
pub trait Encode {
    /// Encode bytes into a string.
    fn encode(b: &[u8]) -> String;
}

/// Lowercase hexadecimal encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hex;

impl Decode for Hex {
    fn decode(s: &str) -> Result<Vec<u8>> {
        hex::decode(s).context(error::HexDecodeSnafu)
    }
}

impl Encode for Hex {
    fn encode(b: &[u8]) -> String {
        hex::encode(b)
    }
}

/// An RSA public key, PEM-encoded as a SubjectPublicKeyInfo document on the
/// wire, decoded to the PKCS#1 DER that `ring` verifies against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RsaPem;

impl Decode for RsaPem {
    fn decode(s: &str) -> Result<Vec<u8>> {
        spki::decode(s)
    }
}

impl Encode for RsaPem {
    fn encode(b: &[u8]) -> String {
        spki::encode(b)
    }
}

/// A value of bytes, decoded from a string, which remembers the string it was
/// decoded from. Equality and hashing consider the bytes only.
#[derive(Clone)]
pub struct Decoded<T> {
    bytes: Vec<u8>,
    original: String,
    spooky: PhantomData<T>,
}

impl<T> Decoded<T> {
    /// Consume this object and return its decoded bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }
}

impl<T: Encode> From<Vec<u8>> for Decoded<T> {
    fn from(bytes: Vec<u8>) -> Self {
        let original = T::encode(&bytes);
        Self {
            bytes,
            original,
            spooky: PhantomData,
        }
    }
}

impl<T: Decode> std::str::FromStr for Decoded<T> {
    type Err = error::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(Self {
            bytes: T::decode(s)?,
            original: s.to_owned(),
            spooky: PhantomData,
        })
    }
}

impl<T> AsRef<[u8]> for Decoded<T> {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl<T> Deref for Decoded<T> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl<T> fmt::Debug for Decoded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.original.fmt(f)
    }
}

impl<T> fmt::Display for Decoded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.original.fmt(f)
    }
}

impl<T> PartialEq for Decoded<T> {
    fn eq(&self, other: &Self) -> bool {
        self.bytes.eq(&other.bytes)
    }
}

impl<T> Eq for Decoded<T> {}

impl<T> Hash for Decoded<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl<T> PartialOrd for Decoded<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Decoded<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

impl<'de, T: Decode> Deserialize<'de> for Decoded<T> {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let original = String::deserialize(deserializer)?;
        Ok(Self {
            bytes: T::decode(&original).map_err(serde::de::Error::custom)?,
            original,
            spooky: PhantomData,
        })
    }
}

impl<T> Serialize for Decoded<T> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.original)
    }
}

#[cfg(test)]
mod tests {
    use super::{Decoded, Hex};

    #[test]
    fn hex_round_trip() {
        let decoded: Decoded<Hex> = serde_json::from_str("\"8f1a2b\"").unwrap();
        assert_eq!(decoded.as_ref(), &[0x8f, 0x1a, 0x2b]);
        assert_eq!(serde_json::to_string(&decoded).unwrap(), "\"8f1a2b\"");
    }

    #[test]
    fn hex_preserves_original_case() {
        // uppercase hex must serialize back exactly as received
        let decoded: Decoded<Hex> = serde_json::from_str("\"8F1A2B\"").unwrap();
        assert_eq!(serde_json::to_string(&decoded).unwrap(), "\"8F1A2B\"");
    }

    #[test]
    fn invalid_hex_rejected() {
        assert!(serde_json::from_str::<Decoded<Hex>>("\"zz\"").is_err());
    }
}
