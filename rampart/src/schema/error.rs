//! Error types for the metadata schema and signature verification.

use crate::schema::RoleType;
use snafu::Snafu;

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for metadata parsing, canonicalization, and signature
/// verification.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum Error {
    /// A signature envelope did not carry enough valid signatures from
    /// distinct authorized keys to meet the role's threshold.
    #[snafu(display(
        "Signature threshold of {threshold} not met for role '{role}' ({valid} valid signatures)"
    ))]
    InsufficientSignatures {
        role: RoleType,
        threshold: u64,
        valid: u64,
    },

    /// An authorized key produced a signature that fails cryptographic
    /// verification over the canonical payload.
    #[snafu(display("Invalid signature from authorized key {keyid} for role '{role}'"))]
    InvalidSignature { role: RoleType, keyid: String },

    #[snafu(display("Root metadata does not define keys for role '{role}'"))]
    MissingRole { role: RoleType },

    #[snafu(display("Key ID {keyid} does not match calculated ID {calculated}"))]
    InvalidKeyId { keyid: String, calculated: String },

    #[snafu(display("Duplicate key ID {keyid}"))]
    DuplicateKeyId { keyid: String },

    #[snafu(display("Failed to serialize {what} to canonical JSON: {source}"))]
    JsonSerialization {
        what: String,
        source: serde_json::Error,
    },

    #[snafu(display("Invalid hex string: {source}"))]
    HexDecode { source: hex::FromHexError },

    #[snafu(display("Invalid PEM string: {source}"))]
    PemDecode { source: pem::PemError },

    #[snafu(display("Invalid SubjectPublicKeyInfo document: {reason}"))]
    InvalidSpki { reason: &'static str },

    #[snafu(display("Target file is not a file: {}", path.display()))]
    TargetNotAFile { path: std::path::PathBuf },

    #[snafu(display("Failed to open {}: {source}", path.display()))]
    FileOpen {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to read {}: {source}", path.display()))]
    FileRead {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
}
