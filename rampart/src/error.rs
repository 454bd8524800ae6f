//! Contains the error type for this library.

#![allow(clippy::default_trait_access)]

use crate::schema::RoleType;
use crate::TargetName;
use chrono::{DateTime, Utc};
use snafu::{Backtrace, Snafu};
use std::path::PathBuf;
use url::Url;

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for this library.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum Error {
    /// A transport error with no mirror context, from reading a target
    /// stream after the initial response was obtained.
    #[snafu(display("Transport error: {source}"))]
    Transport {
        source: crate::TransportError,
        backtrace: Backtrace,
    },

    /// Every mirror failed for a reason other than a plain 404.
    #[snafu(display("No working mirror while fetching '{file}': {errors:?}"))]
    NoWorkingMirrors {
        file: String,
        errors: Vec<crate::TransportError>,
        backtrace: Backtrace,
    },

    /// Every mirror reported the metadata file as absent.
    #[snafu(display("Metadata file '{file}' not found on any mirror"))]
    MetadataNotFound { file: String, backtrace: Backtrace },

    #[snafu(display("Maximum download size {max_size} exceeded fetching {specifier}"))]
    MaxSizeExceeded {
        max_size: u64,
        specifier: &'static str,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Hash mismatch for {context}: calculated '{calculated}', expected '{expected}'"
    ))]
    HashMismatch {
        context: String,
        calculated: String,
        expected: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Size mismatch for {context}: got {size}, expected {expected}"))]
    SizeMismatch {
        context: String,
        size: u64,
        expected: u64,
        backtrace: Backtrace,
    },

    #[snafu(display("{role} metadata expired at {expires}"))]
    ExpiredMetadata {
        role: RoleType,
        expires: DateTime<Utc>,
        backtrace: Backtrace,
    },

    /// Fetched metadata carries a lower version than what we already trust.
    #[snafu(display(
        "Rollback rejected: fetched {role} version {new_version} is older than trusted version {current_version}"
    ))]
    OlderMetadata {
        role: RoleType,
        current_version: u64,
        new_version: u64,
        backtrace: Backtrace,
    },

    /// Fetched metadata does not carry the version another role said it would.
    #[snafu(display(
        "{role} metadata version {fetched_version} does not match expected version {expected_version}"
    ))]
    VersionMismatch {
        role: RoleType,
        fetched_version: u64,
        expected_version: u64,
        backtrace: Backtrace,
    },

    /// A file listed in snapshot meta went backwards relative to the trusted
    /// snapshot.
    #[snafu(display(
        "Rollback rejected: snapshot entry for '{file}' moved from version {current_version} to {new_version}"
    ))]
    MetaVersionRollback {
        file: String,
        current_version: u64,
        new_version: u64,
        backtrace: Backtrace,
    },

    #[snafu(display("Root metadata chain walked past {max} updates at version {version}"))]
    ExcessiveRootRotation {
        max: u64,
        version: u64,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to parse {role} metadata: {source}"))]
    ParseMetadata {
        role: RoleType,
        source: serde_json::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to parse trusted root metadata: {source}"))]
    ParseTrustedRoot {
        source: serde_json::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to verify {role} metadata: {source}"))]
    VerifyMetadata {
        role: RoleType,
        #[snafu(source(from(crate::schema::Error, Box::new)))]
        source: Box<crate::schema::Error>,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to verify trusted root metadata: {source}"))]
    VerifyTrustedMetadata {
        #[snafu(source(from(crate::schema::Error, Box::new)))]
        source: Box<crate::schema::Error>,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to build a target from path '{}': {source}", path.display()))]
    TargetFromPath {
        path: PathBuf,
        source: crate::schema::Error,
        backtrace: Backtrace,
    },

    /// Snapshot metadata is missing an entry the refresh requires.
    #[snafu(display("{role} metadata has no entry for '{file}'"))]
    MetaMissing {
        role: RoleType,
        file: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Target not found: '{}'", name.raw()))]
    TargetNotFound {
        name: TargetName,
        backtrace: Backtrace,
    },

    #[snafu(display("Unsafe target name '{name}': {reason}"))]
    TargetNameInvalid {
        name: String,
        reason: &'static str,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to create datastore directory '{}': {source}", path.display()))]
    DatastoreCreate {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to initialize temporary datastore: {source}"))]
    DatastoreInit {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to open datastore file '{file}': {source}"))]
    DatastoreOpen {
        file: String,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to write datastore file '{file}': {source}"))]
    DatastoreWrite {
        file: String,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to remove datastore file '{file}': {source}"))]
    DatastoreRemove {
        file: String,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to rotate datastore state: {source}"))]
    DatastoreRotate {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to serialize {what} to JSON: {source}"))]
    JsonSerialization {
        what: String,
        source: serde_json::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to serialize {role} metadata: {source}"))]
    SerializeRole {
        role: RoleType,
        source: serde_json::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to open file '{}': {source}", path.display()))]
    FileOpen {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to read file '{}': {source}", path.display()))]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to write file '{}': {source}", path.display()))]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to copy '{}' to '{}': {source}", src.display(), dst.display()))]
    FileCopy {
        src: PathBuf,
        dst: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to remove file '{}': {source}", path.display()))]
    FileRemove {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("File '{}' already exists", path.display()))]
    FileExists { path: PathBuf, backtrace: Backtrace },

    #[snafu(display("Failed to create directory '{}': {source}", path.display()))]
    DirCreate {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to walk directory tree '{}': {source}", directory.display()))]
    WalkDir {
        directory: PathBuf,
        source: walkdir::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to join '{path}' to URL '{url}': {source}"))]
    JoinUrl {
        path: String,
        url: Url,
        source: url::ParseError,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to parse URL '{url}': {source}"))]
    ParseUrl {
        url: String,
        source: url::ParseError,
        backtrace: Backtrace,
    },

    #[snafu(display("Version number overflow bumping {role} metadata"))]
    VersionOverflow {
        role: RoleType,
        backtrace: Backtrace,
    },

    /// A field that must be present by the time a repository is signed.
    #[snafu(display("Missing field in metadata: {field}"))]
    Missing {
        field: &'static str,
        backtrace: Backtrace,
    },

    #[snafu(display("Unsupported spec version '{given}', supported versions: '{supported}'"))]
    SpecVersion {
        given: String,
        supported: &'static str,
        backtrace: Backtrace,
    },

    /// The system clock reads earlier than a time we have already observed.
    #[snafu(display(
        "System time stepped backward: system time '{sys_time}', last known time '{latest_known_time}'"
    ))]
    SystemTimeSteppedBackward {
        sys_time: DateTime<Utc>,
        latest_known_time: DateTime<Utc>,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to sign message"))]
    Sign {
        #[snafu(source(from(ring::error::Unspecified, Box::new)))]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to parse signing key: {source}"))]
    KeyRejected {
        source: ring::error::KeyRejected,
        backtrace: Backtrace,
    },

    #[snafu(display("Unrecognized or unsupported signing key format"))]
    KeyUnrecognized { backtrace: Backtrace },

    #[snafu(display("Failed to load signing key from '{path}': {source}", path = path.display()))]
    KeyPairFromKeySource {
        path: PathBuf,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
        backtrace: Backtrace,
    },

    /// The root declares no keys for a role the editor must sign.
    #[snafu(display("No keys listed for {role} in root metadata"))]
    NoRoleKeys {
        role: RoleType,
        backtrace: Backtrace,
    },

    /// None of the provided signing keys are authorized for a role.
    #[snafu(display("No signing keys found for {role}"))]
    SigningKeysNotFound {
        role: RoleType,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to create temporary file in '{}': {source}", path.display()))]
    TempFileCreate {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to persist temporary file to '{}': {source}", path.display()))]
    TempFilePersist {
        path: PathBuf,
        source: tempfile::PersistError,
        backtrace: Backtrace,
    },
}

impl Error {
    /// True for errors that mean downloaded content did not match its signed
    /// length or hash. These are never retried against other mirrors.
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            Error::HashMismatch { .. } | Error::SizeMismatch { .. } | Error::MaxSizeExceeded { .. }
        )
    }
}
