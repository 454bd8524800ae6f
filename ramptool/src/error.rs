#![allow(clippy::default_trait_access)]

use rampart::schema::RoleType;
use snafu::{Backtrace, Snafu};
use std::path::PathBuf;

pub(crate) type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum Error {
    #[snafu(display("Failed to copy targets from {} to {}: {}", indir.display(), outdir.display(), source))]
    CopyTargets {
        indir: PathBuf,
        outdir: PathBuf,
        source: rampart::error::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Cannot determine current directory: {}", source))]
    CurrentDir {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Date argument '{}' is invalid: {}", input, msg))]
    DateArgInvalid { input: String, msg: String },

    #[snafu(display(
        "Date argument had count '{}' that failed to parse as integer: {}",
        input,
        source
    ))]
    DateArgCount {
        input: String,
        source: std::num::ParseIntError,
    },

    #[snafu(display("Failed to create repository editor from root '{}': {}", path.display(), source))]
    EditorCreate {
        path: PathBuf,
        source: rampart::error::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to open {}: {}", path.display(), source))]
    FileOpen {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to parse {}: {}", path.display(), source))]
    FileParseJson {
        path: PathBuf,
        source: serde_json::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to copy {} to {}: {}", source.file.path().display(), path.display(), source.error))]
    FilePersist {
        path: PathBuf,
        source: tempfile::PersistError,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to create temporary file in {}: {}", path.display(), source))]
    FileTempCreate {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to write to {}: {}", path.display(), source))]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to write to {}: {}", path.display(), source))]
    FileWriteJson {
        path: PathBuf,
        source: serde_json::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to initialize global thread pool: {}", source))]
    InitializeThreadPool {
        source: rayon::ThreadPoolBuildError,
        backtrace: Backtrace,
    },

    #[snafu(display("Invalid target name: {}", source))]
    InvalidTargetName {
        source: rampart::error::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Duplicate key ID: {}", key_id))]
    KeyDuplicate {
        key_id: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to calculate key ID: {}", source))]
    KeyId {
        source: rampart::schema::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Unable to load key pair from key source: {}", source))]
    KeyPairFromKeySource {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to initialize logger: {}", source))]
    Logger {
        source: log::SetLoggerError,
        backtrace: Backtrace,
    },

    #[snafu(display("Mirror arguments are uneven: {} metadata URLs, {} targets URLs", metadata, targets))]
    MirrorArgMismatch {
        metadata: usize,
        targets: usize,
        backtrace: Backtrace,
    },

    #[snafu(display("Path {} does not have a file name", path.display()))]
    NoFileName { path: PathBuf, backtrace: Backtrace },

    #[snafu(display("Path {} does not have a parent", path.display()))]
    PathParent { path: PathBuf, backtrace: Backtrace },

    #[snafu(display("Path {} is not valid UTF-8", path.display()))]
    PathUtf8 { path: PathBuf, backtrace: Backtrace },

    #[snafu(display("Failed to load repository: {}", source))]
    RepoLoad {
        source: rampart::error::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to start async runtime: {}", source))]
    Runtime {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to sign repository: {}", source))]
    SignRepo {
        source: rampart::error::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to sign root at '{}': {}", path.display(), source))]
    SignRoot {
        path: PathBuf,
        source: rampart::error::Error,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "root.json requires at least {} signatures for the root role, found {}",
        threshold,
        signature_count
    ))]
    SignatureRoot {
        threshold: u64,
        signature_count: usize,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to hash target at '{}': {}", path.display(), source))]
    TargetFromPath {
        path: PathBuf,
        source: rampart::schema::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to sync targets from repository: {}", source))]
    TargetSync {
        source: rampart::error::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Unrecognized URL scheme \"{}\"", scheme))]
    UnrecognizedScheme {
        scheme: String,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "role '{}' requires {} keys, only {} are listed in root.json",
        role,
        threshold,
        actual
    ))]
    UnstableRoot {
        role: RoleType,
        threshold: u64,
        actual: usize,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to parse URL \"{}\": {}", url, source))]
    UrlParse {
        url: String,
        source: url::ParseError,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to walk directory tree '{}': {}", directory.display(), source))]
    WalkDir {
        directory: PathBuf,
        source: walkdir::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to write repository to {}: {}", directory.display(), source))]
    WriteRepo {
        directory: PathBuf,
        source: rampart::error::Error,
        backtrace: Backtrace,
    },
}
