//! Private keys are provided as paths or `file://` URLs.
//!
//! This module parses a key source command line parameter as a URL, relative
//! to `file://$PWD`, then matches the URL scheme against ones we understand.
//! Only local files are supported; other schemes are rejected so that a typo
//! fails loudly instead of being treated as a relative path.

use crate::error::{self, Error};
use rampart::key_source::{KeySource, LocalKeySource};
use snafu::ResultExt;
use std::path::PathBuf;
use url::Url;

/// Parses a user-specified source of signing keys.
///
/// Users are welcome to add their own sources of keys by implementing the
/// `KeySource` trait in the `rampart` library and extending this parser.
pub(crate) fn parse_key_source(input: &str) -> std::result::Result<Box<dyn KeySource>, Error> {
    let pwd_url = Url::from_directory_path(std::env::current_dir().context(error::CurrentDirSnafu)?)
        .expect("expected current directory to be absolute");
    let url = Url::options()
        .base_url(Some(&pwd_url))
        .parse(input)
        .context(error::UrlParseSnafu { url: input })?;
    match url.scheme() {
        "file" => Ok(Box::new(LocalKeySource {
            path: PathBuf::from(url.path()),
        })),
        _ => error::UnrecognizedSchemeSnafu {
            scheme: url.scheme(),
        }
        .fail(),
    }
}
