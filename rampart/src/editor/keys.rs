//! Matches the caller's signing keys against the key IDs a root declares.

use crate::error::Result;
use crate::key_source::KeySource;
use crate::schema::decoded::{Decoded, Hex};
use crate::schema::Root;
use crate::sign::Sign;
use log::warn;
use std::collections::HashMap;

/// Resolves each provided key source against the keys the root trusts,
/// returning the usable signing keys by key ID. Key sources that fail to load
/// or that the root does not list are skipped with a warning; whether the
/// surviving set is enough to sign anything is the caller's judgment to make.
pub(crate) fn get_root_keys(
    root: &Root,
    keys: &[Box<dyn KeySource>],
) -> Result<HashMap<Decoded<Hex>, Box<dyn Sign>>> {
    let mut root_keys = HashMap::new();

    for source in keys {
        let key_pair = match source.as_sign() {
            Ok(key_pair) => key_pair,
            Err(e) => {
                warn!("skipping unusable key source {source:?}: {e}");
                continue;
            }
        };
        if let Some(key_id) = root.key_id(key_pair.as_ref()) {
            root_keys.insert(key_id, key_pair);
        } else {
            warn!("key source {source:?} is not listed in root metadata");
        }
    }
    Ok(root_keys)
}
