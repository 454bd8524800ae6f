use crate::error::{self, Result};
use crate::io::max_size_adapter;
use crate::transport::{IntoVec, Transport, TransportErrorKind};
use crate::Mirror;
use log::{debug, warn};
use snafu::ResultExt;
use std::time::Duration;

/// Fetches a metadata file from the first mirror that can serve it, trying
/// each mirror in order.
///
/// A mirror that reports the file as absent is remembered but not treated as
/// a failure; if *every* mirror says the file is absent the result is
/// [`Error::MetadataNotFound`], which ends the root version chain cleanly.
/// Any other mix of failures across all mirrors yields
/// [`Error::NoWorkingMirrors`]. Each attempt is bounded by `timeout`.
///
/// Only transport-level failures rotate to the next mirror. Verification of
/// the returned bytes (signatures, hashes, lengths) happens in the caller; a
/// mirror serving corrupted-but-reachable content is an attack signal, not a
/// reason to quietly try its neighbor.
pub(crate) async fn fetch_mirrors(
    transport: &dyn Transport,
    mirrors: &[Mirror],
    file: &str,
    max_size: u64,
    specifier: &'static str,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let mut errors = Vec::new();
    let mut not_found = 0;

    for mirror in mirrors {
        let url = mirror
            .metadata_base_url
            .join(file)
            .context(error::JoinUrlSnafu {
                path: file,
                url: mirror.metadata_base_url.clone(),
            })?;

        let attempt = tokio::time::timeout(timeout, async {
            let stream = transport.fetch(url.clone()).await?;
            max_size_adapter(stream, url.clone(), max_size, specifier)
                .into_vec()
                .await
        })
        .await;

        match attempt {
            Ok(Ok(bytes)) => return Ok(bytes),
            Ok(Err(e)) => {
                if matches!(e.kind, TransportErrorKind::FileNotFound) {
                    debug!("'{file}' not found on mirror {}", mirror.metadata_base_url);
                    not_found += 1;
                } else {
                    warn!("mirror {} failed for '{file}': {e}", mirror.metadata_base_url);
                    errors.push(e);
                }
            }
            Err(_elapsed) => {
                warn!("mirror {} timed out fetching '{file}'", mirror.metadata_base_url);
                errors.push(crate::TransportError::new(
                    TransportErrorKind::Timeout,
                    &url,
                    format!("fetch did not complete within {timeout:?}"),
                ));
            }
        }
    }

    if errors.is_empty() && not_found > 0 {
        error::MetadataNotFoundSnafu { file }.fail()
    } else {
        error::NoWorkingMirrorsSnafu { file, errors }.fail()
    }
}
