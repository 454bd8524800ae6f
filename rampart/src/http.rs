//! The `http` module provides an HTTP [`Transport`] built on `reqwest`.

use crate::transport::{Transport, TransportError, TransportErrorKind, TransportStream};
use async_trait::async_trait;
use futures::TryStreamExt;
use log::trace;
use reqwest::{Client, StatusCode};
use url::Url;

/// An HTTP [`Transport`] using a shared `reqwest` client.
///
/// Timeouts are not configured here; the repository loader bounds each fetch with its own
/// deadline so that file and HTTP transports behave the same way under a stalled mirror.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Creates a new `HttpTransport` with a default client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new `HttpTransport` using the given `reqwest` client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: Url) -> Result<TransportStream, TransportError> {
        trace!("fetching {url}");
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| classify(&url, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(TransportError::new(
                TransportErrorKind::FileNotFound,
                &url,
                format!("HTTP status {}", response.status()),
            ));
        }
        let response = response.error_for_status().map_err(|e| classify(&url, e))?;

        Ok(Box::pin(response.bytes_stream().map_err(move |e| {
            TransportError::new(TransportErrorKind::Other, &url, e)
        })))
    }
}

fn classify(url: &Url, e: reqwest::Error) -> TransportError {
    let kind = if e.is_timeout() {
        TransportErrorKind::Timeout
    } else if e.status() == Some(StatusCode::NOT_FOUND) {
        TransportErrorKind::FileNotFound
    } else {
        TransportErrorKind::Other
    };
    TransportError::new(kind, url, e)
}
