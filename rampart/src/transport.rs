use async_trait::async_trait;
use bytes::Bytes;
use dyn_clone::DynClone;
use futures::FutureExt;
use futures_core::stream::BoxStream;
use percent_encoding::percent_decode_str;
use snafu::Snafu;
use std::fmt::Debug;
use std::io::ErrorKind;
use tokio_util::io::ReaderStream;
use url::Url;

/// The stream of bytes that a [`Transport`] `fetch` yields.
pub type TransportStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// A trait to abstract over the method/protocol by which files are obtained.
///
/// The trait hides the underlying types involved by returning the stream as a
/// [`TransportStream`] and by requiring concrete type [`TransportError`] as the error type.
#[async_trait]
pub trait Transport: Debug + DynClone + Send + Sync {
    /// Opens a stream of bytes for the file specified by `url`.
    async fn fetch(&self, url: Url) -> Result<TransportStream, TransportError>;
}

// Implement `Clone` for `Transport` trait objects.
dyn_clone::clone_trait_object!(Transport);

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The kind of error that the transport object experienced during `fetch`.
///
/// Some client operations need to know whether a [`Transport`] failure means the file does not
/// exist on the mirror. In particular, walking the chain of root metadata versions ends at the
/// first version a mirror reports as absent, and a mirror that answers "not found" for a file
/// is treated differently from a mirror that cannot be reached at all.
#[derive(Debug, Copy, Clone)]
#[non_exhaustive]
pub enum TransportErrorKind {
    /// The trait does not handle the URL scheme named in `String`. e.g. `file://` or `http://`.
    UnsupportedUrlScheme,
    /// The file cannot be found.
    FileNotFound,
    /// The fetch did not complete within the configured timeout. Retryable against other
    /// mirrors.
    Timeout,
    /// The transport failed for any other reason, e.g. IO error, HTTP broken pipe, etc.
    Other,
}

/// The error type that [`Transport`] `fetch` returns.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
#[snafu(display("{:?} error fetching '{}': {}", kind, url, source))]
pub struct TransportError {
    /// The kind of error that occurred.
    pub kind: TransportErrorKind,
    /// The URL that the transport was trying to fetch.
    pub url: String,
    /// The underlying error that occurred.
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl TransportError {
    /// Creates a new [`TransportError`].
    pub fn new<S, E>(kind: TransportErrorKind, url: S, source_error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
        S: AsRef<str>,
    {
        Self {
            kind,
            url: url.as_ref().into(),
            source: source_error.into(),
        }
    }

    /// Creates a [`TransportError`] for reporting an unhandled URL type.
    pub fn unsupported_scheme<S: AsRef<str>>(url: S) -> Self {
        TransportError::new(
            TransportErrorKind::UnsupportedUrlScheme,
            url,
            "Transport cannot handle the given URL scheme.".to_string(),
        )
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Provides a [`Transport`] for local files.
#[derive(Debug, Clone, Copy)]
pub struct FilesystemTransport;

#[async_trait]
impl Transport for FilesystemTransport {
    async fn fetch(&self, url: Url) -> Result<TransportStream, TransportError> {
        if url.scheme() != "file" {
            return Err(TransportError::unsupported_scheme(url));
        }

        // `Url::path` does not decode percent-encoding, but the filesystem
        // stores the unencoded names.
        let path = percent_decode_str(url.path()).decode_utf8_lossy().into_owned();
        let f = tokio::fs::File::open(&path).await.map_err(|e| {
            let kind = match e.kind() {
                ErrorKind::NotFound => TransportErrorKind::FileNotFound,
                _ => TransportErrorKind::Other,
            };
            TransportError::new(kind, &url, e)
        })?;

        use futures::StreamExt;
        Ok(ReaderStream::new(f)
            .map(move |next| {
                next.map_err(|e| TransportError::new(TransportErrorKind::Other, &url, e))
            })
            .boxed())
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// A Transport that provides support for both local files and, if the `http` feature is enabled,
/// HTTP-transported files.
#[derive(Debug, Clone)]
pub struct DefaultTransport {
    file: FilesystemTransport,
    #[cfg(feature = "http")]
    http: crate::HttpTransport,
}

impl Default for DefaultTransport {
    fn default() -> Self {
        Self {
            file: FilesystemTransport,
            #[cfg(feature = "http")]
            http: crate::HttpTransport::default(),
        }
    }
}

impl DefaultTransport {
    /// Creates a new `DefaultTransport`. Same as `default()`.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for DefaultTransport {
    async fn fetch(&self, url: Url) -> Result<TransportStream, TransportError> {
        match url.scheme() {
            "file" => self.file.fetch(url).await,
            "http" | "https" => self.handle_http(url).await,
            _ => Err(TransportError::unsupported_scheme(url)),
        }
    }
}

impl DefaultTransport {
    #[cfg(not(feature = "http"))]
    #[allow(clippy::unused_self, clippy::unused_async)]
    async fn handle_http(&self, url: Url) -> Result<TransportStream, TransportError> {
        Err(TransportError::new(
            TransportErrorKind::UnsupportedUrlScheme,
            url,
            "The library was not compiled with the http feature enabled.",
        ))
    }

    #[cfg(feature = "http")]
    async fn handle_http(&self, url: Url) -> Result<TransportStream, TransportError> {
        self.http.fetch(url).await
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Collect a fetched stream into memory.
pub(crate) trait IntoVec<E> {
    async fn into_vec(self) -> Result<Vec<u8>, E>;
}

impl IntoVec<TransportError> for TransportStream {
    async fn into_vec(self) -> Result<Vec<u8>, TransportError> {
        use futures::TryStreamExt;
        self.try_fold(Vec::new(), |mut acc, bytes| {
            acc.extend_from_slice(&bytes);
            futures::future::ready(Ok(acc)).boxed()
        })
        .await
    }
}
