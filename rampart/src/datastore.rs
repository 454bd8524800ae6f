use crate::error::{self, Result};
use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;
use snafu::{ensure, ResultExt};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// The name of the subdirectory that holds the previous committed metadata
/// set, kept so a failed refresh can be diagnosed against the state it would
/// have replaced.
const PREVIOUS_DIR: &str = "previous";

/// `Datastore` persists trusted metadata files between refreshes.
///
/// A refresh verifies everything in memory first, then commits the whole
/// metadata set in one call; partial downloads never touch the store.
#[derive(Debug, Clone)]
pub(crate) struct Datastore {
    /// A lock around retrieving the datastore path.
    path_lock: Arc<RwLock<DatastorePath>>,
    /// A lock to treat the `system_time` function as a critical section.
    time_lock: Arc<Mutex<()>>,
}

impl Datastore {
    pub(crate) fn new(path: Option<PathBuf>) -> Result<Self> {
        Ok(Self {
            path_lock: Arc::new(RwLock::new(match path {
                None => DatastorePath::TempDir(TempDir::new().context(error::DatastoreInitSnafu)?),
                Some(p) => DatastorePath::Path(p),
            })),
            time_lock: Arc::new(Mutex::new(())),
        })
    }

    async fn read(&self) -> RwLockReadGuard<'_, DatastorePath> {
        self.path_lock.read().await
    }

    async fn write(&self) -> RwLockWriteGuard<'_, DatastorePath> {
        self.path_lock.write().await
    }

    /// Get contents of a file in the datastore. This function is thread safe.
    pub(crate) async fn bytes(&self, file: &str) -> Result<Option<Vec<u8>>> {
        let lock = &self.read().await;
        read_optional(&lock.path().join(file), file).await
    }

    /// Get contents of a file in the previous committed metadata set.
    pub(crate) async fn previous_bytes(&self, file: &str) -> Result<Option<Vec<u8>>> {
        let lock = &self.read().await;
        read_optional(&lock.path().join(PREVIOUS_DIR).join(file), file).await
    }

    /// Writes a JSON file in the datastore. This function is thread safe.
    pub(crate) async fn create<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        let lock = &self.write().await;
        let path = lock.path().join(file);
        let bytes = serde_json::to_vec(value).with_context(|_| error::JsonSerializationSnafu {
            what: format!("{file} in datastore"),
        })?;
        tokio::fs::write(&path, bytes)
            .await
            .context(error::DatastoreWriteSnafu { file })
    }

    /// Commits a verified metadata set in one critical section.
    ///
    /// Files that are about to be replaced are first moved into the
    /// `previous/` subdirectory, so the store always holds either the old
    /// complete set or the new complete set alongside its predecessor.
    pub(crate) async fn commit(&self, files: &[(&str, Vec<u8>)]) -> Result<()> {
        let lock = &self.write().await;
        let base = lock.path();
        let previous = base.join(PREVIOUS_DIR);
        tokio::fs::create_dir_all(&previous)
            .await
            .context(error::DatastoreRotateSnafu)?;

        for (file, _) in files {
            let current = base.join(file);
            match tokio::fs::rename(&current, previous.join(file)).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err).context(error::DatastoreRotateSnafu),
            }
        }

        for (file, bytes) in files {
            debug!("committing '{file}' to datastore");
            tokio::fs::write(base.join(file), bytes)
                .await
                .context(error::DatastoreWriteSnafu { file: *file })?;
        }
        Ok(())
    }

    /// Deletes a file from the datastore. This function is thread safe.
    pub(crate) async fn remove(&self, file: &str) -> Result<()> {
        let lock = self.write().await;
        let path = lock.path().join(file);
        debug!("removing '{}'", path.display());
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) => match err.kind() {
                ErrorKind::NotFound => Ok(()),
                _ => Err(err).context(error::DatastoreRemoveSnafu { file }),
            },
        }
    }

    /// Ensures that system time has not stepped backward since it was last sampled. This function
    /// is protected by a lock guard to ensure thread safety.
    pub(crate) async fn system_time(&self) -> Result<DateTime<Utc>> {
        // Treat this function as a critical section. This lock is not used for anything else.
        let lock = self.time_lock.lock().await;

        let file = "latest_known_time.json";
        // Load the latest known system time, if it exists
        let poss_latest_known_time = self
            .bytes(file)
            .await?
            .map(|b| serde_json::from_slice::<DateTime<Utc>>(&b));

        // Get 'current' system time
        let sys_time = Utc::now();

        if let Some(Ok(latest_known_time)) = poss_latest_known_time {
            // Make sure the sampled system time did not go back in time
            ensure!(
                sys_time >= latest_known_time,
                error::SystemTimeSteppedBackwardSnafu {
                    sys_time,
                    latest_known_time
                }
            );
        }
        // Store the latest known time
        // Serializes RFC3339 time string and store to datastore
        self.create(file, &sys_time).await?;

        // Explicitly drop the lock to avoid any compiler optimization.
        drop(lock);
        Ok(sys_time)
    }
}

async fn read_optional(path: &Path, file: &str) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) => match err.kind() {
            ErrorKind::NotFound => Ok(None),
            _ => Err(err).context(error::DatastoreOpenSnafu { file }),
        },
    }
}

/// Because `TempDir` is an RAII object, we need to hold on to it. This private enum allows us to
/// hold either a `TempDir` or a `PathBuf` depending on whether or not the user wants to manage the
/// directory.
#[derive(Debug)]
enum DatastorePath {
    /// Path to a user-managed directory.
    Path(PathBuf),
    /// A `TempDir` that we created on the user's behalf.
    TempDir(TempDir),
}

impl DatastorePath {
    /// Provides convenient access to the underlying filepath.
    fn path(&self) -> &Path {
        match self {
            DatastorePath::Path(p) => p,
            DatastorePath::TempDir(t) => t.path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commit_rotates_previous() {
        let datastore = Datastore::new(None).unwrap();
        datastore
            .commit(&[("timestamp.json", b"one".to_vec())])
            .await
            .unwrap();
        datastore
            .commit(&[("timestamp.json", b"two".to_vec())])
            .await
            .unwrap();

        assert_eq!(
            datastore.bytes("timestamp.json").await.unwrap().unwrap(),
            b"two"
        );
        assert_eq!(
            datastore
                .previous_bytes("timestamp.json")
                .await
                .unwrap()
                .unwrap(),
            b"one"
        );
    }

    #[tokio::test]
    async fn system_time_is_monotonic() {
        let datastore = Datastore::new(None).unwrap();
        let first = datastore.system_time().await.unwrap();
        let second = datastore.system_time().await.unwrap();
        assert!(second >= first);
    }
}
