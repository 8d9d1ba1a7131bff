use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tempfile::NamedTempFile;

use super::{CacheError, ImageCache, RequestKey};

/// An [`ImageCache`] persisting payloads below a directory.
///
/// Every payload is written to a temporary file within the cache directory first, and then
/// atomically moved into place. Concurrent readers thus never observe partially written files.
#[derive(Debug, Clone)]
pub struct FsImageCache {
    cache_dir: PathBuf,
}

impl FsImageCache {
    /// Creates a cache rooted at `cache_dir`, creating the directory if it does not exist.
    pub fn new(cache_dir: impl Into<PathBuf>) -> io::Result<Self> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// The absolute path the payload for `key` is stored at.
    pub fn cache_path(&self, key: &RequestKey) -> PathBuf {
        self.cache_dir.join(key.cache_path())
    }

    fn tempfile(&self) -> io::Result<NamedTempFile> {
        tempfile::Builder::new()
            .prefix(".tmp")
            .tempfile_in(&self.cache_dir)
    }
}

impl ImageCache for FsImageCache {
    fn name(&self) -> &'static str {
        "fs"
    }

    fn exists(&self, key: &RequestKey) -> bool {
        self.cache_path(key).is_file()
    }

    fn put(&self, key: &RequestKey, data: Bytes) -> Result<(), CacheError> {
        let cache_path = self.cache_path(key);

        let mut temp_file = self.tempfile()?;
        temp_file.write_all(&data)?;
        temp_file.flush()?;

        persist_tempfile(temp_file, &cache_path)?;
        tracing::trace!(path = %cache_path.display(), size = data.len(), "Wrote image to cache");
        Ok(())
    }

    fn try_get(&self, key: &RequestKey) -> Option<Bytes> {
        let cache_path = self.cache_path(key);
        metric!(counter("cache.access") += 1, "cache" => self.name());

        match fs::read(&cache_path) {
            Ok(data) => {
                metric!(counter("cache.hit") += 1, "cache" => self.name());
                Some(data.into())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::error!(
                    path = %cache_path.display(),
                    error = &e as &dyn std::error::Error,
                    "Failed to read image from cache",
                );
                None
            }
        }
    }

    fn remove(&self, key: &RequestKey) -> Result<(), CacheError> {
        match fs::remove_file(self.cache_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn clear(&self) -> Result<(), CacheError> {
        match fs::remove_dir_all(&self.cache_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&self.cache_dir)?;
        Ok(())
    }
}

/// Moves `temp_file` to `cache_path`, creating parent directories as needed.
///
/// A concurrent [`ImageCache::clear`] may remove the directories we are operating in, so the
/// operations are retried a few times.
fn persist_tempfile(mut temp_file: NamedTempFile, cache_path: &Path) -> io::Result<()> {
    let parent = cache_path
        .parent()
        .ok_or_else(|| io::Error::other("no parent directory to persist image"))?;

    const MAX_RETRIES: usize = 2;
    let mut retries = 0;
    loop {
        retries += 1;

        if let Err(e) = fs::create_dir_all(parent) {
            tracing::error!(
                path = %parent.display(),
                error = &e as &dyn std::error::Error,
                "Failed to create cache directory",
            );
            if retries > MAX_RETRIES {
                return Err(e);
            }
            continue;
        }

        match temp_file.persist(cache_path) {
            Ok(_) => return Ok(()),
            Err(e) => {
                temp_file = e.file;
                let err = e.error;
                tracing::error!(
                    path = %cache_path.display(),
                    error = &err as &dyn std::error::Error,
                    "Failed to persist cache file",
                );
                if retries > MAX_RETRIES {
                    return Err(err);
                }
            }
        }
    }
}
