use bytes::Bytes;

use super::{CacheError, FsImageCache, ImageCache, MemoryImageCache, RequestKey};

/// An [`ImageCache`] with a [`MemoryImageCache`] in front of an optional [`FsImageCache`].
///
/// Reads that miss the memory layer fall through to the file system and promote the payload into
/// memory. Writes go to both layers, and the file-system layer is authoritative: a payload that is
/// too large for memory is still cached successfully.
#[derive(Debug, Clone)]
pub struct LayeredImageCache {
    memory: MemoryImageCache,
    fs: Option<FsImageCache>,
}

impl LayeredImageCache {
    pub fn new(memory: MemoryImageCache, fs: Option<FsImageCache>) -> Self {
        Self { memory, fs }
    }

    pub fn memory(&self) -> &MemoryImageCache {
        &self.memory
    }

    pub fn fs(&self) -> Option<&FsImageCache> {
        self.fs.as_ref()
    }
}

impl ImageCache for LayeredImageCache {
    fn name(&self) -> &'static str {
        "layered"
    }

    fn exists(&self, key: &RequestKey) -> bool {
        self.memory.exists(key) || self.fs.as_ref().is_some_and(|fs| fs.exists(key))
    }

    fn put(&self, key: &RequestKey, data: Bytes) -> Result<(), CacheError> {
        let Some(fs) = &self.fs else {
            return self.memory.put(key, data);
        };

        fs.put(key, data.clone())?;
        if let Err(e) = self.memory.put(key, data) {
            tracing::debug!(%key, error = &e as &dyn std::error::Error, "Skipping memory cache");
            // make sure no outdated payload shadows the one we just wrote
            self.memory.remove(key)?;
        }
        Ok(())
    }

    fn try_get(&self, key: &RequestKey) -> Option<Bytes> {
        if let Some(data) = self.memory.try_get(key) {
            return Some(data);
        }

        let data = self.fs.as_ref()?.try_get(key)?;
        // promotion is best effort, an oversized payload is simply served from disk
        let _ = self.memory.put(key, data.clone());
        Some(data)
    }

    fn remove(&self, key: &RequestKey) -> Result<(), CacheError> {
        self.memory.remove(key)?;
        if let Some(fs) = &self.fs {
            fs.remove(key)?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.memory.clear()?;
        if let Some(fs) = &self.fs {
            fs.clear()?;
        }
        Ok(())
    }
}
