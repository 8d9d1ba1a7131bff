use bytes::Bytes;

use crate::config::InMemoryCacheConfig;

use super::{CacheError, ImageCache, RequestKey};

type InMemoryCache = moka::sync::Cache<RequestKey, Bytes>;

/// An [`ImageCache`] keeping payloads in memory.
///
/// The capacity is given in bytes, and every entry is weighed by the size of its payload plus its
/// key.
#[derive(Clone)]
pub struct MemoryImageCache {
    cache: InMemoryCache,
    capacity: u64,
}

impl std::fmt::Debug for MemoryImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryImageCache")
            .field("capacity", &self.capacity)
            .field("entry_count", &self.cache.entry_count())
            .field("weighted_size", &self.cache.weighted_size())
            .finish()
    }
}

impl MemoryImageCache {
    pub fn new(capacity: u64) -> Self {
        let cache = InMemoryCache::builder()
            .max_capacity(capacity)
            .name("images")
            .weigher(|k, v| entry_weight(k, v))
            .build();

        Self { cache, capacity }
    }

    pub fn from_config(config: &InMemoryCacheConfig) -> Self {
        Self::new(config.capacity)
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

fn entry_weight(key: &RequestKey, value: &Bytes) -> u32 {
    (key.as_str().len() + value.len())
        .try_into()
        .unwrap_or(u32::MAX)
}

impl ImageCache for MemoryImageCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn exists(&self, key: &RequestKey) -> bool {
        self.cache.contains_key(key)
    }

    fn put(&self, key: &RequestKey, data: Bytes) -> Result<(), CacheError> {
        let size = u64::from(entry_weight(key, &data));
        if size > self.capacity {
            return Err(CacheError::TooLarge {
                size,
                capacity: self.capacity,
            });
        }

        self.cache.insert(key.clone(), data);
        Ok(())
    }

    fn try_get(&self, key: &RequestKey) -> Option<Bytes> {
        let item = self.cache.get(key);
        metric!(counter("cache.access") += 1, "cache" => self.name());
        if item.is_some() {
            metric!(counter("cache.hit") += 1, "cache" => self.name());
        }
        item
    }

    fn remove(&self, key: &RequestKey) -> Result<(), CacheError> {
        self.cache.invalidate(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.cache.invalidate_all();
        Ok(())
    }
}
