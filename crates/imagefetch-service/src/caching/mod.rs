//! # Image caches
//!
//! Every image that was downloaded successfully is written to an [`ImageCache`], keyed by the
//! [`RequestKey`] of the request that produced it. Callers read images back through the
//! [`RequestLedger`](crate::ledger::RequestLedger), which never touches the network for cache
//! lookups.
//!
//! ## Cache Layers
//!
//! - [`MemoryImageCache`] keeps payloads in memory, bounded by their size in bytes. Eviction is
//!   cost based, so a few large images can push out many small ones.
//! - [`FsImageCache`] persists payloads below a cache directory. The file path is derived from a
//!   SHA256 hash of the request key, so arbitrary urls map to safe, evenly distributed paths.
//! - [`LayeredImageCache`] combines both: reads are served from memory first and fall back to the
//!   file system, promoting hits into memory. Writes go to both layers.
//!
//! The in-memory layer is always active. The file-system layer is enabled by configuring a
//! [`Config::cache_dir`](crate::config::Config::cache_dir).
//!
//! All writes are unconditional overwrites. Nothing in here does read-modify-write, so the caches
//! need no locking beyond what their backing storage provides.
//!
//! ## [`RequestKey`]
//!
//! The key is the url followed by the non-default image options, see [`RequestKey::new`] for the
//! exact format. Callers pre-populating a cache need to reproduce it exactly.

use std::fmt;
use std::io;

use bytes::Bytes;
use thiserror::Error;

mod fs;
mod layered;
mod memory;
mod request_key;
#[cfg(test)]
mod tests;

pub use fs::FsImageCache;
pub use layered::LayeredImageCache;
pub use memory::MemoryImageCache;
pub use request_key::RequestKey;

/// An error writing to or clearing an [`ImageCache`].
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backing storage failed.
    #[error("cache i/o failed")]
    Io(#[from] io::Error),
    /// The payload can never fit into the cache.
    #[error("payload of {size} bytes exceeds the cache capacity of {capacity} bytes")]
    TooLarge { size: u64, capacity: u64 },
}

/// A key/value store for downloaded images.
pub trait ImageCache: fmt::Debug + Send + Sync {
    /// A short name of this cache, used to tag metrics.
    fn name(&self) -> &'static str;

    /// Checks whether an image exists for the given key.
    fn exists(&self, key: &RequestKey) -> bool;

    /// Stores the image, replacing a previously stored one.
    fn put(&self, key: &RequestKey, data: Bytes) -> Result<(), CacheError>;

    /// Loads an image, returning `None` if it does not exist.
    fn try_get(&self, key: &RequestKey) -> Option<Bytes>;

    /// Removes an image. Removing an image that does not exist is not an error.
    fn remove(&self, key: &RequestKey) -> Result<(), CacheError>;

    /// Removes all images.
    fn clear(&self) -> Result<(), CacheError>;
}
