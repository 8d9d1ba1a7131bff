use std::fmt::{self, Write};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::types::ImageOptions;

/// The identity of an image request.
///
/// Used both to deduplicate requests in the [`RequestLedger`](crate::ledger::RequestLedger) and as
/// the key images are cached under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(Arc<str>);

impl RequestKey {
    /// Derives the key for an image `url` rendered with `options`.
    ///
    /// The key is the url, followed by `w={width}` if a width is set, `h={height}` if a height is
    /// set and `mode={mode}` if the resize mode is not the default, in exactly that order and
    /// without any separators.
    pub fn new(url: &str, options: &ImageOptions) -> Self {
        let mut key = String::with_capacity(url.len() + 32);
        key.push_str(url);
        if let Some(width) = options.width {
            key.push_str("w=");
            key.push_str(&width.to_string());
        }
        if let Some(height) = options.height {
            key.push_str("h=");
            key.push_str(&height.to_string());
        }
        if !options.resize_mode.is_default() {
            key.push_str("mode=");
            key.push_str(options.resize_mode.as_str());
        }
        Self(key.into())
    }

    /// Wraps an already derived key.
    pub fn from_raw(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the relative path for this key.
    ///
    /// The relative path is a sha-256 hash hex-formatted like so:
    /// `aa/bbccdd/eeff...`
    pub fn cache_path(&self) -> String {
        let hash = Sha256::digest(self.0.as_bytes());

        let mut path = String::with_capacity(64 + 2);
        for (i, b) in hash.iter().enumerate() {
            if i == 1 || i == 4 {
                path.push('/');
            }
            // writing into a `String` can not fail
            let _ = write!(path, "{b:02x}");
        }
        path
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RequestKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
