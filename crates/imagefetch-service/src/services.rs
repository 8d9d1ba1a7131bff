//! Provides the image services and a way to initialize them.
//!
//! [`ImageService`] wires the caches, the HTTP downloader and the
//! [`RequestLedger`](crate::ledger::RequestLedger) together according to the provided [`Config`].

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::caching::{FsImageCache, ImageCache, LayeredImageCache, MemoryImageCache};
use crate::config::Config;
use crate::download::{Connectivity, HttpImageDownloader, ImageDownloader};
use crate::ledger::RequestLedger;

pub struct ImageService {
    pub config: Config,
    pub cache: Arc<LayeredImageCache>,
    pub downloader: Arc<HttpImageDownloader>,
    pub ledger: RequestLedger,
}

impl ImageService {
    /// Creates the services, spawning downloads onto `io_pool`.
    pub fn new(config: Config, io_pool: tokio::runtime::Handle) -> Result<Self> {
        let downloader =
            HttpImageDownloader::from_config(&config).context("failed to create http client")?;
        Self::with_downloader(config, io_pool, downloader)
    }

    /// Like [`new`](Self::new), but checks `connectivity` before each download.
    pub fn with_connectivity(
        config: Config,
        io_pool: tokio::runtime::Handle,
        connectivity: Arc<dyn Connectivity>,
    ) -> Result<Self> {
        let downloader = HttpImageDownloader::from_config(&config)
            .context("failed to create http client")?
            .with_connectivity(connectivity);
        Self::with_downloader(config, io_pool, downloader)
    }

    fn with_downloader(
        config: Config,
        io_pool: tokio::runtime::Handle,
        downloader: HttpImageDownloader,
    ) -> Result<Self> {
        let memory = MemoryImageCache::from_config(&config.caches.in_memory);
        let fs = match config.cache_dir("images") {
            Some(dir) => Some(FsImageCache::new(&dir).with_context(|| {
                format!("failed to create cache directory {}", dir.display())
            })?),
            None => None,
        };
        let cache = Arc::new(LayeredImageCache::new(memory, fs));
        let downloader = Arc::new(downloader);

        let ledger = RequestLedger::new(
            config.ledger,
            cache.clone() as Arc<dyn ImageCache>,
            downloader.clone() as Arc<dyn ImageDownloader>,
            io_pool,
        )
        .context("invalid ledger configuration")?;

        Ok(Self {
            config,
            cache,
            downloader,
            ledger,
        })
    }
}
